//! DNS message decoding and in-place header edits.
//!
//! Decoding never keeps a borrow of the input: a [`DnsPacket`] holds owned
//! names and byte offsets into the buffer it came from. Edits take the buffer
//! as `&mut [u8]` for the duration of a single call.

use std::net::Ipv4Addr;

use crate::error::{Error, Result};

pub const HEADER_LEN: usize = 12;

/// Host address record.
pub const TYPE_A: u16 = 1;
pub const CLASS_IN: u16 = 1;

/// Compression pointer to the first question name (offset 12).
pub const NAME_POINTER: u16 = 0xC00C;

const MAX_POINTER_HOPS: usize = 16;

const FLAG_QR: u16 = 0x8000;
const FLAG_RA: u16 = 0x0080;
const MASK_OPCODE_RD: u16 = 0x7900;
const MASK_RCODE: u16 = 0x000F;

/// The fixed 12-byte DNS header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DnsHeader {
    pub id: u16,
    pub flags: u16,
    pub question_count: u16,
    pub answer_count: u16,
    pub authority_count: u16,
    pub additional_count: u16,
}

impl DnsHeader {
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < HEADER_LEN {
            return Err(Error::Decode("header truncated"));
        }
        let word = |i: usize| u16::from_be_bytes([data[i], data[i + 1]]);

        Ok(Self {
            id: word(0),
            flags: word(2),
            question_count: word(4),
            answer_count: word(6),
            authority_count: word(8),
            additional_count: word(10),
        })
    }

    pub fn is_response(&self) -> bool {
        self.flags & FLAG_QR != 0
    }

    /// Overwrite the transaction ID in both the header and `buf`.
    pub fn set_id(&mut self, buf: &mut [u8], id: u16) {
        self.id = id;
        buf[0..2].copy_from_slice(&id.to_be_bytes());
    }

    /// Overwrite the answer, authority and additional counts.
    pub fn set_record_counts(&mut self, buf: &mut [u8], answers: u16, authority: u16, additional: u16) {
        self.answer_count = answers;
        self.authority_count = authority;
        self.additional_count = additional;
        buf[6..8].copy_from_slice(&answers.to_be_bytes());
        buf[8..10].copy_from_slice(&authority.to_be_bytes());
        buf[10..12].copy_from_slice(&additional.to_be_bytes());
    }

    /// Turn a query header into a successful response header.
    ///
    /// Keeps the opcode and RD bit, sets QR and RA, clears everything else.
    pub fn mark_response(&mut self, buf: &mut [u8]) {
        self.flags = (self.flags & MASK_OPCODE_RD) | FLAG_QR | FLAG_RA;
        buf[2..4].copy_from_slice(&self.flags.to_be_bytes());
    }

    pub fn rcode(&self) -> u16 {
        self.flags & MASK_RCODE
    }

    /// Report success, leaving the other flags as they are.
    pub fn clear_rcode(&mut self, buf: &mut [u8]) {
        self.flags &= !MASK_RCODE;
        buf[2..4].copy_from_slice(&self.flags.to_be_bytes());
    }
}

/// A DNS question section entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Question {
    pub domain: String,
    pub qtype: u16,
    pub qclass: u16,
    /// Offset of the question from the start of the message.
    pub offset: usize,
    /// Encoded length of the question, name plus type and class.
    pub length: usize,
}

impl Question {
    /// Offset of the first byte after this question.
    pub fn end(&self) -> usize {
        self.offset + self.length
    }
}

/// A DNS resource record from the answer section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resource {
    pub rtype: u16,
    pub class: u16,
    pub ttl: u32,
    pub data: Vec<u8>,
}

/// A decoded DNS message.
#[derive(Debug, Clone)]
pub struct DnsPacket {
    pub header: DnsHeader,
    pub questions: Vec<Question>,
    pub answers: Vec<Resource>,
    /// Length of the message in its buffer.
    pub size: usize,
}

impl DnsPacket {
    /// Decode a DNS message from raw bytes.
    ///
    /// Questions and answers are decoded; authority and additional records are
    /// left untouched in the buffer.
    pub fn decode(data: &[u8]) -> Result<Self> {
        let header = DnsHeader::parse(data)?;
        let mut pos = HEADER_LEN;

        let mut questions = Vec::with_capacity(header.question_count.min(4) as usize);
        for _ in 0..header.question_count {
            let offset = pos;
            let (domain, after_name) = read_name(data, pos)?;
            let fixed = data
                .get(after_name..after_name + 4)
                .ok_or(Error::Decode("question truncated"))?;
            questions.push(Question {
                domain,
                qtype: u16::from_be_bytes([fixed[0], fixed[1]]),
                qclass: u16::from_be_bytes([fixed[2], fixed[3]]),
                offset,
                length: after_name + 4 - offset,
            });
            pos = after_name + 4;
        }

        let mut answers = Vec::with_capacity(header.answer_count.min(16) as usize);
        for _ in 0..header.answer_count {
            let (_, after_name) = read_name(data, pos)?;
            let fixed = data
                .get(after_name..after_name + 10)
                .ok_or(Error::Decode("record truncated"))?;
            let rdlength = u16::from_be_bytes([fixed[8], fixed[9]]) as usize;
            let rdata_start = after_name + 10;
            let rdata = data
                .get(rdata_start..rdata_start + rdlength)
                .ok_or(Error::Decode("record data truncated"))?;
            answers.push(Resource {
                rtype: u16::from_be_bytes([fixed[0], fixed[1]]),
                class: u16::from_be_bytes([fixed[2], fixed[3]]),
                ttl: u32::from_be_bytes([fixed[4], fixed[5], fixed[6], fixed[7]]),
                data: rdata.to_vec(),
            });
            pos = rdata_start + rdlength;
        }

        Ok(Self {
            header,
            questions,
            answers,
            size: data.len(),
        })
    }

    pub fn first_question(&self) -> Option<&Question> {
        self.questions.first()
    }

    /// Address from the first A record in the answer section.
    pub fn first_a_record(&self) -> Option<Ipv4Addr> {
        self.answers
            .iter()
            .find(|r| r.rtype == TYPE_A && r.data.len() == 4)
            .map(|r| Ipv4Addr::new(r.data[0], r.data[1], r.data[2], r.data[3]))
    }
}

/// Read a possibly compressed name starting at `start`.
///
/// Returns the dotted name and the offset just past the name as it appears at
/// `start` (a pointer counts as two bytes).
fn read_name(data: &[u8], start: usize) -> Result<(String, usize)> {
    let mut name = String::new();
    let mut pos = start;
    let mut end = None;
    let mut hops = 0;

    loop {
        let len = *data.get(pos).ok_or(Error::Decode("name truncated"))? as usize;
        match len & 0xC0 {
            0x00 if len == 0 => {
                pos += 1;
                break;
            }
            0x00 => {
                let label = data
                    .get(pos + 1..pos + 1 + len)
                    .ok_or(Error::Decode("label truncated"))?;
                if !name.is_empty() {
                    name.push('.');
                }
                name.push_str(&String::from_utf8_lossy(label));
                pos += 1 + len;
            }
            0xC0 => {
                let low = *data.get(pos + 1).ok_or(Error::Decode("pointer truncated"))? as usize;
                end.get_or_insert(pos + 2);
                hops += 1;
                if hops > MAX_POINTER_HOPS {
                    return Err(Error::Decode("name pointer loop"));
                }
                pos = ((len & 0x3F) << 8) | low;
            }
            _ => return Err(Error::Decode("unsupported label type")),
        }
    }

    Ok((name, end.unwrap_or(pos)))
}

/// Encode a standard recursive query for `domain`.
pub fn encode_query(id: u16, domain: &str, qtype: u16) -> Vec<u8> {
    let mut data = Vec::with_capacity(HEADER_LEN + domain.len() + 6);

    data.extend_from_slice(&id.to_be_bytes());
    data.extend_from_slice(&[0x01, 0x00]); // RD
    data.extend_from_slice(&[0x00, 0x01]); // QDCOUNT
    data.extend_from_slice(&[0x00; 6]); // AN, NS, AR

    encode_name(&mut data, domain);
    data.extend_from_slice(&qtype.to_be_bytes());
    data.extend_from_slice(&CLASS_IN.to_be_bytes());

    data
}

fn encode_name(buf: &mut Vec<u8>, domain: &str) {
    for label in domain.split('.').filter(|l| !l.is_empty()) {
        buf.push(label.len() as u8);
        buf.extend_from_slice(label.as_bytes());
    }
    buf.push(0);
}

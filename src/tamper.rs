//! In-place rewrite of a DNS message into a single A answer.

use std::net::Ipv4Addr;

use crate::dns::{DnsPacket, HEADER_LEN, NAME_POINTER, Resource};
use crate::error::{Error, Result};

/// Pointer, type, class, TTL, RDLENGTH and a four byte address.
pub const ANSWER_LEN: usize = 2 + 2 + 2 + 4 + 2 + 4;

/// Rewrite `packet` so that it answers its first question with `ip`.
///
/// The record is written right after the first question and its name is a
/// compression pointer to that question. Authority and additional sections
/// are dropped. `buf` must be the buffer `packet` was decoded from and may
/// extend past the current message; it is left untouched on error.
pub fn tamper(buf: &mut [u8], packet: &mut DnsPacket, ip: Ipv4Addr, ttl: u32) -> Result<()> {
    let question = packet.questions.first().ok_or(Error::NoQuestion)?;
    let start = question.end();
    let size = HEADER_LEN + question.length + ANSWER_LEN;
    let (qtype, qclass) = (question.qtype, question.qclass);

    if buf.len() < start + ANSWER_LEN {
        return Err(Error::BufferTooSmall {
            needed: start + ANSWER_LEN,
            available: buf.len(),
        });
    }

    let record = &mut buf[start..start + ANSWER_LEN];
    record[0..2].copy_from_slice(&NAME_POINTER.to_be_bytes());
    record[2..4].copy_from_slice(&qtype.to_be_bytes());
    record[4..6].copy_from_slice(&qclass.to_be_bytes());
    record[6..10].copy_from_slice(&ttl.to_be_bytes());
    record[10..12].copy_from_slice(&4u16.to_be_bytes());
    record[12..16].copy_from_slice(&ip.octets());

    packet.header.set_record_counts(buf, 1, 0, 0);
    packet.answers = vec![Resource {
        rtype: qtype,
        class: qclass,
        ttl,
        data: ip.octets().to_vec(),
    }];
    packet.size = size;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dns::{TYPE_A, encode_query};

    /// An upstream-style response with two answers and an additional record.
    fn noisy_response(domain: &str) -> Vec<u8> {
        let mut data = encode_query(0x4242, domain, TYPE_A);
        data[2] = 0x81;
        data[3] = 0x80;
        data[7] = 2;
        data[11] = 1;
        for ip in [[8, 8, 8, 8], [8, 8, 4, 4]] {
            data.extend_from_slice(&NAME_POINTER.to_be_bytes());
            data.extend_from_slice(&[0, 1, 0, 1]);
            data.extend_from_slice(&600u32.to_be_bytes());
            data.extend_from_slice(&[0, 4]);
            data.extend_from_slice(&ip);
        }
        // OPT pseudo-record
        data.extend_from_slice(&[0, 0, 41, 0x10, 0, 0, 0, 0, 0, 0, 0]);
        data
    }

    #[test]
    fn tampered_response_has_single_answer() {
        let mut buf = noisy_response("example.com");
        let mut packet = DnsPacket::decode(&buf).unwrap();
        let fake = Ipv4Addr::new(172, 25, 1, 2);

        tamper(&mut buf, &mut packet, fake, 10).unwrap();

        let decoded = DnsPacket::decode(&buf[..packet.size]).unwrap();
        assert_eq!(decoded.header.question_count, 1);
        assert_eq!(decoded.header.answer_count, 1);
        assert_eq!(decoded.header.authority_count, 0);
        assert_eq!(decoded.header.additional_count, 0);
        assert_eq!(decoded.answers.len(), 1);
        assert_eq!(decoded.answers[0].rtype, TYPE_A);
        assert_eq!(decoded.answers[0].ttl, 10);
        assert_eq!(decoded.first_a_record(), Some(fake));
        assert_eq!(decoded.questions[0].domain, "example.com");
    }

    #[test]
    fn tampered_size_is_question_plus_sixteen() {
        let mut buf = noisy_response("a.example.org");
        let mut packet = DnsPacket::decode(&buf).unwrap();
        let question_len = packet.questions[0].length;

        tamper(&mut buf, &mut packet, Ipv4Addr::new(172, 25, 0, 1), 60).unwrap();

        assert_eq!(packet.size, 12 + question_len + 16);
        assert_eq!(packet.header.answer_count, 1);
        assert_eq!(&buf[12 + question_len..12 + question_len + 2], &[0xC0, 0x0C]);
    }

    #[test]
    fn query_grows_into_spare_capacity() {
        let query = encode_query(1, "example.com", TYPE_A);
        let mut buf = vec![0u8; 512];
        buf[..query.len()].copy_from_slice(&query);
        let mut packet = DnsPacket::decode(&buf[..query.len()]).unwrap();

        tamper(&mut buf, &mut packet, Ipv4Addr::new(172, 25, 3, 4), 10).unwrap();

        let decoded = DnsPacket::decode(&buf[..packet.size]).unwrap();
        assert_eq!(decoded.first_a_record(), Some(Ipv4Addr::new(172, 25, 3, 4)));
    }

    #[test]
    fn rejects_missing_question() {
        let mut buf = vec![0u8; 64];
        let mut packet = DnsPacket::decode(&buf[..12]).unwrap();

        let err = tamper(&mut buf, &mut packet, Ipv4Addr::LOCALHOST, 10).unwrap_err();

        assert!(matches!(err, Error::NoQuestion));
    }

    #[test]
    fn rejects_short_buffer_without_writing() {
        let mut buf = encode_query(9, "example.com", TYPE_A);
        let original = buf.clone();
        let mut packet = DnsPacket::decode(&buf).unwrap();

        let err = tamper(&mut buf, &mut packet, Ipv4Addr::LOCALHOST, 10).unwrap_err();

        assert!(matches!(err, Error::BufferTooSmall { .. }));
        assert_eq!(buf, original);
        assert_eq!(packet.header.answer_count, 0);
    }
}

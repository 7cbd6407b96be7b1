//! IPv4/UDP header view over a borrowed packet buffer.

use std::net::{Ipv4Addr, SocketAddrV4};

use crate::error::{Error, Result};

pub const IPV4_HEADER_LEN: usize = 20;
pub const UDP_HEADER_LEN: usize = 8;
/// Offset of the UDP payload in a packet without IP options.
pub const DEFAULT_PAYLOAD_OFFSET: usize = IPV4_HEADER_LEN + UDP_HEADER_LEN;

const PROTO_UDP: u8 = 17;
const DEFAULT_TTL: u8 = 64;

/// Write an option-less IPv4 + UDP header template at the start of `buf`.
pub fn write_default_header(buf: &mut [u8]) {
    buf[..DEFAULT_PAYLOAD_OFFSET].fill(0);
    buf[0] = 0x45; // version 4, IHL 5
    buf[6..8].copy_from_slice(&0x4000u16.to_be_bytes()); // DF
    buf[8] = DEFAULT_TTL;
    buf[9] = PROTO_UDP;
}

/// A mutable view of an IPv4 packet carrying UDP.
///
/// `buf` may be longer than the packet; the spare bytes are room for the
/// payload to grow.
pub struct UdpPacket<'a> {
    buf: &'a mut [u8],
    header_len: usize,
}

impl<'a> UdpPacket<'a> {
    /// Validate the headers of the packet at the start of `buf`.
    pub fn new(buf: &'a mut [u8]) -> Result<Self> {
        if buf.len() < IPV4_HEADER_LEN || buf[0] >> 4 != 4 {
            return Err(Error::NotUdp);
        }
        let header_len = ((buf[0] & 0x0F) as usize) * 4;
        if header_len < IPV4_HEADER_LEN || buf.len() < header_len + UDP_HEADER_LEN {
            return Err(Error::NotUdp);
        }
        if buf[9] != PROTO_UDP {
            return Err(Error::NotUdp);
        }
        Ok(Self { buf, header_len })
    }

    /// Offset of the UDP payload within the buffer.
    pub fn payload_offset(&self) -> usize {
        self.header_len + UDP_HEADER_LEN
    }

    pub fn source(&self) -> SocketAddrV4 {
        SocketAddrV4::new(self.ip_at(12), self.word(self.header_len))
    }

    pub fn destination(&self) -> SocketAddrV4 {
        SocketAddrV4::new(self.ip_at(16), self.word(self.header_len + 2))
    }

    /// Payload length according to the UDP header, clamped to `packet_len`.
    pub fn payload_len(&self, packet_len: usize) -> usize {
        let udp_len = self.word(self.header_len + 4) as usize;
        let by_header = udp_len.saturating_sub(UDP_HEADER_LEN);
        let by_packet = packet_len.saturating_sub(self.payload_offset());
        by_header.min(by_packet)
    }

    /// The payload region including spare capacity.
    pub fn payload_mut(&mut self) -> &mut [u8] {
        let offset = self.payload_offset();
        &mut self.buf[offset..]
    }

    pub fn set_endpoints(&mut self, source: SocketAddrV4, destination: SocketAddrV4) {
        let udp = self.header_len;
        self.buf[12..16].copy_from_slice(&source.ip().octets());
        self.buf[16..20].copy_from_slice(&destination.ip().octets());
        self.buf[udp..udp + 2].copy_from_slice(&source.port().to_be_bytes());
        self.buf[udp + 2..udp + 4].copy_from_slice(&destination.port().to_be_bytes());
    }

    /// Swap source and destination, turning a request into its reply.
    pub fn swap_endpoints(&mut self) {
        let (source, destination) = (self.source(), self.destination());
        self.set_endpoints(destination, source);
    }

    /// Fix both length fields and checksums for a payload of `payload_len`
    /// bytes. Returns the total packet length.
    pub fn finalize(&mut self, payload_len: usize) -> usize {
        let udp = self.header_len;
        let udp_len = UDP_HEADER_LEN + payload_len;
        let total_len = self.header_len + udp_len;

        self.buf[2..4].copy_from_slice(&(total_len as u16).to_be_bytes());
        self.buf[10..12].fill(0);
        let ip_sum = checksum(0, &self.buf[..self.header_len]);
        self.buf[10..12].copy_from_slice(&ip_sum.to_be_bytes());

        self.buf[udp + 4..udp + 6].copy_from_slice(&(udp_len as u16).to_be_bytes());
        self.buf[udp + 6..udp + 8].fill(0);
        let mut pseudo = [0u8; 12];
        pseudo[..8].copy_from_slice(&self.buf[12..20]);
        pseudo[9] = PROTO_UDP;
        pseudo[10..12].copy_from_slice(&(udp_len as u16).to_be_bytes());
        let udp_sum = checksum(sum_words(0, &pseudo), &self.buf[udp..total_len]);
        // An all-zero UDP checksum means "none", so send the ones' complement form.
        let udp_sum = if udp_sum == 0 { 0xFFFF } else { udp_sum };
        self.buf[udp + 6..udp + 8].copy_from_slice(&udp_sum.to_be_bytes());

        total_len
    }

    fn word(&self, at: usize) -> u16 {
        u16::from_be_bytes([self.buf[at], self.buf[at + 1]])
    }

    fn ip_at(&self, at: usize) -> Ipv4Addr {
        Ipv4Addr::new(self.buf[at], self.buf[at + 1], self.buf[at + 2], self.buf[at + 3])
    }
}

fn sum_words(mut sum: u32, data: &[u8]) -> u32 {
    let mut chunks = data.chunks_exact(2);
    for pair in &mut chunks {
        sum += u16::from_be_bytes([pair[0], pair[1]]) as u32;
    }
    if let [last] = chunks.remainder() {
        sum += u16::from_be_bytes([*last, 0]) as u32;
    }
    sum
}

/// Internet checksum of `data`, seeded with a partial sum.
pub fn checksum(seed: u32, data: &[u8]) -> u16 {
    let mut sum = sum_words(seed, data);
    while sum >> 16 != 0 {
        sum = (sum & 0xFFFF) + (sum >> 16);
    }
    !(sum as u16)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn packet(src: SocketAddrV4, dst: SocketAddrV4, payload: &[u8]) -> Vec<u8> {
        let mut buf = vec![0u8; 256];
        write_default_header(&mut buf);
        buf[DEFAULT_PAYLOAD_OFFSET..DEFAULT_PAYLOAD_OFFSET + payload.len()].copy_from_slice(payload);
        let mut view = UdpPacket::new(&mut buf).unwrap();
        view.set_endpoints(src, dst);
        let len = view.finalize(payload.len());
        buf.truncate(len);
        buf
    }

    #[test]
    fn reads_back_endpoints() {
        let src: SocketAddrV4 = "10.0.0.2:5353".parse().unwrap();
        let dst: SocketAddrV4 = "8.8.8.8:53".parse().unwrap();
        let mut buf = packet(src, dst, b"hello");

        let view = UdpPacket::new(&mut buf).unwrap();

        assert_eq!(view.source(), src);
        assert_eq!(view.destination(), dst);
        assert_eq!(view.payload_len(33), 5);
    }

    #[test]
    fn checksums_verify() {
        let mut buf = packet(
            "10.0.0.2:40000".parse().unwrap(),
            "1.1.1.1:53".parse().unwrap(),
            b"odd",
        );

        assert_eq!(checksum(0, &buf[..20]), 0);

        let mut pseudo = [0u8; 12];
        pseudo[..8].copy_from_slice(&buf[12..20]);
        pseudo[9] = 17;
        pseudo[10..12].copy_from_slice(&buf[24..26]);
        assert_eq!(checksum(sum_words(0, &pseudo), &buf[20..]), 0);

        buf[30] ^= 0xFF;
        assert_ne!(checksum(sum_words(0, &pseudo), &buf[20..]), 0);
    }

    #[test]
    fn swap_endpoints_reverses_direction() {
        let src: SocketAddrV4 = "10.0.0.2:5353".parse().unwrap();
        let dst: SocketAddrV4 = "8.8.8.8:53".parse().unwrap();
        let mut buf = packet(src, dst, b"x");

        let mut view = UdpPacket::new(&mut buf).unwrap();
        view.swap_endpoints();

        assert_eq!(view.source(), dst);
        assert_eq!(view.destination(), src);
    }

    #[test]
    fn rejects_non_udp() {
        let mut buf = packet(
            "10.0.0.2:1".parse().unwrap(),
            "10.0.0.1:2".parse().unwrap(),
            b"",
        );
        buf[9] = 6;

        assert!(matches!(UdpPacket::new(&mut buf), Err(Error::NotUdp)));
        assert!(matches!(UdpPacket::new(&mut [0x60u8; 48]), Err(Error::NotUdp)));
    }

    #[test]
    fn payload_len_is_clamped_to_packet() {
        let mut buf = packet(
            "10.0.0.2:1".parse().unwrap(),
            "10.0.0.1:53".parse().unwrap(),
            b"abcdef",
        );

        let view = UdpPacket::new(&mut buf).unwrap();

        assert_eq!(view.payload_len(30), 2);
    }
}

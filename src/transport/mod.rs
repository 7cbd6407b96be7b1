//! Packet I/O collaborators of the interception engine.
//!
//! The engine never touches the virtual interface directly. It hands finished
//! IPv4/UDP packets to a [`PacketSink`] and asks a [`SocketProtector`] to keep
//! its upstream socket out of the tunnel before every send.

pub mod bridge;

use std::io;

use tokio::net::UdpSocket;
use tokio::sync::mpsc;

/// Maximum size of an intercepted packet (with some headroom).
pub const MAX_PACKET_SIZE: usize = 4096;

/// Accepts complete IPv4/UDP packets bound for the client side.
pub trait PacketSink: Send + Sync {
    fn send_packet(&self, packet: &[u8]) -> io::Result<()>;
}

impl PacketSink for mpsc::UnboundedSender<Vec<u8>> {
    fn send_packet(&self, packet: &[u8]) -> io::Result<()> {
        self.send(packet.to_vec())
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "packet sink closed"))
    }
}

/// Exempts a socket from the tunnel's own routing.
///
/// Must be idempotent; it is called before every upstream send.
pub trait SocketProtector: Send + Sync {
    fn protect(&self, socket: &UdpSocket) -> io::Result<()>;
}

/// For setups where upstream traffic is never captured.
pub struct NoProtect;

impl SocketProtector for NoProtect {
    fn protect(&self, _socket: &UdpSocket) -> io::Result<()> {
        Ok(())
    }
}

/// Marks the socket with SO_MARK so policy routing can send it around the
/// tunnel.
#[cfg(target_os = "linux")]
pub struct FwmarkProtector {
    mark: u32,
}

#[cfg(target_os = "linux")]
impl FwmarkProtector {
    pub fn new(mark: u32) -> Self {
        Self { mark }
    }
}

#[cfg(target_os = "linux")]
impl SocketProtector for FwmarkProtector {
    fn protect(&self, socket: &UdpSocket) -> io::Result<()> {
        socket2::SockRef::from(socket).set_mark(self.mark)
    }
}

//! UDP packet bridge standing in for a TUN device.
//!
//! Each datagram received on the bridge socket carries one raw IPv4 packet.
//! DNS queries (UDP to port 53) are handed to the request pipeline; packets
//! the engine emits are sent back to whichever peer last wrote to the bridge.

use std::io;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::Error;
use crate::packet::UdpPacket;
use crate::proxy::DnsProxy;

use super::{MAX_PACKET_SIZE, PacketSink};

const DNS_PORT: u16 = 53;

type Peer = Arc<Mutex<Option<SocketAddr>>>;

pub struct PacketBridge {
    socket: Arc<UdpSocket>,
    peer: Peer,
    outbound: mpsc::UnboundedSender<Vec<u8>>,
    shutdown: CancellationToken,
}

impl PacketBridge {
    /// Bind the bridge socket and start the writer task.
    pub async fn bind(addr: SocketAddr) -> io::Result<Self> {
        let socket = Arc::new(UdpSocket::bind(addr).await?);
        let peer: Peer = Arc::new(Mutex::new(None));
        let (outbound, rx) = mpsc::unbounded_channel();
        let shutdown = CancellationToken::new();

        tokio::spawn(run_writer(socket.clone(), peer.clone(), rx, shutdown.clone()));

        Ok(Self {
            socket,
            peer,
            outbound,
            shutdown,
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Sink that writes packets back through the bridge.
    pub fn sink(&self) -> Arc<dyn PacketSink> {
        Arc::new(self.outbound.clone())
    }

    /// Spawn the reader loop feeding captured queries to `proxy`.
    pub fn start(&self, proxy: Arc<DnsProxy>) -> JoinHandle<()> {
        tokio::spawn(run_reader(
            self.socket.clone(),
            self.peer.clone(),
            proxy,
            self.shutdown.clone(),
        ))
    }

    pub fn stop(&self) {
        self.shutdown.cancel();
    }
}

async fn run_reader(socket: Arc<UdpSocket>, peer: Peer, proxy: Arc<DnsProxy>, shutdown: CancellationToken) {
    let mut buf = [0u8; MAX_PACKET_SIZE];

    loop {
        let received = tokio::select! {
            _ = shutdown.cancelled() => break,
            r = socket.recv_from(&mut buf) => r,
        };

        let (len, from) = match received {
            Ok(r) => r,
            Err(e) => {
                warn!(error = %e, "bridge receive failed");
                continue;
            }
        };

        *peer.lock().unwrap_or_else(|e| e.into_inner()) = Some(from);

        if !is_dns_query(&mut buf[..len]) {
            debug!(len, "ignoring non-DNS packet");
            continue;
        }

        match proxy.handle_request(&mut buf, len).await {
            Ok(()) => {}
            Err(e @ (Error::Protect(_) | Error::FakeIpExhausted | Error::QueryTableFull)) => {
                warn!(error = %e, "query dropped");
            }
            Err(e) => debug!(error = %e, "query dropped"),
        }
    }

    info!("bridge reader exited");
}

async fn run_writer(
    socket: Arc<UdpSocket>,
    peer: Peer,
    mut rx: mpsc::UnboundedReceiver<Vec<u8>>,
    shutdown: CancellationToken,
) {
    loop {
        let packet = tokio::select! {
            _ = shutdown.cancelled() => break,
            p = rx.recv() => match p {
                Some(p) => p,
                None => break,
            },
        };

        let Some(to) = *peer.lock().unwrap_or_else(|e| e.into_inner()) else {
            debug!("no bridge peer yet, dropping packet");
            continue;
        };
        if let Err(e) = socket.send_to(&packet, to).await {
            warn!(error = %e, %to, "bridge send failed");
        }
    }
}

fn is_dns_query(packet: &mut [u8]) -> bool {
    UdpPacket::new(packet)
        .map(|udp| udp.destination().port() == DNS_PORT)
        .unwrap_or(false)
}

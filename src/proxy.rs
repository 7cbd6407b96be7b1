//! Fake-IP DNS interception engine.
//!
//! Queries captured from the virtual interface enter through
//! [`DnsProxy::handle_request`]. A domain the policy wants proxied is answered
//! on the spot with a fake IP. Anything else is forwarded to the resolver it
//! was addressed to, under a virtual transaction ID. Replies arrive on the
//! upstream socket, are matched back to their client, optionally rewritten to
//! the fake IP, and written back to the interface.

use std::io;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use ipnet::Ipv4Net;
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::dns::{DnsPacket, TYPE_A};
use crate::error::{Error, Result};
use crate::fakeip::FakeIpPool;
use crate::packet::{DEFAULT_PAYLOAD_OFFSET, UdpPacket, write_default_header};
use crate::pending::{DEFAULT_QUERY_TIMEOUT, PendingQueries, PendingQuery};
use crate::policy::{Action, Policy};
use crate::stats::Stats;
use crate::tamper::tamper;
use crate::transport::{MAX_PACKET_SIZE, PacketSink, SocketProtector};

/// Configuration for the interception engine.
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    /// Local address of the socket used to reach upstream resolvers.
    pub upstream_bind: SocketAddr,
    /// Reserved block fake IPs are drawn from.
    pub fake_network: Ipv4Net,
    /// TTL of fabricated A records, in seconds.
    pub dns_ttl: u32,
    /// How long a forwarded query waits for its reply.
    pub query_timeout: Duration,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            upstream_bind: SocketAddr::from(([0, 0, 0, 0], 0)),
            fake_network: Ipv4Net::new_assert(Ipv4Addr::new(172, 25, 0, 0), 16),
            dns_ttl: 10,
            query_timeout: DEFAULT_QUERY_TIMEOUT,
        }
    }
}

pub struct DnsProxy {
    /// Emptied by [`DnsProxy::stop`]; the socket closes once in-flight sends finish.
    upstream: RwLock<Option<Arc<UdpSocket>>>,
    dns_ttl: u32,
    pool: Arc<FakeIpPool>,
    pending: PendingQueries,
    policy: Arc<dyn Policy>,
    sink: Arc<dyn PacketSink>,
    protector: Arc<dyn SocketProtector>,
    stats: Stats,
    shutdown: CancellationToken,
}

impl DnsProxy {
    /// Bind the upstream socket. Call [`DnsProxy::start`] to begin relaying
    /// replies.
    pub async fn bind(
        config: &ProxyConfig,
        pool: Arc<FakeIpPool>,
        policy: Arc<dyn Policy>,
        sink: Arc<dyn PacketSink>,
        protector: Arc<dyn SocketProtector>,
    ) -> io::Result<Arc<Self>> {
        let upstream = UdpSocket::bind(config.upstream_bind).await?;

        Ok(Arc::new(Self {
            upstream: RwLock::new(Some(Arc::new(upstream))),
            dns_ttl: config.dns_ttl,
            pool,
            pending: PendingQueries::new(config.query_timeout),
            policy,
            sink,
            protector,
            stats: Stats::new(),
            shutdown: CancellationToken::new(),
        }))
    }

    /// Spawn the response loop.
    pub fn start(self: &Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(self.clone().run_response_loop())
    }

    /// Stop the response loop and release the upstream socket. Pending
    /// queries are abandoned and later requests fail with [`Error::Stopped`].
    pub fn stop(&self) {
        self.shutdown.cancel();
        self.upstream.write().unwrap_or_else(|e| e.into_inner()).take();
    }

    fn upstream(&self) -> Option<Arc<UdpSocket>> {
        self.upstream.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn pool(&self) -> &Arc<FakeIpPool> {
        &self.pool
    }

    pub fn pending(&self) -> &PendingQueries {
        &self.pending
    }

    pub fn stats(&self) -> &Stats {
        &self.stats
    }

    pub fn upstream_addr(&self) -> io::Result<SocketAddr> {
        match self.upstream() {
            Some(socket) => socket.local_addr(),
            None => Err(io::ErrorKind::NotConnected.into()),
        }
    }

    /// Process a DNS query captured from the virtual interface.
    ///
    /// The packet occupies `buf[..len]`; the rest of `buf` is room for a
    /// synthetic answer to grow into.
    pub async fn handle_request(&self, buf: &mut [u8], len: usize) -> Result<()> {
        self.stats.record_request();
        let Some(upstream) = self.upstream() else {
            return Err(Error::Stopped);
        };

        let mut udp = UdpPacket::new(&mut *buf)?;
        let (client, server) = (udp.source(), udp.destination());
        let dns_len = udp.payload_len(len);
        let payload = udp.payload_mut();
        let mut packet = DnsPacket::decode(&payload[..dns_len])?;

        if let Some(fake_ip) = self.intercept(payload, &mut packet)? {
            packet.header.mark_response(payload);
            udp.swap_endpoints();
            let total = udp.finalize(packet.size);
            self.sink.send_packet(&buf[..total])?;
            self.stats.record_intercepted();
            debug!(domain = %packet.questions[0].domain, %fake_ip, %client, "query answered with fake IP");
            return Ok(());
        }

        let now = Instant::now();
        let client_id = packet.header.id;
        let id = self.pending.register(
            PendingQuery {
                client_id,
                client,
                server,
                created_at: now,
            },
            now,
        )?;
        packet.header.set_id(payload, id);

        self.protector.protect(&upstream).map_err(Error::Protect)?;
        upstream
            .send_to(&payload[..packet.size], SocketAddr::V4(server))
            .await?;
        self.stats.record_forwarded();
        debug!(
            domain = packet.first_question().map(|q| q.domain.as_str()).unwrap_or("<none>"),
            client_id,
            id,
            %client,
            %server,
            "query forwarded"
        );

        Ok(())
    }

    /// Process a reply read from the upstream socket.
    ///
    /// The DNS message sits at `buf[28..28 + len]`; the IPv4 and UDP headers
    /// are rebuilt in front of it.
    pub fn handle_response(&self, buf: &mut [u8], len: usize) -> Result<()> {
        if buf.len() < DEFAULT_PAYLOAD_OFFSET + len {
            return Err(Error::BufferTooSmall {
                needed: DEFAULT_PAYLOAD_OFFSET + len,
                available: buf.len(),
            });
        }
        write_default_header(buf);
        let payload = &mut buf[DEFAULT_PAYLOAD_OFFSET..];
        let mut packet = DnsPacket::decode(&payload[..len])?;

        let Some(query) = self.pending.take(packet.header.id) else {
            self.stats.record_dropped();
            return Ok(());
        };

        let polluted = match self.pollute(payload, &mut packet) {
            Ok(polluted) => polluted,
            Err(e) => {
                warn!(error = %e, "relaying real answer unmodified");
                false
            }
        };
        packet.header.set_id(payload, query.client_id);

        let mut udp = UdpPacket::new(&mut *buf)?;
        udp.set_endpoints(query.server, query.client);
        let total = udp.finalize(packet.size);
        self.sink.send_packet(&buf[..total])?;
        self.stats.record_relayed(polluted);
        debug!(
            id = query.client_id,
            server = %query.server,
            client = %query.client,
            polluted,
            "response relayed"
        );

        Ok(())
    }

    /// Answer an A query for a proxied domain with its fake IP.
    fn intercept(&self, payload: &mut [u8], packet: &mut DnsPacket) -> Result<Option<Ipv4Addr>> {
        let Some(question) = packet.first_question() else {
            return Ok(None);
        };
        if question.qtype != TYPE_A {
            return Ok(None);
        }
        let domain = question.domain.clone();

        if self.policy.action(&domain, self.pool.lookup(&domain)) != Action::Proxy {
            return Ok(None);
        }

        let fake_ip = self.pool.get_or_create(&domain)?;
        tamper(payload, packet, fake_ip, self.dns_ttl)?;
        Ok(Some(fake_ip))
    }

    /// Replace the real answer of a proxied domain with its fake IP.
    fn pollute(&self, payload: &mut [u8], packet: &mut DnsPacket) -> Result<bool> {
        let Some(question) = packet.first_question() else {
            return Ok(false);
        };
        if question.qtype != TYPE_A {
            return Ok(false);
        }
        let domain = question.domain.clone();
        let real_ip = packet.first_a_record();

        if self.policy.action(&domain, real_ip) != Action::Proxy {
            return Ok(false);
        }

        let fake_ip = self.pool.get_or_create(&domain)?;
        tamper(payload, packet, fake_ip, self.dns_ttl)?;
        packet.header.clear_rcode(payload);
        debug!(%domain, ?real_ip, %fake_ip, "real answer replaced with fake IP");
        Ok(true)
    }

    async fn run_response_loop(self: Arc<Self>) {
        let Some(upstream) = self.upstream() else {
            return;
        };
        let mut buf = [0u8; MAX_PACKET_SIZE];

        loop {
            let received = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                r = upstream.recv_from(&mut buf[DEFAULT_PAYLOAD_OFFSET..]) => r,
            };

            let len = match received {
                Ok((len, _)) => len,
                Err(e) => {
                    warn!(error = %e, "upstream receive failed");
                    break;
                }
            };

            if let Err(e) = self.handle_response(&mut buf, len) {
                self.stats.record_dropped();
                debug!(error = %e, "dropping upstream response");
            }
        }

        info!("response loop exited");
    }
}

/// Run the engine behind a UDP packet bridge until ctrl-c.
pub async fn run(
    config: ProxyConfig,
    bridge_addr: SocketAddr,
    policy: Arc<dyn Policy>,
    protector: Arc<dyn SocketProtector>,
) -> io::Result<()> {
    use crate::transport::bridge::PacketBridge;

    let bridge = PacketBridge::bind(bridge_addr).await?;
    let pool = Arc::new(FakeIpPool::new(config.fake_network));
    let proxy = DnsProxy::bind(&config, pool, policy, bridge.sink(), protector).await?;

    info!(
        bridge = %bridge_addr,
        upstream = %proxy.upstream_addr()?,
        fake_network = %config.fake_network,
        "fake-IP DNS engine started"
    );

    let responses = proxy.start();
    let requests = bridge.start(proxy.clone());

    // Log stats every minute
    let reporter = {
        let proxy = proxy.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(60));
            interval.tick().await; // Skip first immediate tick
            loop {
                interval.tick().await;
                let stats = proxy.stats().snapshot_and_reset();
                info!(
                    bindings = proxy.pool().len(),
                    pending = proxy.pending().len(),
                    requests = stats.requests,
                    intercepted = stats.intercepted,
                    forwarded = stats.forwarded,
                    relayed = stats.relayed,
                    polluted = stats.polluted,
                    dropped = stats.dropped,
                    "stats"
                );
            }
        })
    };

    tokio::signal::ctrl_c().await?;
    info!("shutting down");

    proxy.stop();
    bridge.stop();
    reporter.abort();
    let _ = tokio::join!(responses, requests);

    Ok(())
}

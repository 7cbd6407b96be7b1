use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use ipnet::Ipv4Net;
use tracing::warn;
use tracing_subscriber::EnvFilter;

use fakedns::policy::{Action, DomainSet, RuleSet};
use fakedns::proxy::{self, ProxyConfig};
use fakedns::transport::{NoProtect, SocketProtector};

#[derive(Parser)]
#[command(name = "fakedns")]
#[command(about = "Fake-IP DNS interception engine", long_about = None)]
struct Args {
    /// Bridge socket receiving raw IPv4 packets from the virtual interface
    #[arg(short, long, default_value = "127.0.0.1:5300")]
    bind: SocketAddr,

    /// Local address of the socket used to reach upstream resolvers
    #[arg(long, default_value = "0.0.0.0:0")]
    upstream_bind: SocketAddr,

    /// Reserved block fake IPs are drawn from
    #[arg(long, default_value = "172.25.0.0/16")]
    fake_network: Ipv4Net,

    /// TTL of fabricated answers, in seconds
    #[arg(long, default_value = "10")]
    dns_ttl: u32,

    /// Seconds a forwarded query waits for its reply
    #[arg(long, default_value = "10")]
    query_timeout: u64,

    /// File of domains to proxy, one per line
    #[arg(long)]
    proxy_domains: Option<PathBuf>,

    /// File of domains to resolve directly, one per line
    #[arg(long)]
    direct_domains: Option<PathBuf>,

    /// Action for domains no rule matches (proxy or direct)
    #[arg(long, default_value = "direct")]
    default_action: Action,

    /// Proxy every domain
    #[arg(long)]
    global: bool,

    /// SO_MARK applied to the upstream socket to keep it out of the tunnel
    #[arg(long)]
    fwmark: Option<u32>,

    /// Enable debug logging (domain, verdict, IDs)
    #[arg(short, long)]
    verbose: bool,
}

fn protector(fwmark: Option<u32>) -> Arc<dyn SocketProtector> {
    match fwmark {
        #[cfg(target_os = "linux")]
        Some(mark) => Arc::new(fakedns::transport::FwmarkProtector::new(mark)),
        #[cfg(not(target_os = "linux"))]
        Some(_) => {
            warn!("--fwmark is only supported on Linux, ignoring");
            Arc::new(NoProtect)
        }
        None => Arc::new(NoProtect),
    }
}

fn main() -> io::Result<()> {
    let args = Args::parse();

    let default_level = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    let mut rules = RuleSet::new(args.fake_network, args.default_action);
    rules.global = args.global;
    if let Some(path) = &args.proxy_domains {
        rules.proxy_domains = DomainSet::load(path)?;
    }
    if let Some(path) = &args.direct_domains {
        rules.direct_domains = DomainSet::load(path)?;
    }
    if rules.proxy_domains.is_empty() && !rules.global && args.default_action == Action::Direct {
        warn!("no proxy rules configured, every query will be forwarded untouched");
    }

    let config = ProxyConfig {
        upstream_bind: args.upstream_bind,
        fake_network: args.fake_network,
        dns_ttl: args.dns_ttl,
        query_timeout: Duration::from_secs(args.query_timeout),
    };

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    rt.block_on(proxy::run(config, args.bind, Arc::new(rules), protector(args.fwmark)))
}

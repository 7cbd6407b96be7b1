//! Proxy/direct decisions for intercepted domains.

mod domains;

use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

use ipnet::Ipv4Net;

pub use domains::DomainSet;

/// Routing verdict for a domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Route through the tunnel, answered with a fake IP.
    Proxy,
    /// Leave the real answer alone.
    Direct,
}

impl FromStr for Action {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "proxy" => Ok(Action::Proxy),
            "direct" => Ok(Action::Direct),
            other => Err(format!("unknown action '{other}', expected 'proxy' or 'direct'")),
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Action::Proxy => "proxy",
            Action::Direct => "direct",
        })
    }
}

/// Decides whether a domain should go through the tunnel.
///
/// `ip` is whatever address is known for the domain at the time of the call:
/// a cached fake IP on the request path, the real answer on the response
/// path, or nothing.
pub trait Policy: Send + Sync {
    fn action(&self, domain: &str, ip: Option<Ipv4Addr>) -> Action;
}

/// Rule-based policy.
///
/// Order of evaluation:
/// 1. global mode proxies everything
/// 2. the direct list, then the proxy list
/// 3. fake IPs are proxied
/// 4. private, loopback and link-local addresses go direct
/// 5. the default action
pub struct RuleSet {
    pub proxy_domains: DomainSet,
    pub direct_domains: DomainSet,
    pub fake_network: Ipv4Net,
    pub default_action: Action,
    pub global: bool,
}

impl RuleSet {
    pub fn new(fake_network: Ipv4Net, default_action: Action) -> Self {
        Self {
            proxy_domains: DomainSet::default(),
            direct_domains: DomainSet::default(),
            fake_network,
            default_action,
            global: false,
        }
    }
}

impl Policy for RuleSet {
    fn action(&self, domain: &str, ip: Option<Ipv4Addr>) -> Action {
        if self.global {
            return Action::Proxy;
        }
        if self.direct_domains.matches(domain) {
            return Action::Direct;
        }
        if self.proxy_domains.matches(domain) {
            return Action::Proxy;
        }

        match ip {
            Some(ip) if self.fake_network.contains(&ip) => Action::Proxy,
            Some(ip) if ip.is_private() || ip.is_loopback() || ip.is_link_local() => Action::Direct,
            _ => self.default_action,
        }
    }
}

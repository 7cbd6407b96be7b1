//! Domain to fake IP allocation with a bidirectional cache.

use std::hash::Hasher;
use std::net::Ipv4Addr;
use std::sync::Mutex;

use ipnet::Ipv4Net;
use rustc_hash::{FxHashMap, FxHasher};
use tracing::debug;

use crate::error::{Error, Result};

#[derive(Default)]
struct Bindings {
    domain_to_ip: FxHashMap<String, Ipv4Addr>,
    ip_to_domain: FxHashMap<Ipv4Addr, String>,
}

/// Pool of synthetic addresses bound one-to-one to domain names.
///
/// Addresses are derived from a hash of the domain, so a given domain lands
/// on the same address whenever it does not collide. Bindings live as long as
/// the pool. Both maps sit behind one lock so the pairing never tears.
pub struct FakeIpPool {
    network: Ipv4Net,
    bindings: Mutex<Bindings>,
}

impl FakeIpPool {
    pub fn new(network: Ipv4Net) -> Self {
        Self {
            network: network.trunc(),
            bindings: Mutex::new(Bindings::default()),
        }
    }

    /// Return the fake IP bound to `domain`, allocating one on first use.
    pub fn get_or_create(&self, domain: &str) -> Result<Ipv4Addr> {
        let domain = domain.to_ascii_lowercase();
        let mut bindings = self.bindings.lock().unwrap_or_else(|e| e.into_inner());

        if let Some(&ip) = bindings.domain_to_ip.get(&domain) {
            return Ok(ip);
        }

        let base = u32::from(self.network.network());
        let host_mask = u32::from(self.network.hostmask());
        let mut hash = domain_hash(&domain);

        // Every host address is probed at most once.
        for _ in 0..=u64::from(host_mask) {
            let ip = Ipv4Addr::from(base | (hash & host_mask));
            if !bindings.ip_to_domain.contains_key(&ip) {
                bindings.domain_to_ip.insert(domain.clone(), ip);
                bindings.ip_to_domain.insert(ip, domain.clone());
                debug!(domain = %domain, fake_ip = %ip, "fake IP allocated");
                return Ok(ip);
            }
            hash = hash.wrapping_add(1);
        }

        Err(Error::FakeIpExhausted)
    }

    /// The fake IP already bound to `domain`, if any.
    pub fn lookup(&self, domain: &str) -> Option<Ipv4Addr> {
        let domain = domain.to_ascii_lowercase();
        let bindings = self.bindings.lock().unwrap_or_else(|e| e.into_inner());
        bindings.domain_to_ip.get(&domain).copied()
    }

    /// The domain a fake IP was issued for.
    pub fn reverse_lookup(&self, ip: Ipv4Addr) -> Option<String> {
        let bindings = self.bindings.lock().unwrap_or_else(|e| e.into_inner());
        bindings.ip_to_domain.get(&ip).cloned()
    }

    /// Whether `ip` falls inside the reserved block.
    pub fn is_fake_ip(&self, ip: Ipv4Addr) -> bool {
        self.network.contains(&ip)
    }

    pub fn len(&self) -> usize {
        let bindings = self.bindings.lock().unwrap_or_else(|e| e.into_inner());
        bindings.domain_to_ip.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn domain_hash(domain: &str) -> u32 {
    let mut hasher = FxHasher::default();
    hasher.write(domain.as_bytes());
    hasher.finish() as u32
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;
    use std::thread;

    fn pool() -> FakeIpPool {
        FakeIpPool::new("172.25.0.0/16".parse().unwrap())
    }

    #[test]
    fn allocates_inside_block() {
        let pool = pool();

        let ip = pool.get_or_create("blocked.example").unwrap();

        assert!(pool.is_fake_ip(ip));
        assert_eq!(ip.octets()[..2], [172, 25]);
    }

    #[test]
    fn allocation_is_idempotent() {
        let pool = pool();

        let first = pool.get_or_create("example.com").unwrap();
        let second = pool.get_or_create("example.com").unwrap();
        let upper = pool.get_or_create("EXAMPLE.com").unwrap();

        assert_eq!(first, second);
        assert_eq!(first, upper);
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn distinct_domains_never_share_an_address() {
        let pool = pool();
        let mut seen = HashSet::new();

        for i in 0..5000 {
            let ip = pool.get_or_create(&format!("host{i}.example.net")).unwrap();
            assert!(seen.insert(ip), "address {ip} handed out twice");
        }

        assert_eq!(pool.len(), 5000);
    }

    #[test]
    fn reverse_lookup_returns_domain() {
        let pool = pool();

        for domain in ["a.example", "b.example", "c.example"] {
            let ip = pool.get_or_create(domain).unwrap();
            assert_eq!(pool.reverse_lookup(ip).as_deref(), Some(domain));
        }

        assert_eq!(pool.reverse_lookup(Ipv4Addr::new(8, 8, 8, 8)), None);
    }

    #[test]
    fn lookup_does_not_allocate() {
        let pool = pool();

        assert_eq!(pool.lookup("example.com"), None);
        assert!(pool.is_empty());

        let ip = pool.get_or_create("example.com").unwrap();

        assert_eq!(pool.lookup("Example.Com"), Some(ip));
    }

    #[test]
    fn exhausted_block_returns_error() {
        let pool = FakeIpPool::new("10.9.9.0/30".parse().unwrap());

        let ips: HashSet<_> = (0..4)
            .map(|i| pool.get_or_create(&format!("d{i}")).unwrap())
            .collect();

        assert_eq!(ips.len(), 4);
        assert!(matches!(pool.get_or_create("one-too-many"), Err(Error::FakeIpExhausted)));
        // Existing bindings still resolve.
        assert!(pool.get_or_create("d0").is_ok());
    }

    #[test]
    fn concurrent_first_lookups_share_one_binding() {
        let pool = Arc::new(pool());

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let pool = pool.clone();
                thread::spawn(move || pool.get_or_create("race.example").unwrap())
            })
            .collect();
        let ips: HashSet<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        assert_eq!(ips.len(), 1);
        assert_eq!(pool.len(), 1);
    }
}

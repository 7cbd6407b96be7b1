//! Statistics tracking for the interception engine.

use std::sync::atomic::{AtomicU64, Ordering};

/// Atomic counters updated by both pipelines.
pub struct Stats {
    pub requests: AtomicU64,
    pub intercepted: AtomicU64,
    pub forwarded: AtomicU64,
    pub relayed: AtomicU64,
    pub polluted: AtomicU64,
    pub dropped: AtomicU64,
}

impl Stats {
    pub fn new() -> Self {
        Self {
            requests: AtomicU64::new(0),
            intercepted: AtomicU64::new(0),
            forwarded: AtomicU64::new(0),
            relayed: AtomicU64::new(0),
            polluted: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        }
    }

    pub fn record_request(&self) {
        self.requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_intercepted(&self) {
        self.intercepted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_forwarded(&self) {
        self.forwarded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_relayed(&self, polluted: bool) {
        self.relayed.fetch_add(1, Ordering::Relaxed);
        if polluted {
            self.polluted.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_dropped(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            requests: self.requests.load(Ordering::Relaxed),
            intercepted: self.intercepted.load(Ordering::Relaxed),
            forwarded: self.forwarded.load(Ordering::Relaxed),
            relayed: self.relayed.load(Ordering::Relaxed),
            polluted: self.polluted.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }

    pub fn snapshot_and_reset(&self) -> StatsSnapshot {
        StatsSnapshot {
            requests: self.requests.swap(0, Ordering::Relaxed),
            intercepted: self.intercepted.swap(0, Ordering::Relaxed),
            forwarded: self.forwarded.swap(0, Ordering::Relaxed),
            relayed: self.relayed.swap(0, Ordering::Relaxed),
            polluted: self.polluted.swap(0, Ordering::Relaxed),
            dropped: self.dropped.swap(0, Ordering::Relaxed),
        }
    }
}

impl Default for Stats {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub requests: u64,
    pub intercepted: u64,
    pub forwarded: u64,
    pub relayed: u64,
    pub polluted: u64,
    pub dropped: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_and_reset_clears_counters() {
        let stats = Stats::new();
        stats.record_request();
        stats.record_request();
        stats.record_intercepted();
        stats.record_forwarded();
        stats.record_relayed(true);
        stats.record_relayed(false);
        stats.record_dropped();

        let snap = stats.snapshot_and_reset();

        assert_eq!(
            snap,
            StatsSnapshot {
                requests: 2,
                intercepted: 1,
                forwarded: 1,
                relayed: 2,
                polluted: 1,
                dropped: 1,
            }
        );
        assert_eq!(stats.snapshot(), StatsSnapshot::default());
    }
}

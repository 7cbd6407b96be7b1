//! In-flight upstream queries keyed by a virtual transaction ID.
//!
//! Clients pick their own 16-bit IDs, so two clients can send the same one.
//! Every forwarded query gets a fresh ID from this table instead, and the
//! reply is matched back to its client by that ID alone.

use std::net::SocketAddrV4;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use rustc_hash::FxHashMap;

use crate::error::{Error, Result};

pub const DEFAULT_QUERY_TIMEOUT: Duration = Duration::from_secs(10);

/// One forwarded query awaiting its reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingQuery {
    pub client_id: u16,
    pub client: SocketAddrV4,
    pub server: SocketAddrV4,
    pub created_at: Instant,
}

struct Table {
    entries: FxHashMap<u16, PendingQuery>,
    last_id: u16,
}

/// Table of pending queries guarded by a single lock.
pub struct PendingQueries {
    table: Mutex<Table>,
    timeout: Duration,
}

impl PendingQueries {
    pub fn new(timeout: Duration) -> Self {
        Self {
            table: Mutex::new(Table {
                entries: FxHashMap::default(),
                last_id: 0,
            }),
            timeout,
        }
    }

    /// Sweep expired entries, then store `query` under the next free ID.
    ///
    /// IDs come from a wrapping counter; an ID still held by a live entry
    /// after wraparound is skipped.
    pub fn register(&self, query: PendingQuery, now: Instant) -> Result<u16> {
        let mut table = self.table.lock().unwrap_or_else(|e| e.into_inner());
        sweep(&mut table.entries, now, self.timeout);

        let mut id = table.last_id;
        for _ in 0..=u16::MAX {
            id = id.wrapping_add(1);
            if !table.entries.contains_key(&id) {
                table.last_id = id;
                table.entries.insert(id, query);
                return Ok(id);
            }
        }

        Err(Error::QueryTableFull)
    }

    /// Remove and return the query registered under `id`.
    pub fn take(&self, id: u16) -> Option<PendingQuery> {
        let mut table = self.table.lock().unwrap_or_else(|e| e.into_inner());
        table.entries.remove(&id)
    }

    /// Drop every entry older than the timeout.
    pub fn sweep_expired(&self, now: Instant) {
        let mut table = self.table.lock().unwrap_or_else(|e| e.into_inner());
        sweep(&mut table.entries, now, self.timeout);
    }

    pub fn len(&self) -> usize {
        let table = self.table.lock().unwrap_or_else(|e| e.into_inner());
        table.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for PendingQueries {
    fn default() -> Self {
        Self::new(DEFAULT_QUERY_TIMEOUT)
    }
}

fn sweep(entries: &mut FxHashMap<u16, PendingQuery>, now: Instant, timeout: Duration) {
    entries.retain(|_, q| now.saturating_duration_since(q.created_at) <= timeout);
}

//! Cache activity counters.

use std::sync::atomic::{AtomicU64, Ordering};

/// Internal counters, bumped with relaxed atomics on the lookup and I/O
/// paths. Read through [`StatsSnapshot`].
#[derive(Debug, Default)]
pub(crate) struct CacheStats {
    hits: AtomicU64,
    misses: AtomicU64,
    steals: AtomicU64,
    loads: AtomicU64,
    stores: AtomicU64,
}

impl CacheStats {
    pub(crate) fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_steal(&self) {
        self.steals.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_load(&self) {
        self.loads.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_store(&self) {
        self.stores.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            steals: self.steals.load(Ordering::Relaxed),
            loads: self.loads.load(Ordering::Relaxed),
            stores: self.stores.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time view of cache activity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    /// Lookups satisfied by a resident buffer.
    pub hits: u64,
    /// Lookups that claimed or stole a buffer.
    pub misses: u64,
    /// Misses served by borrowing a buffer from a non-home shard.
    pub steals: u64,
    /// Blocks loaded from the store.
    pub loads: u64,
    /// Blocks written to the store.
    pub stores: u64,
}

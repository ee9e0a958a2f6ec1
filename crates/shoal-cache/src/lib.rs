#![forbid(unsafe_code)]
//! Sharded buffer cache for block storage.
//!
//! A [`BufferCache`] keeps copies of recently used blocks in a fixed pool of
//! in-memory buffers. It cuts device reads, and it is the synchronization
//! point for blocks shared between threads: each resident block has exactly
//! one buffer, and one holder uses that buffer at a time.
//!
//! Interface:
//! * [`BufferCache::read`] returns a buffer holding a block's content,
//!   exclusively held by the caller.
//! * Mutate the payload through the guard, then call [`BufferCache::write`]
//!   to persist it. The cache never writes back on its own.
//! * Drop the guard to release the buffer. Holders block each other, so do
//!   not keep guards longer than necessary.
//! * [`BufferCache::pin`] keeps a block resident past the guard's lifetime,
//!   for layers (a write-ahead log, say) that need residency without
//!   exclusivity.
//!
//! Internally the pool is split into shards, each with its own mutex and its
//! own recency-ordered list. A miss whose home shard is fully in use borrows
//! the least recently used free buffer from another shard, so a hot shard
//! can soak up idle capacity without any global lock.

mod cache;
mod stats;

use shoal_error::{Result, ShoalError};
use shoal_types::{DEFAULT_BLOCK_SIZE, DEFAULT_SHARD_COUNT, DEFAULT_SLOT_COUNT};

pub use cache::{BufferCache, BufferGuard, PinnedBlock};
pub use stats::StatsSnapshot;

/// Sizing for a [`BufferCache`]. Fixed at construction; the cache never
/// allocates or frees buffers afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheConfig {
    /// Number of independently locked shards.
    pub shard_count: usize,
    /// Total buffers in the pool. May be smaller than `shard_count`; shards
    /// that start empty fill by stealing.
    pub slot_count: usize,
    /// Payload size of every buffer, in bytes. Must match the store's block
    /// size.
    pub block_size: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            shard_count: DEFAULT_SHARD_COUNT,
            slot_count: DEFAULT_SLOT_COUNT,
            block_size: DEFAULT_BLOCK_SIZE,
        }
    }
}

impl CacheConfig {
    fn validate(&self) -> Result<()> {
        if self.shard_count == 0 {
            return Err(ShoalError::InvalidConfig(
                "shard_count must be nonzero".to_owned(),
            ));
        }
        if self.slot_count == 0 {
            return Err(ShoalError::InvalidConfig(
                "slot_count must be nonzero".to_owned(),
            ));
        }
        if self.block_size == 0 {
            return Err(ShoalError::InvalidConfig(
                "block_size must be nonzero".to_owned(),
            ));
        }
        Ok(())
    }
}

#![forbid(unsafe_code)]
//! Identifier newtypes and shared constants for the Shoal buffer cache.
//!
//! Everything here is a plain value type: the unit-carrying wrappers exist
//! to keep device identifiers, block numbers, and raw integers from being
//! mixed up at call sites.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Default number of cache shards. Prime, so that striding access patterns
/// spread across shards instead of aliasing onto a few of them.
pub const DEFAULT_SHARD_COUNT: usize = 13;

/// Default number of buffers in the fixed pool.
pub const DEFAULT_SLOT_COUNT: usize = 30;

/// Default block size in bytes.
pub const DEFAULT_BLOCK_SIZE: usize = 4096;

/// Stable identifier for one block device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DeviceId(pub u64);

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "dev{}", self.0)
    }
}

/// Block number within one device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BlockNumber(pub u64);

impl fmt::Display for BlockNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// The cache key: one block on one device.
///
/// At any instant at most one resident buffer in the whole cache carries a
/// given `BlockId`; the cache enforces that invariant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BlockId {
    pub device: DeviceId,
    pub block: BlockNumber,
}

impl BlockId {
    #[must_use]
    pub fn new(device: DeviceId, block: BlockNumber) -> Self {
        Self { device, block }
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.device, self.block)
    }
}

#![forbid(unsafe_code)]
//! Shoal public API facade.
//!
//! Re-exports the buffer cache, its storage collaborators, and the shared
//! identifier types through one crate for downstream consumers (filesystem
//! and logging layers).

pub use shoal_cache::{BufferCache, BufferGuard, CacheConfig, PinnedBlock, StatsSnapshot};
pub use shoal_error::{Result, ShoalError};
pub use shoal_store::{BlockStore, FileBlockStore, MemBlockStore};
pub use shoal_types::{BlockId, BlockNumber, DeviceId};

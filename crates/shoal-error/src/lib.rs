#![forbid(unsafe_code)]
//! Error types for Shoal.
//!
//! # Error taxonomy
//!
//! Shoal distinguishes three failure classes:
//!
//! | Class | Variants | Recovery |
//! |-------|----------|----------|
//! | Storage I/O | `Io` | Caller's or store's concern; never swallowed by the cache |
//! | Resource exhaustion | `Exhausted` | None; the fixed-capacity pool has no waiting policy |
//! | Misuse of the store/config surface | `InvalidConfig`, `BlockOutOfRange`, `SizeMismatch`, `UnknownDevice` | Fix the caller |
//!
//! `Exhausted` deserves emphasis: it is reported as an error value rather
//! than a process abort, but it is not a retryable condition. It means every
//! buffer in the pool was in use during a complete scan of every shard, and
//! the cache has no backpressure mechanism that would make a retry succeed.
//!
//! This crate deliberately depends on nothing but `thiserror`, so any crate
//! in the workspace can return [`ShoalError`] without cycles. Identifier
//! fields are raw integers for the same reason; `shoal-types` wrappers are
//! unwrapped at the error boundary.

use thiserror::Error;

/// Unified error type for all Shoal operations.
#[derive(Debug, Error)]
pub enum ShoalError {
    /// Operating system I/O error propagated from a block store.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Every shard was scanned and no buffer with a zero holder count was
    /// found. Unrecoverable under the current load: the pool is fixed and
    /// the cache never waits for a buffer to be released.
    #[error("no free buffer for device {device} block {block}: pool exhausted")]
    Exhausted { device: u64, block: u64 },

    /// Rejected cache or store configuration.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Block number beyond the device's capacity.
    #[error("block {block} out of range: device holds {count} blocks")]
    BlockOutOfRange { block: u64, count: u64 },

    /// Payload length does not match the store's block size.
    #[error("payload size mismatch: got {got} bytes, expected {expected}")]
    SizeMismatch { got: usize, expected: usize },

    /// Operation addressed to a device the store has never been told about.
    #[error("unknown device {0}")]
    UnknownDevice(u64),
}

/// Result alias using `ShoalError`.
pub type Result<T> = std::result::Result<T, ShoalError>;

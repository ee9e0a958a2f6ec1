#![forbid(unsafe_code)]
//! Block storage collaborators for the Shoal buffer cache.
//!
//! The cache itself never performs device I/O; it delegates whole-block
//! transfers to a [`BlockStore`]. Two implementations ship here:
//! [`MemBlockStore`] for tests and embedded use, and [`FileBlockStore`] for
//! file-backed devices using positioned reads and writes.

use parking_lot::Mutex;
use shoal_error::{Result, ShoalError};
use shoal_types::{BlockId, BlockNumber, DeviceId};
use std::collections::HashMap;
use std::fs::OpenOptions;
use std::os::unix::fs::FileExt;
use std::path::Path;

/// Block-addressed storage consumed by the cache.
///
/// Both operations are synchronous and blocking, move exactly one block of
/// `block_size()` bytes, and are called with the per-buffer exclusive lock
/// held by the caller. Failures propagate; the cache never retries.
pub trait BlockStore: Send + Sync {
    /// Block size in bytes. Every `load`/`store` transfers exactly this many.
    fn block_size(&self) -> usize;

    /// Read block `id` into `buf`. `buf.len()` must equal `block_size()`.
    fn load(&self, id: BlockId, buf: &mut [u8]) -> Result<()>;

    /// Write `buf` as the new content of block `id`.
    fn store(&self, id: BlockId, buf: &[u8]) -> Result<()>;
}

fn check_len(got: usize, expected: usize) -> Result<()> {
    if got != expected {
        return Err(ShoalError::SizeMismatch { got, expected });
    }
    Ok(())
}

/// In-memory block store.
///
/// Blocks are sparse: a block that has never been stored reads back as
/// zeroes, like a freshly zeroed disk. Any device identifier is accepted.
#[derive(Debug)]
pub struct MemBlockStore {
    block_size: usize,
    blocks: Mutex<HashMap<BlockId, Box<[u8]>>>,
}

impl MemBlockStore {
    #[must_use]
    pub fn new(block_size: usize) -> Self {
        Self {
            block_size,
            blocks: Mutex::new(HashMap::new()),
        }
    }

    /// Number of blocks that have been explicitly stored.
    #[must_use]
    pub fn resident_blocks(&self) -> usize {
        self.blocks.lock().len()
    }
}

impl BlockStore for MemBlockStore {
    fn block_size(&self) -> usize {
        self.block_size
    }

    fn load(&self, id: BlockId, buf: &mut [u8]) -> Result<()> {
        check_len(buf.len(), self.block_size)?;
        let blocks = self.blocks.lock();
        match blocks.get(&id) {
            Some(bytes) => buf.copy_from_slice(bytes),
            None => buf.fill(0),
        }
        drop(blocks);
        Ok(())
    }

    fn store(&self, id: BlockId, buf: &[u8]) -> Result<()> {
        check_len(buf.len(), self.block_size)?;
        self.blocks.lock().insert(id, buf.into());
        Ok(())
    }
}

#[derive(Debug)]
struct DeviceFile {
    file: std::fs::File,
    block_count: u64,
}

/// File-backed block store: one file per registered device.
///
/// Files are accessed with `pread`/`pwrite` style positioned I/O
/// (`std::os::unix::fs::FileExt`), so no shared seek position exists and
/// concurrent transfers to distinct blocks do not serialize in this layer.
#[derive(Debug)]
pub struct FileBlockStore {
    block_size: usize,
    devices: Mutex<HashMap<DeviceId, DeviceFile>>,
}

impl FileBlockStore {
    #[must_use]
    pub fn new(block_size: usize) -> Self {
        Self {
            block_size,
            devices: Mutex::new(HashMap::new()),
        }
    }

    /// Register `device` as backed by the file at `path`.
    ///
    /// The file is opened read-write and its length must be a whole number
    /// of blocks. Registering the same device twice replaces the backing
    /// file.
    pub fn attach(&self, device: DeviceId, path: impl AsRef<Path>) -> Result<()> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path.as_ref())?;
        let len = file.metadata()?.len();
        let block_size = u64::try_from(self.block_size).expect("block size must fit in u64");
        if len % block_size != 0 {
            return Err(ShoalError::InvalidConfig(format!(
                "device image length is not block-aligned: len={len} block_size={block_size}"
            )));
        }
        let block_count = len / block_size;
        self.devices.lock().insert(
            device,
            DeviceFile { file, block_count },
        );
        Ok(())
    }

    /// Block capacity of a registered device.
    pub fn block_count(&self, device: DeviceId) -> Result<u64> {
        let devices = self.devices.lock();
        let dev = devices
            .get(&device)
            .ok_or(ShoalError::UnknownDevice(device.0))?;
        Ok(dev.block_count)
    }

    fn offset_of(&self, block: BlockNumber, count: u64) -> Result<u64> {
        if block.0 >= count {
            return Err(ShoalError::BlockOutOfRange {
                block: block.0,
                count,
            });
        }
        let block_size = u64::try_from(self.block_size).expect("block size must fit in u64");
        block
            .0
            .checked_mul(block_size)
            .ok_or(ShoalError::BlockOutOfRange {
                block: block.0,
                count,
            })
    }
}

impl BlockStore for FileBlockStore {
    fn block_size(&self) -> usize {
        self.block_size
    }

    fn load(&self, id: BlockId, buf: &mut [u8]) -> Result<()> {
        check_len(buf.len(), self.block_size)?;
        let devices = self.devices.lock();
        let dev = devices
            .get(&id.device)
            .ok_or(ShoalError::UnknownDevice(id.device.0))?;
        let offset = self.offset_of(id.block, dev.block_count)?;
        dev.file.read_exact_at(buf, offset)?;
        drop(devices);
        Ok(())
    }

    fn store(&self, id: BlockId, buf: &[u8]) -> Result<()> {
        check_len(buf.len(), self.block_size)?;
        let devices = self.devices.lock();
        let dev = devices
            .get(&id.device)
            .ok_or(ShoalError::UnknownDevice(id.device.0))?;
        let offset = self.offset_of(id.block, dev.block_count)?;
        dev.file.write_all_at(buf, offset)?;
        drop(devices);
        Ok(())
    }
}

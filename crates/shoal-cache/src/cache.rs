//! The sharded lookup/eviction/locking engine.
//!
//! Two lock kinds exist, and the order they are taken in is fixed:
//!
//! * **Shard mutexes** guard shard recency lists and every buffer's
//!   identity and holder count. They are short-held and a thread never
//!   blocks on anything else while holding one, with a single exception: a
//!   steal holds its home shard while *try*-locking donors.
//! * **Frame mutexes** (one per buffer) are the exclusive per-buffer locks.
//!   They are the only locks a caller may block on for long, and they are
//!   only ever block-acquired with no shard mutex held.
//!
//! A buffer with a zero holder count has no frame-lock holders and none in
//! flight, so a thread that has just claimed such a buffer under its shard
//! mutex can take the frame lock with `try_lock` and rely on it succeeding.
//! Claiming this way, before the shard mutex is dropped, is what makes
//! invalidation atomic with the identity swap: no other thread can acquire
//! the frame between the claim and the clearing of its validity flag.

use crate::stats::{CacheStats, StatsSnapshot};
use crate::CacheConfig;
use parking_lot::{Mutex, MutexGuard};
use shoal_error::{Result, ShoalError};
use shoal_store::BlockStore;
use shoal_types::{BlockId, BlockNumber, DeviceId};
use std::collections::VecDeque;
use std::fmt;
use std::ops::{Deref, DerefMut};
use tracing::{error, info, trace};

/// One block's worth of payload plus its validity flag, behind the buffer's
/// exclusive lock. The payload is trustworthy only while `valid` is set.
#[derive(Debug)]
struct Frame {
    valid: bool,
    bytes: Box<[u8]>,
}

/// One entry of the fixed pool. The frame mutex is the per-buffer exclusive
/// lock.
#[derive(Debug)]
struct Slot {
    frame: Mutex<Frame>,
}

/// Identity and holder count for one slot. Owned by exactly one shard's
/// recency list at a time and guarded by that shard's mutex. `id` is `None`
/// only for a slot that has never been claimed since construction.
#[derive(Debug, Clone, Copy)]
struct SlotMeta {
    slot: usize,
    id: Option<BlockId>,
    refcnt: u32,
}

/// Recency list of one shard: front is most recently released, back is
/// least. Entries keep their position on hit and on unpin; only a release
/// that drops the holder count to zero moves an entry to the front.
#[derive(Debug, Default)]
struct ShardState {
    entries: VecDeque<SlotMeta>,
}

impl ShardState {
    fn position_of(&self, slot: usize) -> usize {
        self.entries
            .iter()
            .position(|meta| meta.slot == slot)
            .expect("held buffer must be listed in its identity's home shard")
    }
}

/// Fixed-capacity, concurrency-safe cache of storage blocks.
///
/// See the crate docs for the interface summary. All methods take `&self`;
/// the cache is meant to be shared (typically in an `Arc`) between the
/// threads of a filesystem or logging layer.
#[derive(Debug)]
pub struct BufferCache<S: BlockStore> {
    store: S,
    shards: Box<[Mutex<ShardState>]>,
    slots: Box<[Slot]>,
    stats: CacheStats,
}

impl<S: BlockStore> BufferCache<S> {
    /// Build a cache over `store`, allocating the whole pool up front.
    ///
    /// Slot `i` starts in shard `i % shard_count`, so every shard owns at
    /// least one buffer whenever the pool is at least shard-sized.
    pub fn new(store: S, config: CacheConfig) -> Result<Self> {
        config.validate()?;
        if store.block_size() != config.block_size {
            return Err(ShoalError::InvalidConfig(format!(
                "store block size {} does not match configured block size {}",
                store.block_size(),
                config.block_size
            )));
        }
        info!(
            shard_count = config.shard_count,
            slot_count = config.slot_count,
            block_size = config.block_size,
            "buffer_cache: initializing"
        );

        let mut shards: Vec<ShardState> = (0..config.shard_count)
            .map(|_| ShardState::default())
            .collect();
        let mut slots = Vec::with_capacity(config.slot_count);
        for slot in 0..config.slot_count {
            shards[slot % config.shard_count]
                .entries
                .push_back(SlotMeta {
                    slot,
                    id: None,
                    refcnt: 0,
                });
            slots.push(Slot {
                frame: Mutex::new(Frame {
                    valid: false,
                    bytes: vec![0_u8; config.block_size].into_boxed_slice(),
                }),
            });
        }

        Ok(Self {
            store,
            shards: shards.into_iter().map(Mutex::new).collect(),
            slots: slots.into_boxed_slice(),
            stats: CacheStats::default(),
        })
    }

    /// The underlying block store.
    #[must_use]
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Payload size of every buffer, in bytes.
    #[must_use]
    pub fn block_size(&self) -> usize {
        self.store.block_size()
    }

    /// Number of shards.
    #[must_use]
    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    /// Number of buffers in the pool.
    #[must_use]
    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    /// Current activity counters.
    #[must_use]
    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Map a block identity to its home shard index.
    #[inline]
    fn home_shard(&self, id: BlockId) -> usize {
        let shard_count = u64::try_from(self.shards.len()).expect("shard count must fit in u64");
        let rem = id.device.0.wrapping_add(id.block.0) % shard_count;
        usize::try_from(rem).expect("remainder must fit in usize")
    }

    /// Look up `block` on `device`, allocating a buffer on a miss, and
    /// return it exclusively held. The payload is not loaded: check
    /// [`BufferGuard::is_valid`] or use [`BufferCache::read`].
    ///
    /// # Errors
    ///
    /// [`ShoalError::Exhausted`] if every buffer in the pool is in use. The
    /// pool is fixed and nothing waits for releases, so this is not a
    /// retryable condition.
    pub fn get(&self, device: DeviceId, block: BlockNumber) -> Result<BufferGuard<'_, S>> {
        let id = BlockId::new(device, block);
        let home = self.home_shard(id);

        loop {
            let mut shard = self.shards[home].lock();

            // One pass: find the block, or failing that the least recently
            // used free buffer of the home shard.
            let mut hit_at = None;
            let mut free_at = None;
            for (pos, meta) in shard.entries.iter().enumerate() {
                if meta.id == Some(id) {
                    hit_at = Some(pos);
                    break;
                }
                if meta.refcnt == 0 {
                    free_at = Some(pos);
                }
            }

            if let Some(pos) = hit_at {
                let meta = &mut shard.entries[pos];
                meta.refcnt += 1;
                let slot = meta.slot;
                drop(shard);
                self.stats.record_hit();
                trace!(device = device.0, block = block.0, slot, "cache_hit");
                // Concurrent holders of one block serialize here, not on
                // the shard mutex.
                let frame = self.slots[slot].frame.lock();
                return Ok(BufferGuard {
                    cache: self,
                    id,
                    slot,
                    frame: Some(frame),
                });
            }

            if let Some(pos) = free_at {
                let meta = &mut shard.entries[pos];
                meta.id = Some(id);
                meta.refcnt = 1;
                let slot = meta.slot;
                let mut frame = self.slots[slot]
                    .frame
                    .try_lock()
                    .expect("frame lock of a free buffer cannot be contended");
                frame.valid = false;
                drop(shard);
                self.stats.record_miss();
                trace!(device = device.0, block = block.0, slot, "cache_miss");
                return Ok(BufferGuard {
                    cache: self,
                    id,
                    slot,
                    frame: Some(frame),
                });
            }

            // The home shard is fully in use: borrow the least recently
            // used free buffer from another shard, visiting the ring in
            // fixed order.
            let mut skipped = false;
            for step in 1..self.shards.len() {
                let donor_idx = (home + step) % self.shards.len();
                let Some(mut donor) = self.shards[donor_idx].try_lock() else {
                    // Block-waiting on a donor while holding `home` could
                    // cycle with a steal running in the opposite direction.
                    skipped = true;
                    continue;
                };
                let Some(pos) = donor.entries.iter().rposition(|meta| meta.refcnt == 0) else {
                    drop(donor);
                    continue;
                };
                let mut meta = donor
                    .entries
                    .remove(pos)
                    .expect("donor scan position must be in bounds");
                meta.id = Some(id);
                meta.refcnt = 1;
                let slot = meta.slot;
                let mut frame = self.slots[slot]
                    .frame
                    .try_lock()
                    .expect("frame lock of a free buffer cannot be contended");
                frame.valid = false;
                drop(donor);
                shard.entries.push_front(meta);
                drop(shard);
                self.stats.record_miss();
                self.stats.record_steal();
                trace!(
                    device = device.0,
                    block = block.0,
                    slot,
                    donor = donor_idx,
                    "cache_steal"
                );
                return Ok(BufferGuard {
                    cache: self,
                    id,
                    slot,
                    frame: Some(frame),
                });
            }
            drop(shard);

            if !skipped {
                // Every donor was inspected and none had a free buffer.
                self.stats.record_miss();
                error!(device = device.0, block = block.0, "cache_exhausted");
                return Err(ShoalError::Exhausted {
                    device: device.0,
                    block: block.0,
                });
            }

            // A skipped donor is held by a steal going the other way; with
            // `home` released it can finish. Retry from the top, because by
            // then the block may have become resident.
            std::thread::yield_now();
        }
    }

    /// [`get`](BufferCache::get), plus a synchronous load from the store if
    /// the buffer does not already hold the block's content.
    ///
    /// # Errors
    ///
    /// [`ShoalError::Exhausted`] as for `get`; store failures propagate
    /// unchanged (the claimed buffer is released, still marked invalid).
    pub fn read(&self, device: DeviceId, block: BlockNumber) -> Result<BufferGuard<'_, S>> {
        let mut buf = self.get(device, block)?;
        if !buf.frame().valid {
            let id = buf.id();
            let frame = buf.frame_mut();
            self.store.load(id, &mut frame.bytes)?;
            frame.valid = true;
            self.stats.record_load();
            trace!(device = device.0, block = block.0, "block_loaded");
        }
        Ok(buf)
    }

    /// Persist `buf`'s payload to the store, synchronously.
    ///
    /// Holder count, validity, and recency are untouched; write-back is
    /// always this explicit call, never the cache's own initiative.
    pub fn write(&self, buf: &BufferGuard<'_, S>) -> Result<()> {
        self.store.store(buf.id(), &buf.frame().bytes)?;
        self.stats.record_store();
        trace!(
            device = buf.id.device.0,
            block = buf.id.block.0,
            "block_stored"
        );
        Ok(())
    }

    /// Raise `buf`'s holder count without taking another exclusive hold,
    /// keeping the block resident after the guard is dropped.
    pub fn pin(&self, buf: &BufferGuard<'_, S>) -> PinnedBlock {
        let home = self.home_shard(buf.id);
        let mut shard = self.shards[home].lock();
        let pos = shard.position_of(buf.slot);
        shard.entries[pos].refcnt += 1;
        drop(shard);
        trace!(
            device = buf.id.device.0,
            block = buf.id.block.0,
            slot = buf.slot,
            "buffer_pinned"
        );
        PinnedBlock {
            id: buf.id,
            slot: buf.slot,
        }
    }

    /// Drop the holder count raised by [`pin`](BufferCache::pin). The
    /// entry's recency position is not updated; only releases do that.
    pub fn unpin(&self, pin: PinnedBlock) {
        let home = self.home_shard(pin.id);
        let mut shard = self.shards[home].lock();
        let pos = shard.position_of(pin.slot);
        shard.entries[pos].refcnt -= 1;
        drop(shard);
        trace!(
            device = pin.id.device.0,
            block = pin.id.block.0,
            slot = pin.slot,
            "buffer_unpinned"
        );
    }

    /// Drop one hold on `slot`; at zero holders the entry moves to the
    /// most-recently-used end of its shard (stealing scans from the other
    /// end). The entry never migrates shards here, only stealing does
    /// that, and a buffer being stolen has no holders, so the identity this
    /// release computed its shard from cannot be swapped out from under it.
    fn release_slot(&self, id: BlockId, slot: usize) {
        let home = self.home_shard(id);
        let mut shard = self.shards[home].lock();
        let pos = shard.position_of(slot);
        let meta = &mut shard.entries[pos];
        meta.refcnt -= 1;
        if meta.refcnt == 0 {
            let meta = shard
                .entries
                .remove(pos)
                .expect("release position must be in bounds");
            shard.entries.push_front(meta);
        }
        drop(shard);
        trace!(device = id.device.0, block = id.block.0, slot, "buffer_released");
    }
}

/// An exclusively held buffer. Derefs to the payload bytes.
///
/// Dropping the guard releases the buffer: the exclusive lock is released
/// first, then the holder count drops and, at zero, the buffer becomes the
/// most recently used eviction candidate of its shard.
pub struct BufferGuard<'a, S: BlockStore> {
    cache: &'a BufferCache<S>,
    id: BlockId,
    slot: usize,
    frame: Option<MutexGuard<'a, Frame>>,
}

impl<S: BlockStore> BufferGuard<'_, S> {
    /// The block identity this buffer holds.
    #[must_use]
    pub fn id(&self) -> BlockId {
        self.id
    }

    #[must_use]
    pub fn device(&self) -> DeviceId {
        self.id.device
    }

    #[must_use]
    pub fn block(&self) -> BlockNumber {
        self.id.block
    }

    /// Index of the pool slot backing this buffer. Stable while any holder
    /// or pin exists; useful for diagnostics and tests.
    #[must_use]
    pub fn slot(&self) -> usize {
        self.slot
    }

    /// Whether the payload currently mirrors the block's stored content.
    /// Always true for buffers returned by [`BufferCache::read`].
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.frame().valid
    }

    fn frame(&self) -> &Frame {
        self.frame.as_ref().expect("frame lock is held until drop")
    }

    fn frame_mut(&mut self) -> &mut Frame {
        self.frame.as_mut().expect("frame lock is held until drop")
    }
}

impl<S: BlockStore> Deref for BufferGuard<'_, S> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.frame().bytes
    }
}

impl<S: BlockStore> DerefMut for BufferGuard<'_, S> {
    fn deref_mut(&mut self) -> &mut [u8] {
        &mut self.frame_mut().bytes
    }
}

impl<S: BlockStore> fmt::Debug for BufferGuard<'_, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferGuard")
            .field("id", &self.id)
            .field("slot", &self.slot)
            .field("valid", &self.frame().valid)
            .finish_non_exhaustive()
    }
}

impl<S: BlockStore> Drop for BufferGuard<'_, S> {
    fn drop(&mut self) {
        // The exclusive lock goes first; taking the shard mutex while still
        // holding the frame lock would hold the two lock kinds in the
        // opposite order from `get`.
        drop(self.frame.take());
        self.cache.release_slot(self.id, self.slot);
    }
}

/// Token for a holder count raised by [`BufferCache::pin`].
///
/// Redeem with [`BufferCache::unpin`]; a leaked token keeps its buffer
/// unevictable for the life of the cache.
#[must_use = "a pinned buffer stays unevictable until the token is passed to unpin"]
#[derive(Debug)]
pub struct PinnedBlock {
    id: BlockId,
    slot: usize,
}

impl PinnedBlock {
    /// The block identity kept resident by this pin.
    #[must_use]
    pub fn id(&self) -> BlockId {
        self.id
    }
}

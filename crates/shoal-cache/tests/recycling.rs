#![forbid(unsafe_code)]
//! Buffer recycling lifecycle: reuse order, cross-shard stealing, write
//! round trips, pinning, and pool exhaustion.

use parking_lot::Mutex;
use shoal_cache::{BufferCache, CacheConfig};
use shoal_error::{Result, ShoalError};
use shoal_store::{BlockStore, MemBlockStore};
use shoal_types::{BlockId, BlockNumber, DeviceId};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

const BS: usize = 512;

/// Store wrapper that counts per-block loads and total stores, so tests can
/// tell a cache hit from a silent reload.
#[derive(Debug)]
struct CountingStore {
    inner: MemBlockStore,
    loads: Mutex<HashMap<BlockId, usize>>,
    stores: AtomicUsize,
}

impl CountingStore {
    fn new(block_size: usize) -> Self {
        Self {
            inner: MemBlockStore::new(block_size),
            loads: Mutex::new(HashMap::new()),
            stores: AtomicUsize::new(0),
        }
    }

    fn loads_of(&self, id: BlockId) -> usize {
        self.loads.lock().get(&id).copied().unwrap_or(0)
    }

    fn store_count(&self) -> usize {
        self.stores.load(Ordering::SeqCst)
    }
}

impl BlockStore for CountingStore {
    fn block_size(&self) -> usize {
        self.inner.block_size()
    }

    fn load(&self, id: BlockId, buf: &mut [u8]) -> Result<()> {
        *self.loads.lock().entry(id).or_insert(0) += 1;
        self.inner.load(id, buf)
    }

    fn store(&self, id: BlockId, buf: &[u8]) -> Result<()> {
        self.stores.fetch_add(1, Ordering::SeqCst);
        self.inner.store(id, buf)
    }
}

fn bid(device: u64, block: u64) -> BlockId {
    BlockId::new(DeviceId(device), BlockNumber(block))
}

fn make_cache(shards: usize, slots: usize) -> BufferCache<CountingStore> {
    BufferCache::new(
        CountingStore::new(BS),
        CacheConfig {
            shard_count: shards,
            slot_count: slots,
            block_size: BS,
        },
    )
    .expect("cache")
}

#[test]
fn release_then_get_reuses_the_resident_buffer() {
    let cache = make_cache(2, 4);
    cache
        .store()
        .store(bid(0, 1), &[0x11_u8; BS])
        .expect("seed");

    let first_slot = {
        let buf = cache.read(DeviceId(0), BlockNumber(1)).expect("read");
        assert_eq!(&buf[..], &[0x11_u8; BS]);
        buf.slot()
    };

    let buf = cache.read(DeviceId(0), BlockNumber(1)).expect("reread");
    assert_eq!(buf.slot(), first_slot);
    assert_eq!(&buf[..], &[0x11_u8; BS]);
    assert_eq!(cache.store().loads_of(bid(0, 1)), 1, "no reload on a hit");
    assert_eq!(cache.stats().hits, 1);
}

#[test]
fn least_recently_released_buffers_are_reused_first() {
    let cache = make_cache(1, 3);

    let mut slot_of = HashMap::new();
    for block in 0_u64..3 {
        let buf = cache.read(DeviceId(0), BlockNumber(block)).expect("read");
        slot_of.insert(block, buf.slot());
    }

    // All three are free; block 0 was released first, block 1 second.
    let buf = cache.read(DeviceId(0), BlockNumber(3)).expect("read");
    assert_eq!(buf.slot(), slot_of[&0], "oldest release is evicted first");
    drop(buf);

    let buf = cache.read(DeviceId(0), BlockNumber(4)).expect("read");
    assert_eq!(buf.slot(), slot_of[&1]);
}

#[test]
fn miss_in_a_full_shard_steals_from_a_donor() {
    // Two shards, one buffer each. Blocks 0 and 2 both hash to shard 0.
    let cache = make_cache(2, 2);

    let g0 = cache.get(DeviceId(0), BlockNumber(0)).expect("claim home");
    assert_eq!(g0.slot(), 0);

    let g2 = cache.get(DeviceId(0), BlockNumber(2)).expect("steal");
    assert_eq!(g2.slot(), 1, "borrowed shard 1's only buffer");
    assert_eq!(cache.stats().steals, 1);

    // Every buffer is now held; a third distinct block cannot be served.
    let err = cache
        .get(DeviceId(0), BlockNumber(1))
        .expect_err("pool is fully in use");
    assert!(matches!(err, ShoalError::Exhausted { device: 0, block: 1 }));

    // Releasing the stolen buffer makes it stealable again, this time in
    // the other direction (shard 1 borrowing back from shard 0).
    drop(g2);
    let g1 = cache.get(DeviceId(0), BlockNumber(1)).expect("steal back");
    assert_eq!(g1.slot(), 1);
    assert_eq!(cache.stats().steals, 2);
}

#[test]
fn written_content_survives_eviction_and_reload() {
    let cache = make_cache(1, 2);

    let mut buf = cache.read(DeviceId(0), BlockNumber(0)).expect("read");
    buf.fill(0xAB);
    cache.write(&buf).expect("write");
    drop(buf);
    assert_eq!(cache.store().store_count(), 1);

    // Churn through unrelated blocks until block 0's buffer is recycled.
    for block in 10_u64..13 {
        let buf = cache.read(DeviceId(0), BlockNumber(block)).expect("churn");
        drop(buf);
    }

    let buf = cache.read(DeviceId(0), BlockNumber(0)).expect("reload");
    assert_eq!(cache.store().loads_of(bid(0, 0)), 2, "content was reloaded");
    assert_eq!(&buf[..], &[0xAB_u8; BS]);
}

#[test]
fn exhaustion_is_deterministic_when_every_buffer_is_pinned() {
    let cache = make_cache(2, 2);

    let g0 = cache.get(DeviceId(0), BlockNumber(0)).expect("claim");
    let p0 = cache.pin(&g0);
    drop(g0);

    let g1 = cache.get(DeviceId(0), BlockNumber(1)).expect("claim");
    let p1 = cache.pin(&g1);
    drop(g1);

    let err = cache
        .get(DeviceId(0), BlockNumber(4))
        .expect_err("every buffer pinned");
    assert!(matches!(err, ShoalError::Exhausted { device: 0, block: 4 }));

    // One unpin is enough to serve the same request.
    cache.unpin(p0);
    let buf = cache.get(DeviceId(0), BlockNumber(4)).expect("freed");
    assert_eq!(buf.slot(), 0);
    drop(buf);
    cache.unpin(p1);
}

#[test]
fn pinned_buffer_is_never_recycled() {
    let cache = make_cache(1, 2);
    cache
        .store()
        .store(bid(0, 0), &[0x77_u8; BS])
        .expect("seed");

    let buf = cache.read(DeviceId(0), BlockNumber(0)).expect("read");
    let pinned_slot = buf.slot();
    let pin = cache.pin(&buf);
    drop(buf);

    // Only the unpinned slot is ever recycled while the pin lives.
    for block in 1_u64..4 {
        let buf = cache.read(DeviceId(0), BlockNumber(block)).expect("churn");
        assert_ne!(buf.slot(), pinned_slot);
    }

    let buf = cache.read(DeviceId(0), BlockNumber(0)).expect("still resident");
    assert_eq!(buf.slot(), pinned_slot);
    assert_eq!(&buf[..], &[0x77_u8; BS]);
    assert_eq!(cache.store().loads_of(bid(0, 0)), 1);
    drop(buf);

    // After unpin the block becomes evictable like any other.
    cache.unpin(pin);
    for block in 4_u64..6 {
        let buf = cache.read(DeviceId(0), BlockNumber(block)).expect("churn");
        drop(buf);
    }
    let buf = cache.read(DeviceId(0), BlockNumber(0)).expect("reload");
    assert_eq!(cache.store().loads_of(bid(0, 0)), 2);
    drop(buf);
}

#[test]
fn pool_smaller_than_shard_count_fills_by_stealing() {
    let cache = make_cache(8, 2);

    for block in 0_u64..6 {
        let buf = cache.read(DeviceId(0), BlockNumber(block)).expect("read");
        assert_eq!(&buf[..], &[0_u8; BS]);
    }

    let stats = cache.stats();
    assert_eq!(stats.misses, 6);
    assert_eq!(stats.loads, 6);
    assert!(stats.steals >= 4, "most shards start empty and must borrow");
}

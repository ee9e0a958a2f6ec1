#![forbid(unsafe_code)]

use criterion::{Criterion, black_box, criterion_group, criterion_main};
use shoal_cache::{BufferCache, CacheConfig};
use shoal_store::MemBlockStore;
use shoal_types::{BlockNumber, DeviceId};

fn bench_lookup_hit(c: &mut Criterion) {
    let cache = BufferCache::new(MemBlockStore::new(4096), CacheConfig::default()).expect("cache");

    // Warm one block so every iteration is a pure hit.
    drop(cache.read(DeviceId(0), BlockNumber(3)).expect("warm"));

    c.bench_function("lookup_hit", |b| {
        b.iter(|| {
            let buf = cache
                .read(DeviceId(0), BlockNumber(black_box(3)))
                .expect("read");
            black_box(buf[0]);
        });
    });
}

fn bench_lookup_churn(c: &mut Criterion) {
    let cache = BufferCache::new(MemBlockStore::new(4096), CacheConfig::default()).expect("cache");

    // Twice as many distinct blocks as buffers: every few lookups recycle.
    let span = u64::try_from(cache.slot_count() * 2).expect("span fits in u64");
    let mut next = 0_u64;

    c.bench_function("lookup_churn", |b| {
        b.iter(|| {
            next = (next + 7) % span;
            let buf = cache
                .read(DeviceId(0), BlockNumber(black_box(next)))
                .expect("read");
            black_box(buf[0]);
        });
    });
}

criterion_group!(benches, bench_lookup_hit, bench_lookup_churn);
criterion_main!(benches);

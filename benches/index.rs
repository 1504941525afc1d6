//! Insert and lookup benchmarks over the in-memory cache.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use blocktree::{BTreeIndex, MemoryCache};

fn populated(count: u32) -> BTreeIndex<MemoryCache> {
    let cache = MemoryCache::new(4096, count / 100 + 64).unwrap();
    let mut index = BTreeIndex::create(cache, 8, 8).unwrap();
    for i in 0..count {
        let key = format!("{:08}", i);
        let value = format!("v{:07}", i);
        index.insert(key.as_bytes(), value.as_bytes()).unwrap();
    }
    index
}

fn bench_insert(c: &mut Criterion) {
    let mut group = c.benchmark_group("index_insert");

    for count in [100u32, 1000].iter() {
        group.throughput(Throughput::Elements(*count as u64));
        group.bench_with_input(BenchmarkId::new("ascending", count), count, |b, &count| {
            b.iter(|| {
                let cache = MemoryCache::new(4096, count / 100 + 64).unwrap();
                let mut index = BTreeIndex::create(cache, 8, 8).unwrap();
                for i in 0..count {
                    let key = format!("{:08}", i);
                    let value = format!("v{:07}", i);
                    index.insert(key.as_bytes(), value.as_bytes()).unwrap();
                }
                black_box(index.key_count())
            });
        });
    }
    group.finish();
}

fn bench_lookup(c: &mut Criterion) {
    let mut group = c.benchmark_group("index_lookup");
    let mut index = populated(1000);

    group.throughput(Throughput::Elements(1));
    group.bench_function("hit", |b| {
        let mut i = 0u32;
        b.iter(|| {
            let key = format!("{:08}", i % 1000);
            i = i.wrapping_add(271);
            black_box(index.lookup(key.as_bytes()).unwrap())
        });
    });
    group.bench_function("miss", |b| {
        b.iter(|| black_box(index.lookup(b"zzzzzzzz").unwrap()));
    });
    group.finish();
}

criterion_group!(benches, bench_insert, bench_lookup);
criterion_main!(benches);

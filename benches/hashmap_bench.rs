// Offset hash map insert/lookup throughput at a few load factors, and the
// encode/decode cost of the persisted-state wire format.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use flowcore::hashmap::OffsetHashMap;
use flowcore::state::encode_hash_map;

fn fnv1a(bytes: &[u8]) -> u64 {
    let mut h: u64 = 0xcbf29ce484222325;
    for &b in bytes {
        h ^= b as u64;
        h = h.wrapping_mul(0x100000001b3);
    }
    h
}

fn bench_find_or_create(c: &mut Criterion) {
    let mut group = c.benchmark_group("find_or_create");
    for n in [1_000usize, 10_000, 100_000] {
        group.bench_with_input(BenchmarkId::from_parameter(n), &n, |b, &n| {
            b.iter(|| {
                let mut map = OffsetHashMap::new(8, 8, 4096, 1 << 16).unwrap();
                for k in 0..n as u64 {
                    let key = k.to_le_bytes();
                    map.find_or_create(&key, fnv1a(&key), |v| v.copy_from_slice(&k.to_le_bytes())).unwrap();
                }
                black_box(map.len());
            });
        });
    }
    group.finish();
}

fn bench_lookup_hit(c: &mut Criterion) {
    let mut map = OffsetHashMap::new(8, 8, 4096, 1 << 16).unwrap();
    for k in 0..50_000u64 {
        let key = k.to_le_bytes();
        map.find_or_create(&key, fnv1a(&key), |v| v.copy_from_slice(&key)).unwrap();
    }
    c.bench_function("lookup_hit", |b| {
        b.iter(|| {
            for k in (0..50_000u64).step_by(37) {
                let key = k.to_le_bytes();
                black_box(map.lookup(&key, fnv1a(&key)));
            }
        });
    });
}

fn bench_encode_hash_map(c: &mut Criterion) {
    let mut map = OffsetHashMap::new(8, 8, 4096, 1 << 16).unwrap();
    for k in 0..50_000u64 {
        let key = k.to_le_bytes();
        map.find_or_create(&key, fnv1a(&key), |v| v.copy_from_slice(&key)).unwrap();
    }
    c.bench_function("encode_hash_map", |b| {
        b.iter(|| black_box(encode_hash_map(&map)));
    });
}

criterion_group!(benches, bench_find_or_create, bench_lookup_hit, bench_encode_hash_map);
criterion_main!(benches);

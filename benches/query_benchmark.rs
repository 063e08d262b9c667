//! Benchmarks for compilation and point queries.
//!
//! Run with: cargo bench

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use iptool::{AddressKind, CachedDatabase, CachedReaderConfig, Compiler, Database, FieldCodec, MemorySource};
use std::net::Ipv4Addr;

/// Build a compiler with `range_count` /24 ranges spread over the address
/// space and one country row per 16 ranges.
fn generate_compiler(range_count: u32) -> Compiler {
    let country_count = (range_count / 16).max(1);

    let mut countries = MemorySource::new("countries");
    for i in 0..country_count {
        countries.push([
            i.to_string(),
            format!("c{}", i % 1000),
            format!("Country {}", i),
        ]);
    }

    let mut ranges = MemorySource::new("ranges");
    let step = (u32::MAX / range_count.max(1)) & !0xff;
    for i in 0..range_count {
        let start = Ipv4Addr::from(i.wrapping_mul(step));
        ranges.push([format!("{}/24", start), (i % country_count).to_string()]);
    }

    let mut compiler = Compiler::new();
    let country = compiler
        .define_register("country", countries, Some(1))
        .unwrap();
    compiler.add_field(country, "code", 2, FieldCodec::text()).unwrap();
    compiler.add_field(country, "name", 3, FieldCodec::text()).unwrap();
    let net = compiler
        .define_network(ranges, AddressKind::Prefix, 1, 1)
        .unwrap();
    compiler.map_register(net, 2, "country").unwrap();
    compiler
}

fn generate_database(range_count: u32) -> Vec<u8> {
    generate_compiler(range_count).compile_to_bytes().unwrap()
}

/// Deterministic spread of query addresses.
fn generate_queries(count: u32) -> Vec<Ipv4Addr> {
    (0..count)
        .map(|i| Ipv4Addr::from(i.wrapping_mul(2_654_435_761)))
        .collect()
}

fn bench_find(c: &mut Criterion) {
    let db = Database::from_bytes(generate_database(50_000)).unwrap();
    let queries = generate_queries(1000);

    let mut group = c.benchmark_group("find");
    group.throughput(Throughput::Elements(queries.len() as u64));

    group.bench_function("uncached", |b| {
        b.iter(|| {
            for ip in &queries {
                black_box(db.find(*ip).unwrap());
            }
        })
    });

    group.finish();
}

fn bench_find_with_cache(c: &mut Criterion) {
    let config = CachedReaderConfig::with_capacity(10_000);
    let db = CachedDatabase::from_bytes_with_config(generate_database(50_000), config).unwrap();
    let queries = generate_queries(1000);

    // Warm up cache
    for ip in &queries {
        let _ = db.find(*ip);
    }

    let mut group = c.benchmark_group("find_with_cache");
    group.throughput(Throughput::Elements(queries.len() as u64));

    group.bench_function("cache_hit", |b| {
        b.iter(|| {
            for ip in &queries {
                black_box(db.find(*ip).unwrap());
            }
        })
    });

    group.finish();
}

fn bench_scalability(c: &mut Criterion) {
    let mut group = c.benchmark_group("scalability");
    let queries = generate_queries(100);

    for size in [100u32, 1_000, 10_000, 100_000].iter() {
        let db = Database::from_bytes(generate_database(*size)).unwrap();

        group.throughput(Throughput::Elements(queries.len() as u64));
        group.bench_with_input(BenchmarkId::new("ranges", size), size, |b, _| {
            b.iter(|| {
                for ip in &queries {
                    black_box(db.find(*ip).unwrap());
                }
            })
        });
    }

    group.finish();
}

fn bench_compile(c: &mut Criterion) {
    let mut group = c.benchmark_group("compile");
    group.sample_size(10);

    for size in [1_000u32, 10_000].iter() {
        let compiler = generate_compiler(*size);
        group.bench_with_input(BenchmarkId::new("ranges", size), size, |b, _| {
            b.iter(|| black_box(compiler.compile_to_bytes().unwrap()))
        });
    }

    group.finish();
}

fn bench_hot_reload(c: &mut Criterion) {
    let data = generate_database(10_000);
    let db = CachedDatabase::from_bytes(data.clone()).unwrap();

    let mut group = c.benchmark_group("hot_reload");

    group.bench_function("reload_10k_ranges", |b| {
        b.iter_batched(
            || data.clone(),
            |data| {
                db.reload_from_bytes(data).unwrap();
            },
            criterion::BatchSize::SmallInput,
        )
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_find,
    bench_find_with_cache,
    bench_scalability,
    bench_compile,
    bench_hot_reload,
);

criterion_main!(benches);

//! Benchmarks for exact kNN scans and SuperBit-LSH filtering.
//!
//! Run with: `cargo bench --bench exact_scan`
//!
//! Performance targets:
//! - Parallel scan of 10K 128-d vectors faster than the sequential one
//! - LSH candidate lookup well below a full scan

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tempfile::{tempdir, TempDir};
use vectradb::index::SuperBitLshConfig;
use vectradb::{
    ColumnDef, ColumnType, Config, Distance, ExactScanExecutor, IndexType, KnnPredicate,
    Predicate, Value, VectraDB,
};

const DIM: usize = 128;
const RECORDS: usize = 10_000;

fn random_vector(rng: &mut StdRng) -> Vec<f32> {
    (0..DIM).map(|_| rng.gen_range(-1.0..1.0)).collect()
}

/// Creates a database with `RECORDS` random vectors and an LSH index.
fn populated() -> (TempDir, VectraDB) {
    let dir = tempdir().unwrap();
    let columns = vec![ColumnDef::new("v", ColumnType::FloatVector(DIM))];
    let db = VectraDB::open(dir.path(), &columns, Config::default()).unwrap();

    let mut rng = StdRng::seed_from_u64(42);
    let rows: Vec<Vec<Option<Value>>> = (0..RECORDS)
        .map(|_| vec![Some(random_vector(&mut rng).into())])
        .collect();
    db.insert_batch(rows).unwrap();

    let params = SuperBitLshConfig::new(16, 8, 42).to_params();
    db.create_index("lsh", IndexType::SuperBitLsh, &["v"], &params)
        .unwrap();
    (dir, db)
}

/// Benchmark exact scans at several parallelism levels.
fn bench_exact_scan(c: &mut Criterion) {
    let (_dir, db) = populated();
    let mut rng = StdRng::seed_from_u64(1);
    let predicate = KnnPredicate::new("v", 10, random_vector(&mut rng).into(), Distance::L2);

    let mut group = c.benchmark_group("exact_scan");
    group.sample_size(20);
    for parallelism in [1usize, 2, 4, 8] {
        group.bench_with_input(
            BenchmarkId::from_parameter(parallelism),
            &parallelism,
            |b, &parallelism| {
                let executor = ExactScanExecutor::new(db.entity()).with_parallelism(parallelism);
                b.iter(|| black_box(executor.execute(&predicate).unwrap()));
            },
        );
    }
    group.finish();
}

/// Benchmark candidate lookup through the LSH index.
fn bench_lsh_filter(c: &mut Criterion) {
    let (_dir, db) = populated();
    let mut rng = StdRng::seed_from_u64(1);
    let predicate: Predicate =
        KnnPredicate::new("v", 10, random_vector(&mut rng).into(), Distance::Cosine).into();
    let index = db.index("lsh").unwrap();

    c.bench_function("lsh_filter", |b| {
        b.iter(|| {
            let tx = index.begin().unwrap();
            let n = tx.filter(&predicate).unwrap().count();
            black_box(n)
        });
    });
}

/// Benchmark a full LSH rebuild.
fn bench_lsh_rebuild(c: &mut Criterion) {
    let (_dir, db) = populated();

    let mut group = c.benchmark_group("lsh_rebuild");
    group.sample_size(10);
    group.bench_function("10k_x_128", |b| {
        b.iter(|| db.rebuild_index("lsh").unwrap());
    });
    group.finish();
}

criterion_group!(benches, bench_exact_scan, bench_lsh_filter, bench_lsh_rebuild);
criterion_main!(benches);

//! Benchmarks for exact vector search.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use rand::{Rng, SeedableRng};

use medgraph::index::FlatIndex;

const DIM: usize = 768;

fn random_index(rows: usize, rng: &mut rand::rngs::StdRng) -> FlatIndex {
    let rows: Vec<Vec<f32>> = (0..rows)
        .map(|_| (0..DIM).map(|_| rng.r#gen::<f32>()).collect())
        .collect();
    FlatIndex::from_rows(rows).unwrap()
}

fn bench_search_small(c: &mut Criterion) {
    let mut rng = rand::rngs::StdRng::seed_from_u64(0);
    let index = random_index(1_000, &mut rng);
    let query: Vec<f32> = (0..DIM).map(|_| rng.r#gen::<f32>()).collect();

    c.bench_function("search_1k_top30", |bench| {
        bench.iter(|| black_box(index.search(&query, 30).unwrap()))
    });
}

fn bench_search_parallel(c: &mut Criterion) {
    let mut rng = rand::rngs::StdRng::seed_from_u64(0);
    let index = random_index(20_000, &mut rng);
    let query: Vec<f32> = (0..DIM).map(|_| rng.r#gen::<f32>()).collect();

    c.bench_function("search_20k_top30", |bench| {
        bench.iter(|| black_box(index.search(&query, 30).unwrap()))
    });
}

criterion_group!(benches, bench_search_small, bench_search_parallel);
criterion_main!(benches);

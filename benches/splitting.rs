//! Splitting and evaluation benchmarks
//!
//! Toyota Way: Genchi Genbutsu (measure, don't guess)
//!
//! Run with: cargo bench --bench splitting

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use drp_eval::dataset::ResponseDataset;
use drp_eval::metrics::{evaluate_grouped, Metric};
use drp_eval::splitter::{split_dataset, GroupBy, SplitMode, SplitOptions};

/// Dense response matrix of `n_cells` × `n_drugs` records.
#[allow(clippy::cast_precision_loss)]
fn response_matrix(n_cells: usize, n_drugs: usize) -> ResponseDataset {
    let mut cells = Vec::with_capacity(n_cells * n_drugs);
    let mut drugs = Vec::with_capacity(n_cells * n_drugs);
    let mut response = Vec::with_capacity(n_cells * n_drugs);
    for c in 0..n_cells {
        for d in 0..n_drugs {
            cells.push(format!("CL{c}"));
            drugs.push(format!("D{d}"));
            response.push(((c * 31 + d * 17) % 97) as f64 / 10.0);
        }
    }
    ResponseDataset::new("bench", cells, drugs, response).unwrap()
}

/// Benchmark `split_dataset` per mode (GDSC-like shape, scaled down)
fn bench_split_modes(c: &mut Criterion) {
    let mut group = c.benchmark_group("split_dataset");
    let data = response_matrix(400, 100);
    let options = SplitOptions {
        n_splits: 5,
        split_validation: true,
        split_early_stopping: true,
        validation_ratio: 0.1,
        seed: 42,
    };

    for mode in [SplitMode::Lpo, SplitMode::Lco, SplitMode::Ldo] {
        group.bench_with_input(BenchmarkId::new(mode.as_str(), data.len()), &data, |b, data| {
            b.iter(|| split_dataset(mode, black_box(data), &options).unwrap());
        });
    }
    group.finish();
}

/// Benchmark per-drug evaluation of a prediction table
fn bench_grouped_evaluation(c: &mut Criterion) {
    let mut group = c.benchmark_group("evaluate_grouped");
    for n_cells in [100, 1_000] {
        let mut data = response_matrix(n_cells, 50);
        let predictions: Vec<f64> = data.response().iter().map(|r| r * 0.9 + 0.1).collect();
        data.set_predictions(predictions).unwrap();

        group.bench_with_input(BenchmarkId::new("per_drug", data.len()), &data, |b, data| {
            b.iter(|| evaluate_grouped(black_box(data), GroupBy::Drug, &Metric::ALL).unwrap());
        });
    }
    group.finish();
}

criterion_group!(benches, bench_split_modes, bench_grouped_evaluation);
criterion_main!(benches);

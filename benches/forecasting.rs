use chrono::NaiveDate;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use kolosal_forecast::timeseries::{Frequency, Series};
use kolosal_forecast::training::{FitMode, HyperParams, ModelRegistry};
use rand::prelude::*;
use rand_chacha::ChaCha8Rng;

fn create_daily_series(n_points: usize) -> Series {
    let mut rng = ChaCha8Rng::seed_from_u64(42);
    let start = NaiveDate::from_ymd_opt(2015, 1, 1)
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .unwrap();

    let values: Vec<f64> = (0..n_points)
        .map(|i| {
            let weekly = 5.0 * (2.0 * std::f64::consts::PI * i as f64 / 7.0).sin();
            100.0 + 0.05 * i as f64 + weekly + rng.gen::<f64>()
        })
        .collect();

    Series::from_values(start, Frequency::Daily, values).unwrap()
}

fn bench_fit(c: &mut Criterion) {
    let registry = ModelRegistry::with_builtins();
    let mut group = c.benchmark_group("fit");
    group.sample_size(10); // Fewer samples for training benchmarks

    for n_points in [365, 1095].iter() {
        let series = create_daily_series(*n_points);

        for key in registry.list_models() {
            group.bench_with_input(BenchmarkId::new(key.as_str(), n_points), &series, |b, series| {
                b.iter(|| {
                    let mut model = registry.create(&key, &HyperParams::new()).unwrap();
                    model.fit(black_box(series), None, FitMode::FinalFit).unwrap();
                    model
                })
            });
        }
    }

    group.finish();
}

fn bench_predict(c: &mut Criterion) {
    let registry = ModelRegistry::with_builtins();
    let series = create_daily_series(730);
    let mut group = c.benchmark_group("predict");

    for key in registry.list_models() {
        // Train model once
        let mut model = registry.create(&key, &HyperParams::new()).unwrap();
        model.fit(&series, None, FitMode::FinalFit).unwrap();

        for steps in [30, 180].iter() {
            group.bench_with_input(BenchmarkId::new(key.as_str(), steps), steps, |b, &steps| {
                b.iter(|| model.predict(black_box(steps)).unwrap())
            });
        }
    }

    group.finish();
}

criterion_group!(benches, bench_fit, bench_predict);
criterion_main!(benches);

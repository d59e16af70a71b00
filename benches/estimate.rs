use std::hint::black_box;
use criterion::{criterion_group, criterion_main, Criterion};
use chorus::dsp::{Autocorrelator, FrequencyEstimator};

fn vocal_sine(c: &mut Criterion) {
    let sample_rate = 44100.0;
    let buffer: Vec<f32> = (0..2048)
        .map(|i| (i as f32 / sample_rate * 220.0 * std::f32::consts::TAU).sin())
        .collect();
    let mut estimator = Autocorrelator::new();
    c.bench_function("estimate", |b| {
        b.iter(|| black_box(estimator.estimate(&buffer, sample_rate)))
    });
}

criterion_group!(benches, vocal_sine);
criterion_main!(benches);

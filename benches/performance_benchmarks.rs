use chrono::{Duration, TimeZone, Utc};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use liftrs::fatigue::{self, StimulusSession};
use liftrs::models::EquipmentType;
use liftrs::{one_rep_max, plateau, rounding};

/// Benchmarks for the pure kernels behind every recommendation
///
/// The rounder and plateau detector run on each request, so their cost
/// bounds request latency together with the store round trips.

fn bench_rounding(c: &mut Criterion) {
    let mut group = c.benchmark_group("Plate Rounding");
    let fine_plates = [0.5, 1.0, 1.25, 2.5, 5.0, 10.0, 15.0, 20.0, 25.0];

    for &target in &[42.3, 117.8, 263.4] {
        group.bench_with_input(BenchmarkId::new("barbell_default", target), &target, |b, &target| {
            b.iter(|| rounding::round_weight(black_box(target), None, Some(20.0), EquipmentType::Barbell));
        });
        group.bench_with_input(BenchmarkId::new("barbell_fine", target), &target, |b, &target| {
            b.iter(|| {
                rounding::round_weight(black_box(target), Some(&fine_plates), Some(20.0), EquipmentType::Barbell)
            });
        });
    }

    group.bench_function("dumbbell_pair", |b| {
        b.iter(|| {
            rounding::round_weight(
                black_box(23.7),
                Some(&[0.5, 1.0, 1.25, 2.5]),
                None,
                EquipmentType::DumbbellPair,
            )
        });
    });

    group.finish();
}

fn bench_plateau_detection(c: &mut Criterion) {
    let mut group = c.benchmark_group("Plateau Detection");

    for &len in &[5, 10, 15] {
        let series: Vec<f64> = (0..len)
            .map(|i| 100.0 + if i < len / 2 { i as f64 } else { (len / 2) as f64 - 0.2 * i as f64 })
            .collect();

        group.throughput(Throughput::Elements(len as u64));
        group.bench_with_input(BenchmarkId::new("detect", len), &series, |b, series| {
            b.iter(|| plateau::detect(black_box(series), plateau::ONLINE_MIN_DURATION));
        });
    }

    group.bench_function("build_report", |b| {
        let series = vec![100.0; 15];
        b.iter(|| plateau::build_report(1, black_box(series.clone()), 5, None, 12.0));
    });

    group.finish();
}

fn bench_fatigue(c: &mut Criterion) {
    let mut group = c.benchmark_group("Fatigue Model");
    let now = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
    let taus = fatigue::default_tau_map();

    for &sessions in &[3, 14, 60] {
        let history: Vec<StimulusSession> = (0..sessions)
            .map(|i| StimulusSession {
                date: now - Duration::hours(12 * i as i64),
                stimulus: 25.0 + (i % 4) as f64,
            })
            .collect();

        group.throughput(Throughput::Elements(sessions as u64));
        group.bench_with_input(BenchmarkId::new("fatigue", sessions), &history, |b, history| {
            b.iter(|| fatigue::fatigue("quads", black_box(history), &taus, 1.2, now));
        });
    }

    group.finish();
}

fn bench_one_rep_max(c: &mut Criterion) {
    c.bench_function("estimate_1rm", |b| {
        b.iter(|| one_rep_max::estimate_1rm(black_box(102.5), black_box(6), Some(1.5), black_box(0.4)));
    });
    c.bench_function("predict_reps", |b| {
        b.iter(|| one_rep_max::predict_reps(black_box(140.0), black_box(110.0), Some(2.0), 0.3));
    });
}

criterion_group!(
    benches,
    bench_rounding,
    bench_plateau_detection,
    bench_fatigue,
    bench_one_rep_max
);
criterion_main!(benches);

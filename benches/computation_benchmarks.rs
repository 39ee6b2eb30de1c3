//! Derived-artifact computation benchmarks
//!
//! - PR curve construction (top-K, seeded sampling, monotonize, downsample)
//! - Trajectory construction with ATE/RPE
//! - Arrow IPC encode of a full trajectory

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use trueno_results::codec::{self, Resolution};
use trueno_results::compute::{PrCurveBuilder, TrajectoryBuilder};
use trueno_results::experiment::{FrameResult, MatchScore};

/// Frames with `matches` scored matches and a small forward motion each
#[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation)]
fn create_frames(count: u64, matches: u32) -> Vec<FrameResult> {
    (0..count)
        .map(|id| {
            let scores = (0..matches)
                .map(|m| {
                    let score = f64::from((m * 7919 + id as u32) % 1000) / 1000.0;
                    MatchScore::new(score, score > 0.4)
                })
                .collect();
            FrameResult::new(id)
                .with_timestamp(id as f64 * 0.1)
                .with_matches(scores)
                .with_estimated_translation([0.1, 0.01 * (id as f64).sin(), 0.0])
                .with_ground_truth_translation([0.1 * (id + 1) as f64, 0.0, 0.0])
        })
        .collect()
}

fn bench_pr_curve(c: &mut Criterion) {
    let mut group = c.benchmark_group("pr_curve");
    let builder = PrCurveBuilder::new();

    for frames in [100, 1_000, 5_000] {
        let input = create_frames(frames, 200);
        group.bench_with_input(BenchmarkId::from_parameter(frames), &input, |b, input| {
            b.iter(|| black_box(builder.build(input)));
        });
    }

    group.finish();
}

fn bench_trajectory(c: &mut Criterion) {
    let mut group = c.benchmark_group("trajectory");
    let builder = TrajectoryBuilder::new();

    for frames in [1_000, 10_000, 50_000] {
        let input = create_frames(frames, 0);
        group.bench_with_input(BenchmarkId::from_parameter(frames), &input, |b, input| {
            b.iter(|| black_box(builder.build(input)));
        });
    }

    group.finish();
}

fn bench_trajectory_encode(c: &mut Criterion) {
    let data = TrajectoryBuilder::new()
        .build(&create_frames(10_000, 0))
        .unwrap();

    c.bench_function("trajectory_encode_full", |b| {
        b.iter(|| black_box(codec::trajectory::encode(&data, Resolution::Full)));
    });
    c.bench_function("trajectory_downsample_ui", |b| {
        b.iter(|| black_box(data.downsampled(1500)));
    });
}

criterion_group!(benches, bench_pr_curve, bench_trajectory, bench_trajectory_encode);
criterion_main!(benches);

//! Precision-recall curve construction
//!
//! **Problem**: a run holds up to millions of scored matches; a curve over
//! all of them is slow to build and impossible to plot.
//!
//! **Solution**: bound the input twice (top-K per frame, then a seeded uniform
//! sample) and bound the output once (uniform downsample of the finished
//! curve). The seed makes every rebuild of the same run byte-identical.

use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::debug;

use super::downsample;
use crate::experiment::{f1_score, FrameResult, MatchScore, PrCurveData};

/// Matches kept per frame.
pub const DEFAULT_MAX_MATCHES_PER_FRAME: usize = 50;
/// Overall sample cap.
pub const DEFAULT_MAX_SAMPLES: usize = 2000;
/// Sampling seed.
pub const DEFAULT_SAMPLING_SEED: u64 = 42;
/// Point cap of a finished curve.
pub const DEFAULT_MAX_POINTS: usize = 500;

/// Builds a [`PrCurveData`] from frame match scores.
#[derive(Debug, Clone, Copy)]
pub struct PrCurveBuilder {
    max_matches_per_frame: usize,
    max_samples: usize,
    seed: u64,
    max_points: usize,
}

impl Default for PrCurveBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl PrCurveBuilder {
    /// Builder with the default caps and seed.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            max_matches_per_frame: DEFAULT_MAX_MATCHES_PER_FRAME,
            max_samples: DEFAULT_MAX_SAMPLES,
            seed: DEFAULT_SAMPLING_SEED,
            max_points: DEFAULT_MAX_POINTS,
        }
    }

    /// Set the per-frame match cap.
    #[must_use]
    pub const fn max_matches_per_frame(mut self, cap: usize) -> Self {
        self.max_matches_per_frame = cap;
        self
    }

    /// Set the overall sample cap.
    #[must_use]
    pub const fn max_samples(mut self, cap: usize) -> Self {
        self.max_samples = cap;
        self
    }

    /// Set the sampling seed.
    #[must_use]
    pub const fn seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Set the point cap of the finished curve.
    #[must_use]
    pub const fn max_points(mut self, cap: usize) -> Self {
        self.max_points = cap;
        self
    }

    /// Highest-scoring matches of every frame, then a seeded sample of them
    /// if there are too many. Sampled matches keep their original order.
    #[must_use]
    pub fn collect_samples(&self, frames: &[FrameResult]) -> Vec<MatchScore> {
        let mut samples = Vec::new();
        for frame in frames {
            let mut matches: Vec<MatchScore> = frame
                .matches
                .iter()
                .copied()
                .filter(|m| m.score.is_finite())
                .collect();
            if matches.len() < frame.matches.len() {
                debug!(frame_id = frame.frame_id, "dropped non-finite match scores");
            }
            matches.sort_by(|a, b| b.score.total_cmp(&a.score));
            matches.truncate(self.max_matches_per_frame);
            samples.extend(matches);
        }

        if samples.len() > self.max_samples {
            let mut rng = StdRng::seed_from_u64(self.seed);
            let mut picked = rand::seq::index::sample(&mut rng, samples.len(), self.max_samples).into_vec();
            picked.sort_unstable();
            return picked.into_iter().map(|i| samples[i]).collect();
        }
        samples
    }

    /// Build the full-resolution curve. `None` when there are no samples.
    #[must_use]
    pub fn build(&self, frames: &[FrameResult]) -> Option<PrCurveData> {
        self.build_from_samples(&self.collect_samples(frames))
    }

    /// Build a curve from already-selected samples.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn build_from_samples(&self, samples: &[MatchScore]) -> Option<PrCurveData> {
        if samples.is_empty() {
            return None;
        }
        let num_positives = samples.iter().filter(|m| m.is_inlier).count();

        let mut ranked = samples.to_vec();
        ranked.sort_by(|a, b| b.score.total_cmp(&a.score));

        // One point per distinct threshold, descending
        let mut raw_precision = Vec::new();
        let mut raw_recall = Vec::new();
        let mut raw_thresholds = Vec::new();
        let (mut tp, mut fp) = (0usize, 0usize);
        for (i, m) in ranked.iter().enumerate() {
            if m.is_inlier {
                tp += 1;
            } else {
                fp += 1;
            }
            let last_of_threshold = ranked.get(i + 1).map_or(true, |next| next.score != m.score);
            if last_of_threshold {
                raw_precision.push(tp as f64 / (tp + fp) as f64);
                raw_recall.push(if num_positives == 0 {
                    0.0
                } else {
                    tp as f64 / num_positives as f64
                });
                raw_thresholds.push(m.score);
            }
        }
        let auc = trapezoid_auc(&raw_recall, &raw_precision);

        let mut order: Vec<usize> = (0..raw_recall.len()).collect();
        order.sort_by(|&a, &b| raw_recall[a].total_cmp(&raw_recall[b]));
        let mut precision = downsample::select(&raw_precision, &order);
        let recall = downsample::select(&raw_recall, &order);
        let thresholds = downsample::select(&raw_thresholds, &order);
        monotonize(&mut precision);

        let original_points = recall.len();
        let idx = downsample::uniform_indices(original_points, self.max_points);
        let precision = downsample::select(&precision, &idx);
        let recall = downsample::select(&recall, &idx);
        let thresholds = downsample::select(&thresholds, &idx);
        let f1_scores = precision.iter().zip(&recall).map(|(p, r)| f1_score(*p, *r)).collect();
        let optimal = PrCurveData::best_operating_point(&precision, &recall, &thresholds);

        Some(PrCurveData {
            precision,
            recall,
            thresholds,
            f1_scores,
            auc,
            optimal,
            raw_precision,
            raw_recall,
            raw_thresholds,
            num_samples: samples.len(),
            num_positives,
            original_points,
            downsampled: original_points > self.max_points,
        })
    }
}

/// Make precision non-increasing: `precision[i] = max(precision[i..])`.
pub fn monotonize(precision: &mut [f64]) {
    let mut running = f64::NEG_INFINITY;
    for p in precision.iter_mut().rev() {
        running = running.max(*p);
        *p = running;
    }
}

/// Trapezoidal area under `y(x)` in the given point order.
#[must_use]
pub fn trapezoid_auc(x: &[f64], y: &[f64]) -> f64 {
    x.windows(2)
        .zip(y.windows(2))
        .map(|(xs, ys)| (xs[1] - xs[0]) * (ys[0] + ys[1]) / 2.0)
        .sum()
}

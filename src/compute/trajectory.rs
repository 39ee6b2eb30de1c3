//! Trajectory construction and error metrics
//!
//! Estimated poses are relative motions: the running position starts at the
//! origin and each valid translation is added to it. A frame without a usable
//! pose keeps the previous position and is flagged `has_pose_estimate: false`,
//! so every frame still appears on the path.

use std::cmp::Ordering;

use tracing::debug;

use crate::experiment::{ErrorStats, FrameResult, TrajectoryData, TrajectoryPoint};

/// Builds a [`TrajectoryData`] from raw frame results.
#[derive(Debug, Clone, Copy, Default)]
pub struct TrajectoryBuilder {
    include_reference: bool,
}

impl TrajectoryBuilder {
    /// Builder without a reference line.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            include_reference: false,
        }
    }

    /// Synthesize a straight reference line when there is no ground truth.
    #[must_use]
    pub const fn include_reference(mut self, include: bool) -> Self {
        self.include_reference = include;
        self
    }

    /// Build the full-resolution trajectory.
    ///
    /// Returns `None` when no frame carries a usable pose estimate.
    #[must_use]
    pub fn build(&self, frames: &[FrameResult]) -> Option<TrajectoryData> {
        let mut ordered: Vec<&FrameResult> = frames.iter().collect();
        ordered.sort_by_key(|f| f.frame_id);

        let mut position = [0.0f64; 3];
        let mut points = Vec::with_capacity(ordered.len());
        let mut ground_truth = Vec::new();
        let mut estimated = 0usize;

        for frame in ordered {
            let t = frame.time();
            let step = frame.estimated_pose.as_ref().and_then(|pose| {
                let valid = pose.position();
                if valid.is_none() {
                    debug!(frame_id = frame.frame_id, "malformed estimated pose, carrying position forward");
                }
                valid
            });

            if let Some(delta) = step {
                for (axis, d) in position.iter_mut().zip(delta) {
                    *axis += d;
                }
                estimated += 1;
            }
            let mut point = TrajectoryPoint::new(frame.frame_id, t, position);
            point.has_pose_estimate = step.is_some();
            points.push(point);

            if let Some(gt) = frame.ground_truth_pose.as_ref().and_then(|p| p.position()) {
                ground_truth.push(TrajectoryPoint::new(frame.frame_id, t, gt));
            }
        }

        if estimated == 0 {
            return None;
        }

        let data = TrajectoryData::new(points, ground_truth);
        Some(if self.include_reference {
            data.with_reference_line()
        } else {
            data
        })
    }
}

/// Piecewise Euclidean length of a path.
#[must_use]
pub fn path_length(points: &[TrajectoryPoint]) -> f64 {
    points.windows(2).map(|w| w[0].distance(&w[1])).sum()
}

/// Absolute trajectory error: distance from every estimated point to the
/// ground truth point nearest in time. All zero without ground truth.
#[must_use]
pub fn absolute_trajectory_error(
    points: &[TrajectoryPoint],
    ground_truth: &[TrajectoryPoint],
) -> ErrorStats {
    let Some(index) = TimeIndex::new(ground_truth) else {
        return ErrorStats::default();
    };
    let errors: Vec<f64> = points
        .iter()
        .map(|p| p.distance(index.nearest(p.timestamp)))
        .collect();
    ErrorStats::from_samples(&errors)
}

/// Relative pose error: for each pair of consecutive estimated points, the
/// norm of (estimated displacement - matched ground truth displacement).
/// All zero without ground truth or with fewer than two points.
#[must_use]
pub fn relative_pose_error(
    points: &[TrajectoryPoint],
    ground_truth: &[TrajectoryPoint],
) -> ErrorStats {
    let Some(index) = TimeIndex::new(ground_truth) else {
        return ErrorStats::default();
    };
    let errors: Vec<f64> = points
        .windows(2)
        .map(|w| {
            let g0 = index.nearest(w[0].timestamp);
            let g1 = index.nearest(w[1].timestamp);
            let est = sub(w[1].position(), w[0].position());
            let gt = sub(g1.position(), g0.position());
            norm(sub(est, gt))
        })
        .collect();
    ErrorStats::from_samples(&errors)
}

fn sub(a: [f64; 3], b: [f64; 3]) -> [f64; 3] {
    [a[0] - b[0], a[1] - b[1], a[2] - b[2]]
}

fn norm(v: [f64; 3]) -> f64 {
    (v[0] * v[0] + v[1] * v[1] + v[2] * v[2]).sqrt()
}

/// Ground truth sorted by timestamp for nearest-time lookups.
struct TimeIndex<'a> {
    sorted: Vec<&'a TrajectoryPoint>,
}

impl<'a> TimeIndex<'a> {
    fn new(points: &'a [TrajectoryPoint]) -> Option<Self> {
        if points.is_empty() {
            return None;
        }
        let mut sorted: Vec<&TrajectoryPoint> = points.iter().collect();
        sorted.sort_by(|a, b| a.timestamp.total_cmp(&b.timestamp));
        Some(Self { sorted })
    }

    /// Point with the closest timestamp; the earlier one wins a tie.
    fn nearest(&self, t: f64) -> &'a TrajectoryPoint {
        let idx = self
            .sorted
            .binary_search_by(|p| p.timestamp.partial_cmp(&t).unwrap_or(Ordering::Less))
            .unwrap_or_else(|insert| insert);
        if idx == 0 {
            return self.sorted[0];
        }
        if idx >= self.sorted.len() {
            return self.sorted[self.sorted.len() - 1];
        }
        let before = self.sorted[idx - 1];
        let after = self.sorted[idx];
        if (t - before.timestamp).abs() <= (after.timestamp - t).abs() {
            before
        } else {
            after
        }
    }
}

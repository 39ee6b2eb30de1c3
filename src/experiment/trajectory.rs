//! Trajectory records

use serde::{Deserialize, Serialize};

use crate::compute::downsample;
use crate::compute::trajectory::{absolute_trajectory_error, path_length, relative_pose_error};

const fn default_true() -> bool {
    true
}

/// One position on a trajectory.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrajectoryPoint {
    /// Frame the position belongs to.
    pub frame_id: u64,
    /// Seconds, or the frame id when the frame had no timestamp.
    pub timestamp: f64,
    /// X coordinate.
    pub x: f64,
    /// Y coordinate.
    pub y: f64,
    /// Z coordinate.
    pub z: f64,
    /// False when the frame had no usable pose and the position was carried forward.
    #[serde(default = "default_true")]
    pub has_pose_estimate: bool,
}

impl TrajectoryPoint {
    /// Point with a pose estimate.
    #[must_use]
    pub const fn new(frame_id: u64, timestamp: f64, position: [f64; 3]) -> Self {
        Self {
            frame_id,
            timestamp,
            x: position[0],
            y: position[1],
            z: position[2],
            has_pose_estimate: true,
        }
    }

    /// Coordinates as an array.
    #[must_use]
    pub const fn position(&self) -> [f64; 3] {
        [self.x, self.y, self.z]
    }

    /// Euclidean distance to `other`.
    #[must_use]
    pub fn distance(&self, other: &Self) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        let dz = self.z - other.z;
        (dx * dx + dy * dy + dz * dz).sqrt()
    }
}

/// Summary statistics of a set of error samples.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ErrorStats {
    /// Root mean square.
    pub rmse: f64,
    /// Arithmetic mean.
    pub mean: f64,
    /// Median.
    pub median: f64,
    /// Population standard deviation.
    pub std: f64,
    /// Smallest sample.
    pub min: f64,
    /// Largest sample.
    pub max: f64,
}

impl ErrorStats {
    /// Statistics over `samples`; all zero when empty.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn from_samples(samples: &[f64]) -> Self {
        if samples.is_empty() {
            return Self::default();
        }
        let n = samples.len() as f64;
        let mean = samples.iter().sum::<f64>() / n;
        let rmse = (samples.iter().map(|e| e * e).sum::<f64>() / n).sqrt();
        let std = (samples.iter().map(|e| (e - mean).powi(2)).sum::<f64>() / n).sqrt();

        let mut sorted = samples.to_vec();
        sorted.sort_by(f64::total_cmp);
        let mid = sorted.len() / 2;
        let median = if sorted.len() % 2 == 0 {
            (sorted[mid - 1] + sorted[mid]) / 2.0
        } else {
            sorted[mid]
        };

        Self {
            rmse,
            mean,
            median,
            std,
            min: sorted[0],
            max: sorted[sorted.len() - 1],
        }
    }
}

/// Estimated path of one algorithm run, with ground truth and error statistics.
///
/// Error statistics and path lengths always describe the full-resolution
/// series, also on a downsampled copy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrajectoryData {
    /// Estimated positions, in frame order.
    pub points: Vec<TrajectoryPoint>,
    /// Ground truth positions, when the sequence has them.
    #[serde(default)]
    pub ground_truth: Vec<TrajectoryPoint>,
    /// Straight reference line, synthesized only when there is no ground truth.
    #[serde(default)]
    pub reference: Vec<TrajectoryPoint>,
    /// Length of the estimated path.
    #[serde(default)]
    pub path_length: f64,
    /// Length of the ground truth path.
    #[serde(default)]
    pub ground_truth_path_length: f64,
    /// Absolute trajectory error.
    #[serde(default)]
    pub ate: ErrorStats,
    /// Relative pose error.
    #[serde(default)]
    pub rpe: ErrorStats,
    /// Estimated point count before downsampling.
    #[serde(default)]
    pub original_points: usize,
    /// Whether `points` is a reduced copy.
    #[serde(default)]
    pub downsampled: bool,
}

impl TrajectoryData {
    /// Build a full-resolution trajectory, computing path lengths, ATE and RPE.
    #[must_use]
    pub fn new(points: Vec<TrajectoryPoint>, ground_truth: Vec<TrajectoryPoint>) -> Self {
        Self {
            path_length: path_length(&points),
            ground_truth_path_length: path_length(&ground_truth),
            ate: absolute_trajectory_error(&points, &ground_truth),
            rpe: relative_pose_error(&points, &ground_truth),
            original_points: points.len(),
            downsampled: false,
            points,
            ground_truth,
            reference: Vec::new(),
        }
    }

    /// Add a straight reference line when there is no ground truth.
    #[must_use]
    pub fn with_reference_line(mut self) -> Self {
        if self.ground_truth.is_empty() {
            self.reference = reference_line(&self.points);
        }
        self
    }

    /// Drop the synthesized reference line.
    #[must_use]
    pub fn without_reference(mut self) -> Self {
        self.reference.clear();
        self
    }

    /// Number of estimated points.
    #[must_use]
    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// True if there are no estimated points.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Copy with every series reduced to at most `cap` points.
    ///
    /// Statistics and `original_points` are carried over unchanged.
    #[must_use]
    pub fn downsampled(&self, cap: usize) -> Self {
        let reduce = |series: &[TrajectoryPoint]| {
            downsample::select(series, &downsample::uniform_indices(series.len(), cap))
        };
        Self {
            points: reduce(&self.points),
            ground_truth: reduce(&self.ground_truth),
            reference: reduce(&self.reference),
            path_length: self.path_length,
            ground_truth_path_length: self.ground_truth_path_length,
            ate: self.ate,
            rpe: self.rpe,
            original_points: self.original_points.max(self.points.len()),
            downsampled: self.downsampled || self.points.len() > cap,
        }
    }
}

/// Straight line from the first to the last point, one point per input point.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn reference_line(points: &[TrajectoryPoint]) -> Vec<TrajectoryPoint> {
    let (Some(first), Some(last)) = (points.first(), points.last()) else {
        return Vec::new();
    };
    if points.len() == 1 {
        return vec![*first];
    }
    let span = (points.len() - 1) as f64;
    points
        .iter()
        .enumerate()
        .map(|(i, p)| {
            let f = i as f64 / span;
            TrajectoryPoint::new(
                p.frame_id,
                p.timestamp,
                [
                    first.x + (last.x - first.x) * f,
                    first.y + (last.y - first.y) * f,
                    first.z + (last.z - first.z) * f,
                ],
            )
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[allow(clippy::cast_precision_loss)]
    fn line(n: u64) -> Vec<TrajectoryPoint> {
        (0..n)
            .map(|i| TrajectoryPoint::new(i, i as f64, [i as f64, 0.0, 0.0]))
            .collect()
    }

    #[test]
    fn test_error_stats_empty_is_zero() {
        assert_eq!(ErrorStats::from_samples(&[]), ErrorStats::default());
    }

    #[test]
    fn test_error_stats_values() {
        let stats = ErrorStats::from_samples(&[3.0, 1.0, 2.0, 4.0]);
        assert!((stats.mean - 2.5).abs() < 1e-12);
        assert!((stats.median - 2.5).abs() < 1e-12);
        assert!((stats.min - 1.0).abs() < 1e-12);
        assert!((stats.max - 4.0).abs() < 1e-12);
        assert!((stats.rmse - (30.0f64 / 4.0).sqrt()).abs() < 1e-12);
        assert!((stats.std - 1.25f64.sqrt()).abs() < 1e-12);
    }

    #[test]
    fn test_new_computes_path_length() {
        let data = TrajectoryData::new(line(11), Vec::new());
        assert!((data.path_length - 10.0).abs() < 1e-12);
        assert_eq!(data.original_points, 11);
        assert_eq!(data.ate, ErrorStats::default());
    }

    #[test]
    fn test_reference_line_only_without_ground_truth() {
        let data = TrajectoryData::new(line(5), Vec::new()).with_reference_line();
        assert_eq!(data.reference.len(), 5);
        assert!((data.reference[4].x - 4.0).abs() < 1e-12);

        let with_gt = TrajectoryData::new(line(5), line(5)).with_reference_line();
        assert!(with_gt.reference.is_empty());
    }

    #[test]
    fn test_downsampled_keeps_stats_and_counts() {
        let data = TrajectoryData::new(line(2000), Vec::new()).with_reference_line();
        let ui = data.downsampled(1500);
        assert_eq!(ui.len(), 1500);
        assert_eq!(ui.reference.len(), 1500);
        assert_eq!(ui.original_points, 2000);
        assert!(ui.downsampled);
        assert!((ui.path_length - data.path_length).abs() < f64::EPSILON);

        let small = TrajectoryData::new(line(10), Vec::new()).downsampled(1500);
        assert_eq!(small.len(), 10);
        assert!(!small.downsampled);
    }
}

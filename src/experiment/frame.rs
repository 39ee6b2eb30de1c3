//! Frame Result - one processed frame, as produced by the pipeline

use serde::{Deserialize, Serialize};

const fn default_true() -> bool {
    true
}

/// Score of one accepted match and whether RANSAC kept it as an inlier.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MatchScore {
    /// Match confidence; higher is better.
    pub score: f64,
    /// RANSAC inlier flag, the label for PR curves.
    #[serde(default)]
    pub is_inlier: bool,
}

impl MatchScore {
    /// Create a match score.
    #[must_use]
    pub const fn new(score: f64, is_inlier: bool) -> Self {
        Self { score, is_inlier }
    }
}

/// A pose as reported by the pipeline.
///
/// Only the translation is used here. It is kept as a plain vector because
/// producers are not trusted to send exactly three finite numbers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pose {
    /// Translation components (x, y, z).
    pub translation: Vec<f64>,
    /// Rotation as sent by the producer (matrix or quaternion), passed through.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rotation: Option<Vec<f64>>,
}

impl Pose {
    /// Pose with only a translation.
    #[must_use]
    pub fn from_translation(translation: [f64; 3]) -> Self {
        Self {
            translation: translation.to_vec(),
            rotation: None,
        }
    }

    /// The translation, if it has exactly three finite components.
    #[must_use]
    pub fn position(&self) -> Option<[f64; 3]> {
        match self.translation.as_slice() {
            [x, y, z] if x.is_finite() && y.is_finite() && z.is_finite() => Some([*x, *y, *z]),
            _ => None,
        }
    }
}

/// Result of processing one frame.
///
/// `estimated_pose` is the motion since the previous frame; `ground_truth_pose`
/// is an absolute position. Fields this crate does not interpret are kept in
/// `extra` so they survive a store round trip.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameResult {
    /// Frame index, unique within an algorithm run.
    pub frame_id: u64,
    /// Capture time in seconds, when the sequence provides one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<f64>,
    /// Whether the pipeline produced a usable result.
    #[serde(default = "default_true")]
    pub success: bool,
    /// Detected keypoints.
    #[serde(default)]
    pub num_keypoints: usize,
    /// Accepted matches.
    #[serde(default)]
    pub num_matches: usize,
    /// RANSAC inliers.
    #[serde(default)]
    pub num_inliers: usize,
    /// Wall time spent on the frame.
    #[serde(default)]
    pub processing_time_ms: f64,
    /// Per-match scores and inlier flags.
    #[serde(default)]
    pub matches: Vec<MatchScore>,
    /// Relative motion estimate.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimated_pose: Option<Pose>,
    /// Absolute ground truth position.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ground_truth_pose: Option<Pose>,
    /// Producer fields not modelled here.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl FrameResult {
    /// Successful frame with no matches or poses.
    #[must_use]
    pub fn new(frame_id: u64) -> Self {
        Self {
            frame_id,
            timestamp: None,
            success: true,
            num_keypoints: 0,
            num_matches: 0,
            num_inliers: 0,
            processing_time_ms: 0.0,
            matches: Vec::new(),
            estimated_pose: None,
            ground_truth_pose: None,
            extra: serde_json::Map::new(),
        }
    }

    /// Set the capture timestamp.
    #[must_use]
    pub const fn with_timestamp(mut self, timestamp: f64) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    /// Set the matches, updating the match and inlier counts.
    #[must_use]
    pub fn with_matches(mut self, matches: Vec<MatchScore>) -> Self {
        self.num_matches = matches.len();
        self.num_inliers = matches.iter().filter(|m| m.is_inlier).count();
        self.matches = matches;
        self
    }

    /// Set the relative motion estimate.
    #[must_use]
    pub fn with_estimated_translation(mut self, translation: [f64; 3]) -> Self {
        self.estimated_pose = Some(Pose::from_translation(translation));
        self
    }

    /// Set the absolute ground truth position.
    #[must_use]
    pub fn with_ground_truth_translation(mut self, translation: [f64; 3]) -> Self {
        self.ground_truth_pose = Some(Pose::from_translation(translation));
        self
    }

    /// Mark the frame as failed.
    #[must_use]
    pub const fn failed(mut self) -> Self {
        self.success = false;
        self
    }

    /// Time used to place this frame on a trajectory.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn time(&self) -> f64 {
        self.timestamp
            .filter(|t| t.is_finite())
            .unwrap_or(self.frame_id as f64)
    }
}

/// How an algorithm run's frames are laid out on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameLayout {
    /// No frames stored.
    Missing,
    /// Legacy single record at `frames/{alg}`.
    Batch,
    /// One record per frame at `frames/{alg}/{frame_id:06}`.
    Individual,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pose_position_requires_three_finite_values() {
        assert_eq!(Pose::from_translation([1.0, 2.0, 3.0]).position(), Some([1.0, 2.0, 3.0]));
        let short = Pose {
            translation: vec![1.0, 2.0],
            rotation: None,
        };
        assert_eq!(short.position(), None);
        let nan = Pose {
            translation: vec![1.0, f64::NAN, 0.0],
            rotation: None,
        };
        assert_eq!(nan.position(), None);
    }

    #[test]
    fn test_with_matches_updates_counts() {
        let frame = FrameResult::new(3).with_matches(vec![
            MatchScore::new(0.9, true),
            MatchScore::new(0.4, false),
            MatchScore::new(0.7, true),
        ]);
        assert_eq!(frame.num_matches, 3);
        assert_eq!(frame.num_inliers, 2);
    }

    #[test]
    fn test_unknown_fields_survive_roundtrip() {
        let json = serde_json::json!({
            "frame_id": 7,
            "timestamp": 0.7,
            "matches": [{"score": 0.5, "is_inlier": true}],
            "homography": [[1, 0, 0], [0, 1, 0], [0, 0, 1]]
        });
        let frame: FrameResult = serde_json::from_value(json).unwrap();
        assert!(frame.success);
        assert!(frame.extra.contains_key("homography"));

        let back = serde_json::to_value(&frame).unwrap();
        assert_eq!(back["homography"][1][1], 1);
        assert_eq!(back["frame_id"], 7);
    }

    #[test]
    fn test_time_falls_back_to_frame_id() {
        assert!((FrameResult::new(12).time() - 12.0).abs() < f64::EPSILON);
        assert!((FrameResult::new(12).with_timestamp(1.5).time() - 1.5).abs() < f64::EPSILON);
    }
}

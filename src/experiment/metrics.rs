//! Algorithm Metrics - aggregate result of one algorithm run

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::FrameResult;
use crate::{Error, Result};

/// Status of an algorithm run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Run is created but not yet started.
    #[default]
    Pending,
    /// Run is currently executing.
    Running,
    /// Run completed successfully.
    Success,
    /// Run failed with an error.
    Failed,
    /// Run was cancelled by user or system.
    Cancelled,
}

/// Algorithm Metrics is the canonical record at `experiments/{id}/algorithms/{alg}`.
///
/// ## Invariant
///
/// `successful_frames + failed_frames == total_frames`. The constructors
/// derive `total_frames`, and [`validate`](Self::validate) is checked before
/// every save.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AlgorithmMetrics {
    experiment_id: String,
    algorithm_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    feature_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    ransac_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    sequence: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    run: Option<u32>,
    total_frames: usize,
    successful_frames: usize,
    failed_frames: usize,
    #[serde(default)]
    avg_num_matches: f64,
    #[serde(default)]
    avg_num_inliers: f64,
    #[serde(default)]
    avg_inlier_ratio: f64,
    #[serde(default)]
    avg_processing_time_ms: f64,
    #[serde(default)]
    status: RunStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    ended_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    extra: BTreeMap<String, f64>,
}

impl AlgorithmMetrics {
    /// Create metrics from frame counts; `total_frames` is their sum.
    #[must_use]
    pub fn new(
        experiment_id: impl Into<String>,
        algorithm_key: impl Into<String>,
        successful_frames: usize,
        failed_frames: usize,
    ) -> Self {
        Self {
            experiment_id: experiment_id.into(),
            algorithm_key: algorithm_key.into(),
            feature_type: None,
            ransac_type: None,
            sequence: None,
            run: None,
            total_frames: successful_frames + failed_frames,
            successful_frames,
            failed_frames,
            avg_num_matches: 0.0,
            avg_num_inliers: 0.0,
            avg_inlier_ratio: 0.0,
            avg_processing_time_ms: 0.0,
            status: RunStatus::Success,
            started_at: None,
            ended_at: Some(Utc::now()),
            extra: BTreeMap::new(),
        }
    }

    /// Aggregate metrics over a run's frames.
    ///
    /// Averages are taken over successful frames; the inlier ratio skips
    /// frames without matches.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn from_frames(
        experiment_id: impl Into<String>,
        algorithm_key: impl Into<String>,
        frames: &[FrameResult],
    ) -> Self {
        let successful: Vec<&FrameResult> = frames.iter().filter(|f| f.success).collect();
        let mut metrics = Self::new(
            experiment_id,
            algorithm_key,
            successful.len(),
            frames.len() - successful.len(),
        );

        if !successful.is_empty() {
            let n = successful.len() as f64;
            metrics.avg_num_matches = successful.iter().map(|f| f.num_matches as f64).sum::<f64>() / n;
            metrics.avg_num_inliers = successful.iter().map(|f| f.num_inliers as f64).sum::<f64>() / n;
            metrics.avg_processing_time_ms =
                successful.iter().map(|f| f.processing_time_ms).sum::<f64>() / n;

            let ratios: Vec<f64> = successful
                .iter()
                .filter(|f| f.num_matches > 0)
                .map(|f| f.num_inliers as f64 / f.num_matches as f64)
                .collect();
            if !ratios.is_empty() {
                metrics.avg_inlier_ratio = ratios.iter().sum::<f64>() / ratios.len() as f64;
            }
        }
        metrics
    }

    /// Set the identity components of the algorithm key.
    #[must_use]
    pub fn with_identity(
        mut self,
        feature_type: impl Into<String>,
        ransac_type: impl Into<String>,
        sequence: impl Into<String>,
        run: u32,
    ) -> Self {
        self.feature_type = Some(feature_type.into());
        self.ransac_type = Some(ransac_type.into());
        self.sequence = Some(sequence.into());
        self.run = Some(run);
        self
    }

    /// Set the run status.
    #[must_use]
    pub const fn with_status(mut self, status: RunStatus) -> Self {
        self.status = status;
        self
    }

    /// Set the start timestamp.
    #[must_use]
    pub const fn with_started_at(mut self, started_at: DateTime<Utc>) -> Self {
        self.started_at = Some(started_at);
        self
    }

    /// Add a named metric.
    #[must_use]
    pub fn with_metric(mut self, name: impl Into<String>, value: f64) -> Self {
        self.extra.insert(name.into(), value);
        self
    }

    /// Get the experiment ID.
    #[must_use]
    pub fn experiment_id(&self) -> &str {
        &self.experiment_id
    }

    /// Get the algorithm key.
    #[must_use]
    pub fn algorithm_key(&self) -> &str {
        &self.algorithm_key
    }

    /// Get the feature type, if known.
    #[must_use]
    pub fn feature_type(&self) -> Option<&str> {
        self.feature_type.as_deref()
    }

    /// Get the RANSAC type, if known.
    #[must_use]
    pub fn ransac_type(&self) -> Option<&str> {
        self.ransac_type.as_deref()
    }

    /// Get the sequence name, if known.
    #[must_use]
    pub fn sequence(&self) -> Option<&str> {
        self.sequence.as_deref()
    }

    /// Get the run index, if known.
    #[must_use]
    pub const fn run(&self) -> Option<u32> {
        self.run
    }

    /// Get the total frame count.
    #[must_use]
    pub const fn total_frames(&self) -> usize {
        self.total_frames
    }

    /// Get the successful frame count.
    #[must_use]
    pub const fn successful_frames(&self) -> usize {
        self.successful_frames
    }

    /// Get the failed frame count.
    #[must_use]
    pub const fn failed_frames(&self) -> usize {
        self.failed_frames
    }

    /// Fraction of frames that succeeded (0 for an empty run).
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn success_rate(&self) -> f64 {
        if self.total_frames == 0 {
            0.0
        } else {
            self.successful_frames as f64 / self.total_frames as f64
        }
    }

    /// Average matches per successful frame.
    #[must_use]
    pub const fn avg_num_matches(&self) -> f64 {
        self.avg_num_matches
    }

    /// Average inliers per successful frame.
    #[must_use]
    pub const fn avg_num_inliers(&self) -> f64 {
        self.avg_num_inliers
    }

    /// Average inlier ratio over frames with matches.
    #[must_use]
    pub const fn avg_inlier_ratio(&self) -> f64 {
        self.avg_inlier_ratio
    }

    /// Average processing time per successful frame.
    #[must_use]
    pub const fn avg_processing_time_ms(&self) -> f64 {
        self.avg_processing_time_ms
    }

    /// Get the run status.
    #[must_use]
    pub const fn status(&self) -> RunStatus {
        self.status
    }

    /// Get the start timestamp, if set.
    #[must_use]
    pub const fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    /// Get the end timestamp, if set.
    #[must_use]
    pub const fn ended_at(&self) -> Option<DateTime<Utc>> {
        self.ended_at
    }

    /// Get a named metric.
    #[must_use]
    pub fn metric(&self, name: &str) -> Option<f64> {
        self.extra.get(name).copied()
    }

    /// Check the frame-count invariant.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidInput` if the counts do not add up.
    pub fn validate(&self) -> Result<()> {
        if self.successful_frames + self.failed_frames != self.total_frames {
            return Err(Error::InvalidInput(format!(
                "algorithm '{}': successful_frames ({}) + failed_frames ({}) != total_frames ({})",
                self.algorithm_key, self.successful_frames, self.failed_frames, self.total_frames
            )));
        }
        Ok(())
    }
}

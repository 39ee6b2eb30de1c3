//! Experiment Summary - root record of an experiment

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle of an experiment.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExperimentStatus {
    /// Created, no algorithm run started yet.
    #[default]
    Pending,
    /// At least one algorithm run in progress.
    Running,
    /// All runs finished.
    Completed,
    /// The pipeline aborted.
    Failed,
}

/// Experiment Summary is the canonical record stored at `experiments/{id}/summary`.
///
/// Each experiment groups many algorithm runs (feature type x RANSAC type x
/// sequence x run index).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExperimentSummary {
    experiment_id: String,
    name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    description: Option<String>,
    #[serde(default)]
    status: ExperimentStatus,
    created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    algorithm_keys: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    config: Option<serde_json::Value>,
}

impl ExperimentSummary {
    /// Create a pending experiment summary stamped with the current time.
    #[must_use]
    pub fn new(experiment_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self::builder(experiment_id, name).build()
    }

    /// Create a builder for constructing a summary with optional fields.
    #[must_use]
    pub fn builder(
        experiment_id: impl Into<String>,
        name: impl Into<String>,
    ) -> ExperimentSummaryBuilder {
        ExperimentSummaryBuilder::new(experiment_id, name)
    }

    /// Get the experiment ID.
    #[must_use]
    pub fn experiment_id(&self) -> &str {
        &self.experiment_id
    }

    /// Get the experiment name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the description, if any.
    #[must_use]
    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    /// Get the current status.
    #[must_use]
    pub const fn status(&self) -> ExperimentStatus {
        self.status
    }

    /// Get the creation timestamp.
    #[must_use]
    pub const fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Get the completion timestamp, if finished.
    #[must_use]
    pub const fn completed_at(&self) -> Option<DateTime<Utc>> {
        self.completed_at
    }

    /// Algorithm keys registered with this experiment.
    #[must_use]
    pub fn algorithm_keys(&self) -> &[String] {
        &self.algorithm_keys
    }

    /// Get the pipeline configuration, if any.
    #[must_use]
    pub const fn config(&self) -> Option<&serde_json::Value> {
        self.config.as_ref()
    }

    /// Register an algorithm key; duplicates are ignored.
    pub fn register_algorithm(&mut self, algorithm_key: impl Into<String>) {
        let key = algorithm_key.into();
        if !self.algorithm_keys.contains(&key) {
            self.algorithm_keys.push(key);
        }
    }

    /// Mark the experiment as running.
    pub fn start(&mut self) {
        self.status = ExperimentStatus::Running;
    }

    /// Finish the experiment with `status`, stamping `completed_at`.
    pub fn complete(&mut self, status: ExperimentStatus) {
        self.status = status;
        self.completed_at = Some(Utc::now());
    }
}

/// Builder for `ExperimentSummary`.
#[derive(Debug)]
pub struct ExperimentSummaryBuilder {
    summary: ExperimentSummary,
}

impl ExperimentSummaryBuilder {
    /// Create a new builder with required fields.
    #[must_use]
    pub fn new(experiment_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            summary: ExperimentSummary {
                experiment_id: experiment_id.into(),
                name: name.into(),
                description: None,
                status: ExperimentStatus::Pending,
                created_at: Utc::now(),
                completed_at: None,
                algorithm_keys: Vec::new(),
                config: None,
            },
        }
    }

    /// Set a human-readable description.
    #[must_use]
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.summary.description = Some(description.into());
        self
    }

    /// Set the pipeline configuration.
    #[must_use]
    pub fn config(mut self, config: serde_json::Value) -> Self {
        self.summary.config = Some(config);
        self
    }

    /// Set the status.
    #[must_use]
    pub const fn status(mut self, status: ExperimentStatus) -> Self {
        self.summary.status = status;
        self
    }

    /// Set a custom creation timestamp (useful for deserialization/testing).
    #[must_use]
    pub const fn created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.summary.created_at = created_at;
        self
    }

    /// Register an algorithm key.
    #[must_use]
    pub fn algorithm(mut self, algorithm_key: impl Into<String>) -> Self {
        self.summary.register_algorithm(algorithm_key);
        self
    }

    /// Build the `ExperimentSummary`.
    #[must_use]
    pub fn build(self) -> ExperimentSummary {
        self.summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summary_new() {
        let summary = ExperimentSummary::new("exp-1", "Baseline");
        assert_eq!(summary.experiment_id(), "exp-1");
        assert_eq!(summary.name(), "Baseline");
        assert_eq!(summary.status(), ExperimentStatus::Pending);
        assert!(summary.algorithm_keys().is_empty());
    }

    #[test]
    fn test_register_algorithm_dedups() {
        let mut summary = ExperimentSummary::builder("exp-1", "Baseline")
            .algorithm("orb_ransac_seq00_run0")
            .build();
        summary.register_algorithm("orb_ransac_seq00_run0");
        summary.register_algorithm("sift_magsac_seq00_run0");
        assert_eq!(summary.algorithm_keys().len(), 2);
    }

    #[test]
    fn test_lifecycle() {
        let mut summary = ExperimentSummary::new("exp-1", "Baseline");
        summary.start();
        assert_eq!(summary.status(), ExperimentStatus::Running);
        summary.complete(ExperimentStatus::Completed);
        assert_eq!(summary.status(), ExperimentStatus::Completed);
        assert!(summary.completed_at().unwrap() >= summary.created_at());
    }

    #[test]
    fn test_status_serializes_snake_case() {
        let json = serde_json::to_value(ExperimentStatus::Completed).unwrap();
        assert_eq!(json, serde_json::json!("completed"));
    }
}

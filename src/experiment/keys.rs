//! Storage key layout
//!
//! ```text
//! experiments/{id}/summary
//! experiments/{id}/algorithms/{alg}
//! experiments/{id}/frames/{alg}                 (batch)
//! experiments/{id}/frames/{alg}/{frame_id:06}   (individual)
//! experiments/{id}/trajectories/{alg}
//! experiments/{id}/pr_curves/{alg}
//! experiments/{id}/manifests/{alg}
//! ```

use crate::{Error, Result};

/// Top-level directory of all experiments.
pub const EXPERIMENTS_ROOT: &str = "experiments";

/// `experiments/{id}`
#[must_use]
pub fn experiment_prefix(experiment_id: &str) -> String {
    format!("{EXPERIMENTS_ROOT}/{experiment_id}")
}

/// `experiments/{id}/summary`
#[must_use]
pub fn summary_key(experiment_id: &str) -> String {
    format!("{EXPERIMENTS_ROOT}/{experiment_id}/summary")
}

/// `experiments/{id}/algorithms`
#[must_use]
pub fn algorithms_prefix(experiment_id: &str) -> String {
    format!("{EXPERIMENTS_ROOT}/{experiment_id}/algorithms")
}

/// `experiments/{id}/algorithms/{alg}`
#[must_use]
pub fn algorithm_result_key(experiment_id: &str, algorithm_key: &str) -> String {
    format!("{EXPERIMENTS_ROOT}/{experiment_id}/algorithms/{algorithm_key}")
}

/// `experiments/{id}/frames/{alg}`: the batch record, and the directory of
/// individually stored frames.
#[must_use]
pub fn frames_key(experiment_id: &str, algorithm_key: &str) -> String {
    format!("{EXPERIMENTS_ROOT}/{experiment_id}/frames/{algorithm_key}")
}

/// `experiments/{id}/frames/{alg}/{frame_id:06}`
#[must_use]
pub fn frame_key(experiment_id: &str, algorithm_key: &str, frame_id: u64) -> String {
    format!("{EXPERIMENTS_ROOT}/{experiment_id}/frames/{algorithm_key}/{frame_id:06}")
}

/// `experiments/{id}/trajectories/{alg}`
#[must_use]
pub fn trajectory_key(experiment_id: &str, algorithm_key: &str) -> String {
    format!("{EXPERIMENTS_ROOT}/{experiment_id}/trajectories/{algorithm_key}")
}

/// `experiments/{id}/pr_curves/{alg}`
#[must_use]
pub fn pr_curve_key(experiment_id: &str, algorithm_key: &str) -> String {
    format!("{EXPERIMENTS_ROOT}/{experiment_id}/pr_curves/{algorithm_key}")
}

/// `experiments/{id}/manifests/{alg}`
#[must_use]
pub fn manifest_key(experiment_id: &str, algorithm_key: &str) -> String {
    format!("{EXPERIMENTS_ROOT}/{experiment_id}/manifests/{algorithm_key}")
}

/// Compose an algorithm key from its identity, e.g. `orb_ransac_seq00_run1`.
#[must_use]
pub fn algorithm_key(feature_type: &str, ransac_type: &str, sequence: &str, run: u32) -> String {
    format!("{feature_type}_{ransac_type}_{sequence}_run{run}")
}

/// Reject ids that would not form a single key segment.
///
/// # Errors
///
/// Returns `Error::InvalidInput` for empty ids, ids containing `/` or `\`,
/// and ids starting with `.`.
pub fn validate_id(kind: &str, id: &str) -> Result<()> {
    if id.is_empty() || id.contains(['/', '\\']) || id.starts_with('.') {
        return Err(Error::InvalidInput(format!(
            "{kind} '{id}' must be a single non-hidden path segment"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout() {
        assert_eq!(summary_key("e1"), "experiments/e1/summary");
        assert_eq!(frame_key("e1", "orb", 42), "experiments/e1/frames/orb/000042");
        assert_eq!(frame_key("e1", "orb", 1_234_567), "experiments/e1/frames/orb/1234567");
        assert_eq!(manifest_key("e1", "orb"), "experiments/e1/manifests/orb");
        assert!(frame_key("e1", "orb", 1).starts_with(&frames_key("e1", "orb")));
    }

    #[test]
    fn test_algorithm_key() {
        assert_eq!(algorithm_key("orb", "ransac", "seq00", 1), "orb_ransac_seq00_run1");
    }

    #[test]
    fn test_validate_id() {
        assert!(validate_id("experiment id", "exp-2024").is_ok());
        assert!(validate_id("experiment id", "").is_err());
        assert!(validate_id("experiment id", "a/b").is_err());
        assert!(validate_id("algorithm key", ".hidden").is_err());
    }
}

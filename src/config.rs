//! Engine configuration
//!
//! Plain data with defaults. Loading it from files or the environment is the
//! hosting layer's job; this crate only validates and consumes it.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Hard ceiling on frame-loading workers.
pub const MAX_FRAME_WORKERS: usize = 8;

/// Files above this size get a size+mtime fingerprint instead of a hash.
pub const DEFAULT_HASH_LIMIT_BYTES: u64 = 10 * 1024 * 1024;

/// Configuration for a [`ResultEngine`](crate::ResultEngine).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Storage root; keys resolve to paths below it.
    pub root: PathBuf,
    /// Backups kept per key.
    pub backup_retention: usize,
    /// Size of the per-key lock pool.
    pub lock_shards: usize,
    /// Lifetime of an in-memory cache entry, in seconds.
    pub cache_ttl_secs: u64,
    /// UI point cap for trajectories.
    pub trajectory_ui_points: usize,
    /// UI point cap for PR curves.
    pub pr_curve_ui_points: usize,
    /// Highest-scoring matches kept per frame for PR curves.
    pub pr_max_matches_per_frame: usize,
    /// Overall sample cap for PR curves.
    pub pr_max_samples: usize,
    /// Seed for PR sample selection.
    pub pr_sampling_seed: u64,
    /// Worker threads for paging individually stored frames.
    pub max_frame_workers: usize,
    /// Page size above which frame files are loaded in parallel.
    pub parallel_frame_threshold: usize,
    /// Largest file that gets a real content hash in manifests.
    pub manifest_hash_limit_bytes: u64,
    /// Gzip individually stored frame files.
    pub compress_frames: bool,
    /// URL prefix for manifest asset links.
    pub asset_url_prefix: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("results"),
            backup_retention: 5,
            lock_shards: 64,
            cache_ttl_secs: 300,
            trajectory_ui_points: 1500,
            pr_curve_ui_points: 500,
            pr_max_matches_per_frame: 50,
            pr_max_samples: 2000,
            pr_sampling_seed: 42,
            max_frame_workers: MAX_FRAME_WORKERS,
            parallel_frame_threshold: 16,
            manifest_hash_limit_bytes: DEFAULT_HASH_LIMIT_BYTES,
            compress_frames: false,
            asset_url_prefix: "/assets".to_string(),
        }
    }
}

impl EngineConfig {
    /// Default configuration rooted at `root`.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            ..Self::default()
        }
    }

    /// Cache TTL as a [`Duration`].
    #[must_use]
    pub const fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    /// Frame workers clamped to `1..=MAX_FRAME_WORKERS`.
    #[must_use]
    pub fn frame_workers(&self) -> usize {
        self.max_frame_workers.clamp(1, MAX_FRAME_WORKERS)
    }

    /// Check that every cap and pool size is usable.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidInput` naming the first offending field.
    pub fn validate(&self) -> Result<()> {
        let positive = [
            ("lock_shards", self.lock_shards),
            ("trajectory_ui_points", self.trajectory_ui_points),
            ("pr_curve_ui_points", self.pr_curve_ui_points),
            ("pr_max_matches_per_frame", self.pr_max_matches_per_frame),
            ("pr_max_samples", self.pr_max_samples),
        ];
        for (name, value) in positive {
            if value == 0 {
                return Err(Error::InvalidInput(format!("{name} must be greater than 0")));
            }
        }
        // Downsampling keeps both endpoints
        if self.trajectory_ui_points < 2 || self.pr_curve_ui_points < 2 {
            return Err(Error::InvalidInput(
                "UI point caps must be at least 2".to_string(),
            ));
        }
        if self.root.as_os_str().is_empty() {
            return Err(Error::InvalidInput("root must not be empty".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_documented_caps() {
        let cfg = EngineConfig::default();
        assert_eq!(cfg.backup_retention, 5);
        assert_eq!(cfg.cache_ttl(), Duration::from_secs(300));
        assert_eq!(cfg.trajectory_ui_points, 1500);
        assert_eq!(cfg.pr_curve_ui_points, 500);
        assert_eq!(cfg.manifest_hash_limit_bytes, 10 * 1024 * 1024);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_frame_workers_clamped() {
        let mut cfg = EngineConfig::new("/tmp/x");
        cfg.max_frame_workers = 64;
        assert_eq!(cfg.frame_workers(), MAX_FRAME_WORKERS);
        cfg.max_frame_workers = 0;
        assert_eq!(cfg.frame_workers(), 1);
    }

    #[test]
    fn test_validate_rejects_zero_caps() {
        let mut cfg = EngineConfig::new("/tmp/x");
        cfg.pr_curve_ui_points = 0;
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("pr_curve_ui_points"));
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let cfg: EngineConfig =
            serde_json::from_str(r#"{"root": "/data/results", "cache_ttl_secs": 60}"#).unwrap();
        assert_eq!(cfg.root, PathBuf::from("/data/results"));
        assert_eq!(cfg.cache_ttl_secs, 60);
        assert_eq!(cfg.pr_max_samples, 2000);
    }
}

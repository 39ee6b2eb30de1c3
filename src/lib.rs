//! # Trueno-Results: Result Storage and Serving Engine
//!
//! **Version**: 0.1.0
//!
//! Trueno-Results persists what an evaluation pipeline produces (experiment
//! summaries, per-algorithm metrics, per-frame results) and serves the large
//! derived artifacts built from them: precision-recall curves and trajectories,
//! each in a full-fidelity and a UI-downsampled resolution.
//!
//! ## Design Principles
//!
//! - **One canonical copy**: every key has exactly one JSON/Parquet file;
//!   binaries are caches that can always be regenerated
//! - **Atomic writes**: temp file + rename, per-key locks, bounded backups
//! - **Idempotent derivation**: precompute is a no-op when the artifact exists
//! - **Bounded staleness**: TTL cache with write-through invalidation
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use trueno_results::experiment::{ExperimentSummary, FrameResult, MatchScore};
//! use trueno_results::codec::Resolution;
//! use trueno_results::ResultEngine;
//!
//! let engine = ResultEngine::builder("/tmp/results").build()?;
//! engine.results().save_experiment(&ExperimentSummary::new("exp-001", "Sweep"))?;
//!
//! let frame = FrameResult::new(0).with_matches(vec![MatchScore::new(0.9, true)]);
//! engine.save_frame_result("exp-001", "orb_ransac_seq01_run0", 0, &frame)?;
//!
//! let curve = engine.cache().get_pr_curve("exp-001", "orb_ransac_seq01_run0", Resolution::Ui)?;
//! println!("PR points: {}", curve.map_or(0, |c| c.len()));
//! # Ok::<(), trueno_results::Error>(())
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

pub mod cache;
pub mod codec;
pub mod compute;
pub mod config;
pub mod error;
pub mod experiment;
pub mod logging;
pub mod manifest;
pub mod store;

pub use config::EngineConfig;
pub use error::{Error, Result};

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use cache::ResultComputationCache;
use codec::CodecHandle;
use compute::PrCurveBuilder;
use experiment::{DerivedOutcome, ExperimentResultStore, FrameResult, PrCurveData, StoreSettings, TrajectoryData};
use manifest::ManifestManager;
use store::{KeyedObjectStore, StorageHandle};

/// Engine instance: storage, codec, result store, manifests and cache, wired
/// together once at startup.
#[derive(Debug)]
pub struct ResultEngine {
    config: EngineConfig,
    storage: StorageHandle,
    codec: CodecHandle,
    results: Arc<ExperimentResultStore>,
    manifests: Arc<ManifestManager>,
    cache: ResultComputationCache,
}

impl ResultEngine {
    /// Create a new engine builder rooted at `root`
    #[must_use]
    pub fn builder(root: impl Into<PathBuf>) -> ResultEngineBuilder {
        ResultEngineBuilder::new(EngineConfig::new(root))
    }

    /// Active configuration
    #[must_use]
    pub const fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Keyed object store
    #[must_use]
    pub const fn storage(&self) -> &StorageHandle {
        &self.storage
    }

    /// Codec for derived binaries
    #[must_use]
    pub const fn codec(&self) -> &CodecHandle {
        &self.codec
    }

    /// Domain result store
    #[must_use]
    pub const fn results(&self) -> &Arc<ExperimentResultStore> {
        &self.results
    }

    /// Manifest manager
    #[must_use]
    pub const fn manifests(&self) -> &Arc<ManifestManager> {
        &self.manifests
    }

    /// Computation cache
    #[must_use]
    pub const fn cache(&self) -> &ResultComputationCache {
        &self.cache
    }

    /// Save one frame and drop cached artifacts derived from its run.
    ///
    /// # Errors
    ///
    /// See [`ExperimentResultStore::save_frame_result`].
    pub fn save_frame_result(
        &self,
        experiment_id: &str,
        algorithm_key: &str,
        frame_id: u64,
        frame: &FrameResult,
    ) -> Result<()> {
        self.results
            .save_frame_result(experiment_id, algorithm_key, frame_id, frame)?;
        self.cache.invalidate(experiment_id, algorithm_key);
        Ok(())
    }

    /// Save a frame batch and drop cached artifacts derived from its run.
    ///
    /// # Errors
    ///
    /// See [`ExperimentResultStore::save_frame_results`].
    pub fn save_frame_results(
        &self,
        experiment_id: &str,
        algorithm_key: &str,
        frames: &[FrameResult],
    ) -> Result<()> {
        self.results
            .save_frame_results(experiment_id, algorithm_key, frames)?;
        self.cache.invalidate(experiment_id, algorithm_key);
        Ok(())
    }

    /// Save a trajectory and drop its cached variants.
    ///
    /// # Errors
    ///
    /// See [`ExperimentResultStore::save_trajectory`].
    pub fn save_trajectory(
        &self,
        experiment_id: &str,
        algorithm_key: &str,
        data: &TrajectoryData,
    ) -> Result<DerivedOutcome> {
        let outcome = self.results.save_trajectory(experiment_id, algorithm_key, data)?;
        self.cache.invalidate(experiment_id, algorithm_key);
        Ok(outcome)
    }

    /// Save a PR curve and drop its cached variants.
    ///
    /// # Errors
    ///
    /// See [`ExperimentResultStore::save_pr_curve`].
    pub fn save_pr_curve(
        &self,
        experiment_id: &str,
        algorithm_key: &str,
        curve: &PrCurveData,
    ) -> Result<DerivedOutcome> {
        let outcome = self.results.save_pr_curve(experiment_id, algorithm_key, curve)?;
        self.cache.invalidate(experiment_id, algorithm_key);
        Ok(outcome)
    }

    /// Delete an experiment and every cached entry of it.
    ///
    /// # Errors
    ///
    /// See [`ExperimentResultStore::delete_experiment`].
    pub fn delete_experiment(&self, experiment_id: &str) -> Result<bool> {
        let existed = self.results.delete_experiment(experiment_id)?;
        self.cache.invalidate_experiment(experiment_id);
        Ok(existed)
    }
}

/// Engine builder
#[derive(Debug, Clone)]
pub struct ResultEngineBuilder {
    config: EngineConfig,
    codec: Option<CodecHandle>,
}

impl ResultEngineBuilder {
    /// Builder starting from an existing configuration
    #[must_use]
    pub const fn new(config: EngineConfig) -> Self {
        Self { config, codec: None }
    }

    /// Backups kept per key
    #[must_use]
    pub const fn backup_retention(mut self, count: usize) -> Self {
        self.config.backup_retention = count;
        self
    }

    /// Size of the per-key lock pool
    #[must_use]
    pub const fn lock_shards(mut self, shards: usize) -> Self {
        self.config.lock_shards = shards;
        self
    }

    /// Lifetime of cache entries
    #[must_use]
    pub const fn cache_ttl(mut self, ttl: Duration) -> Self {
        self.config.cache_ttl_secs = ttl.as_secs();
        self
    }

    /// UI point caps for trajectories and PR curves
    #[must_use]
    pub const fn ui_points(mut self, trajectory: usize, pr_curve: usize) -> Self {
        self.config.trajectory_ui_points = trajectory;
        self.config.pr_curve_ui_points = pr_curve;
        self
    }

    /// PR sampling: per-frame cap, overall cap and seed
    #[must_use]
    pub const fn pr_sampling(mut self, max_matches_per_frame: usize, max_samples: usize, seed: u64) -> Self {
        self.config.pr_max_matches_per_frame = max_matches_per_frame;
        self.config.pr_max_samples = max_samples;
        self.config.pr_sampling_seed = seed;
        self
    }

    /// Frame-loading workers (clamped to 1..=8) and the parallel page threshold
    #[must_use]
    pub const fn frame_loading(mut self, workers: usize, parallel_threshold: usize) -> Self {
        self.config.max_frame_workers = workers;
        self.config.parallel_frame_threshold = parallel_threshold;
        self
    }

    /// Largest file that gets a content hash in manifests
    #[must_use]
    pub const fn manifest_hash_limit(mut self, bytes: u64) -> Self {
        self.config.manifest_hash_limit_bytes = bytes;
        self
    }

    /// Gzip individually stored frames
    #[must_use]
    pub const fn compress_frames(mut self, compress: bool) -> Self {
        self.config.compress_frames = compress;
        self
    }

    /// URL prefix for manifest asset links
    #[must_use]
    pub fn asset_url_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.config.asset_url_prefix = prefix.into();
        self
    }

    /// Codec for derived binaries (default: Arrow IPC when compiled in)
    #[must_use]
    pub fn codec(mut self, codec: CodecHandle) -> Self {
        self.codec = Some(codec);
        self
    }

    /// Build the engine
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidInput` for an invalid configuration and
    /// `Error::Storage` if the root directory cannot be created.
    pub fn build(self) -> Result<ResultEngine> {
        let Self { config, codec } = self;
        config.validate()?;

        let storage: StorageHandle = Arc::new(KeyedObjectStore::with_options(
            config.root.clone(),
            config.lock_shards,
            config.backup_retention,
        )?);
        let codec = codec.unwrap_or_else(codec::default_codec);
        let manifests = Arc::new(ManifestManager::with_options(
            storage.clone(),
            codec.clone(),
            config.manifest_hash_limit_bytes,
            config.asset_url_prefix.clone(),
        ));
        let results = Arc::new(ExperimentResultStore::with_manifests(
            storage.clone(),
            codec.clone(),
            manifests.clone(),
            StoreSettings::from(&config),
        )?);
        let pr_builder = PrCurveBuilder::new()
            .max_matches_per_frame(config.pr_max_matches_per_frame)
            .max_samples(config.pr_max_samples)
            .seed(config.pr_sampling_seed)
            .max_points(config.pr_curve_ui_points);
        let cache = ResultComputationCache::new(results.clone(), config.cache_ttl()).with_pr_builder(pr_builder);

        info!(
            root = %config.root.display(),
            codec = codec.name(),
            cache_ttl_secs = config.cache_ttl_secs,
            "result engine ready"
        );
        Ok(ResultEngine {
            config,
            storage,
            codec,
            results,
            manifests,
            cache,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{NoopCodec, Resolution};
    use crate::experiment::MatchScore;

    #[test]
    fn test_builder_rejects_invalid_config() {
        let dir = tempfile::tempdir().unwrap();
        let err = ResultEngine::builder(dir.path()).ui_points(1, 500).build().unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[test]
    fn test_builder_wires_codec_and_settings() {
        let dir = tempfile::tempdir().unwrap();
        let engine = ResultEngine::builder(dir.path())
            .codec(Arc::new(NoopCodec))
            .frame_loading(32, 4)
            .build()
            .unwrap();
        assert_eq!(engine.codec().name(), "noop");
        assert_eq!(engine.results().settings().max_frame_workers, 8);
        assert_eq!(engine.storage().root(), dir.path());
    }

    #[test]
    fn test_frame_save_invalidates_cached_curve() {
        let dir = tempfile::tempdir().unwrap();
        let engine = ResultEngine::builder(dir.path()).build().unwrap();
        let frame = FrameResult::new(0).with_matches(vec![MatchScore::new(0.9, true)]);
        engine.save_frame_result("e1", "orb", 0, &frame).unwrap();

        engine.cache().get_pr_curve("e1", "orb", Resolution::Ui).unwrap().unwrap();
        assert!(!engine.cache().is_empty());
        engine.save_frame_result("e1", "orb", 1, &FrameResult::new(1)).unwrap();
        assert!(engine.cache().is_empty());
    }
}

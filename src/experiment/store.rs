//! Experiment Result Store - domain layer over the keyed object store
//!
//! Maps (experiment, algorithm) identities to canonical JSON records and to
//! the Full/UI binaries of derived artifacts.
//!
//! ## Write order for derived artifacts
//!
//! 1. canonical JSON (`.json.gz`), the only step whose failure is an `Err`
//! 2. Full and UI binaries through the codec
//! 3. manifest refresh
//!
//! Steps 2 and 3 are best effort: failures are logged at `warn` and reported
//! in the returned [`DerivedOutcome`].
//!
//! ## Read order for derived artifacts
//!
//! Full reads try the Full binary, then canonical JSON, and never return
//! reduced data. UI reads try the UI binary, then the Full binary, then
//! canonical JSON, downsampling whatever was read at full resolution.
//!
//! ## Staleness
//!
//! Saving frames discards the run's derived artifacts, so the next read
//! rebuilds them from the frames now on disk. Frame saves and derived
//! rebuilds of one run are serialized by [`ExperimentResultStore::with_derived_lock`].

use std::collections::BTreeSet;
use std::fs;
use std::io;
use std::sync::Arc;

use rayon::prelude::*;
use rayon::ThreadPool;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

use super::keys;
use super::{
    AlgorithmMetrics, ExperimentSummary, FrameLayout, FrameResult, PrCurveData, TrajectoryData,
};
use crate::codec::{self, CodecHandle, ColumnarFrame, Metadata, Resolution, SeriesMap};
use crate::config::{EngineConfig, MAX_FRAME_WORKERS};
use crate::error::StorageOp;
use crate::manifest::ManifestManager;
use crate::store::{LockPool, StorageHandle, DEFAULT_LOCK_SHARDS};
use crate::{Error, Result};

/// The part of [`EngineConfig`] the result store needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreSettings {
    /// UI point cap for trajectories.
    pub trajectory_ui_points: usize,
    /// UI point cap for PR curves.
    pub pr_curve_ui_points: usize,
    /// Gzip frame records.
    pub compress_frames: bool,
    /// Frame-loading worker threads.
    pub max_frame_workers: usize,
    /// Page size above which frame files load in parallel.
    pub parallel_frame_threshold: usize,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self::from(&EngineConfig::default())
    }
}

impl From<&EngineConfig> for StoreSettings {
    fn from(config: &EngineConfig) -> Self {
        Self {
            trajectory_ui_points: config.trajectory_ui_points,
            pr_curve_ui_points: config.pr_curve_ui_points,
            compress_frames: config.compress_frames,
            max_frame_workers: config.frame_workers(),
            parallel_frame_threshold: config.parallel_frame_threshold,
        }
    }
}

/// What happened to the best-effort steps of a derived-artifact save.
///
/// The canonical copy is already durable when this is returned.
#[must_use]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DerivedOutcome {
    /// Bytes of the Full binary, if one was written.
    pub full_bytes: Option<u64>,
    /// Bytes of the UI binary, if one was written.
    pub ui_bytes: Option<u64>,
    /// First binary write failure.
    pub binary_error: Option<String>,
    /// Manifest refresh failure.
    pub manifest_error: Option<String>,
}

impl DerivedOutcome {
    /// True if no best-effort step failed.
    #[must_use]
    pub const fn is_complete(&self) -> bool {
        self.binary_error.is_none() && self.manifest_error.is_none()
    }

    /// True if both binaries were written.
    #[must_use]
    pub const fn binaries_written(&self) -> bool {
        self.full_bytes.is_some() && self.ui_bytes.is_some()
    }
}

/// Domain store for experiment results.
#[derive(Debug)]
pub struct ExperimentResultStore {
    storage: StorageHandle,
    codec: CodecHandle,
    manifests: Arc<ManifestManager>,
    settings: StoreSettings,
    pool: ThreadPool,
    derived_locks: LockPool,
}

impl ExperimentResultStore {
    /// Create a result store with its own manifest manager.
    ///
    /// # Errors
    ///
    /// Returns `Error::Other` if the frame-loading pool cannot be started.
    pub fn new(storage: StorageHandle, codec: CodecHandle, settings: StoreSettings) -> Result<Self> {
        let manifests = Arc::new(ManifestManager::new(storage.clone(), codec.clone()));
        Self::with_manifests(storage, codec, manifests, settings)
    }

    /// Create a result store sharing `manifests`.
    ///
    /// # Errors
    ///
    /// Returns `Error::Other` if the frame-loading pool cannot be started.
    pub fn with_manifests(
        storage: StorageHandle,
        codec: CodecHandle,
        manifests: Arc<ManifestManager>,
        settings: StoreSettings,
    ) -> Result<Self> {
        let workers = settings.max_frame_workers.clamp(1, MAX_FRAME_WORKERS);
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|i| format!("frame-loader-{i}"))
            .build()
            .map_err(|e| Error::Other(format!("frame loader pool: {e}")))?;
        Ok(Self {
            storage,
            codec,
            manifests,
            settings,
            pool,
            derived_locks: LockPool::new(DEFAULT_LOCK_SHARDS),
        })
    }

    /// Underlying keyed store.
    #[must_use]
    pub const fn storage(&self) -> &StorageHandle {
        &self.storage
    }

    /// Codec used for derived binaries.
    #[must_use]
    pub const fn codec(&self) -> &CodecHandle {
        &self.codec
    }

    /// Manifest manager refreshed after derived writes.
    #[must_use]
    pub const fn manifests(&self) -> &Arc<ManifestManager> {
        &self.manifests
    }

    /// Active settings.
    #[must_use]
    pub const fn settings(&self) -> &StoreSettings {
        &self.settings
    }

    // ---------------------------------------------------------------------
    // Experiments
    // ---------------------------------------------------------------------

    /// Persist an experiment summary.
    ///
    /// # Errors
    ///
    /// Returns an error for an invalid id or a failed write.
    pub fn save_experiment(&self, summary: &ExperimentSummary) -> Result<()> {
        keys::validate_id("experiment id", summary.experiment_id())?;
        self.storage
            .save_json(&keys::summary_key(summary.experiment_id()), summary, false)
    }

    /// Load an experiment summary.
    ///
    /// # Errors
    ///
    /// Returns `Error::Storage` if the file exists but cannot be read.
    pub fn get_experiment(&self, experiment_id: &str) -> Result<Option<ExperimentSummary>> {
        keys::validate_id("experiment id", experiment_id)?;
        self.read_json(&keys::summary_key(experiment_id))
    }

    /// Every experiment with a readable summary, newest first.
    ///
    /// # Errors
    ///
    /// Returns `Error::Storage` if the experiments directory cannot be listed.
    pub fn list_experiments(&self) -> Result<Vec<ExperimentSummary>> {
        let dir = self.storage.root().join(keys::EXPERIMENTS_ROOT);
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(Error::storage(keys::EXPERIMENTS_ROOT, StorageOp::List, e)),
        };

        let mut summaries = Vec::new();
        for entry in entries.flatten() {
            let Ok(name) = entry.file_name().into_string() else {
                continue;
            };
            if name.starts_with('.') || !entry.path().is_dir() {
                continue;
            }
            if let Some(summary) = self.get_experiment(&name)? {
                summaries.push(summary);
            }
        }
        summaries.sort_by(|a, b| {
            b.created_at()
                .cmp(&a.created_at())
                .then_with(|| a.experiment_id().cmp(b.experiment_id()))
        });
        Ok(summaries)
    }

    /// Remove an experiment and everything stored under it.
    ///
    /// Returns `false` if there was nothing to remove.
    ///
    /// # Errors
    ///
    /// Returns `Error::Storage` if an existing subtree cannot be removed.
    pub fn delete_experiment(&self, experiment_id: &str) -> Result<bool> {
        keys::validate_id("experiment id", experiment_id)?;
        let prefix = keys::experiment_prefix(experiment_id);
        let existed = self.storage.root().join(&prefix).exists() || self.storage.exists(&prefix)?;
        let removed = self.storage.delete_prefix(&prefix)?;
        debug!(experiment_id, removed, "deleted experiment");
        Ok(existed)
    }

    // ---------------------------------------------------------------------
    // Algorithm metrics
    // ---------------------------------------------------------------------

    /// Persist algorithm metrics.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidInput` if the frame counts do not add up, or a
    /// storage error if the write fails.
    pub fn save_algorithm_result(&self, metrics: &AlgorithmMetrics) -> Result<()> {
        keys::validate_id("experiment id", metrics.experiment_id())?;
        keys::validate_id("algorithm key", metrics.algorithm_key())?;
        metrics.validate()?;
        let key = keys::algorithm_result_key(metrics.experiment_id(), metrics.algorithm_key());
        self.storage.save_json(&key, metrics, false)
    }

    /// Load one algorithm's metrics.
    ///
    /// # Errors
    ///
    /// Returns `Error::Storage` if the file exists but cannot be read.
    pub fn get_algorithm_result(
        &self,
        experiment_id: &str,
        algorithm_key: &str,
    ) -> Result<Option<AlgorithmMetrics>> {
        self.validate_pair(experiment_id, algorithm_key)?;
        self.read_json(&keys::algorithm_result_key(experiment_id, algorithm_key))
    }

    /// Metrics of every algorithm in an experiment, sorted by algorithm key.
    ///
    /// # Errors
    ///
    /// Returns `Error::Storage` if a file exists but cannot be read.
    pub fn get_all_algorithm_results(&self, experiment_id: &str) -> Result<Vec<AlgorithmMetrics>> {
        keys::validate_id("experiment id", experiment_id)?;
        let prefix = keys::algorithms_prefix(experiment_id);
        let mut results = Vec::new();
        for key in self.storage.list_keys(&prefix)? {
            let is_direct_child = key
                .strip_prefix(&prefix)
                .and_then(|rest| rest.strip_prefix('/'))
                .is_some_and(|leaf| !leaf.contains('/'));
            if !is_direct_child {
                continue;
            }
            if let Some(metrics) = self.read_json::<AlgorithmMetrics>(&key)? {
                results.push(metrics);
            }
        }
        results.sort_by(|a, b| a.algorithm_key().cmp(b.algorithm_key()));
        Ok(results)
    }

    /// Algorithm keys known to an experiment: registered in the summary, with
    /// stored metrics, or with stored frames. Sorted.
    ///
    /// # Errors
    ///
    /// Returns `Error::Storage` if a listing or read fails.
    pub fn list_algorithm_keys(&self, experiment_id: &str) -> Result<Vec<String>> {
        keys::validate_id("experiment id", experiment_id)?;
        let mut found = BTreeSet::new();
        if let Some(summary) = self.get_experiment(experiment_id)? {
            found.extend(summary.algorithm_keys().iter().cloned());
        }
        for collection in ["algorithms", "frames"] {
            let prefix = format!("{}/{collection}", keys::experiment_prefix(experiment_id));
            for key in self.storage.list_keys(&prefix)? {
                if let Some(alg) = key
                    .strip_prefix(&prefix)
                    .and_then(|rest| rest.strip_prefix('/'))
                    .and_then(|rest| rest.split('/').next())
                {
                    found.insert(alg.to_string());
                }
            }
        }
        Ok(found.into_iter().collect())
    }

    // ---------------------------------------------------------------------
    // Frames
    // ---------------------------------------------------------------------

    /// Persist one frame at `frames/{alg}/{frame_id:06}`.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidInput` if `frame.frame_id != frame_id`, or a
    /// storage error if the write fails.
    pub fn save_frame_result(
        &self,
        experiment_id: &str,
        algorithm_key: &str,
        frame_id: u64,
        frame: &FrameResult,
    ) -> Result<()> {
        self.validate_pair(experiment_id, algorithm_key)?;
        if frame.frame_id != frame_id {
            return Err(Error::InvalidInput(format!(
                "frame id mismatch: key {frame_id}, record {}",
                frame.frame_id
            )));
        }
        let key = keys::frame_key(experiment_id, algorithm_key, frame_id);
        self.with_derived_lock(experiment_id, algorithm_key, || {
            self.storage.save_json(&key, frame, self.settings.compress_frames)?;
            self.discard_derived(experiment_id, algorithm_key)
        })
    }

    /// Persist a whole run's frames as one batch record (legacy layout).
    ///
    /// # Errors
    ///
    /// Returns a storage error if the write fails.
    pub fn save_frame_results(
        &self,
        experiment_id: &str,
        algorithm_key: &str,
        frames: &[FrameResult],
    ) -> Result<()> {
        self.validate_pair(experiment_id, algorithm_key)?;
        let key = keys::frames_key(experiment_id, algorithm_key);
        self.with_derived_lock(experiment_id, algorithm_key, || {
            self.storage.save_json(&key, &frames, self.settings.compress_frames)?;
            self.discard_derived(experiment_id, algorithm_key)
        })
    }

    /// Which frame layout a run uses; individual wins when both exist.
    ///
    /// # Errors
    ///
    /// Returns an error for invalid ids.
    pub fn frame_layout(&self, experiment_id: &str, algorithm_key: &str) -> Result<FrameLayout> {
        self.validate_pair(experiment_id, algorithm_key)?;
        if !self.individual_frame_keys(experiment_id, algorithm_key)?.is_empty() {
            return Ok(FrameLayout::Individual);
        }
        if self.storage.exists(&keys::frames_key(experiment_id, algorithm_key))? {
            return Ok(FrameLayout::Batch);
        }
        Ok(FrameLayout::Missing)
    }

    /// One page of a run's frames, sorted by `frame_id`, plus the total count.
    ///
    /// Unreadable frame files are logged and skipped.
    ///
    /// # Errors
    ///
    /// Returns an error for invalid ids or a failed listing.
    pub fn get_frame_results(
        &self,
        experiment_id: &str,
        algorithm_key: &str,
        start: usize,
        limit: usize,
    ) -> Result<(Vec<FrameResult>, usize)> {
        self.validate_pair(experiment_id, algorithm_key)?;

        let individual = self.individual_frame_keys(experiment_id, algorithm_key)?;
        if !individual.is_empty() {
            let total = individual.len();
            let end = start.saturating_add(limit).min(total);
            let page = individual.get(start..end).unwrap_or_default();

            let mut frames: Vec<FrameResult> = if page.len() > self.settings.parallel_frame_threshold {
                self.pool
                    .install(|| page.par_iter().filter_map(|key| self.load_frame(key)).collect())
            } else {
                page.iter().filter_map(|key| self.load_frame(key)).collect()
            };
            frames.sort_by_key(|f| f.frame_id);
            return Ok((frames, total));
        }

        let key = keys::frames_key(experiment_id, algorithm_key);
        let Some(mut frames) = self.read_json::<Vec<FrameResult>>(&key)? else {
            return Ok((Vec::new(), 0));
        };
        frames.sort_by_key(|f| f.frame_id);
        let total = frames.len();
        let page = frames.into_iter().skip(start).take(limit).collect();
        Ok((page, total))
    }

    /// Every frame of a run, sorted by `frame_id`.
    ///
    /// # Errors
    ///
    /// Same as [`get_frame_results`](Self::get_frame_results).
    pub fn all_frame_results(&self, experiment_id: &str, algorithm_key: &str) -> Result<Vec<FrameResult>> {
        Ok(self
            .get_frame_results(experiment_id, algorithm_key, 0, usize::MAX)?
            .0)
    }

    // ---------------------------------------------------------------------
    // Derived artifacts
    // ---------------------------------------------------------------------

    /// Persist a trajectory: canonical JSON, then Full/UI binaries, then manifest.
    ///
    /// # Errors
    ///
    /// Only a failure to persist the canonical copy is an error.
    pub fn save_trajectory(
        &self,
        experiment_id: &str,
        algorithm_key: &str,
        data: &TrajectoryData,
    ) -> Result<DerivedOutcome> {
        self.validate_pair(experiment_id, algorithm_key)?;
        let key = keys::trajectory_key(experiment_id, algorithm_key);
        let ui = data.downsampled(self.settings.trajectory_ui_points);
        self.save_derived(
            experiment_id,
            algorithm_key,
            &key,
            data,
            codec::trajectory::encode(data, Resolution::Full),
            codec::trajectory::encode(&ui, Resolution::Ui),
        )
    }

    /// Load a trajectory at the given resolution.
    ///
    /// # Errors
    ///
    /// Returns `Error::Storage` if a canonical file exists but cannot be read.
    pub fn get_trajectory(
        &self,
        experiment_id: &str,
        algorithm_key: &str,
        resolution: Resolution,
    ) -> Result<Option<TrajectoryData>> {
        self.validate_pair(experiment_id, algorithm_key)?;
        let cap = self.settings.trajectory_ui_points;
        self.read_derived(
            &keys::trajectory_key(experiment_id, algorithm_key),
            resolution,
            codec::trajectory::decode,
            |data: TrajectoryData| data.downsampled(cap),
        )
    }

    /// Persist a PR curve: canonical JSON, then Full/UI binaries, then manifest.
    ///
    /// # Errors
    ///
    /// Only a failure to persist the canonical copy is an error.
    pub fn save_pr_curve(
        &self,
        experiment_id: &str,
        algorithm_key: &str,
        curve: &PrCurveData,
    ) -> Result<DerivedOutcome> {
        self.validate_pair(experiment_id, algorithm_key)?;
        let key = keys::pr_curve_key(experiment_id, algorithm_key);
        let ui = curve.ui_view(self.settings.pr_curve_ui_points);
        self.save_derived(
            experiment_id,
            algorithm_key,
            &key,
            curve,
            codec::pr_curve::encode(curve, Resolution::Full),
            codec::pr_curve::encode(&ui, Resolution::Ui),
        )
    }

    /// Load a PR curve at the given resolution.
    ///
    /// # Errors
    ///
    /// Returns `Error::Storage` if a canonical file exists but cannot be read.
    pub fn get_pr_curve(
        &self,
        experiment_id: &str,
        algorithm_key: &str,
        resolution: Resolution,
    ) -> Result<Option<PrCurveData>> {
        self.validate_pair(experiment_id, algorithm_key)?;
        let cap = self.settings.pr_curve_ui_points;
        self.read_derived(
            &keys::pr_curve_key(experiment_id, algorithm_key),
            resolution,
            codec::pr_curve::decode,
            |curve: PrCurveData| curve.ui_view(cap),
        )
    }

    /// Whether any representation of the trajectory exists.
    ///
    /// # Errors
    ///
    /// Returns an error for invalid ids.
    pub fn has_trajectory(&self, experiment_id: &str, algorithm_key: &str) -> Result<bool> {
        self.validate_pair(experiment_id, algorithm_key)?;
        self.has_derived(&keys::trajectory_key(experiment_id, algorithm_key))
    }

    /// Whether any representation of the PR curve exists.
    ///
    /// # Errors
    ///
    /// Returns an error for invalid ids.
    pub fn has_pr_curve(&self, experiment_id: &str, algorithm_key: &str) -> Result<bool> {
        self.validate_pair(experiment_id, algorithm_key)?;
        self.has_derived(&keys::pr_curve_key(experiment_id, algorithm_key))
    }

    /// Run `f` while holding the derived-artifact lock of one run.
    ///
    /// Frame saves take this lock, so a rebuild done inside it sees a
    /// consistent frame set and cannot persist over a newer frame save.
    /// Not reentrant.
    pub fn with_derived_lock<T>(&self, experiment_id: &str, algorithm_key: &str, f: impl FnOnce() -> T) -> T {
        let _guard = self.derived_locks.lock(&format!("{experiment_id}/{algorithm_key}"));
        f()
    }

    // ---------------------------------------------------------------------
    // Internals
    // ---------------------------------------------------------------------

    /// Remove the trajectory and PR curve of a run (canonical and binaries)
    /// and refresh its manifest. A run with nothing derived is left untouched.
    fn discard_derived(&self, experiment_id: &str, algorithm_key: &str) -> Result<()> {
        let mut discarded = false;
        for key in [
            keys::trajectory_key(experiment_id, algorithm_key),
            keys::pr_curve_key(experiment_id, algorithm_key),
        ] {
            if !self.has_derived(&key)? {
                continue;
            }
            self.storage.with_key_lock(&format!("{key}#derived"), || -> Result<()> {
                for resolution in [Resolution::Full, Resolution::Ui] {
                    let path = self.storage.sidecar_path(&key, resolution.suffix())?;
                    match fs::remove_file(&path) {
                        Ok(()) => {}
                        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                        Err(e) => return Err(Error::storage(&key, StorageOp::Delete, e)),
                    }
                }
                Ok(())
            })?;
            self.storage.delete(&key)?;
            discarded = true;
        }
        if discarded {
            debug!(experiment_id, algorithm_key, "frames changed, derived artifacts discarded");
            if let Err(e) = self.manifests.update_manifest_after_save(experiment_id, algorithm_key) {
                warn!(experiment_id, algorithm_key, error = %e, "manifest refresh failed");
            }
        }
        Ok(())
    }

    fn validate_pair(&self, experiment_id: &str, algorithm_key: &str) -> Result<()> {
        keys::validate_id("experiment id", experiment_id)?;
        keys::validate_id("algorithm key", algorithm_key)
    }

    /// Load JSON, treating a corrupt record as missing.
    fn read_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.storage.load_json(key) {
            Ok(value) => Ok(value),
            Err(e) if e.is_serialization() => {
                warn!(key, error = %e, "unreadable record treated as missing");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    fn load_frame(&self, key: &str) -> Option<FrameResult> {
        match self.storage.load_json::<FrameResult>(key) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(key, error = %e, "skipping unreadable frame");
                None
            }
        }
    }

    /// Keys of individually stored frames, ordered by numeric frame id.
    fn individual_frame_keys(&self, experiment_id: &str, algorithm_key: &str) -> Result<Vec<String>> {
        let prefix = keys::frames_key(experiment_id, algorithm_key);
        let mut found: Vec<(u64, String)> = self
            .storage
            .list_keys(&prefix)?
            .into_iter()
            .filter_map(|key| {
                let leaf = key.strip_prefix(&prefix)?.strip_prefix('/')?;
                let id = leaf.parse::<u64>().ok()?;
                Some((id, key))
            })
            .collect();
        found.sort();
        Ok(found.into_iter().map(|(_, key)| key).collect())
    }

    fn save_derived<T: Serialize>(
        &self,
        experiment_id: &str,
        algorithm_key: &str,
        key: &str,
        canonical: &T,
        full: (SeriesMap, Metadata),
        ui: (SeriesMap, Metadata),
    ) -> Result<DerivedOutcome> {
        self.storage.save_json(key, canonical, true)?;

        let mut outcome = DerivedOutcome::default();
        let lock_key = format!("{key}#derived");
        self.storage.with_key_lock(&lock_key, || {
            for (resolution, (series, metadata)) in [(Resolution::Full, full), (Resolution::Ui, ui)] {
                let written = self
                    .storage
                    .sidecar_path(key, resolution.suffix())
                    .and_then(|path| self.codec.write(&path, &series, &metadata));
                match written {
                    Ok(bytes) => match resolution {
                        Resolution::Full => outcome.full_bytes = bytes,
                        Resolution::Ui => outcome.ui_bytes = bytes,
                    },
                    Err(e) => {
                        warn!(key, resolution = resolution.as_str(), error = %e, "derived binary write failed");
                        outcome.binary_error.get_or_insert_with(|| e.to_string());
                    }
                }
            }
        });

        if let Err(e) = self.manifests.update_manifest_after_save(experiment_id, algorithm_key) {
            warn!(experiment_id, algorithm_key, error = %e, "manifest refresh failed");
            outcome.manifest_error = Some(e.to_string());
        }
        Ok(outcome)
    }

    fn read_derived<T: DeserializeOwned>(
        &self,
        key: &str,
        resolution: Resolution,
        decode: fn(&ColumnarFrame) -> Result<T>,
        to_ui: impl Fn(T) -> T,
    ) -> Result<Option<T>> {
        if let Some(value) = self.read_binary(key, resolution, decode) {
            return Ok(Some(value));
        }
        // A Full read never falls back to the reduced binary
        if resolution == Resolution::Ui {
            if let Some(value) = self.read_binary(key, Resolution::Full, decode) {
                return Ok(Some(to_ui(value)));
            }
        }

        let canonical = self.read_json::<T>(key)?;
        Ok(match resolution {
            Resolution::Full => canonical,
            Resolution::Ui => canonical.map(to_ui),
        })
    }

    fn read_binary<T>(
        &self,
        key: &str,
        resolution: Resolution,
        decode: fn(&ColumnarFrame) -> Result<T>,
    ) -> Option<T> {
        let path = self.storage.sidecar_path(key, resolution.suffix()).ok()?;
        match self.codec.read(&path).and_then(|frame| frame.as_ref().map(decode).transpose()) {
            Ok(value) => value,
            Err(e) => {
                warn!(key, resolution = resolution.as_str(), error = %e, "unreadable derived binary, falling back");
                None
            }
        }
    }

    fn has_derived(&self, key: &str) -> Result<bool> {
        if self.storage.exists(key)? {
            return Ok(true);
        }
        for resolution in [Resolution::Full, Resolution::Ui] {
            if self.storage.sidecar_path(key, resolution.suffix())?.is_file() {
                return Ok(true);
            }
        }
        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{default_codec, NoopCodec};
    use crate::experiment::{ExperimentStatus, MatchScore, TrajectoryPoint};
    use crate::store::{KeyedObjectStore, Record};

    fn open(codec: CodecHandle) -> (tempfile::TempDir, ExperimentResultStore) {
        let dir = tempfile::tempdir().unwrap();
        let storage = Arc::new(KeyedObjectStore::open(dir.path()).unwrap());
        let store = ExperimentResultStore::new(storage, codec, StoreSettings::default()).unwrap();
        (dir, store)
    }

    #[allow(clippy::cast_precision_loss)]
    fn trajectory(n: u64) -> TrajectoryData {
        let points = (0..n)
            .map(|i| TrajectoryPoint::new(i, i as f64, [i as f64, 0.0, 0.0]))
            .collect();
        TrajectoryData::new(points, Vec::new()).with_reference_line()
    }

    #[test]
    fn test_experiment_roundtrip_and_listing_order() {
        let (_dir, store) = open(default_codec());
        let older = ExperimentSummary::builder("old", "Old")
            .created_at(chrono::Utc::now() - chrono::Duration::hours(1))
            .build();
        let newer = ExperimentSummary::builder("new", "New")
            .status(ExperimentStatus::Running)
            .build();
        store.save_experiment(&older).unwrap();
        store.save_experiment(&newer).unwrap();

        assert_eq!(store.get_experiment("old").unwrap(), Some(older));
        let ids: Vec<String> = store
            .list_experiments()
            .unwrap()
            .iter()
            .map(|s| s.experiment_id().to_string())
            .collect();
        assert_eq!(ids, vec!["new".to_string(), "old".to_string()]);
    }

    #[test]
    fn test_corrupt_summary_reads_as_missing() {
        let (dir, store) = open(default_codec());
        let path = dir.path().join("experiments/e1/summary.json");
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, b"{not json").unwrap();
        assert_eq!(store.get_experiment("e1").unwrap(), None);
    }

    #[test]
    fn test_algorithm_results_sorted_and_validated() {
        let (_dir, store) = open(default_codec());
        store.save_algorithm_result(&AlgorithmMetrics::new("e1", "sift", 5, 0)).unwrap();
        store.save_algorithm_result(&AlgorithmMetrics::new("e1", "orb", 3, 1)).unwrap();

        let keys: Vec<String> = store
            .get_all_algorithm_results("e1")
            .unwrap()
            .iter()
            .map(|m| m.algorithm_key().to_string())
            .collect();
        assert_eq!(keys, vec!["orb".to_string(), "sift".to_string()]);

        let broken: AlgorithmMetrics = serde_json::from_value(serde_json::json!({
            "experiment_id": "e1", "algorithm_key": "bad",
            "total_frames": 3, "successful_frames": 1, "failed_frames": 1
        }))
        .unwrap();
        assert!(matches!(store.save_algorithm_result(&broken), Err(Error::InvalidInput(_))));
    }

    #[test]
    fn test_frame_id_must_match_key() {
        let (_dir, store) = open(default_codec());
        let err = store.save_frame_result("e1", "orb", 2, &FrameResult::new(3)).unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[test]
    fn test_individual_frames_paging_in_parallel() {
        let (_dir, store) = open(default_codec());
        for id in (0..40).rev() {
            let frame = FrameResult::new(id).with_matches(vec![MatchScore::new(0.5, true)]);
            store.save_frame_result("e1", "orb", id, &frame).unwrap();
        }
        assert_eq!(store.frame_layout("e1", "orb").unwrap(), FrameLayout::Individual);

        let (page, total) = store.get_frame_results("e1", "orb", 5, 30).unwrap();
        assert_eq!(total, 40);
        let ids: Vec<u64> = page.iter().map(|f| f.frame_id).collect();
        assert_eq!(ids, (5..35).collect::<Vec<u64>>());

        let (tail, _) = store.get_frame_results("e1", "orb", 38, 10).unwrap();
        assert_eq!(tail.len(), 2);
        let (past_end, total) = store.get_frame_results("e1", "orb", 100, 10).unwrap();
        assert!(past_end.is_empty());
        assert_eq!(total, 40);
    }

    #[test]
    fn test_unreadable_frame_is_skipped() {
        let (dir, store) = open(default_codec());
        for id in 0..3 {
            store.save_frame_result("e1", "orb", id, &FrameResult::new(id)).unwrap();
        }
        fs::write(dir.path().join("experiments/e1/frames/orb/000001.json"), b"garbage").unwrap();
        let (frames, total) = store.get_frame_results("e1", "orb", 0, 10).unwrap();
        assert_eq!(total, 3);
        assert_eq!(frames.iter().map(|f| f.frame_id).collect::<Vec<_>>(), vec![0, 2]);
    }

    #[test]
    fn test_batch_layout() {
        let (_dir, store) = open(default_codec());
        let frames: Vec<FrameResult> = (0..5).rev().map(FrameResult::new).collect();
        store.save_frame_results("e1", "orb", &frames).unwrap();
        assert_eq!(store.frame_layout("e1", "orb").unwrap(), FrameLayout::Batch);

        let (page, total) = store.get_frame_results("e1", "orb", 1, 2).unwrap();
        assert_eq!(total, 5);
        assert_eq!(page.iter().map(|f| f.frame_id).collect::<Vec<_>>(), vec![1, 2]);
        assert_eq!(store.list_algorithm_keys("e1").unwrap(), vec!["orb".to_string()]);
    }

    #[test]
    fn test_trajectory_save_writes_all_representations() {
        let (dir, store) = open(default_codec());
        let data = trajectory(2000);
        let outcome = store.save_trajectory("e1", "orb", &data).unwrap();
        assert!(outcome.is_complete());

        let base = dir.path().join("experiments/e1/trajectories");
        assert!(base.join("orb.json.gz").is_file());
        assert!(store.manifests().load_manifest("e1", "orb").unwrap().is_some());
        if store.codec().is_available() {
            assert!(outcome.binaries_written());
            assert!(base.join("orb.arrow").is_file());
            assert!(base.join("orb.ui.arrow").is_file());
        }

        let ui = store.get_trajectory("e1", "orb", Resolution::Ui).unwrap().unwrap();
        assert_eq!(ui.len(), 1500);
        assert_eq!(ui.original_points, 2000);
        assert!(ui.downsampled);

        let full = store.get_trajectory("e1", "orb", Resolution::Full).unwrap().unwrap();
        assert_eq!(full.len(), 2000);
    }

    #[test]
    fn test_trajectory_without_codec_reads_canonical() {
        let (_dir, store) = open(Arc::new(NoopCodec));
        let outcome = store.save_trajectory("e1", "orb", &trajectory(1600)).unwrap();
        assert!(outcome.is_complete());
        assert!(!outcome.binaries_written());

        let ui = store.get_trajectory("e1", "orb", Resolution::Ui).unwrap().unwrap();
        assert_eq!(ui.len(), 1500);
        assert!(store.has_trajectory("e1", "orb").unwrap());
        assert!(!store.has_pr_curve("e1", "orb").unwrap());
    }

    #[test]
    fn test_full_read_skips_ui_binary() {
        let (dir, store) = open(default_codec());
        let _ = store.save_trajectory("e1", "orb", &trajectory(2000)).unwrap();
        let _ = fs::remove_file(dir.path().join("experiments/e1/trajectories/orb.arrow"));

        let full = store.get_trajectory("e1", "orb", Resolution::Full).unwrap().unwrap();
        assert_eq!(full.len(), 2000);
        assert!(!full.downsampled);
    }

    #[test]
    fn test_frame_save_discards_derived_artifacts() {
        let (dir, store) = open(default_codec());
        store.save_frame_result("e1", "orb", 0, &FrameResult::new(0)).unwrap();
        let _ = store.save_trajectory("e1", "orb", &trajectory(5)).unwrap();
        assert!(store.has_trajectory("e1", "orb").unwrap());

        store.save_frame_result("e1", "orb", 1, &FrameResult::new(1)).unwrap();
        assert!(!store.has_trajectory("e1", "orb").unwrap());
        let base = dir.path().join("experiments/e1/trajectories");
        for name in ["orb.json.gz", "orb.arrow", "orb.ui.arrow"] {
            assert!(!base.join(name).exists(), "{name} survived a frame save");
        }
        let manifest = store.manifests().load_manifest("e1", "orb").unwrap().unwrap();
        assert!(manifest.trajectory.is_empty());
        assert_eq!(store.get_frame_results("e1", "orb", 0, 10).unwrap().1, 2);
    }

    #[test]
    fn test_corrupt_binary_falls_back() {
        let (dir, store) = open(default_codec());
        let _ = store.save_trajectory("e1", "orb", &trajectory(10)).unwrap();
        fs::write(dir.path().join("experiments/e1/trajectories/orb.ui.arrow"), b"junk").unwrap();
        let ui = store.get_trajectory("e1", "orb", Resolution::Ui).unwrap().unwrap();
        assert_eq!(ui.len(), 10);
    }

    #[test]
    fn test_delete_experiment_removes_everything() {
        let (_dir, store) = open(default_codec());
        store.save_experiment(&ExperimentSummary::new("e1", "One")).unwrap();
        store.save_frame_result("e1", "orb", 0, &FrameResult::new(0)).unwrap();
        let _ = store.save_trajectory("e1", "orb", &trajectory(5)).unwrap();
        store.save_experiment(&ExperimentSummary::new("e1", "One again")).unwrap();

        assert!(store.delete_experiment("e1").unwrap());
        assert_eq!(store.get_experiment("e1").unwrap(), None);
        assert!(store.storage().list_keys("experiments/e1").unwrap().is_empty());
        assert!(!store.delete_experiment("e1").unwrap());
    }

    #[test]
    fn test_batch_table_record_is_missing_for_frames() {
        let (_dir, store) = open(default_codec());
        store
            .storage()
            .save("experiments/e1/frames/orb", &Record::Json(serde_json::json!({"not": "a list"})), false)
            .unwrap();
        assert_eq!(store.get_frame_results("e1", "orb", 0, 10).unwrap(), (Vec::new(), 0));
    }
}

//! Result computation cache
//!
//! **Problem**: PR curves and trajectories are built from every frame of a
//! run. Rebuilding them per request is slow; rebuilding them concurrently for
//! the same run wastes work and races on the same files.
//!
//! **Solution**: a read path that tries, in order,
//!
//! 1. a fresh in-memory entry (TTL, default 300 s),
//! 2. the persisted artifact,
//! 3. computation from raw frames, persisted unless another writer got there first.
//!
//! Concurrent readers of one entry share a single load. Step 3 runs under the
//! run's derived lock and re-reads storage first, so a curve is built and
//! persisted once even when Full and UI readers miss together.
//!
//! Staleness of memory entries is bounded by the TTL; writers that go through
//! [`ResultComputationCache::invalidate`] (the engine's `save_*` wrappers do)
//! are visible immediately. Frame saves also discard persisted artifacts, so
//! step 2 never serves a curve built from an older frame set.

pub mod ttl;

pub use ttl::{CacheState, TtlCache};

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};

use crate::codec::Resolution;
use crate::compute::{PrCurveBuilder, TrajectoryBuilder};
use crate::experiment::{ExperimentResultStore, PrCurveData, TrajectoryData};
use crate::Result;

/// What a trajectory read asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TrajectoryRequest {
    /// Full or UI resolution.
    pub resolution: Resolution,
    /// Include the synthesized reference line (only exists without ground truth).
    pub include_reference: bool,
}

impl Default for TrajectoryRequest {
    fn default() -> Self {
        Self::ui()
    }
}

impl TrajectoryRequest {
    /// UI resolution with the reference line.
    #[must_use]
    pub const fn ui() -> Self {
        Self {
            resolution: Resolution::Ui,
            include_reference: true,
        }
    }

    /// Full resolution with the reference line.
    #[must_use]
    pub const fn full() -> Self {
        Self {
            resolution: Resolution::Full,
            include_reference: true,
        }
    }

    /// Set whether the reference line is included.
    #[must_use]
    pub const fn include_reference(mut self, include: bool) -> Self {
        self.include_reference = include;
        self
    }

    fn shape(self, data: TrajectoryData) -> TrajectoryData {
        if !self.include_reference {
            data.without_reference()
        } else if data.reference.is_empty() {
            data.with_reference_line()
        } else {
            data
        }
    }
}

/// Which cached variant of an artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheVariant {
    /// PR curve at a resolution.
    PrCurve(Resolution),
    /// Trajectory for a request shape.
    Trajectory(TrajectoryRequest),
}

/// Identity of one cache entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    experiment_id: String,
    algorithm_key: String,
    variant: CacheVariant,
}

impl CacheKey {
    fn new(experiment_id: &str, algorithm_key: &str, variant: CacheVariant) -> Self {
        Self {
            experiment_id: experiment_id.to_string(),
            algorithm_key: algorithm_key.to_string(),
            variant,
        }
    }

    fn belongs_to(&self, experiment_id: &str, algorithm_key: Option<&str>) -> bool {
        self.experiment_id == experiment_id
            && algorithm_key.map_or(true, |alg| self.algorithm_key == alg)
    }
}

/// Result of a precompute call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrecomputeOutcome {
    /// Artifact was built and persisted.
    Computed,
    /// Artifact already existed and `force` was not set.
    AlreadyPresent,
    /// The run has no frames to build from.
    NoData,
}

/// Precompute results for one algorithm run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExperimentPrecompute {
    /// Algorithm key of the run.
    pub algorithm_key: String,
    /// PR curve outcome.
    pub pr_curve: PrecomputeOutcome,
    /// Trajectory outcome.
    pub trajectory: PrecomputeOutcome,
}

/// Compute-on-miss cache for PR curves and trajectories.
#[derive(Debug)]
pub struct ResultComputationCache {
    results: Arc<ExperimentResultStore>,
    pr_builder: PrCurveBuilder,
    pr_curves: TtlCache<CacheKey, PrCurveData>,
    trajectories: TtlCache<CacheKey, TrajectoryData>,
}

impl ResultComputationCache {
    /// Cache over `results` with entries living for `ttl`.
    #[must_use]
    pub fn new(results: Arc<ExperimentResultStore>, ttl: Duration) -> Self {
        let pr_builder = PrCurveBuilder::new().max_points(results.settings().pr_curve_ui_points);
        Self {
            results,
            pr_builder,
            pr_curves: TtlCache::new(ttl),
            trajectories: TtlCache::new(ttl),
        }
    }

    /// Replace the PR curve builder (sampling caps and seed).
    #[must_use]
    pub fn with_pr_builder(mut self, builder: PrCurveBuilder) -> Self {
        self.pr_builder = builder;
        self
    }

    /// Store this cache reads from and persists into.
    #[must_use]
    pub const fn results(&self) -> &Arc<ExperimentResultStore> {
        &self.results
    }

    /// PR curve at `resolution`, computing it from frames if nothing is stored.
    ///
    /// Returns `Ok(None)` when the run has no match scores at all.
    ///
    /// # Errors
    ///
    /// Returns storage errors from reading frames or persisting the curve.
    pub fn get_pr_curve(
        &self,
        experiment_id: &str,
        algorithm_key: &str,
        resolution: Resolution,
    ) -> Result<Option<Arc<PrCurveData>>> {
        let key = CacheKey::new(experiment_id, algorithm_key, CacheVariant::PrCurve(resolution));
        self.pr_curves.get_or_try_load(&key, || {
            if let Some(curve) = self.results.get_pr_curve(experiment_id, algorithm_key, resolution)? {
                debug!(experiment_id, algorithm_key, "pr curve loaded from storage");
                return Ok(Some(curve));
            }
            let build = || -> Result<Option<PrCurveData>> {
                // Another writer may have persisted while we waited
                if let Some(curve) = self.results.get_pr_curve(experiment_id, algorithm_key, resolution)? {
                    return Ok(Some(curve));
                }
                let Some(curve) = self.compute_pr_curve(experiment_id, algorithm_key)? else {
                    return Ok(None);
                };
                let outcome = self.results.save_pr_curve(experiment_id, algorithm_key, &curve)?;
                debug!(experiment_id, algorithm_key, complete = outcome.is_complete(), "persisted pr curve");
                Ok(Some(match resolution {
                    Resolution::Full => curve,
                    Resolution::Ui => curve.ui_view(self.results.settings().pr_curve_ui_points),
                }))
            };
            self.results.with_derived_lock(experiment_id, algorithm_key, build)
        })
    }

    /// Trajectory shaped by `request`, computing it from frames if nothing is stored.
    ///
    /// Returns `Ok(None)` when no frame has a usable pose estimate.
    ///
    /// # Errors
    ///
    /// Returns storage errors from reading frames or persisting the trajectory.
    pub fn get_trajectory(
        &self,
        experiment_id: &str,
        algorithm_key: &str,
        request: TrajectoryRequest,
    ) -> Result<Option<Arc<TrajectoryData>>> {
        let key = CacheKey::new(experiment_id, algorithm_key, CacheVariant::Trajectory(request));
        self.trajectories.get_or_try_load(&key, || {
            let stored = self
                .results
                .get_trajectory(experiment_id, algorithm_key, request.resolution)?;
            let data = if let Some(data) = stored {
                debug!(experiment_id, algorithm_key, "trajectory loaded from storage");
                data
            } else {
                let build = || -> Result<Option<TrajectoryData>> {
                    let stored = self
                        .results
                        .get_trajectory(experiment_id, algorithm_key, request.resolution)?;
                    if stored.is_some() {
                        return Ok(stored);
                    }
                    let Some(data) = self.compute_trajectory(experiment_id, algorithm_key)? else {
                        return Ok(None);
                    };
                    let outcome = self.results.save_trajectory(experiment_id, algorithm_key, &data)?;
                    debug!(experiment_id, algorithm_key, complete = outcome.is_complete(), "persisted trajectory");
                    Ok(Some(match request.resolution {
                        Resolution::Full => data,
                        Resolution::Ui => data.downsampled(self.results.settings().trajectory_ui_points),
                    }))
                };
                let Some(data) = self.results.with_derived_lock(experiment_id, algorithm_key, build)? else {
                    return Ok(None);
                };
                data
            };
            Ok(Some(request.shape(data)))
        })
    }

    /// Build and persist the PR curve unless one exists (or `force`).
    ///
    /// # Errors
    ///
    /// Returns storage errors from reading frames or persisting the curve.
    pub fn precompute_pr_curve(
        &self,
        experiment_id: &str,
        algorithm_key: &str,
        force: bool,
    ) -> Result<PrecomputeOutcome> {
        let build = || -> Result<PrecomputeOutcome> {
            if !force && self.results.has_pr_curve(experiment_id, algorithm_key)? {
                return Ok(PrecomputeOutcome::AlreadyPresent);
            }
            let Some(curve) = self.compute_pr_curve(experiment_id, algorithm_key)? else {
                return Ok(PrecomputeOutcome::NoData);
            };
            let outcome = self.results.save_pr_curve(experiment_id, algorithm_key, &curve)?;
            self.pr_curves
                .retain(|key| !key.belongs_to(experiment_id, Some(algorithm_key)));
            info!(experiment_id, algorithm_key, complete = outcome.is_complete(), "precomputed pr curve");
            Ok(PrecomputeOutcome::Computed)
        };
        self.results.with_derived_lock(experiment_id, algorithm_key, build)
    }

    /// Build and persist the trajectory unless one exists (or `force`).
    ///
    /// # Errors
    ///
    /// Returns storage errors from reading frames or persisting the trajectory.
    pub fn precompute_trajectory(
        &self,
        experiment_id: &str,
        algorithm_key: &str,
        force: bool,
    ) -> Result<PrecomputeOutcome> {
        let build = || -> Result<PrecomputeOutcome> {
            if !force && self.results.has_trajectory(experiment_id, algorithm_key)? {
                return Ok(PrecomputeOutcome::AlreadyPresent);
            }
            let Some(data) = self.compute_trajectory(experiment_id, algorithm_key)? else {
                return Ok(PrecomputeOutcome::NoData);
            };
            let outcome = self.results.save_trajectory(experiment_id, algorithm_key, &data)?;
            self.trajectories
                .retain(|key| !key.belongs_to(experiment_id, Some(algorithm_key)));
            info!(experiment_id, algorithm_key, complete = outcome.is_complete(), "precomputed trajectory");
            Ok(PrecomputeOutcome::Computed)
        };
        self.results.with_derived_lock(experiment_id, algorithm_key, build)
    }

    /// Precompute both artifacts for every algorithm run of an experiment.
    ///
    /// # Errors
    ///
    /// Stops at the first storage error.
    pub fn precompute_experiment(
        &self,
        experiment_id: &str,
        force: bool,
    ) -> Result<Vec<ExperimentPrecompute>> {
        let algorithm_keys = self.results.list_algorithm_keys(experiment_id)?;
        info!(experiment_id, runs = algorithm_keys.len(), force, "precomputing experiment");
        algorithm_keys
            .into_iter()
            .map(|algorithm_key| {
                Ok(ExperimentPrecompute {
                    pr_curve: self.precompute_pr_curve(experiment_id, &algorithm_key, force)?,
                    trajectory: self.precompute_trajectory(experiment_id, &algorithm_key, force)?,
                    algorithm_key,
                })
            })
            .collect()
    }

    /// Lifecycle state of one cache entry.
    #[must_use]
    pub fn cache_state(&self, experiment_id: &str, algorithm_key: &str, variant: CacheVariant) -> CacheState {
        let key = CacheKey::new(experiment_id, algorithm_key, variant);
        match variant {
            CacheVariant::PrCurve(_) => self.pr_curves.state(&key),
            CacheVariant::Trajectory(_) => self.trajectories.state(&key),
        }
    }

    /// Drop every cached variant of one algorithm run.
    pub fn invalidate(&self, experiment_id: &str, algorithm_key: &str) {
        self.pr_curves
            .retain(|key| !key.belongs_to(experiment_id, Some(algorithm_key)));
        self.trajectories
            .retain(|key| !key.belongs_to(experiment_id, Some(algorithm_key)));
    }

    /// Drop every cached entry of an experiment.
    pub fn invalidate_experiment(&self, experiment_id: &str) {
        self.pr_curves.retain(|key| !key.belongs_to(experiment_id, None));
        self.trajectories.retain(|key| !key.belongs_to(experiment_id, None));
    }

    /// Drop everything.
    pub fn clear(&self) {
        self.pr_curves.clear();
        self.trajectories.clear();
    }

    /// Number of cached entries across both artifact kinds.
    #[must_use]
    pub fn len(&self) -> usize {
        self.pr_curves.len() + self.trajectories.len()
    }

    /// True if nothing is cached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn compute_pr_curve(&self, experiment_id: &str, algorithm_key: &str) -> Result<Option<PrCurveData>> {
        let frames = self.results.all_frame_results(experiment_id, algorithm_key)?;
        let curve = self.pr_builder.build(&frames);
        match &curve {
            Some(curve) => info!(
                experiment_id,
                algorithm_key,
                frames = frames.len(),
                samples = curve.num_samples,
                points = curve.len(),
                "computed pr curve"
            ),
            None => debug!(experiment_id, algorithm_key, frames = frames.len(), "no match scores for pr curve"),
        }
        Ok(curve)
    }

    fn compute_trajectory(&self, experiment_id: &str, algorithm_key: &str) -> Result<Option<TrajectoryData>> {
        let frames = self.results.all_frame_results(experiment_id, algorithm_key)?;
        // Persisted copies always carry the reference; reads strip it on request
        let data = TrajectoryBuilder::new().include_reference(true).build(&frames);
        match &data {
            Some(data) => info!(
                experiment_id,
                algorithm_key,
                frames = frames.len(),
                points = data.len(),
                "computed trajectory"
            ),
            None => debug!(experiment_id, algorithm_key, frames = frames.len(), "no pose estimates for trajectory"),
        }
        Ok(data)
    }
}

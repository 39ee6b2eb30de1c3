//! Experiment Results Schema and Store
//!
//! Records produced by an evaluation pipeline and the domain store that
//! persists them.
//!
//! ## Schema Overview
//!
//! ```text
//! ExperimentSummary (1) ──< AlgorithmMetrics (N)     experiments/{id}/algorithms/{alg}
//!                       ──< FrameResult (N per alg)  experiments/{id}/frames/{alg}[/{frame:06}]
//!                       ──< TrajectoryData           experiments/{id}/trajectories/{alg}
//!                       ──< PrCurveData              experiments/{id}/pr_curves/{alg}
//! ```
//!
//! Trajectories and PR curves are *derived*: computed from frames, stored
//! canonically as gzipped JSON plus Full/UI binaries.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use trueno_results::codec::default_codec;
//! use trueno_results::experiment::{
//!     AlgorithmMetrics, ExperimentResultStore, ExperimentSummary, StoreSettings,
//! };
//! use trueno_results::store::KeyedObjectStore;
//!
//! # fn main() -> trueno_results::Result<()> {
//! let storage = Arc::new(KeyedObjectStore::open("/tmp/results")?);
//! let store = ExperimentResultStore::new(storage, default_codec(), StoreSettings::default())?;
//!
//! store.save_experiment(&ExperimentSummary::new("exp-001", "Feature sweep"))?;
//! store.save_algorithm_result(&AlgorithmMetrics::new("exp-001", "orb_ransac_seq01_run0", 98, 2))?;
//! # Ok(())
//! # }
//! ```

mod frame;
pub mod keys;
mod metrics;
mod pr_curve;
mod store;
mod summary;
mod trajectory;

pub use frame::{FrameLayout, FrameResult, MatchScore, Pose};
pub use keys::algorithm_key;
pub use metrics::{AlgorithmMetrics, RunStatus};
pub use pr_curve::{f1_score, OperatingPoint, PrCurveData};
pub use store::{DerivedOutcome, ExperimentResultStore, StoreSettings};
pub use summary::{ExperimentStatus, ExperimentSummary, ExperimentSummaryBuilder};
pub use trajectory::{reference_line, ErrorStats, TrajectoryData, TrajectoryPoint};

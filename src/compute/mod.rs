//! Derived-artifact computation
//!
//! Pure functions from raw frame results to PR curves and trajectories. No
//! I/O happens here; persistence and caching live in [`crate::cache`].

pub mod downsample;
pub mod pr_curve;
pub mod trajectory;

pub use pr_curve::PrCurveBuilder;
pub use trajectory::TrajectoryBuilder;

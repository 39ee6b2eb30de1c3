//! End-to-end walk through the engine
//!
//! Simulates a small sweep: two algorithm runs over one sequence, frames
//! streamed in one at a time, then derived artifacts precomputed, served and
//! listed in a manifest.
//!
//! ```text
//! cargo run --example pipeline -- /tmp/results-demo
//! TRUENO_RESULTS_LOG=debug cargo run --example pipeline
//! ```

use anyhow::{Context, Result};
use trueno_results::cache::TrajectoryRequest;
use trueno_results::codec::Resolution;
use trueno_results::experiment::{
    algorithm_key, AlgorithmMetrics, ExperimentStatus, ExperimentSummary, FrameResult, MatchScore,
};
use trueno_results::logging;
use trueno_results::ResultEngine;

const FRAMES: u64 = 300;
const SEQUENCE: &str = "seq01";

#[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation)]
fn simulate_frame(frame_id: u64, noise: f64) -> FrameResult {
    let t = frame_id as f64;
    let matches = (0..80)
        .map(|m| {
            let score = f64::from((m * 37 + frame_id as u32 % 97) % 100) / 100.0;
            MatchScore::new(score, score + noise * 0.1 > 0.45)
        })
        .collect();

    let mut frame = FrameResult::new(frame_id)
        .with_timestamp(t / 30.0)
        .with_matches(matches)
        .with_ground_truth_translation([0.05 * (t + 1.0), 0.0, 0.0]);
    frame.processing_time_ms = 12.0 + noise;
    // Every 50th frame loses tracking
    if frame_id % 50 == 49 {
        frame.failed()
    } else {
        frame.with_estimated_translation([0.05 + noise * 0.002, noise * 0.001, 0.0])
    }
}

fn main() -> Result<()> {
    logging::init_tracing();

    let root = std::env::args()
        .nth(1)
        .unwrap_or_else(|| std::env::temp_dir().join("trueno-results-demo").display().to_string());
    let engine = ResultEngine::builder(&root)
        .build()
        .with_context(|| format!("opening result store at {root}"))?;

    let experiment_id = "demo-sweep";
    let runs: Vec<(&str, &str, String, f64)> = [("orb", "ransac", 0.0), ("sift", "magsac", 1.0)]
        .into_iter()
        .map(|(feature, ransac, noise)| (feature, ransac, algorithm_key(feature, ransac, SEQUENCE, 0), noise))
        .collect();

    let mut summary = ExperimentSummary::builder(experiment_id, "Demo sweep")
        .description("two feature/RANSAC pairs on one sequence")
        .status(ExperimentStatus::Running)
        .build();
    for (_, _, alg, _) in &runs {
        summary.register_algorithm(alg.as_str());
    }
    engine.results().save_experiment(&summary)?;

    for (feature, ransac, alg, noise) in &runs {
        let frames: Vec<FrameResult> = (0..FRAMES).map(|id| simulate_frame(id, *noise)).collect();
        for frame in &frames {
            engine.save_frame_result(experiment_id, alg, frame.frame_id, frame)?;
        }
        let metrics = AlgorithmMetrics::from_frames(experiment_id, alg.as_str(), &frames)
            .with_identity(*feature, *ransac, SEQUENCE, 0);
        engine.results().save_algorithm_result(&metrics)?;
        println!(
            "{alg}: {}/{} frames ok, {:.1} matches/frame",
            metrics.successful_frames(),
            metrics.total_frames(),
            metrics.avg_num_matches()
        );
    }

    summary.complete(ExperimentStatus::Completed);
    engine.results().save_experiment(&summary)?;

    for run in engine.cache().precompute_experiment(experiment_id, false)? {
        println!("precompute {}: pr={:?} trajectory={:?}", run.algorithm_key, run.pr_curve, run.trajectory);
    }

    for (_, _, alg, _) in &runs {
        let curve = engine
            .cache()
            .get_pr_curve(experiment_id, alg, Resolution::Ui)?
            .context("no PR curve")?;
        let trajectory = engine
            .cache()
            .get_trajectory(experiment_id, alg, TrajectoryRequest::ui())?
            .context("no trajectory")?;
        println!(
            "{alg}: AUC {:.3}, best F1 {:.3}, path {:.2} m, ATE rmse {:.4}",
            curve.auc,
            curve.optimal.map_or(0.0, |p| p.f1),
            trajectory.path_length,
            trajectory.ate.rmse
        );

        let manifest = engine
            .manifests()
            .load_manifest(experiment_id, alg)?
            .context("manifest missing after save")?;
        for entry in manifest.entries() {
            println!("  {} ({} bytes, {})", entry.url, entry.bytes, entry.hash);
        }
        let issues = engine.manifests().verify_manifest(&manifest);
        println!("  integrity issues: {}", issues.len());
    }

    Ok(())
}

//! Integration tests for the computation cache
//!
//! Compute-on-miss, idempotent precompute, single-flight loading and
//! write-through invalidation.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::thread;
use std::time::Duration;

use trueno_results::cache::{CacheState, CacheVariant, PrecomputeOutcome, TrajectoryRequest};
use trueno_results::codec::Resolution;
use trueno_results::experiment::{FrameResult, MatchScore};
use trueno_results::ResultEngine;

fn engine(root: &Path) -> ResultEngine {
    ResultEngine::builder(root).build().unwrap()
}

#[allow(clippy::cast_precision_loss)]
fn seed_run(engine: &ResultEngine, experiment_id: &str, algorithm_key: &str, frames: u64) {
    for id in 0..frames {
        let matches = (0..120u32)
            .map(|m| {
                let score = f64::from((m * 31 + u32::try_from(id % 89).unwrap()) % 100) / 100.0;
                MatchScore::new(score, score > 0.35)
            })
            .collect();
        let frame = FrameResult::new(id)
            .with_timestamp(id as f64 * 0.05)
            .with_matches(matches)
            .with_estimated_translation([0.1, 0.0, 0.01])
            .with_ground_truth_translation([0.1 * (id + 1) as f64, 0.0, 0.0]);
        engine
            .save_frame_result(experiment_id, algorithm_key, id, &frame)
            .unwrap();
    }
}

fn snapshot(dir: &Path) -> BTreeMap<String, Vec<u8>> {
    let mut files = BTreeMap::new();
    for sub in ["trajectories", "pr_curves"] {
        let path = dir.join("experiments/e1").join(sub);
        for entry in fs::read_dir(&path).unwrap().flatten() {
            let name = entry.file_name().to_string_lossy().to_string();
            if !name.starts_with('.') && entry.path().is_file() {
                files.insert(format!("{sub}/{name}"), fs::read(entry.path()).unwrap());
            }
        }
    }
    files
}

#[test]
fn test_precompute_twice_changes_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let engine = engine(dir.path());
    seed_run(&engine, "e1", "orb", 60);

    let first = engine.cache().precompute_experiment("e1", false).unwrap();
    assert_eq!(first[0].pr_curve, PrecomputeOutcome::Computed);
    assert_eq!(first[0].trajectory, PrecomputeOutcome::Computed);
    let before = snapshot(dir.path());
    assert!(before.contains_key("pr_curves/orb.json.gz"));
    assert!(before.contains_key("trajectories/orb.ui.arrow"));

    let second = engine.cache().precompute_experiment("e1", false).unwrap();
    assert_eq!(second[0].pr_curve, PrecomputeOutcome::AlreadyPresent);
    assert_eq!(second[0].trajectory, PrecomputeOutcome::AlreadyPresent);
    assert_eq!(snapshot(dir.path()), before);
}

#[test]
fn test_forced_precompute_rebuilds_identical_canonical_copies() {
    let dir = tempfile::tempdir().unwrap();
    let engine = engine(dir.path());
    seed_run(&engine, "e1", "orb", 40);

    engine.cache().precompute_experiment("e1", false).unwrap();
    let before = snapshot(dir.path());
    engine.cache().precompute_experiment("e1", true).unwrap();
    let after = snapshot(dir.path());

    for name in ["pr_curves/orb.json.gz", "trajectories/orb.json.gz"] {
        assert_eq!(before[name], after[name], "{name} changed on rebuild");
    }
    let full_before = engine.results().get_pr_curve("e1", "orb", Resolution::Full).unwrap();
    assert!(full_before.is_some());
}

#[test]
fn test_read_miss_computes_and_persists() {
    let dir = tempfile::tempdir().unwrap();
    let engine = engine(dir.path());
    seed_run(&engine, "e1", "orb", 25);
    assert!(!engine.results().has_trajectory("e1", "orb").unwrap());

    let data = engine
        .cache()
        .get_trajectory("e1", "orb", TrajectoryRequest::full())
        .unwrap()
        .unwrap();
    assert_eq!(data.len(), 25);
    assert_eq!(data.ground_truth.len(), 25);
    // Ground truth present: no reference line even when asked for
    assert!(data.reference.is_empty());
    assert!(data.ate.rmse >= 0.0);
    assert!(engine.results().has_trajectory("e1", "orb").unwrap());
    assert!(engine.manifests().load_manifest("e1", "orb").unwrap().is_some());
}

#[test]
fn test_concurrent_readers_get_the_same_value() {
    let dir = tempfile::tempdir().unwrap();
    let engine = engine(dir.path());
    seed_run(&engine, "e1", "orb", 80);

    let curves: Vec<_> = thread::scope(|s| {
        let handles: Vec<_> = (0..6)
            .map(|_| s.spawn(|| engine.cache().get_pr_curve("e1", "orb", Resolution::Ui).unwrap().unwrap()))
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    for curve in &curves[1..] {
        assert!(std::sync::Arc::ptr_eq(&curves[0], curve));
    }
    // One canonical save plus no rewrites: at most the initial write, no backups
    let key = "experiments/e1/pr_curves/orb";
    assert!(engine.storage().backups(key).unwrap().is_empty());
}

#[test]
fn test_frame_saves_rebuild_persisted_artifacts() {
    let dir = tempfile::tempdir().unwrap();
    let engine = engine(dir.path());
    seed_run(&engine, "e1", "orb", 1);

    let before = engine.cache().get_pr_curve("e1", "orb", Resolution::Full).unwrap().unwrap();
    let path_before = engine
        .cache()
        .get_trajectory("e1", "orb", TrajectoryRequest::full())
        .unwrap()
        .unwrap();
    assert!(engine.results().has_pr_curve("e1", "orb").unwrap());
    assert_eq!(path_before.len(), 1);

    for id in 1..10 {
        let frame = FrameResult::new(id)
            .with_timestamp(f64::from(u32::try_from(id).unwrap()) * 0.05)
            .with_matches((0..60).map(|m| MatchScore::new(f64::from(m) / 60.0, m % 3 == 0)).collect())
            .with_estimated_translation([0.1, 0.0, 0.0]);
        engine.save_frame_result("e1", "orb", id, &frame).unwrap();
    }

    let after = engine.cache().get_pr_curve("e1", "orb", Resolution::Full).unwrap().unwrap();
    assert!(after.num_samples > before.num_samples);
    let path_after = engine
        .cache()
        .get_trajectory("e1", "orb", TrajectoryRequest::full())
        .unwrap()
        .unwrap();
    assert_eq!(path_after.len(), 10);
}

#[test]
fn test_mixed_resolution_readers_persist_once() {
    let dir = tempfile::tempdir().unwrap();
    let engine = engine(dir.path());
    seed_run(&engine, "e1", "orb", 40);

    thread::scope(|s| {
        for i in 0..8 {
            let engine = &engine;
            let resolution = if i % 2 == 0 { Resolution::Full } else { Resolution::Ui };
            s.spawn(move || {
                engine.cache().get_pr_curve("e1", "orb", resolution).unwrap().unwrap();
                let request = TrajectoryRequest::full();
                let request = if i % 2 == 0 { request } else { TrajectoryRequest::ui() };
                engine.cache().get_trajectory("e1", "orb", request).unwrap().unwrap();
            });
        }
    });

    // A second save of either artifact would have left a backup behind
    for key in ["experiments/e1/pr_curves/orb", "experiments/e1/trajectories/orb"] {
        assert!(engine.storage().backups(key).unwrap().is_empty(), "{key} persisted twice");
    }
}

#[test]
fn test_write_through_invalidation_and_ttl() {
    let dir = tempfile::tempdir().unwrap();
    let expiring = ResultEngine::builder(dir.path())
        .cache_ttl(Duration::ZERO)
        .build()
        .unwrap();
    seed_run(&expiring, "e1", "orb", 10);

    let variant = CacheVariant::PrCurve(Resolution::Ui);
    expiring.cache().get_pr_curve("e1", "orb", Resolution::Ui).unwrap();
    assert_eq!(expiring.cache().cache_state("e1", "orb", variant), CacheState::Expired);

    let fresh = tempfile::tempdir().unwrap();
    let engine = engine(fresh.path());
    seed_run(&engine, "e1", "orb", 10);
    engine.cache().get_pr_curve("e1", "orb", Resolution::Ui).unwrap();
    assert!(matches!(
        engine.cache().cache_state("e1", "orb", variant),
        CacheState::Cached { .. }
    ));
    engine.save_frame_result("e1", "orb", 10, &FrameResult::new(10)).unwrap();
    assert_eq!(engine.cache().cache_state("e1", "orb", variant), CacheState::Missing);
}

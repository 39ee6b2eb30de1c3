//! Trajectory <-> columns
//!
//! Columns: `x, y, z, t, frame_id, has_pose_estimate` for the estimate,
//! `gt_*` for ground truth and `ref_*` for the reference line (only when
//! non-empty). Coordinates are `Float32`.

use super::{meta_f64, Column, ColumnarFrame, Metadata, Resolution, SeriesMap};
use crate::experiment::{ErrorStats, TrajectoryData, TrajectoryPoint};
use crate::{Error, Result};

const STAT_NAMES: [&str; 6] = ["rmse", "mean", "median", "std", "min", "max"];

/// Map a trajectory onto columns and metadata.
#[must_use]
pub fn encode(data: &TrajectoryData, resolution: Resolution) -> (SeriesMap, Metadata) {
    let mut series = SeriesMap::new();
    put_series(&mut series, "", &data.points, true);
    if !data.ground_truth.is_empty() {
        put_series(&mut series, "gt_", &data.ground_truth, false);
    }
    if !data.reference.is_empty() {
        put_series(&mut series, "ref_", &data.reference, false);
    }

    let mut metadata = Metadata::new();
    metadata.insert("version".to_string(), resolution.as_str().to_string());
    metadata.insert("points".to_string(), data.points.len().to_string());
    metadata.insert("original_points".to_string(), data.original_points.to_string());
    metadata.insert("downsampled".to_string(), data.downsampled.to_string());
    meta_f64(&mut metadata, "path_length", data.path_length);
    meta_f64(&mut metadata, "gt_path_length", data.ground_truth_path_length);
    put_stats(&mut metadata, "ate", &data.ate);
    put_stats(&mut metadata, "rpe", &data.rpe);
    (series, metadata)
}

/// Rebuild a trajectory from columns and metadata.
///
/// # Errors
///
/// Returns `Error::Codec` if a required column is missing, series lengths
/// disagree, or a frame id is negative.
pub fn decode(frame: &ColumnarFrame) -> Result<TrajectoryData> {
    let points = take_series(frame, "", true)?;
    let ground_truth = take_series(frame, "gt_", false)?;
    let reference = take_series(frame, "ref_", false)?;

    Ok(TrajectoryData {
        original_points: frame.meta_parse("original_points").unwrap_or(points.len()),
        downsampled: frame.meta_parse("downsampled").unwrap_or(false),
        path_length: frame.meta_parse("path_length").unwrap_or_default(),
        ground_truth_path_length: frame.meta_parse("gt_path_length").unwrap_or_default(),
        ate: take_stats(frame, "ate"),
        rpe: take_stats(frame, "rpe"),
        points,
        ground_truth,
        reference,
    })
}

#[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
fn put_series(series: &mut SeriesMap, prefix: &str, points: &[TrajectoryPoint], with_flags: bool) {
    let coord = |f: fn(&TrajectoryPoint) -> f64| Column::Float32(points.iter().map(|p| f(p) as f32).collect());
    series.insert(format!("{prefix}x"), coord(|p| p.x));
    series.insert(format!("{prefix}y"), coord(|p| p.y));
    series.insert(format!("{prefix}z"), coord(|p| p.z));
    series.insert(
        format!("{prefix}t"),
        Column::Float64(points.iter().map(|p| p.timestamp).collect()),
    );
    series.insert(
        format!("{prefix}frame_id"),
        Column::Int64(points.iter().map(|p| p.frame_id as i64).collect()),
    );
    if with_flags {
        series.insert(
            format!("{prefix}has_pose_estimate"),
            Column::Bool(points.iter().map(|p| p.has_pose_estimate).collect()),
        );
    }
}

fn take_series(frame: &ColumnarFrame, prefix: &str, required: bool) -> Result<Vec<TrajectoryPoint>> {
    let x_name = format!("{prefix}x");
    if !required && !frame.columns.contains_key(&x_name) {
        return Ok(Vec::new());
    }
    let x = frame.f64_column(&x_name)?;
    let y = frame.f64_column(&format!("{prefix}y"))?;
    let z = frame.f64_column(&format!("{prefix}z"))?;
    let t = frame.f64_column(&format!("{prefix}t"))?;
    let ids = frame
        .columns
        .get(&format!("{prefix}frame_id"))
        .and_then(Column::as_i64)
        .ok_or_else(|| Error::Codec(format!("missing column '{prefix}frame_id'")))?;
    let flags = frame
        .columns
        .get(&format!("{prefix}has_pose_estimate"))
        .and_then(Column::as_bool);

    let n = x.len();
    if [y.len(), z.len(), t.len(), ids.len()].iter().any(|&len| len != n)
        || flags.is_some_and(|f| f.len() != n)
    {
        return Err(Error::Codec(format!("trajectory series '{prefix}' has ragged columns")));
    }

    (0..n)
        .map(|i| {
            let frame_id = u64::try_from(ids[i])
                .map_err(|_| Error::Codec(format!("negative frame id {}", ids[i])))?;
            let mut point = TrajectoryPoint::new(frame_id, t[i], [x[i], y[i], z[i]]);
            point.has_pose_estimate = flags.map_or(true, |f| f[i]);
            Ok(point)
        })
        .collect()
}

fn put_stats(metadata: &mut Metadata, prefix: &str, stats: &ErrorStats) {
    let values = [stats.rmse, stats.mean, stats.median, stats.std, stats.min, stats.max];
    for (name, value) in STAT_NAMES.iter().zip(values) {
        meta_f64(metadata, &format!("{prefix}_{name}"), value);
    }
}

fn take_stats(frame: &ColumnarFrame, prefix: &str) -> ErrorStats {
    let get = |name: &str| -> f64 {
        frame
            .meta_parse(&format!("{prefix}_{name}"))
            .unwrap_or_default()
    };
    ErrorStats {
        rmse: get("rmse"),
        mean: get("mean"),
        median: get("median"),
        std: get("std"),
        min: get("min"),
        max: get("max"),
    }
}

//! PR curve <-> columns
//!
//! Columns: `precision, recall, f1` as `Float32`, `threshold` as `Float64`,
//! plus `raw_precision, raw_recall, raw_threshold` when the curve still
//! carries its raw series (full resolution only).

use super::{meta_f64, Column, ColumnarFrame, Metadata, Resolution, SeriesMap};
use crate::experiment::{OperatingPoint, PrCurveData};
use crate::Result;

/// Map a PR curve onto columns and metadata.
#[must_use]
pub fn encode(curve: &PrCurveData, resolution: Resolution) -> (SeriesMap, Metadata) {
    let mut series = SeriesMap::new();
    series.insert("precision".to_string(), f32_column(&curve.precision));
    series.insert("recall".to_string(), f32_column(&curve.recall));
    series.insert("f1".to_string(), f32_column(&curve.f1_scores));
    series.insert("threshold".to_string(), Column::Float64(curve.thresholds.clone()));
    if resolution == Resolution::Full && !curve.raw_recall.is_empty() {
        series.insert("raw_precision".to_string(), f32_column(&curve.raw_precision));
        series.insert("raw_recall".to_string(), f32_column(&curve.raw_recall));
        series.insert(
            "raw_threshold".to_string(),
            Column::Float64(curve.raw_thresholds.clone()),
        );
    }

    let mut metadata = Metadata::new();
    metadata.insert("version".to_string(), resolution.as_str().to_string());
    metadata.insert("points".to_string(), curve.len().to_string());
    meta_f64(&mut metadata, "auc", curve.auc);
    if let Some(best) = curve.optimal {
        meta_f64(&mut metadata, "optimal_threshold", best.threshold);
        meta_f64(&mut metadata, "optimal_precision", best.precision);
        meta_f64(&mut metadata, "optimal_recall", best.recall);
        meta_f64(&mut metadata, "optimal_f1", best.f1);
    }
    metadata.insert("num_samples".to_string(), curve.num_samples.to_string());
    metadata.insert("num_positives".to_string(), curve.num_positives.to_string());
    metadata.insert("original_points".to_string(), curve.original_points.to_string());
    metadata.insert("downsampled".to_string(), curve.downsampled.to_string());
    (series, metadata)
}

/// Rebuild a PR curve from columns and metadata.
///
/// # Errors
///
/// Returns `Error::Codec` if a main-series column is missing.
pub fn decode(frame: &ColumnarFrame) -> Result<PrCurveData> {
    let precision = frame.f64_column("precision")?;
    let recall = frame.f64_column("recall")?;
    let thresholds = frame.f64_column("threshold")?;
    let f1_scores = frame.optional_f64_column("f1")?;

    let optimal = match (
        frame.meta_parse("optimal_threshold"),
        frame.meta_parse("optimal_precision"),
        frame.meta_parse("optimal_recall"),
        frame.meta_parse("optimal_f1"),
    ) {
        (Some(threshold), Some(precision), Some(recall), Some(f1)) => Some(OperatingPoint {
            threshold,
            precision,
            recall,
            f1,
        }),
        _ => None,
    };

    Ok(PrCurveData {
        auc: frame.meta_parse("auc").unwrap_or_default(),
        optimal,
        raw_precision: frame.optional_f64_column("raw_precision")?,
        raw_recall: frame.optional_f64_column("raw_recall")?,
        raw_thresholds: frame.optional_f64_column("raw_threshold")?,
        num_samples: frame.meta_parse("num_samples").unwrap_or_default(),
        num_positives: frame.meta_parse("num_positives").unwrap_or_default(),
        original_points: frame.meta_parse("original_points").unwrap_or(recall.len()),
        downsampled: frame.meta_parse("downsampled").unwrap_or(false),
        precision,
        recall,
        thresholds,
        f1_scores,
    })
}

#[allow(clippy::cast_possible_truncation)]
fn f32_column(values: &[f64]) -> Column {
    Column::Float32(values.iter().map(|v| *v as f32).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compute::PrCurveBuilder;
    use crate::experiment::MatchScore;

    fn curve() -> PrCurveData {
        let samples: Vec<MatchScore> = (0..40)
            .map(|i| MatchScore::new(f64::from(i) / 40.0, i % 4 != 0))
            .collect();
        PrCurveBuilder::new().build_from_samples(&samples).unwrap()
    }

    #[test]
    fn test_raw_columns_only_at_full() {
        let data = curve();
        let (full, _) = encode(&data, Resolution::Full);
        let (ui, ui_meta) = encode(&data.ui_view(500), Resolution::Ui);
        assert!(full.contains_key("raw_recall"));
        assert!(!ui.contains_key("raw_recall"));
        assert_eq!(ui_meta["version"], "ui");
    }

    #[test]
    fn test_decode_within_f32_precision() {
        let data = curve();
        let (columns, metadata) = encode(&data, Resolution::Full);
        let decoded = decode(&ColumnarFrame { columns, metadata }).unwrap();

        assert_eq!(decoded.len(), data.len());
        assert_eq!(decoded.thresholds, data.thresholds);
        for (a, b) in decoded.precision.iter().zip(&data.precision) {
            assert!((a - b).abs() < 1e-6);
        }
        assert_eq!(decoded.optimal, data.optimal);
        assert_eq!(decoded.num_positives, data.num_positives);
        assert!((decoded.auc - data.auc).abs() < f64::EPSILON);
        assert_eq!(decoded.raw_thresholds, data.raw_thresholds);
    }

    #[test]
    fn test_decode_requires_main_series() {
        let frame = ColumnarFrame::default();
        assert!(decode(&frame).is_err());
    }
}

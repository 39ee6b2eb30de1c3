//! Precision-recall curve records

use serde::{Deserialize, Serialize};

use crate::compute::downsample;

/// A point on a PR curve together with its F1 score.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OperatingPoint {
    /// Score threshold.
    pub threshold: f64,
    /// Precision at the threshold.
    pub precision: f64,
    /// Recall at the threshold.
    pub recall: f64,
    /// Harmonic mean of precision and recall.
    pub f1: f64,
}

/// F1 score, 0 when both inputs are 0.
#[must_use]
pub fn f1_score(precision: f64, recall: f64) -> f64 {
    let sum = precision + recall;
    if sum > 0.0 {
        2.0 * precision * recall / sum
    } else {
        0.0
    }
}

/// Precision-recall curve of one algorithm run.
///
/// The main series is sorted by ascending recall with non-increasing
/// precision. `raw_*` hold the curve before monotonization and
/// downsampling and are only present at full resolution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrCurveData {
    /// Precision values.
    pub precision: Vec<f64>,
    /// Recall values, ascending.
    pub recall: Vec<f64>,
    /// Score thresholds.
    pub thresholds: Vec<f64>,
    /// F1 per point.
    pub f1_scores: Vec<f64>,
    /// Area under the raw curve.
    #[serde(default)]
    pub auc: f64,
    /// Best-F1 point of the main series.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub optimal: Option<OperatingPoint>,
    /// Precision before monotonization.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub raw_precision: Vec<f64>,
    /// Recall before monotonization.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub raw_recall: Vec<f64>,
    /// Thresholds before monotonization.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub raw_thresholds: Vec<f64>,
    /// Match samples the curve was built from.
    #[serde(default)]
    pub num_samples: usize,
    /// Inliers among the samples.
    #[serde(default)]
    pub num_positives: usize,
    /// Point count before downsampling.
    #[serde(default)]
    pub original_points: usize,
    /// Whether the main series is a reduced copy.
    #[serde(default)]
    pub downsampled: bool,
}

impl PrCurveData {
    /// Number of points in the main series.
    #[must_use]
    pub fn len(&self) -> usize {
        self.recall.len()
    }

    /// True if the main series is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.recall.is_empty()
    }

    /// Whether precision never increases along the main series.
    #[must_use]
    pub fn is_monotonic(&self) -> bool {
        self.precision.windows(2).all(|w| w[0] >= w[1])
    }

    /// Best-F1 point of the given series; ties keep the first.
    #[must_use]
    pub fn best_operating_point(
        precision: &[f64],
        recall: &[f64],
        thresholds: &[f64],
    ) -> Option<OperatingPoint> {
        let mut best: Option<OperatingPoint> = None;
        for ((&p, &r), &t) in precision.iter().zip(recall).zip(thresholds) {
            let f1 = f1_score(p, r);
            if best.map_or(true, |b| f1 > b.f1) {
                best = Some(OperatingPoint {
                    threshold: t,
                    precision: p,
                    recall: r,
                    f1,
                });
            }
        }
        best
    }

    /// UI variant: main series reduced to at most `cap` points, raw series dropped.
    #[must_use]
    pub fn ui_view(&self, cap: usize) -> Self {
        let idx = downsample::uniform_indices(self.len(), cap);
        let precision = downsample::select(&self.precision, &idx);
        let recall = downsample::select(&self.recall, &idx);
        let thresholds = downsample::select(&self.thresholds, &idx);
        let f1_scores = downsample::select(&self.f1_scores, &idx);
        let optimal = Self::best_operating_point(&precision, &recall, &thresholds);
        Self {
            precision,
            recall,
            thresholds,
            f1_scores,
            auc: self.auc,
            optimal,
            raw_precision: Vec::new(),
            raw_recall: Vec::new(),
            raw_thresholds: Vec::new(),
            num_samples: self.num_samples,
            num_positives: self.num_positives,
            original_points: self.original_points.max(self.len()),
            downsampled: self.downsampled || self.len() > cap,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[allow(clippy::cast_precision_loss)]
    fn curve(n: usize) -> PrCurveData {
        let recall: Vec<f64> = (0..n).map(|i| i as f64 / n as f64).collect();
        let precision: Vec<f64> = (0..n).map(|i| 1.0 - i as f64 / (2 * n) as f64).collect();
        let thresholds: Vec<f64> = (0..n).map(|i| 1.0 - i as f64 / n as f64).collect();
        let f1_scores = precision.iter().zip(&recall).map(|(p, r)| f1_score(*p, *r)).collect();
        PrCurveData {
            optimal: PrCurveData::best_operating_point(&precision, &recall, &thresholds),
            raw_precision: precision.clone(),
            raw_recall: recall.clone(),
            raw_thresholds: thresholds.clone(),
            precision,
            recall,
            thresholds,
            f1_scores,
            auc: 0.7,
            num_samples: n,
            num_positives: n / 2,
            original_points: n,
            downsampled: false,
        }
    }

    #[test]
    fn test_f1_zero_guard() {
        assert!(f1_score(0.0, 0.0).abs() < f64::EPSILON);
        assert!((f1_score(1.0, 1.0) - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_best_operating_point() {
        let best = PrCurveData::best_operating_point(&[1.0, 0.8, 0.5], &[0.1, 0.7, 0.9], &[0.9, 0.5, 0.1])
            .unwrap();
        assert!((best.threshold - 0.5).abs() < f64::EPSILON);
        assert!(PrCurveData::best_operating_point(&[], &[], &[]).is_none());
    }

    #[test]
    fn test_ui_view_drops_raw_and_caps() {
        let full = curve(800);
        let ui = full.ui_view(500);
        assert_eq!(ui.len(), 500);
        assert!(ui.raw_precision.is_empty());
        assert_eq!(ui.original_points, 800);
        assert!(ui.downsampled);
        assert!(ui.is_monotonic());
        assert!(ui.optimal.is_some());
    }

    #[test]
    fn test_raw_series_omitted_from_json_when_empty() {
        let ui = curve(3).ui_view(500);
        let json = serde_json::to_value(&ui).unwrap();
        assert!(json.get("raw_precision").is_none());
        assert_eq!(json["recall"].as_array().unwrap().len(), 3);
    }
}

//! Evaluation - ROC-AUC and confusion matrix against ground truth
//!
//! ROC-AUC ranks raw scores, so it is independent of any cutoff and is
//! computed before threshold selection.

use serde::{Deserialize, Serialize};

use crate::error::{DetectorError, DetectorResult};
use crate::logic::features::Label;

/// Area under the ROC curve via the Mann-Whitney U statistic.
///
/// Tied scores receive their average rank, so a constant scorer gets 0.5.
/// Errors when the lengths differ or either class is missing.
pub fn roc_auc(scores: &[f32], labels: &[Label]) -> DetectorResult<f32> {
    if scores.len() != labels.len() {
        return Err(DetectorError::Evaluation(format!(
            "{} scores but {} labels",
            scores.len(),
            labels.len()
        )));
    }
    if scores.iter().any(|s| !s.is_finite()) {
        return Err(DetectorError::Evaluation("Scores contain NaN/Inf".into()));
    }
    let positives = labels.iter().filter(|l| l.is_anomaly()).count();
    let negatives = labels.len() - positives;
    if positives == 0 || negatives == 0 {
        return Err(DetectorError::Evaluation(format!(
            "ROC-AUC needs both classes (normal: {}, anomaly: {})",
            negatives, positives
        )));
    }

    let mut order: Vec<usize> = (0..scores.len()).collect();
    order.sort_by(|&a, &b| scores[a].total_cmp(&scores[b]));

    // Sum of 1-based average ranks of the positive class
    let mut rank_sum = 0.0f64;
    let mut i = 0;
    while i < order.len() {
        let mut j = i;
        while j + 1 < order.len() && scores[order[j + 1]] == scores[order[i]] {
            j += 1;
        }
        let avg_rank = (i + j) as f64 / 2.0 + 1.0;
        for &idx in &order[i..=j] {
            if labels[idx].is_anomaly() {
                rank_sum += avg_rank;
            }
        }
        i = j + 1;
    }

    let (p, n) = (positives as f64, negatives as f64);
    let u = rank_sum - p * (p + 1.0) / 2.0;
    Ok((u / (p * n)) as f32)
}

// ============================================================================
// CONFUSION MATRIX
// ============================================================================

/// Binary confusion counts; ANOMALY is the positive class
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ConfusionMatrix {
    pub tn: usize,
    pub fp: usize,
    #[serde(rename = "fn")]
    pub fn_: usize,
    pub tp: usize,
}

impl ConfusionMatrix {
    pub fn from_predictions(predictions: &[Label], truth: &[Label]) -> DetectorResult<Self> {
        if predictions.len() != truth.len() {
            return Err(DetectorError::Evaluation(format!(
                "{} predictions but {} labels",
                predictions.len(),
                truth.len()
            )));
        }
        let mut cm = Self::default();
        for (&pred, &actual) in predictions.iter().zip(truth) {
            match (actual, pred) {
                (Label::Normal, Label::Normal) => cm.tn += 1,
                (Label::Normal, Label::Anomaly) => cm.fp += 1,
                (Label::Anomaly, Label::Normal) => cm.fn_ += 1,
                (Label::Anomaly, Label::Anomaly) => cm.tp += 1,
            }
        }
        Ok(cm)
    }

    pub fn total(&self) -> usize {
        self.tn + self.fp + self.fn_ + self.tp
    }

    /// `[[tn, fp], [fn, tp]]`
    pub fn as_matrix(&self) -> [[usize; 2]; 2] {
        [[self.tn, self.fp], [self.fn_, self.tp]]
    }

    pub fn accuracy(&self) -> f32 {
        ratio(self.tn + self.tp, self.total())
    }

    pub fn precision(&self) -> f32 {
        ratio(self.tp, self.tp + self.fp)
    }

    pub fn recall(&self) -> f32 {
        ratio(self.tp, self.tp + self.fn_)
    }

    pub fn f1(&self) -> f32 {
        let (p, r) = (self.precision(), self.recall());
        if p + r == 0.0 {
            0.0
        } else {
            2.0 * p * r / (p + r)
        }
    }
}

fn ratio(num: usize, den: usize) -> f32 {
    if den == 0 {
        0.0
    } else {
        num as f32 / den as f32
    }
}

/// Exported confusion matrix document (`confusion_matrix.json`)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfusionExport {
    pub confusion_matrix: [[usize; 2]; 2],
    pub tn: usize,
    pub fp: usize,
    #[serde(rename = "fn")]
    pub fn_: usize,
    pub tp: usize,
}

impl From<ConfusionMatrix> for ConfusionExport {
    fn from(cm: ConfusionMatrix) -> Self {
        Self {
            confusion_matrix: cm.as_matrix(),
            tn: cm.tn,
            fp: cm.fp,
            fn_: cm.fn_,
            tp: cm.tp,
        }
    }
}

// ============================================================================
// EVALUATION
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evaluation {
    /// `None` when the ground truth holds a single class
    #[serde(default)]
    pub roc_auc: Option<f32>,
    pub confusion: ConfusionMatrix,
}

/// ROC-AUC on the raw scores plus the confusion matrix of the thresholded
/// predictions. A single-class batch still gets its confusion matrix.
pub fn evaluate(raw_scores: &[f32], predictions: &[Label], truth: &[Label]) -> DetectorResult<Evaluation> {
    let confusion = ConfusionMatrix::from_predictions(predictions, truth)?;
    let anomalies = truth.iter().filter(|l| l.is_anomaly()).count();
    let roc_auc = if anomalies == 0 || anomalies == truth.len() {
        log::warn!(
            "Ground truth has a single class ({} records, {} anomalies), ROC-AUC undefined",
            truth.len(),
            anomalies
        );
        None
    } else {
        Some(roc_auc(raw_scores, truth)?)
    };
    Ok(Evaluation { roc_auc, confusion })
}

//! Inference - score, calibrate and label a batch
//!
//! The cutoff is selected on the normalized scores and every record with
//! `normalized >= cutoff` becomes ANOMALY. ROC-AUC ranks the raw scores, so
//! it does not depend on the cutoff.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::checkpoint::Checkpoint;
use super::evaluate::{evaluate, Evaluation};
use super::scorer::Scorer;
use super::threshold::{classify, Normalizer, ThresholdStrategy};
use crate::error::{DetectorError, DetectorResult};
use crate::logic::features::{FeatureVector, Label};

// ============================================================================
// DATA STRUCTURES
// ============================================================================

/// Per-record output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredRecord {
    pub index: usize,
    pub raw_score: f32,
    pub normalized_score: f32,
    pub label: Label,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ground_truth: Option<Label>,
}

/// Batch-level aggregates
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct BatchSummary {
    pub total: usize,
    pub normal_count: usize,
    pub anomaly_count: usize,
    pub normal_percentage: f32,
    pub attack_percentage: f32,
    /// Cutoff on the normalized scale (`None` for an empty batch)
    pub threshold: Option<f32>,
    pub strategy: String,
    pub mean_latency_ms: f32,
}

impl BatchSummary {
    pub fn from_labels(labels: &[Label], threshold: Option<f32>, strategy: &str, mean_latency_ms: f32) -> Self {
        let total = labels.len();
        let anomaly_count = labels.iter().filter(|l| l.is_anomaly()).count();
        let normal_count = total - anomaly_count;
        let pct = |n: usize| if total == 0 { 0.0 } else { n as f32 * 100.0 / total as f32 };

        Self {
            total,
            normal_count,
            anomaly_count,
            normal_percentage: pct(normal_count),
            attack_percentage: pct(anomaly_count),
            threshold,
            strategy: strategy.to_string(),
            mean_latency_ms,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InferenceReport {
    pub checkpoint_version: Uuid,
    pub records: Vec<ScoredRecord>,
    pub summary: BatchSummary,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evaluation: Option<Evaluation>,
}

impl InferenceReport {
    pub fn labels(&self) -> Vec<Label> {
        self.records.iter().map(|r| r.label).collect()
    }
}

/// Normalizer to use for a checkpoint: its stored reference range when
/// asked for and present, batch min-max otherwise.
pub fn normalizer_for(checkpoint: &Checkpoint, use_reference: bool) -> Normalizer {
    match (use_reference, checkpoint.score_range) {
        (true, Some(range)) => Normalizer::Reference(range),
        (true, None) => {
            log::warn!(
                "Checkpoint {} has no reference score range, using batch min-max",
                checkpoint.version
            );
            Normalizer::BatchMinMax
        }
        (false, _) => Normalizer::BatchMinMax,
    }
}

// ============================================================================
// PIPELINE
// ============================================================================

/// Score, normalize, threshold and (with ground truth) evaluate a batch
pub fn detect(
    scorer: &Scorer,
    batch: &[FeatureVector],
    ground_truth: Option<&[Label]>,
    normalizer: &Normalizer,
    strategy: &dyn ThresholdStrategy,
) -> DetectorResult<InferenceReport> {
    if let Some(truth) = ground_truth {
        if truth.len() != batch.len() {
            return Err(DetectorError::Evaluation(format!(
                "{} records but {} labels",
                batch.len(),
                truth.len()
            )));
        }
    }

    let scored = scorer.score_batch(batch);
    if batch.is_empty() {
        return Ok(InferenceReport {
            checkpoint_version: scored.checkpoint_version,
            records: Vec::new(),
            summary: BatchSummary::from_labels(&[], None, strategy.name(), 0.0),
            evaluation: None,
        });
    }

    let normalized = normalizer.normalize(&scored.raw_scores);
    let cutoff = strategy.select(&normalized, ground_truth)?;
    let labels = classify(&normalized, cutoff);

    let evaluation = ground_truth
        .map(|truth| evaluate(&scored.raw_scores, &labels, truth))
        .transpose()?;

    let records = scored
        .raw_scores
        .iter()
        .zip(&normalized)
        .zip(&labels)
        .enumerate()
        .map(|(index, ((&raw_score, &normalized_score), &label))| ScoredRecord {
            index,
            raw_score,
            normalized_score,
            label,
            ground_truth: ground_truth.map(|t| t[index]),
        })
        .collect();

    let summary = BatchSummary::from_labels(&labels, Some(cutoff), strategy.name(), scored.mean_latency_ms);
    log::info!(
        "Scored {} records: {} anomalies ({:.1}%) at cutoff {:.4} [{}]",
        summary.total,
        summary.anomaly_count,
        summary.attack_percentage,
        cutoff,
        summary.strategy
    );

    Ok(InferenceReport {
        checkpoint_version: scored.checkpoint_version,
        records,
        summary,
        evaluation,
    })
}

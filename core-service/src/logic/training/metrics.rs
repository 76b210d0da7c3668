//! Epoch metrics history and its exported views
//!
//! The history is append-only. "Best" is never stored on its own: it is a
//! fold over the history (first epoch reaching the maximum ROC-AUC).

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{DetectorError, DetectorResult};
use crate::logic::model::ConfusionMatrix;
use crate::logic::storage;

/// One row of the run history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpochMetrics {
    /// 1-based
    pub epoch: usize,
    /// Mean discriminator loss over the epoch's batches
    pub d_loss: f32,
    /// Mean generator loss over the batches that updated the generator
    pub g_loss: f32,
    pub roc_auc: f32,
    /// Mean validation inference latency per record
    pub latency_ms: f32,
    /// Mean validation inference time per batch
    pub runtime_ms: f32,
    /// Discriminator re-initialisations during the epoch
    #[serde(default)]
    pub collapses: usize,
    /// Validation confusion matrix at the validation percentile
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confusion: Option<ConfusionMatrix>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricsHistory {
    epochs: Vec<EpochMetrics>,
}

impl MetricsHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append the next epoch; epochs must be strictly increasing
    pub fn push(&mut self, metrics: EpochMetrics) -> DetectorResult<()> {
        if let Some(last) = self.epochs.last() {
            if metrics.epoch <= last.epoch {
                return Err(DetectorError::Evaluation(format!(
                    "Epoch {} appended after epoch {}",
                    metrics.epoch, last.epoch
                )));
            }
        }
        self.epochs.push(metrics);
        Ok(())
    }

    pub fn epochs(&self) -> &[EpochMetrics] {
        &self.epochs
    }

    pub fn len(&self) -> usize {
        self.epochs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.epochs.is_empty()
    }

    pub fn last(&self) -> Option<&EpochMetrics> {
        self.epochs.last()
    }

    /// argmax over ROC-AUC; ties keep the earliest epoch
    pub fn best(&self) -> Option<&EpochMetrics> {
        self.epochs.iter().fold(None, |best: Option<&EpochMetrics>, m| match best {
            Some(b) if b.roc_auc >= m.roc_auc => Some(b),
            _ => Some(m),
        })
    }

    pub fn max_roc(&self) -> Option<f32> {
        self.best().map(|m| m.roc_auc)
    }

    pub fn roc_history(&self) -> Vec<f32> {
        self.epochs.iter().map(|m| m.roc_auc).collect()
    }

    pub fn save(&self, path: &Path) -> DetectorResult<()> {
        storage::save_json(self, path)
    }

    pub fn load(path: &Path) -> DetectorResult<Self> {
        storage::load_json(path)
    }
}

/// Read-only metrics snapshot for reporting
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsExport {
    /// Best validation ROC-AUC over the run
    pub roc_auc: f32,
    pub avg_runtime_ms: f32,
    pub max_roc_seen: f32,
    pub roc_history: Vec<f32>,
}

impl MetricsExport {
    /// `None` for an empty history
    pub fn from_history(history: &MetricsHistory) -> Option<Self> {
        let max_roc = history.max_roc()?;
        let avg_runtime_ms =
            history.epochs().iter().map(|m| m.runtime_ms).sum::<f32>() / history.len() as f32;
        Some(Self {
            roc_auc: max_roc,
            avg_runtime_ms,
            max_roc_seen: max_roc,
            roc_history: history.roc_history(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metrics(epoch: usize, roc_auc: f32) -> EpochMetrics {
        EpochMetrics {
            epoch,
            d_loss: 0.7,
            g_loss: 12.0,
            roc_auc,
            latency_ms: 0.5,
            runtime_ms: 4.0 * epoch as f32,
            collapses: 0,
            confusion: None,
        }
    }

    #[test]
    fn test_best_is_first_maximum() {
        let mut history = MetricsHistory::new();
        for (e, roc) in [(1, 0.6), (2, 0.8), (3, 0.8), (4, 0.7)] {
            history.push(metrics(e, roc)).unwrap();
        }
        let best = history.best().unwrap();
        assert_eq!(best.epoch, 2);
        assert_eq!(history.max_roc(), Some(0.8));
    }

    #[test]
    fn test_empty_history() {
        let history = MetricsHistory::new();
        assert!(history.best().is_none());
        assert!(MetricsExport::from_history(&history).is_none());
    }

    #[test]
    fn test_history_is_append_only_in_order() {
        let mut history = MetricsHistory::new();
        history.push(metrics(1, 0.5)).unwrap();
        assert!(history.push(metrics(1, 0.9)).is_err());
        assert_eq!(history.len(), 1);
    }

    #[test]
    fn test_export_reports_best_roc() {
        let mut history = MetricsHistory::new();
        for (e, roc) in [(1, 0.6), (2, 0.9), (3, 0.7)] {
            history.push(metrics(e, roc)).unwrap();
        }
        let export = MetricsExport::from_history(&history).unwrap();
        assert_eq!(export.roc_auc, 0.9);
        assert_eq!(export.max_roc_seen, 0.9);
        assert_eq!(export.roc_history, vec![0.6, 0.9, 0.7]);
        assert!((export.avg_runtime_ms - 8.0).abs() < 1e-6);
    }

    #[test]
    fn test_history_persistence() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history.json");
        let mut history = MetricsHistory::new();
        history.push(metrics(1, 0.55)).unwrap();
        history.save(&path).unwrap();
        assert_eq!(MetricsHistory::load(&path).unwrap(), history);
    }
}

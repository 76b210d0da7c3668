//! Stopping policies
//!
//! Consulted after every validated epoch. The epoch budget from
//! `TrainingConfig` is always an upper bound; a policy can only end a run
//! earlier.

use super::metrics::MetricsHistory;

pub trait StoppingPolicy: Send {
    fn name(&self) -> &'static str;

    fn should_stop(&self, history: &MetricsHistory) -> bool;
}

/// Train for the whole epoch budget
#[derive(Debug, Clone, Copy, Default)]
pub struct FixedEpochs;

impl StoppingPolicy for FixedEpochs {
    fn name(&self) -> &'static str {
        "fixed"
    }

    fn should_stop(&self, _history: &MetricsHistory) -> bool {
        false
    }
}

/// Stop after `patience` epochs without a ROC-AUC improvement larger than
/// `min_delta`
#[derive(Debug, Clone, Copy)]
pub struct Patience {
    pub patience: usize,
    pub min_delta: f32,
}

impl Patience {
    pub fn new(patience: usize) -> Self {
        Self { patience: patience.max(1), min_delta: 0.0 }
    }

    pub fn with_min_delta(mut self, min_delta: f32) -> Self {
        self.min_delta = min_delta.max(0.0);
        self
    }

    /// Epochs since the last counted improvement
    fn stale_epochs(&self, history: &MetricsHistory) -> usize {
        let mut best: Option<(usize, f32)> = None;
        for (i, m) in history.epochs().iter().enumerate() {
            match best {
                Some((_, roc)) if m.roc_auc <= roc + self.min_delta => {}
                _ => best = Some((i, m.roc_auc)),
            }
        }
        match best {
            Some((i, _)) => history.len() - 1 - i,
            None => 0,
        }
    }
}

impl StoppingPolicy for Patience {
    fn name(&self) -> &'static str {
        "patience"
    }

    fn should_stop(&self, history: &MetricsHistory) -> bool {
        self.stale_epochs(history) >= self.patience
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logic::training::metrics::EpochMetrics;

    fn history(rocs: &[f32]) -> MetricsHistory {
        let mut h = MetricsHistory::new();
        for (i, &roc_auc) in rocs.iter().enumerate() {
            h.push(EpochMetrics {
                epoch: i + 1,
                d_loss: 0.5,
                g_loss: 1.0,
                roc_auc,
                latency_ms: 0.1,
                runtime_ms: 1.0,
                collapses: 0,
                confusion: None,
            })
            .unwrap();
        }
        h
    }

    #[test]
    fn test_fixed_never_stops() {
        assert!(!FixedEpochs.should_stop(&history(&[0.9, 0.5, 0.4, 0.3, 0.2])));
    }

    #[test]
    fn test_patience_counts_stale_epochs() {
        let policy = Patience::new(2);
        assert!(!policy.should_stop(&history(&[])));
        assert!(!policy.should_stop(&history(&[0.6, 0.7])));
        assert!(!policy.should_stop(&history(&[0.6, 0.7, 0.65])));
        assert!(policy.should_stop(&history(&[0.6, 0.7, 0.65, 0.69])));
        // A new maximum resets the counter
        assert!(!policy.should_stop(&history(&[0.6, 0.7, 0.65, 0.71])));
    }

    #[test]
    fn test_min_delta_ignores_tiny_gains() {
        let policy = Patience::new(2).with_min_delta(0.05);
        assert!(policy.should_stop(&history(&[0.6, 0.62, 0.64])));
        assert!(!Patience::new(2).should_stop(&history(&[0.6, 0.62, 0.64])));
    }
}

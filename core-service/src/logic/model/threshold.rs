//! Score Calibration - normalization and threshold selection
//!
//! Raw scores are rescaled to [0, 1] (batch min-max by default) and split
//! into NORMAL / ANOMALY by a cutoff: `score >= cutoff` is ANOMALY.
//! Cutoff selection is a pluggable strategy; the default is the 95th
//! percentile of the scored batch.

use serde::{Deserialize, Serialize};

use crate::constants::DEFAULT_PERCENTILE;
use crate::error::{DetectorError, DetectorResult};
use crate::logic::features::Label;

// ============================================================================
// NORMALIZATION
// ============================================================================

/// Min / max of a raw score distribution
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoreRange {
    pub min: f32,
    pub max: f32,
}

impl ScoreRange {
    /// Range of a non-empty set of scores
    pub fn fit(raw: &[f32]) -> Option<Self> {
        let mut iter = raw.iter().copied();
        let first = iter.next()?;
        let (min, max) = iter.fold((first, first), |(lo, hi), v| (lo.min(v), hi.max(v)));
        Some(Self { min, max })
    }

    pub fn is_degenerate(&self) -> bool {
        self.max <= self.min
    }

    /// Rescale into [0, 1]; values outside the range are clamped.
    /// A degenerate range maps everything to 0.0.
    pub fn scale(&self, raw: f32) -> f32 {
        if self.is_degenerate() {
            return 0.0;
        }
        ((raw - self.min) / (self.max - self.min)).clamp(0.0, 1.0)
    }
}

/// How raw scores become [0, 1] scores
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum Normalizer {
    /// Min-max over the batch being scored (batch-relative)
    #[default]
    BatchMinMax,
    /// Fixed range fitted on a reference distribution
    Reference(ScoreRange),
}

impl Normalizer {
    pub fn normalize(&self, raw: &[f32]) -> Vec<f32> {
        match self {
            Normalizer::BatchMinMax => normalize(raw),
            Normalizer::Reference(range) => raw.iter().map(|&v| range.scale(v)).collect(),
        }
    }
}

/// Batch min-max normalization. For a non-degenerate batch the minimum
/// maps to exactly 0 and the maximum to exactly 1; a degenerate batch (all
/// scores equal) maps to all 0.0.
pub fn normalize(raw: &[f32]) -> Vec<f32> {
    match ScoreRange::fit(raw) {
        Some(range) => raw.iter().map(|&v| range.scale(v)).collect(),
        None => Vec::new(),
    }
}

// ============================================================================
// PERCENTILE THRESHOLD
// ============================================================================

/// Percentile of `scores` with linear interpolation between order
/// statistics. `percentile` is in [0, 100].
pub fn percentile(scores: &[f32], percentile: f32) -> DetectorResult<f32> {
    if scores.is_empty() {
        return Err(DetectorError::Evaluation("Cannot take a percentile of an empty batch".into()));
    }
    if !(0.0..=100.0).contains(&percentile) {
        return Err(DetectorError::Evaluation(format!(
            "Percentile must be in [0, 100], got {}",
            percentile
        )));
    }
    if scores.iter().any(|s| !s.is_finite()) {
        return Err(DetectorError::Evaluation("Scores contain NaN/Inf".into()));
    }

    let mut sorted = scores.to_vec();
    sorted.sort_by(f32::total_cmp);

    let rank = percentile as f64 / 100.0 * (sorted.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    if lo == hi {
        return Ok(sorted[lo]);
    }
    let frac = (rank - lo as f64) as f32;
    let value = sorted[lo] + (sorted[hi] - sorted[lo]) * frac;
    // Keep rounding inside the segment so the cutoff is monotone in `percentile`
    Ok(value.clamp(sorted[lo], sorted[hi]))
}

/// Cutoff at the given percentile of the scored distribution
pub fn threshold(scores: &[f32], pct: f32) -> DetectorResult<f32> {
    percentile(scores, pct)
}

/// `score >= cutoff` is ANOMALY
pub fn classify(scores: &[f32], cutoff: f32) -> Vec<Label> {
    scores.iter().map(|&s| Label::from_anomaly(s >= cutoff)).collect()
}

// ============================================================================
// THRESHOLD STRATEGIES
// ============================================================================

/// Cutoff selection policy. Strategies that need ground truth return an
/// evaluation error when `labels` is `None`.
pub trait ThresholdStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    fn select(&self, scores: &[f32], labels: Option<&[Label]>) -> DetectorResult<f32>;
}

/// Fixed percentile of the scored batch (default 95)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Percentile(pub f32);

impl Default for Percentile {
    fn default() -> Self {
        Self(DEFAULT_PERCENTILE)
    }
}

impl ThresholdStrategy for Percentile {
    fn name(&self) -> &'static str {
        "percentile"
    }

    fn select(&self, scores: &[f32], _labels: Option<&[Label]>) -> DetectorResult<f32> {
        percentile(scores, self.0)
    }
}

/// Cutoff maximising Youden's J = TPR - FPR
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct RocOptimal;

impl ThresholdStrategy for RocOptimal {
    fn name(&self) -> &'static str {
        "roc_optimal"
    }

    fn select(&self, scores: &[f32], labels: Option<&[Label]>) -> DetectorResult<f32> {
        let sweep = CutoffSweep::new(scores, labels, self.name())?;
        let (pos, neg) = (sweep.positives as f32, sweep.negatives as f32);
        Ok(sweep.best_by(|c| c.tp as f32 / pos - c.fp as f32 / neg))
    }
}

/// Cutoff minimising `fp_cost * FP + fn_cost * FN`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CostWeighted {
    pub fp_cost: f32,
    pub fn_cost: f32,
}

impl ThresholdStrategy for CostWeighted {
    fn name(&self) -> &'static str {
        "cost_weighted"
    }

    fn select(&self, scores: &[f32], labels: Option<&[Label]>) -> DetectorResult<f32> {
        if !(self.fp_cost >= 0.0 && self.fn_cost >= 0.0) {
            return Err(DetectorError::Config("Misclassification costs must be >= 0".into()));
        }
        let sweep = CutoffSweep::new(scores, labels, self.name())?;
        let positives = sweep.positives;
        Ok(sweep.best_by(|c| {
            let fn_count = positives - c.tp;
            -(self.fp_cost * c.fp as f32 + self.fn_cost * fn_count as f32)
        }))
    }
}

/// Serializable choice of strategy (config files, CLI)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum ThresholdPolicy {
    Percentile { percentile: f32 },
    RocOptimal,
    CostWeighted { fp_cost: f32, fn_cost: f32 },
}

impl Default for ThresholdPolicy {
    fn default() -> Self {
        ThresholdPolicy::Percentile { percentile: DEFAULT_PERCENTILE }
    }
}

impl ThresholdPolicy {
    pub fn strategy(&self) -> Box<dyn ThresholdStrategy> {
        match *self {
            ThresholdPolicy::Percentile { percentile } => Box::new(Percentile(percentile)),
            ThresholdPolicy::RocOptimal => Box::new(RocOptimal),
            ThresholdPolicy::CostWeighted { fp_cost, fn_cost } => {
                Box::new(CostWeighted { fp_cost, fn_cost })
            }
        }
    }

    pub fn needs_labels(&self) -> bool {
        !matches!(self, ThresholdPolicy::Percentile { .. })
    }
}

/// Counts at one candidate cutoff
#[derive(Debug, Clone, Copy)]
struct CutoffCounts {
    cutoff: f32,
    tp: usize,
    fp: usize,
}

/// Candidate cutoffs, highest first: one just above the top score (flag
/// nothing), then every distinct score
struct CutoffSweep {
    candidates: Vec<CutoffCounts>,
    positives: usize,
    negatives: usize,
}

impl CutoffSweep {
    fn new(scores: &[f32], labels: Option<&[Label]>, strategy: &str) -> DetectorResult<Self> {
        let labels = labels.ok_or_else(|| {
            DetectorError::Evaluation(format!("Threshold strategy '{}' needs ground-truth labels", strategy))
        })?;
        if labels.len() != scores.len() {
            return Err(DetectorError::Evaluation(format!(
                "{} scores but {} labels",
                scores.len(),
                labels.len()
            )));
        }
        let positives = labels.iter().filter(|l| l.is_anomaly()).count();
        let negatives = labels.len() - positives;
        if positives == 0 || negatives == 0 {
            return Err(DetectorError::Evaluation(format!(
                "Threshold strategy '{}' needs both classes",
                strategy
            )));
        }

        if scores.iter().any(|s| !s.is_finite()) {
            return Err(DetectorError::Evaluation("Scores contain NaN/Inf".into()));
        }

        let mut pairs: Vec<(f32, bool)> =
            scores.iter().copied().zip(labels.iter().map(|l| l.is_anomaly())).collect();
        pairs.sort_by(|a, b| b.0.total_cmp(&a.0));

        let mut candidates = vec![CutoffCounts { cutoff: next_above(pairs[0].0), tp: 0, fp: 0 }];
        let (mut tp, mut fp) = (0usize, 0usize);
        let mut i = 0;
        while i < pairs.len() {
            let cutoff = pairs[i].0;
            while i < pairs.len() && pairs[i].0 == cutoff {
                if pairs[i].1 {
                    tp += 1;
                } else {
                    fp += 1;
                }
                i += 1;
            }
            candidates.push(CutoffCounts { cutoff, tp, fp });
        }
        Ok(Self { candidates, positives, negatives })
    }

    /// Cutoff with the highest objective; ties keep the higher cutoff
    fn best_by<F: Fn(&CutoffCounts) -> f32>(&self, objective: F) -> f32 {
        let mut best = self.candidates[0];
        let mut best_value = objective(&best);
        for c in &self.candidates[1..] {
            let value = objective(c);
            if value > best_value {
                best = *c;
                best_value = value;
            }
        }
        best.cutoff
    }
}

/// Smallest f32 greater than a finite `v`
fn next_above(v: f32) -> f32 {
    if v == 0.0 {
        f32::from_bits(1)
    } else if v > 0.0 {
        f32::from_bits(v.to_bits() + 1)
    } else {
        f32::from_bits(v.to_bits() - 1)
    }
}

// ============================================================================
// TESTS
// ============================================================================

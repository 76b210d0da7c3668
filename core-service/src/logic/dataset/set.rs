//! Validated in-memory datasets
//!
//! `TrainingSet` feeds the Trainer (normal traffic only, labels ignored);
//! `LabeledSet` is the held-out set used for per-epoch ROC-AUC.

use std::path::Path;

use rand::seq::SliceRandom;
use rand::Rng;

use super::reader::read_vectors;
use crate::constants::MIN_TRAINING_SAMPLES;
use crate::error::{DetectorError, DetectorResult};
use crate::logic::features::{FeatureVector, Label};

// ============================================================================
// TRAINING SET
// ============================================================================

#[derive(Debug, Clone)]
pub struct TrainingSet {
    vectors: Vec<FeatureVector>,
}

impl TrainingSet {
    pub fn new(vectors: Vec<FeatureVector>) -> DetectorResult<Self> {
        if vectors.len() < MIN_TRAINING_SAMPLES {
            return Err(DetectorError::Dataset(format!(
                "Training data needs at least {} samples, got {}",
                MIN_TRAINING_SAMPLES,
                vectors.len()
            )));
        }
        if let Some(i) = vectors.iter().position(|v| !v.is_finite()) {
            return Err(DetectorError::Dataset(format!("Training sample {} contains NaN/Inf", i)));
        }
        Ok(Self { vectors })
    }

    pub fn load(path: &Path) -> DetectorResult<Self> {
        let (vectors, labels) = read_vectors(path)?;
        let anomalies = labels.iter().filter(|l| matches!(l, Some(Label::Anomaly))).count();
        if anomalies > 0 {
            log::warn!(
                "{}: {} records labeled ANOMALY in training data (trained as normal)",
                path.display(),
                anomalies
            );
        }
        Self::new(vectors)
    }

    pub fn len(&self) -> usize {
        self.vectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vectors.is_empty()
    }

    pub fn vectors(&self) -> &[FeatureVector] {
        &self.vectors
    }

    pub fn get(&self, index: usize) -> Option<&FeatureVector> {
        self.vectors.get(index)
    }

    /// Shuffled index batches for one epoch; the last batch may be short
    pub fn batches<R: Rng + ?Sized>(&self, batch_size: usize, rng: &mut R) -> Vec<Vec<usize>> {
        let mut order: Vec<usize> = (0..self.vectors.len()).collect();
        order.shuffle(rng);
        order.chunks(batch_size.max(1)).map(|c| c.to_vec()).collect()
    }
}

// ============================================================================
// LABELED SET
// ============================================================================

#[derive(Debug, Clone)]
pub struct LabeledSet {
    vectors: Vec<FeatureVector>,
    labels: Vec<Label>,
}

impl LabeledSet {
    /// Both classes must be present for ROC-AUC to be defined
    pub fn new(vectors: Vec<FeatureVector>, labels: Vec<Label>) -> DetectorResult<Self> {
        if vectors.len() != labels.len() {
            return Err(DetectorError::Dataset(format!(
                "{} vectors but {} labels",
                vectors.len(),
                labels.len()
            )));
        }
        let anomalies = labels.iter().filter(|l| l.is_anomaly()).count();
        if anomalies == 0 || anomalies == labels.len() {
            return Err(DetectorError::Dataset(format!(
                "Validation data needs both classes (normal: {}, anomaly: {})",
                labels.len() - anomalies,
                anomalies
            )));
        }
        if let Some(i) = vectors.iter().position(|v| !v.is_finite()) {
            return Err(DetectorError::Dataset(format!("Validation sample {} contains NaN/Inf", i)));
        }
        Ok(Self { vectors, labels })
    }

    /// Every record must carry a label
    pub fn load(path: &Path) -> DetectorResult<Self> {
        let (vectors, labels) = read_vectors(path)?;
        let labels = labels
            .into_iter()
            .enumerate()
            .map(|(i, l)| {
                l.ok_or_else(|| DetectorError::Dataset(format!("{} record {} has no label", path.display(), i + 1)))
            })
            .collect::<DetectorResult<Vec<_>>>()?;
        Self::new(vectors, labels)
    }

    pub fn len(&self) -> usize {
        self.vectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vectors.is_empty()
    }

    pub fn vectors(&self) -> &[FeatureVector] {
        &self.vectors
    }

    pub fn labels(&self) -> &[Label] {
        &self.labels
    }

    pub fn anomaly_count(&self) -> usize {
        self.labels.iter().filter(|l| l.is_anomaly()).count()
    }
}

//! Scorer - raw anomaly scores from a checkpoint
//!
//! raw = 0.9 * mean|x - x_hat| + 0.1 * mean((f(x) - f(x_hat))^2)
//!     + 1.0 * mean((z - z')^2)
//!
//! Pure function of (input, checkpoint): no dropout, no noise. The Scorer
//! holds the checkpoint behind an `Arc` so a new one can be swapped in
//! while batches are being scored; every batch sees exactly one snapshot.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use ndarray::Array2;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::checkpoint::Checkpoint;
use super::discriminator::Discriminator;
use super::generator::Generator;
use crate::logic::features::FeatureVector;
use crate::logic::nn::loss::{l1, l2};

// ============================================================================
// SCORE FORMULA
// ============================================================================

/// Fixed mixture weights of the raw score
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoreWeights {
    pub reconstruction: f32,
    pub embedding: f32,
    pub latent: f32,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self { reconstruction: 0.9, embedding: 0.1, latent: 1.0 }
    }
}

/// Score components for one record
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoreBreakdown {
    pub reconstruction: f32,
    pub embedding: f32,
    pub latent: f32,
    pub raw: f32,
}

/// Score one `(1, feature_count)` activation with a Generator/Discriminator pair
pub fn score_pair(
    generator: &Generator,
    discriminator: &Discriminator,
    x: &Array2<f32>,
    weights: &ScoreWeights,
) -> ScoreBreakdown {
    let out = generator.forward(x);
    let reconstruction = l1(x, &out.reconstruction);
    let embedding = l2(&discriminator.embed(x), &discriminator.embed(&out.reconstruction));
    let latent = l2(&out.latent, &out.relatent);
    let raw = weights.reconstruction * reconstruction + weights.embedding * embedding + weights.latent * latent;
    ScoreBreakdown { reconstruction, embedding, latent, raw }
}

/// `score(x, checkpoint)` with the default weights
pub fn score(x: &FeatureVector, checkpoint: &Checkpoint) -> f32 {
    score_pair(
        &checkpoint.generator,
        &checkpoint.discriminator,
        &x.to_activation(),
        &ScoreWeights::default(),
    )
    .raw
}

// ============================================================================
// SCORER
// ============================================================================

/// Raw scores of one batch, tagged with the checkpoint that produced them
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredBatch {
    pub checkpoint_version: Uuid,
    pub raw_scores: Vec<f32>,
    pub mean_latency_ms: f32,
}

/// Scorer status for reporting
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScorerStatus {
    pub checkpoint_version: Uuid,
    pub checkpoint_epoch: usize,
    pub checkpoint_roc_auc: Option<f32>,
    pub avg_latency_ms: f32,
    pub inference_count: u64,
}

pub struct Scorer {
    snapshot: RwLock<Arc<Checkpoint>>,
    weights: ScoreWeights,
    latency_sum_us: AtomicU64,
    inference_count: AtomicU64,
}

impl Scorer {
    pub fn new(checkpoint: Checkpoint) -> Self {
        Self::with_weights(checkpoint, ScoreWeights::default())
    }

    pub fn with_weights(checkpoint: Checkpoint, weights: ScoreWeights) -> Self {
        Self {
            snapshot: RwLock::new(Arc::new(checkpoint)),
            weights,
            latency_sum_us: AtomicU64::new(0),
            inference_count: AtomicU64::new(0),
        }
    }

    pub fn weights(&self) -> ScoreWeights {
        self.weights
    }

    /// Current read-only snapshot
    pub fn snapshot(&self) -> Arc<Checkpoint> {
        Arc::clone(&self.snapshot.read())
    }

    /// Install a new checkpoint; returns the previous one. Batches already
    /// in flight finish on the snapshot they started with.
    pub fn swap(&self, checkpoint: Checkpoint) -> Arc<Checkpoint> {
        let next = Arc::new(checkpoint);
        let previous = std::mem::replace(&mut *self.snapshot.write(), next);
        log::info!(
            "Scorer checkpoint swapped {} -> {}",
            previous.version,
            self.snapshot.read().version
        );
        previous
    }

    pub fn score(&self, x: &FeatureVector) -> f32 {
        let snapshot = self.snapshot();
        score_pair(&snapshot.generator, &snapshot.discriminator, &x.to_activation(), &self.weights).raw
    }

    pub fn score_batch(&self, batch: &[FeatureVector]) -> ScoredBatch {
        let snapshot = self.snapshot();
        let start = Instant::now();
        let raw_scores: Vec<f32> = batch
            .iter()
            .map(|x| {
                score_pair(&snapshot.generator, &snapshot.discriminator, &x.to_activation(), &self.weights).raw
            })
            .collect();
        let elapsed_us = start.elapsed().as_micros() as u64;

        self.latency_sum_us.fetch_add(elapsed_us, Ordering::Relaxed);
        self.inference_count.fetch_add(batch.len() as u64, Ordering::Relaxed);

        let mean_latency_ms = if batch.is_empty() {
            0.0
        } else {
            elapsed_us as f32 / 1000.0 / batch.len() as f32
        };
        ScoredBatch { checkpoint_version: snapshot.version, raw_scores, mean_latency_ms }
    }

    pub fn status(&self) -> ScorerStatus {
        let snapshot = self.snapshot();
        let sum = self.latency_sum_us.load(Ordering::Relaxed);
        let count = self.inference_count.load(Ordering::Relaxed);
        let avg = if count > 0 { (sum as f32 / count as f32) / 1000.0 } else { 0.0 };

        ScorerStatus {
            checkpoint_version: snapshot.version,
            checkpoint_epoch: snapshot.epoch,
            checkpoint_roc_auc: snapshot.roc_auc,
            avg_latency_ms: avg,
            inference_count: count,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logic::features::FEATURE_COUNT;
    use crate::logic::model::Architecture;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn checkpoint(seed: u64) -> Checkpoint {
        let arch = Architecture::new(4, 2);
        let mut rng = StdRng::seed_from_u64(seed);
        Checkpoint::new(Generator::new(arch, &mut rng), Discriminator::new(arch, &mut rng), 1, None)
    }

    fn batch() -> Vec<FeatureVector> {
        (0..6)
            .map(|k| {
                let values: Vec<f32> = (0..FEATURE_COUNT).map(|i| ((i + k * 5) % 9) as f32 / 9.0).collect();
                FeatureVector::try_from(values).unwrap()
            })
            .collect()
    }

    #[test]
    fn test_score_is_deterministic_and_non_negative() {
        let ckpt = checkpoint(1);
        for x in batch() {
            let a = score(&x, &ckpt);
            let b = score(&x, &ckpt);
            assert_eq!(a, b);
            assert!(a >= 0.0 && a.is_finite());
        }
    }

    #[test]
    fn test_breakdown_uses_fixed_mixture() {
        let ckpt = checkpoint(2);
        let x = batch().remove(0).to_activation();
        let w = ScoreWeights::default();
        let s = score_pair(&ckpt.generator, &ckpt.discriminator, &x, &w);
        let expected = 0.9 * s.reconstruction + 0.1 * s.embedding + s.latent;
        assert!((s.raw - expected).abs() < 1e-6);
    }

    #[test]
    fn test_scorer_matches_free_function() {
        let ckpt = checkpoint(3);
        let scorer = Scorer::new(ckpt.clone());
        let scored = scorer.score_batch(&batch());
        let expected: Vec<f32> = batch().iter().map(|x| score(x, &ckpt)).collect();
        assert_eq!(scored.raw_scores, expected);
        assert_eq!(scored.checkpoint_version, ckpt.version);
        assert_eq!(scorer.status().inference_count, 6);
    }

    #[test]
    fn test_swap_during_concurrent_scoring() {
        let old = checkpoint(5);
        let new = checkpoint(6);
        let inputs = batch();
        let old_scores: Vec<f32> = inputs.iter().map(|x| score(x, &old)).collect();
        let new_scores: Vec<f32> = inputs.iter().map(|x| score(x, &new)).collect();
        assert_ne!(old_scores, new_scores);

        let scorer = Scorer::new(old.clone());
        std::thread::scope(|s| {
            let readers: Vec<_> = (0..4)
                .map(|_| {
                    s.spawn(|| {
                        (0..10).map(|_| scorer.score_batch(&inputs)).collect::<Vec<_>>()
                    })
                })
                .collect();
            s.spawn(|| scorer.swap(new.clone()));

            for reader in readers {
                for scored in reader.join().unwrap() {
                    // Never a mix of the two checkpoints within one batch
                    if scored.checkpoint_version == old.version {
                        assert_eq!(scored.raw_scores, old_scores);
                    } else {
                        assert_eq!(scored.checkpoint_version, new.version);
                        assert_eq!(scored.raw_scores, new_scores);
                    }
                }
            }
        });
        assert_eq!(scorer.snapshot().version, new.version);
    }
}

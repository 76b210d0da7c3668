//! Model Module - adversarial pair, checkpoints, scoring and calibration
//!
//! Training lives in `logic::training`; this module only knows how to run,
//! persist and score a Generator/Discriminator pair.

pub mod architecture;
pub mod checkpoint;
pub mod discriminator;
pub mod evaluate;
pub mod generator;
pub mod inference;
pub mod scorer;
pub mod threshold;


// Re-export common types
pub use architecture::Architecture;
pub use checkpoint::{Checkpoint, CheckpointSlot, CheckpointStore, StagedCheckpoint};
pub use discriminator::{Discriminator, DiscriminatorGrads, DiscriminatorPass};
pub use evaluate::{evaluate, roc_auc, ConfusionExport, ConfusionMatrix, Evaluation};
pub use generator::{Generator, GeneratorGrads, GeneratorLossGrad, GeneratorOutput, GeneratorPass};
pub use inference::{detect, normalizer_for, BatchSummary, InferenceReport, ScoredRecord};
pub use scorer::{score, score_pair, ScoreBreakdown, ScoreWeights, ScoredBatch, Scorer, ScorerStatus};
pub use threshold::{
    classify, normalize, percentile, threshold, CostWeighted, Normalizer, Percentile, RocOptimal, ScoreRange,
    ThresholdPolicy, ThresholdStrategy,
};

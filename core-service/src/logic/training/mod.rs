//! Training Module - adversarial training loop and its bookkeeping
//!
//! `Trainer` owns the Generator/Discriminator pair and both optimizers;
//! everything else here is what it reports through: per-epoch metrics, the
//! progress feed and the stopping policy.

pub mod loss;
pub mod metrics;
pub mod progress;
pub mod stopping;
pub mod trainer;

#[cfg(test)]
mod tests;

pub use loss::{DiscriminatorLoss, GeneratorLoss, LossWeights};
pub use metrics::{EpochMetrics, MetricsExport, MetricsHistory};
pub use progress::{parse_progress, FileSink, LogSink, MemorySink, ProgressSink, Tee};
pub use stopping::{FixedEpochs, Patience, StoppingPolicy};
pub use trainer::{BatchStats, CancelToken, CollapseEvent, RunOutcome, Trainer, TrainerState, TrainingReport};

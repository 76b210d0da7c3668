//! Trainer - adversarial training loop
//!
//! State machine:
//!
//! ```text
//! Initialized -> TrainingEpoch(e) -> Validating(e) -> TrainingEpoch(e+1) ... -> Completed
//!                     |    ^
//!                     v    |
//!            DiscriminatorCollapsed(e, b)
//!
//! any state -> Failed   (non-finite loss, checkpoint I/O)
//! ```
//!
//! Per batch the discriminator is stepped first. If its loss falls below
//! `collapse_epsilon` it is re-initialised (weights and optimizer moments)
//! and the generator skips that batch, so the generator never trains
//! against a freshly reset discriminator.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use ndarray::Array2;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::loss::{discriminator_batch, generator_batch, DiscriminatorLoss, GeneratorLoss, LossWeights};
use super::metrics::{EpochMetrics, MetricsHistory};
use super::progress::{batch_line, collapse_line, epoch_line, LogSink, ProgressSink};
use super::stopping::{FixedEpochs, StoppingPolicy};
use crate::constants::HISTORY_FILE;
use crate::error::{DetectorError, DetectorResult};
use crate::logic::config::RunConfig;
use crate::logic::dataset::{LabeledSet, TrainingSet};
use crate::logic::features::FeatureVector;
use crate::logic::model::{
    classify, normalize, percentile, roc_auc, score_pair, Checkpoint, CheckpointSlot, CheckpointStore,
    ConfusionMatrix, Discriminator, DiscriminatorGrads, Generator, GeneratorGrads, ScoreRange, ScoreWeights,
};
use crate::logic::nn::Adam;

// ============================================================================
// STATE + EVENTS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum TrainerState {
    Initialized,
    TrainingEpoch { epoch: usize },
    DiscriminatorCollapsed { epoch: usize, batch: usize },
    Validating { epoch: usize },
    Completed,
    Failed,
}

/// One discriminator re-initialisation
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CollapseEvent {
    pub epoch: usize,
    pub batch: usize,
    pub d_loss: f32,
}

/// Cooperative cancellation, checked between epochs
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Result of one `train_batch` call
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BatchStats {
    pub d_loss: DiscriminatorLoss,
    /// `None` when the batch ended in a collapse
    pub g_loss: Option<GeneratorLoss>,
    pub collapsed: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RunOutcome {
    /// Full epoch budget used
    Completed,
    EarlyStopped { epoch: usize, policy: String },
    /// `epoch` is the last fully validated epoch
    Cancelled { epoch: usize },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingReport {
    pub outcome: RunOutcome,
    pub history: MetricsHistory,
    pub collapses: Vec<CollapseEvent>,
    pub current_checkpoint: Option<Uuid>,
    pub best_checkpoint: Option<Uuid>,
}

impl TrainingReport {
    pub fn best(&self) -> Option<&EpochMetrics> {
        self.history.best()
    }
}

/// Validation pass output
struct Validation {
    raw_scores: Vec<f32>,
    roc_auc: f32,
    latency_ms: f32,
    runtime_ms: f32,
    confusion: ConfusionMatrix,
}

// ============================================================================
// TRAINER
// ============================================================================

pub struct Trainer {
    config: RunConfig,
    generator: Generator,
    discriminator: Discriminator,
    opt_g: Adam,
    opt_d: Adam,
    rng: StdRng,
    state: TrainerState,
    history: MetricsHistory,
    collapses: Vec<CollapseEvent>,
    stopping: Box<dyn StoppingPolicy>,
    progress: Box<dyn ProgressSink>,
    cancel: CancelToken,
}

impl Trainer {
    /// Validate the config and initialise both networks from its seed
    pub fn new(config: RunConfig) -> DetectorResult<Self> {
        config.validate()?;
        let arch = config.base.architecture();
        let mut rng = StdRng::seed_from_u64(config.base.seed);
        let generator = Generator::new(arch, &mut rng);
        let discriminator = Discriminator::new(arch, &mut rng);
        let train = config.train;

        log::info!(
            "Trainer initialized: nz={} ngf={} (G {} params, D {} params)",
            arch.latent_dim,
            arch.base_channels,
            generator.num_parameters(),
            discriminator.num_parameters()
        );

        Ok(Self {
            config,
            generator,
            discriminator,
            opt_g: Adam::new(train.learning_rate, train.beta1),
            opt_d: Adam::new(train.learning_rate, train.beta1),
            rng,
            state: TrainerState::Initialized,
            history: MetricsHistory::new(),
            collapses: Vec::new(),
            stopping: Box::new(FixedEpochs),
            progress: Box::new(LogSink),
            cancel: CancelToken::new(),
        })
    }

    pub fn with_stopping(mut self, policy: impl StoppingPolicy + 'static) -> Self {
        self.stopping = Box::new(policy);
        self
    }

    pub fn with_progress(mut self, sink: impl ProgressSink + 'static) -> Self {
        self.progress = Box::new(sink);
        self
    }

    pub fn with_cancel(mut self, token: CancelToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    pub fn state(&self) -> TrainerState {
        self.state
    }

    pub fn generator(&self) -> &Generator {
        &self.generator
    }

    pub fn discriminator(&self) -> &Discriminator {
        &self.discriminator
    }

    #[cfg(test)]
    pub(crate) fn discriminator_mut(&mut self) -> &mut Discriminator {
        &mut self.discriminator
    }

    pub fn history(&self) -> &MetricsHistory {
        &self.history
    }

    pub fn collapses(&self) -> &[CollapseEvent] {
        &self.collapses
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Optimizer step counters `(generator, discriminator)`
    pub fn optimizer_steps(&self) -> (u64, u64) {
        (self.opt_g.step_count(), self.opt_d.step_count())
    }

    fn transition(&mut self, next: TrainerState) {
        log::debug!("Trainer {:?} -> {:?}", self.state, next);
        self.state = next;
    }

    fn diverged(&mut self, epoch: usize, batch: usize, stage: &'static str) -> DetectorError {
        self.transition(TrainerState::Failed);
        let err = DetectorError::Divergence {
            epoch,
            batch,
            stage,
            last_good_epoch: self.history.last().map(|m| m.epoch),
        };
        log::error!("{}", err);
        err
    }

    // ========================================================================
    // BATCH STEP
    // ========================================================================

    /// One adversarial step: discriminator update, collapse check, then
    /// generator update.
    pub fn train_batch(&mut self, epoch: usize, batch_index: usize, batch: &[FeatureVector]) -> DetectorResult<BatchStats> {
        if batch.is_empty() {
            return Err(DetectorError::Dataset("Empty training batch".into()));
        }
        self.transition(TrainerState::TrainingEpoch { epoch });
        let inputs: Vec<Array2<f32>> = batch.iter().map(FeatureVector::to_activation).collect();

        let mut d_grads = DiscriminatorGrads::zeros_like(&self.discriminator);
        let d_loss = discriminator_batch(&self.generator, &self.discriminator, &inputs, &mut d_grads);
        if !d_loss.is_finite() || !d_grads.is_finite() {
            return Err(self.diverged(epoch, batch_index, "discriminator"));
        }

        if d_loss.total < self.config.base.collapse_epsilon {
            self.recover_from_collapse(epoch, batch_index, d_loss.total);
            return Ok(BatchStats { d_loss, g_loss: None, collapsed: true });
        }
        self.discriminator.apply(&d_grads, &mut self.opt_d);

        let weights = LossWeights::from(&self.config.train);
        let mut g_grads = GeneratorGrads::zeros_like(&self.generator);
        let g_loss = generator_batch(&self.generator, &self.discriminator, &inputs, &weights, &mut g_grads);
        if !g_loss.is_finite() || !g_grads.is_finite() {
            return Err(self.diverged(epoch, batch_index, "generator"));
        }
        self.generator.apply(&g_grads, &mut self.opt_g);

        Ok(BatchStats { d_loss, g_loss: Some(g_loss), collapsed: false })
    }

    /// TRAINING_EPOCH -> DISCRIMINATOR_COLLAPSED -> TRAINING_EPOCH.
    ///
    /// Fresh discriminator weights and optimizer state; the generator and
    /// its optimizer are not touched.
    pub fn recover_from_collapse(&mut self, epoch: usize, batch: usize, d_loss: f32) {
        self.transition(TrainerState::DiscriminatorCollapsed { epoch, batch });
        log::warn!(
            "Discriminator collapsed at epoch {} batch {} (err_d {:.3e}), re-initialising",
            epoch,
            batch,
            d_loss
        );
        self.progress.emit(&collapse_line(epoch, batch, d_loss));

        self.discriminator.reinitialize(&mut self.rng);
        self.opt_d.reset();
        self.collapses.push(CollapseEvent { epoch, batch, d_loss });

        self.transition(TrainerState::TrainingEpoch { epoch });
    }

    // ========================================================================
    // VALIDATION
    // ========================================================================

    fn validate(&mut self, epoch: usize, validation: &LabeledSet) -> DetectorResult<Validation> {
        self.transition(TrainerState::Validating { epoch });
        let weights = ScoreWeights::default();
        let batch_size = self.config.base.batch_size;

        let mut raw_scores = Vec::with_capacity(validation.len());
        let mut chunk_ms = Vec::new();
        for chunk in validation.vectors().chunks(batch_size) {
            let start = Instant::now();
            for x in chunk {
                let s = score_pair(&self.generator, &self.discriminator, &x.to_activation(), &weights);
                raw_scores.push(s.raw);
            }
            chunk_ms.push(start.elapsed().as_secs_f32() * 1000.0);
        }
        if raw_scores.iter().any(|s| !s.is_finite()) {
            return Err(self.diverged(epoch, 0, "validation"));
        }

        let total_ms: f32 = chunk_ms.iter().sum();
        let roc_auc = roc_auc(&raw_scores, validation.labels())?;
        let normalized = normalize(&raw_scores);
        let cutoff = percentile(&normalized, self.config.base.validation_percentile)?;
        let confusion = ConfusionMatrix::from_predictions(&classify(&normalized, cutoff), validation.labels())?;

        Ok(Validation {
            raw_scores,
            roc_auc,
            latency_ms: total_ms / validation.len().max(1) as f32,
            runtime_ms: total_ms / chunk_ms.len().max(1) as f32,
            confusion,
        })
    }

    // ========================================================================
    // RUN
    // ========================================================================

    /// Train for up to `epoch_count` epochs, validating and checkpointing
    /// after each one. Ends in `Completed` (including early stop and
    /// cancellation) or `Failed`.
    pub fn fit(
        &mut self,
        train: &TrainingSet,
        validation: &LabeledSet,
        store: &CheckpointStore,
    ) -> DetectorResult<TrainingReport> {
        log::info!(
            "Training on {} samples ({} validation, {} anomalous), {} epochs, batch {}",
            train.len(),
            validation.len(),
            validation.anomaly_count(),
            self.config.train.epoch_count,
            self.config.base.batch_size
        );

        match self.run_epochs(train, validation, store) {
            Ok(report) => {
                self.transition(TrainerState::Completed);
                Ok(report)
            }
            Err(e) => {
                if self.state != TrainerState::Failed {
                    self.transition(TrainerState::Failed);
                    log::error!("Training failed: {}", e);
                }
                Err(e)
            }
        }
    }

    fn run_epochs(
        &mut self,
        train: &TrainingSet,
        validation: &LabeledSet,
        store: &CheckpointStore,
    ) -> DetectorResult<TrainingReport> {
        let epochs = self.config.train.epoch_count;
        let batch_size = self.config.base.batch_size;
        let history_path = store.dir().join(HISTORY_FILE);

        let mut outcome = RunOutcome::Completed;
        let mut current_checkpoint = None;
        let mut best_checkpoint = None;

        for epoch in 1..=epochs {
            if self.cancel.is_cancelled() {
                log::info!("Training cancelled before epoch {}", epoch);
                outcome = RunOutcome::Cancelled { epoch: epoch - 1 };
                break;
            }
            self.transition(TrainerState::TrainingEpoch { epoch });

            let batches = train.batches(batch_size, &mut self.rng);
            let n_batches = batches.len();
            let (mut d_sum, mut g_sum, mut g_count, mut collapses) = (0.0f32, 0.0f32, 0usize, 0usize);

            for (b, indices) in batches.iter().enumerate() {
                let batch: Vec<FeatureVector> = indices.iter().filter_map(|&i| train.get(i).cloned()).collect();
                let stats = self.train_batch(epoch, b + 1, &batch)?;

                d_sum += stats.d_loss.total;
                if let Some(g) = stats.g_loss {
                    g_sum += g.total;
                    g_count += 1;
                }
                if stats.collapsed {
                    collapses += 1;
                }
                self.progress
                    .emit(&batch_line(epoch, epochs, b + 1, n_batches, &stats.d_loss, stats.g_loss.as_ref()));
            }

            let v = self.validate(epoch, validation)?;
            self.history.push(EpochMetrics {
                epoch,
                d_loss: d_sum / n_batches.max(1) as f32,
                g_loss: if g_count > 0 { g_sum / g_count as f32 } else { 0.0 },
                roc_auc: v.roc_auc,
                latency_ms: v.latency_ms,
                runtime_ms: v.runtime_ms,
                collapses,
                confusion: Some(v.confusion),
            })?;

            // First epoch reaching the maximum wins ties
            let best = self.history.best().map(|m| (m.epoch, m.roc_auc));
            let is_best = best.map(|(e, _)| e) == Some(epoch);
            let max_roc = best.map(|(_, r)| r).unwrap_or(v.roc_auc);

            let checkpoint = Checkpoint::new(self.generator.clone(), self.discriminator.clone(), epoch, Some(v.roc_auc))
                .with_score_range(ScoreRange::fit(&v.raw_scores));
            store.save(CheckpointSlot::Current, &checkpoint)?;
            current_checkpoint = Some(checkpoint.version);
            if is_best {
                store.save(CheckpointSlot::Best, &checkpoint)?;
                best_checkpoint = Some(checkpoint.version);
            }
            self.history.save(&history_path)?;

            self.progress.emit(&epoch_line(v.runtime_ms, v.roc_auc, max_roc));
            log::info!(
                "Epoch {}/{}: err_d {:.4} roc {:.4} (max {:.4}){}",
                epoch,
                epochs,
                d_sum / n_batches.max(1) as f32,
                v.roc_auc,
                max_roc,
                if collapses > 0 { format!(", {} collapse(s)", collapses) } else { String::new() }
            );

            if epoch < epochs && self.stopping.should_stop(&self.history) {
                log::info!("Stopping early after epoch {} ({})", epoch, self.stopping.name());
                outcome = RunOutcome::EarlyStopped { epoch, policy: self.stopping.name().to_string() };
                break;
            }
        }

        Ok(TrainingReport {
            outcome,
            history: self.history.clone(),
            collapses: self.collapses.clone(),
            current_checkpoint,
            best_checkpoint,
        })
    }
}

//! End-to-end trainer tests on a tiny architecture.

use super::*;
use crate::constants::{DEFAULT_COLLAPSE_EPSILON, HISTORY_FILE};
use crate::error::DetectorError;
use crate::logic::config::RunConfig;
use crate::logic::dataset::{LabeledSet, TrainingSet};
use crate::logic::features::{FeatureVector, Label, FEATURE_COUNT};
use crate::logic::model::{CheckpointSlot, CheckpointStore, Discriminator};

fn tiny_config(epochs: usize) -> RunConfig {
    let mut config = RunConfig::default();
    config.base.latent_dim = 4;
    config.base.base_channels = 2;
    config.base.batch_size = 16;
    config.train.epoch_count = epochs;
    config
}

fn normal(k: usize) -> FeatureVector {
    let values: Vec<f32> = (0..FEATURE_COUNT)
        .map(|i| 0.2 + 0.1 * (((i + k) % 7) as f32 / 7.0))
        .collect();
    FeatureVector::try_from(values).unwrap()
}

fn anomaly(k: usize) -> FeatureVector {
    let values: Vec<f32> = (0..FEATURE_COUNT)
        .map(|i| if (i + k) % 2 == 0 { 1.0 } else { 0.0 })
        .collect();
    FeatureVector::try_from(values).unwrap()
}

fn training_set() -> TrainingSet {
    TrainingSet::new((0..40).map(normal).collect()).unwrap()
}

fn validation_set() -> LabeledSet {
    let mut vectors = Vec::new();
    let mut labels = Vec::new();
    for k in 0..12 {
        vectors.push(normal(k + 100));
        labels.push(Label::Normal);
    }
    for k in 0..4 {
        vectors.push(anomaly(k));
        labels.push(Label::Anomaly);
    }
    LabeledSet::new(vectors, labels).unwrap()
}

/// Always asks to stop
struct StopNow;

impl StoppingPolicy for StopNow {
    fn name(&self) -> &'static str {
        "stop_now"
    }

    fn should_stop(&self, _history: &MetricsHistory) -> bool {
        true
    }
}

/// Cancels the run as soon as an epoch summary goes by
struct CancelOnEpoch(CancelToken);

impl ProgressSink for CancelOnEpoch {
    fn emit(&mut self, line: &str) {
        if line.starts_with("Avg Run Time") {
            self.0.cancel();
        }
    }
}

#[test]
fn test_full_run_tracks_best_epoch() {
    let dir = tempfile::tempdir().unwrap();
    let store = CheckpointStore::open(dir.path()).unwrap();
    let feed = MemorySink::new();
    let mut trainer = Trainer::new(tiny_config(3)).unwrap().with_progress(feed.clone());

    let report = trainer.fit(&training_set(), &validation_set(), &store).unwrap();

    assert_eq!(report.outcome, RunOutcome::Completed);
    assert_eq!(trainer.state(), TrainerState::Completed);
    assert_eq!(report.history.len(), 3);
    assert_eq!(
        report.history.epochs().iter().map(|m| m.epoch).collect::<Vec<_>>(),
        vec![1, 2, 3]
    );

    let best = report.best().unwrap().clone();
    for m in report.history.epochs() {
        assert!(best.roc_auc >= m.roc_auc);
        assert!((0.0..=1.0).contains(&m.roc_auc));
    }

    let best_ckpt = store.load(CheckpointSlot::Best).unwrap();
    assert_eq!(best_ckpt.epoch, best.epoch);
    assert_eq!(best_ckpt.roc_auc, Some(best.roc_auc));
    assert_eq!(Some(best_ckpt.version), report.best_checkpoint);

    let current = store.load(CheckpointSlot::Current).unwrap();
    assert_eq!(current.epoch, 3);
    assert_eq!(Some(current.version), report.current_checkpoint);
    assert_eq!(&current.generator, trainer.generator());

    let saved = MetricsHistory::load(&dir.path().join(HISTORY_FILE)).unwrap();
    assert_eq!(saved, report.history);

    // The text feed alone is enough to rebuild the exported metrics
    let parsed = parse_progress(&feed.text()).unwrap();
    let export = MetricsExport::from_history(&report.history).unwrap();
    assert_eq!(parsed.roc_history.len(), 3);
    for (a, b) in parsed.roc_history.iter().zip(&export.roc_history) {
        assert!((a - b).abs() < 1e-4);
    }
    assert!((parsed.max_roc_seen - export.max_roc_seen).abs() < 1e-4);
    assert_eq!(export.roc_auc, best.roc_auc);
    assert!((parsed.roc_auc - export.roc_auc).abs() < 1e-4);
}

#[test]
fn test_collapse_resets_discriminator_only() {
    let mut config = tiny_config(1);
    // Any finite loss counts as collapse
    config.base.collapse_epsilon = 1e3;
    let feed = MemorySink::new();
    let mut trainer = Trainer::new(config).unwrap().with_progress(feed.clone());

    let batch: Vec<FeatureVector> = (0..8).map(normal).collect();
    let g_before = serde_json::to_vec(trainer.generator()).unwrap();
    let d_before = trainer.discriminator().clone();

    let stats = trainer.train_batch(1, 1, &batch).unwrap();

    assert!(stats.collapsed);
    assert!(stats.g_loss.is_none());
    assert_eq!(serde_json::to_vec(trainer.generator()).unwrap(), g_before);
    assert_ne!(trainer.discriminator(), &d_before);
    assert_eq!(trainer.state(), TrainerState::TrainingEpoch { epoch: 1 });
    assert_eq!(trainer.collapses().len(), 1);
    assert_eq!(trainer.collapses()[0].batch, 1);
    assert_eq!(trainer.optimizer_steps(), (0, 0));
    assert!(feed.lines().iter().any(|l| l.starts_with("Reloading net d")));
}

#[test]
fn test_saturated_discriminator_collapses_at_default_epsilon() {
    let config = tiny_config(1);
    assert_eq!(config.base.collapse_epsilon, DEFAULT_COLLAPSE_EPSILON);
    let arch = config.base.architecture();
    let feed = MemorySink::new();
    let mut trainer = Trainer::new(config).unwrap().with_progress(feed.clone());

    // Real records sit in [0.2, 0.3); an untrained decoder outputs about 0.5
    let saturated = Discriminator::saturated(arch, 0.375, 0.075, 30.0);
    *trainer.discriminator_mut() = saturated.clone();
    let g_before = trainer.generator().clone();
    let batch: Vec<FeatureVector> = (0..8).map(normal).collect();

    let stats = trainer.train_batch(1, 1, &batch).unwrap();

    assert!(stats.d_loss.total < DEFAULT_COLLAPSE_EPSILON, "err_d {}", stats.d_loss.total);
    assert!(stats.collapsed);
    assert!(stats.g_loss.is_none());
    assert_eq!(trainer.generator(), &g_before);
    assert_ne!(trainer.discriminator(), &saturated);
    assert_eq!(trainer.optimizer_steps(), (0, 0));
    assert_eq!(trainer.collapses().len(), 1);
    assert!(feed.lines().iter().any(|l| l.starts_with("Reloading net d")));
}

#[test]
fn test_regular_batch_steps_both_networks() {
    let mut trainer = Trainer::new(tiny_config(1)).unwrap().with_progress(MemorySink::new());
    let batch: Vec<FeatureVector> = (0..8).map(normal).collect();
    let g_before = trainer.generator().clone();

    let stats = trainer.train_batch(1, 1, &batch).unwrap();

    assert!(!stats.collapsed);
    assert!(stats.g_loss.is_some());
    assert_ne!(trainer.generator(), &g_before);
    assert_eq!(trainer.optimizer_steps(), (1, 1));
}

#[test]
fn test_non_finite_input_fails_the_run() {
    let mut trainer = Trainer::new(tiny_config(1)).unwrap().with_progress(MemorySink::new());
    let mut values = vec![0.5; FEATURE_COUNT];
    values[3] = f32::NAN;
    let batch = vec![FeatureVector::try_from(values).unwrap(), normal(0)];

    let err = trainer.train_batch(1, 1, &batch).unwrap_err();

    assert!(err.is_fatal());
    assert!(matches!(err, DetectorError::Divergence { last_good_epoch: None, .. }));
    assert_eq!(trainer.state(), TrainerState::Failed);
}

#[test]
fn test_cancel_before_fit() {
    let dir = tempfile::tempdir().unwrap();
    let store = CheckpointStore::open(dir.path()).unwrap();
    let mut trainer = Trainer::new(tiny_config(3)).unwrap().with_progress(MemorySink::new());
    trainer.cancel_token().cancel();

    let report = trainer.fit(&training_set(), &validation_set(), &store).unwrap();

    assert_eq!(report.outcome, RunOutcome::Cancelled { epoch: 0 });
    assert!(report.history.is_empty());
    assert!(!store.exists(CheckpointSlot::Current));
}

#[test]
fn test_cancel_between_epochs() {
    let dir = tempfile::tempdir().unwrap();
    let store = CheckpointStore::open(dir.path()).unwrap();
    let token = CancelToken::new();
    let mut trainer = Trainer::new(tiny_config(3))
        .unwrap()
        .with_cancel(token.clone())
        .with_progress(CancelOnEpoch(token));

    let report = trainer.fit(&training_set(), &validation_set(), &store).unwrap();

    assert_eq!(report.outcome, RunOutcome::Cancelled { epoch: 1 });
    assert_eq!(report.history.len(), 1);
    assert_eq!(store.load(CheckpointSlot::Current).unwrap().epoch, 1);
}

#[test]
fn test_stopping_policy_ends_run_early() {
    let dir = tempfile::tempdir().unwrap();
    let store = CheckpointStore::open(dir.path()).unwrap();
    let mut trainer = Trainer::new(tiny_config(3))
        .unwrap()
        .with_stopping(StopNow)
        .with_progress(MemorySink::new());

    let report = trainer.fit(&training_set(), &validation_set(), &store).unwrap();

    assert_eq!(report.outcome, RunOutcome::EarlyStopped { epoch: 1, policy: "stop_now".into() });
    assert_eq!(report.history.len(), 1);
    assert_eq!(trainer.state(), TrainerState::Completed);
}

#[test]
fn test_invalid_config_is_rejected() {
    let mut config = tiny_config(1);
    config.train.learning_rate = 0.0;
    assert!(matches!(Trainer::new(config), Err(DetectorError::Config(_))));

    let mut config = tiny_config(1);
    config.base.batch_size = 0;
    assert!(Trainer::new(config).is_err());
}

#[test]
fn test_same_seed_same_run() {
    let batch: Vec<FeatureVector> = (0..8).map(normal).collect();
    let mut a = Trainer::new(tiny_config(1)).unwrap().with_progress(MemorySink::new());
    let mut b = Trainer::new(tiny_config(1)).unwrap().with_progress(MemorySink::new());
    let sa = a.train_batch(1, 1, &batch).unwrap();
    let sb = b.train_batch(1, 1, &batch).unwrap();
    assert_eq!(sa, sb);
    assert_eq!(a.generator(), b.generator());
}

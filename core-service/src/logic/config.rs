//! Run Configuration
//!
//! A run is configured by one JSON document with two sections:
//!
//! ```json
//! { "base":  { "batch_size": 64, "latent_dim": 32, ... },
//!   "train": { "epoch_count": 5, "learning_rate": 0.0002, ... } }
//! ```
//!
//! The document is validated once, before the first training step, and is
//! never mutated during a run.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::constants::{DEFAULT_COLLAPSE_EPSILON, DEFAULT_PERCENTILE, DEFAULT_SEED};
use crate::error::{DetectorError, DetectorResult};
use crate::logic::features::FEATURE_COUNT;
use crate::logic::model::Architecture;
use crate::logic::storage;

// ============================================================================
// TRAINING CONFIG
// ============================================================================

/// Optimisation hyper-parameters (the `train` section)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    #[serde(alias = "niter")]
    pub epoch_count: usize,
    #[serde(alias = "lr")]
    pub learning_rate: f32,
    /// Adam momentum term
    pub beta1: f32,
    /// Feature-matching (adversarial) loss weight
    pub w_adv: f32,
    /// Reconstruction loss weight
    pub w_con: f32,
    /// Latent consistency loss weight
    pub w_enc: f32,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            epoch_count: 5,
            learning_rate: 0.0002,
            beta1: 0.5,
            w_adv: 1.0,
            w_con: 50.0,
            w_enc: 1.0,
        }
    }
}

impl TrainingConfig {
    pub fn validate(&self) -> DetectorResult<()> {
        if self.epoch_count == 0 {
            return Err(DetectorError::Config("epoch_count must be > 0".into()));
        }
        if !(self.learning_rate.is_finite() && self.learning_rate > 0.0) {
            return Err(DetectorError::Config(format!(
                "learning_rate must be finite and > 0, got {}",
                self.learning_rate
            )));
        }
        if !(0.0..1.0).contains(&self.beta1) {
            return Err(DetectorError::Config(format!("beta1 must be in [0, 1), got {}", self.beta1)));
        }
        for (name, w) in [("w_adv", self.w_adv), ("w_con", self.w_con), ("w_enc", self.w_enc)] {
            if !(w.is_finite() && w >= 0.0) {
                return Err(DetectorError::Config(format!("{} must be finite and >= 0, got {}", name, w)));
            }
        }
        if self.w_con <= 0.0 {
            return Err(DetectorError::Config("w_con must be > 0".into()));
        }
        Ok(())
    }
}

// ============================================================================
// MODEL CONFIG
// ============================================================================

/// Architecture and run-level knobs (the `base` section)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    #[serde(alias = "batchsize")]
    pub batch_size: usize,
    #[serde(alias = "nz")]
    pub latent_dim: usize,
    #[serde(alias = "ngf")]
    pub base_channels: usize,
    #[serde(alias = "manualseed")]
    pub seed: u64,
    /// Discriminator loss below this counts as collapse
    pub collapse_epsilon: f32,
    /// Percentile used for the per-epoch validation confusion matrix
    pub validation_percentile: f32,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            batch_size: 64,
            latent_dim: 32,
            base_channels: 16,
            seed: DEFAULT_SEED,
            collapse_epsilon: DEFAULT_COLLAPSE_EPSILON,
            validation_percentile: DEFAULT_PERCENTILE,
        }
    }
}

impl ModelConfig {
    pub fn architecture(&self) -> Architecture {
        Architecture::new(self.latent_dim, self.base_channels)
    }

    pub fn validate(&self) -> DetectorResult<()> {
        if self.batch_size == 0 {
            return Err(DetectorError::Config("batch_size must be > 0".into()));
        }
        if self.latent_dim == 0 || self.latent_dim >= FEATURE_COUNT {
            return Err(DetectorError::Config(format!(
                "latent_dim must be in 1..{}, got {}",
                FEATURE_COUNT, self.latent_dim
            )));
        }
        if self.base_channels == 0 {
            return Err(DetectorError::Config("base_channels must be > 0".into()));
        }
        if !(self.collapse_epsilon.is_finite() && self.collapse_epsilon > 0.0) {
            return Err(DetectorError::Config(format!(
                "collapse_epsilon must be finite and > 0, got {}",
                self.collapse_epsilon
            )));
        }
        if !(0.0..=100.0).contains(&self.validation_percentile) {
            return Err(DetectorError::Config(format!(
                "validation_percentile must be in [0, 100], got {}",
                self.validation_percentile
            )));
        }
        Ok(())
    }
}

// ============================================================================
// RUN CONFIG DOCUMENT
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct RunConfig {
    #[serde(default)]
    pub base: ModelConfig,
    #[serde(default)]
    pub train: TrainingConfig,
}

impl RunConfig {
    pub fn validate(&self) -> DetectorResult<()> {
        self.base.validate()?;
        self.train.validate()
    }

    /// Load and validate a config document
    pub fn load(path: &Path) -> DetectorResult<Self> {
        let data = std::fs::read(path)
            .map_err(|e| DetectorError::Config(format!("Cannot read {}: {}", path.display(), e)))?;
        let config: RunConfig = serde_json::from_slice(&data)
            .map_err(|e| DetectorError::Config(format!("Invalid config {}: {}", path.display(), e)))?;
        config.validate()?;
        log::info!(
            "Loaded config {} ({} epochs, lr {}, batch {})",
            path.display(),
            config.train.epoch_count,
            config.train.learning_rate,
            config.base.batch_size
        );
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> DetectorResult<()> {
        self.validate()?;
        storage::save_json(self, path)
    }
}

// ============================================================================
// TESTS
// ============================================================================

//! Error handling
//!
//! One error type for the whole core. Discriminator collapse is not listed
//! here: it is a recoverable trainer transition, see `training::trainer`.

use std::path::PathBuf;

use thiserror::Error;

pub type DetectorResult<T> = Result<T, DetectorError>;

#[derive(Debug, Error)]
pub enum DetectorError {
    // Configuration errors (rejected before any training step)
    #[error("Invalid configuration: {0}")]
    Config(String),

    // Data-shape errors (never coerced inside the core)
    #[error("Feature vector has {actual} values, expected {expected}")]
    Shape { expected: usize, actual: usize },

    // Numerical divergence (fatal for the run)
    #[error(
        "Non-finite {stage} loss at epoch {epoch}, batch {batch} (last good epoch: {})",
        epoch_label(.last_good_epoch)
    )]
    Divergence {
        epoch: usize,
        batch: usize,
        stage: &'static str,
        last_good_epoch: Option<usize>,
    },

    // Checkpoint errors
    #[error("Checkpoint I/O failed for {}: {source}", path.display())]
    CheckpointIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Checkpoint corrupt: {0}")]
    CheckpointCorrupt(String),

    #[error("Feature layout mismatch: expected v{expected_version} ({expected_hash:08x}), got v{actual_version} ({actual_hash:08x})")]
    LayoutMismatch {
        expected_version: u8,
        expected_hash: u32,
        actual_version: u8,
        actual_hash: u32,
    },

    // Dataset / evaluation errors
    #[error("Dataset error: {0}")]
    Dataset(String),

    #[error("Evaluation error: {0}")]
    Evaluation(String),

    // Generic wrappers
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

fn epoch_label(epoch: &Option<usize>) -> String {
    epoch.map(|e| e.to_string()).unwrap_or_else(|| "none".to_string())
}

impl DetectorError {
    /// Fatal errors end a training run; everything else is caller input.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            DetectorError::Divergence { .. } | DetectorError::CheckpointIo { .. }
        )
    }
}

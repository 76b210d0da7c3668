//! Central Configuration Constants
//!
//! Single source of truth for all configuration defaults.
//! Environment variables override the path and calibration defaults.

use std::path::PathBuf;

/// App version
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// App name
pub const APP_NAME: &str = "flowgan";

/// Default percentile for the threshold policy
pub const DEFAULT_PERCENTILE: f32 = 95.0;

/// Discriminator loss below this value counts as collapse
pub const DEFAULT_COLLAPSE_EPSILON: f32 = 1e-5;

/// Default RNG seed for weight init and batch shuffling
pub const DEFAULT_SEED: u64 = 42;

/// Minimum number of training samples accepted
pub const MIN_TRAINING_SAMPLES: usize = 10;

// ============================================
// File names inside a run's output directory
// ============================================

pub const CURRENT_CHECKPOINT: &str = "current.ckpt.json";
pub const BEST_CHECKPOINT: &str = "best.ckpt.json";
pub const HISTORY_FILE: &str = "history.json";
pub const PROGRESS_LOG: &str = "progress.log";
pub const CONFUSION_MATRIX_FILE: &str = "confusion_matrix.json";

// ============================================
// Helper functions to read from env with fallback
// ============================================

/// Get output directory from environment or use the platform data dir
pub fn get_output_dir() -> PathBuf {
    std::env::var("FLOWGAN_OUTPUT_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            dirs::data_local_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(APP_NAME)
                .join("output")
        })
}

/// Get threshold percentile from environment or use default
pub fn get_percentile() -> f32 {
    std::env::var("FLOWGAN_PERCENTILE")
        .ok()
        .and_then(|s| s.parse().ok())
        .filter(|p: &f32| (0.0..=100.0).contains(p))
        .unwrap_or(DEFAULT_PERCENTILE)
}

//! Flow GAN Anomaly - core library
//!
//! Adversarial (GANomaly-style) anomaly detection over fixed-width network
//! flow feature vectors: training, checkpointing, scoring and calibration.

pub mod constants;
pub mod error;
pub mod logic;

pub use error::{DetectorError, DetectorResult};

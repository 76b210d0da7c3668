//! Logic Module - Business Logic & Engines
//!
//! ## Layout
//! - `features/` - model input contract (FeatureVector, layout version)
//! - `dataset/` - JSONL records, training/validation sets, prediction output
//! - `nn/` - conv layers, activations, Adam
//! - `model/` - Generator/Discriminator, checkpoints, scoring, calibration
//! - `training/` - adversarial trainer, metrics, progress feed
//! - `config` / `storage` - run configuration and atomic file writes

pub mod config;
pub mod dataset;
pub mod features;
pub mod model;
pub mod nn;
pub mod storage;
pub mod training;

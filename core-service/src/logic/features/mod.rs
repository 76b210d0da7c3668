//! Features Module - Model input contract
//!
//! FeatureVector (fixed 116-wide normalized flow record), LatentCode and
//! Label, plus the versioned layout every checkpoint is tied to.

pub mod layout;
pub mod vector;

// Re-export common types
pub use layout::{block_of, layout_hash, validate_layout, FeatureBlock, FEATURE_BLOCKS, FEATURE_COUNT, FEATURE_VERSION};
pub use vector::{FeatureVector, Label, LatentCode};

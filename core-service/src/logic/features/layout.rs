//! Feature layout contract
//!
//! A FeatureVector is an NSL-KDD flow record after ingestion: numeric
//! columns min-max scaled to [0, 1], then the one-hot blocks of the three
//! symbolic columns. The core never sees raw records.
//!
//! Bump `FEATURE_VERSION` whenever a block is added, removed, resized or
//! reordered. Checkpoints store the version and the layout hash; loading
//! one from another layout fails with `LayoutMismatch`.

use crc32fast::Hasher;

use crate::error::{DetectorError, DetectorResult};

pub const FEATURE_VERSION: u8 = 1;

/// Contiguous group of columns in the encoded record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeatureBlock {
    pub name: &'static str,
    pub width: usize,
}

/// Encoded column groups, in vector order
pub const FEATURE_BLOCKS: &[FeatureBlock] = &[
    FeatureBlock { name: "numeric", width: 38 },
    FeatureBlock { name: "protocol_type", width: 3 },
    FeatureBlock { name: "service", width: 64 },
    FeatureBlock { name: "flag", width: 11 },
];

pub const FEATURE_COUNT: usize = 116;

/// CRC32 over the version and every block name/width
pub fn layout_hash() -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(&[FEATURE_VERSION]);
    for block in FEATURE_BLOCKS {
        hasher.update(block.name.as_bytes());
        hasher.update(&[0]);
        hasher.update(&(block.width as u32).to_le_bytes());
    }
    hasher.finalize()
}

/// Block owning column `index`, with the offset inside that block
pub fn block_of(index: usize) -> Option<(FeatureBlock, usize)> {
    let mut start = 0;
    for block in FEATURE_BLOCKS {
        if index < start + block.width {
            return Some((*block, index - start));
        }
        start += block.width;
    }
    None
}

pub fn validate_layout(version: u8, hash: u32) -> DetectorResult<()> {
    let expected_hash = layout_hash();
    if version != FEATURE_VERSION || hash != expected_hash {
        return Err(DetectorError::LayoutMismatch {
            expected_version: FEATURE_VERSION,
            expected_hash,
            actual_version: version,
            actual_hash: hash,
        });
    }
    Ok(())
}

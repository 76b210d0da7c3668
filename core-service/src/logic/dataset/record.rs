use serde::{Deserialize, Serialize};

use crate::error::{DetectorError, DetectorResult};
use crate::logic::features::{block_of, FeatureVector, Label};

/// One JSONL line of a dataset file.
///
/// `features` is kept untyped here so a wrong width can be reported with
/// its line number instead of a bare serde error.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct DatasetRecord {
    pub features: Vec<f32>,

    // Ground truth; absent for unlabeled (training / production) data
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<Label>,
}

impl DatasetRecord {
    /// Validate width and finiteness
    pub fn to_vector(&self) -> DetectorResult<FeatureVector> {
        let vector = FeatureVector::from_slice(&self.features)?;
        if let Some(index) = vector.as_slice().iter().position(|v| !v.is_finite()) {
            let column = match block_of(index) {
                Some((block, offset)) => format!("{}[{}]", block.name, offset),
                None => index.to_string(),
            };
            return Err(DetectorError::Dataset(format!("non-finite value in column {} ({})", index, column)));
        }
        Ok(vector)
    }
}

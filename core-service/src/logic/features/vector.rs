//! Feature Vector - Core data structure for model input
//!
//! A FeatureVector always holds exactly `FEATURE_COUNT` values. Rows of any
//! other width are rejected with a shape error: padding and truncation
//! belong to the ingestion side, never to the core.

use ndarray::{Array2, ArrayView2};
use serde::{Deserialize, Serialize};

use super::layout::FEATURE_COUNT;
use crate::error::{DetectorError, DetectorResult};

// ============================================================================
// FEATURE VECTOR
// ============================================================================

/// Fixed-width, normalized flow record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<f32>", into = "Vec<f32>")]
pub struct FeatureVector {
    values: Vec<f32>,
}

impl FeatureVector {
    /// Build from a slice, rejecting anything but `FEATURE_COUNT` values
    pub fn from_slice(values: &[f32]) -> DetectorResult<Self> {
        Self::try_from(values.to_vec())
    }

    /// Build from a `(1, FEATURE_COUNT)` activation
    pub fn from_activation(activation: ArrayView2<f32>) -> DetectorResult<Self> {
        if activation.nrows() != 1 {
            return Err(DetectorError::Shape {
                expected: FEATURE_COUNT,
                actual: activation.len(),
            });
        }
        Self::try_from(activation.iter().copied().collect::<Vec<f32>>())
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<f32> {
        self.values.get(index).copied()
    }

    /// Single-channel activation `(1, FEATURE_COUNT)` for the conv stacks
    pub fn to_activation(&self) -> Array2<f32> {
        Array2::from_shape_fn((1, FEATURE_COUNT), |(_, i)| self.values[i])
    }

    pub fn is_finite(&self) -> bool {
        self.values.iter().all(|v| v.is_finite())
    }
}

impl TryFrom<Vec<f32>> for FeatureVector {
    type Error = DetectorError;

    fn try_from(values: Vec<f32>) -> Result<Self, Self::Error> {
        if values.len() != FEATURE_COUNT {
            return Err(DetectorError::Shape {
                expected: FEATURE_COUNT,
                actual: values.len(),
            });
        }
        Ok(Self { values })
    }
}

impl From<FeatureVector> for Vec<f32> {
    fn from(vector: FeatureVector) -> Self {
        vector.values
    }
}

// ============================================================================
// LATENT CODE
// ============================================================================

/// Bottleneck encoding produced by a Generator encoder.
///
/// Only meaningful next to the Generator that produced it; never persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct LatentCode {
    values: Vec<f32>,
}

impl LatentCode {
    /// Build from a `(latent_dim, 1)` bottleneck activation
    pub fn from_activation(activation: &Array2<f32>) -> Self {
        Self { values: activation.iter().copied().collect() }
    }

    pub fn to_activation(&self) -> Array2<f32> {
        Array2::from_shape_fn((self.values.len(), 1), |(c, _)| self.values[c])
    }

    pub fn dim(&self) -> usize {
        self.values.len()
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.values
    }
}

// ============================================================================
// LABEL
// ============================================================================

/// Binary classification outcome / ground truth
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE", try_from = "LabelRepr")]
pub enum Label {
    Normal,
    Anomaly,
}

impl Label {
    pub fn is_anomaly(self) -> bool {
        self == Label::Anomaly
    }

    pub fn from_anomaly(is_anomaly: bool) -> Self {
        if is_anomaly {
            Label::Anomaly
        } else {
            Label::Normal
        }
    }
}

impl std::fmt::Display for Label {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Label::Normal => write!(f, "NORMAL"),
            Label::Anomaly => write!(f, "ANOMALY"),
        }
    }
}

/// Accepted on-disk label spellings: names or NSL-KDD style 0/1
#[derive(Deserialize)]
#[serde(untagged)]
enum LabelRepr {
    Number(u8),
    Text(String),
}

impl TryFrom<LabelRepr> for Label {
    type Error = String;

    fn try_from(repr: LabelRepr) -> Result<Self, Self::Error> {
        match repr {
            LabelRepr::Number(0) => Ok(Label::Normal),
            LabelRepr::Number(1) => Ok(Label::Anomaly),
            LabelRepr::Number(n) => Err(format!("Unknown numeric label {}", n)),
            LabelRepr::Text(s) => match s.to_ascii_uppercase().as_str() {
                "NORMAL" => Ok(Label::Normal),
                "ANOMALY" | "ATTACK" => Ok(Label::Anomaly),
                _ => Err(format!("Unknown label '{}'", s)),
            },
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_short_and_long_rows() {
        for width in [0, 1, 115, 117, 122] {
            match FeatureVector::from_slice(&vec![0.5; width]) {
                Err(DetectorError::Shape { expected, actual }) => {
                    assert_eq!(expected, FEATURE_COUNT);
                    assert_eq!(actual, width);
                }
                other => panic!("width {} should be rejected, got {:?}", width, other),
            }
        }
        assert!(FeatureVector::from_slice(&[0.5; FEATURE_COUNT]).is_ok());
    }

    #[test]
    fn test_deserialize_enforces_width() {
        let ok: Result<FeatureVector, _> =
            serde_json::from_str(&serde_json::to_string(&vec![0.1f32; FEATURE_COUNT]).unwrap());
        assert!(ok.is_ok());

        let bad: Result<FeatureVector, _> = serde_json::from_str("[0.1, 0.2]");
        assert!(bad.is_err());
    }

    #[test]
    fn test_activation_shape() {
        let v = FeatureVector::from_slice(&[0.25; FEATURE_COUNT]).unwrap();
        let a = v.to_activation();
        assert_eq!(a.dim(), (1, FEATURE_COUNT));
        let back = FeatureVector::from_activation(a.view()).unwrap();
        assert_eq!(back, v);
    }

    #[test]
    fn test_label_parsing() {
        let labels: Vec<Label> =
            serde_json::from_str(r#"[0, 1, "NORMAL", "anomaly", "attack"]"#).unwrap();
        assert_eq!(
            labels,
            vec![Label::Normal, Label::Anomaly, Label::Normal, Label::Anomaly, Label::Anomaly]
        );
        assert!(serde_json::from_str::<Label>("2").is_err());
        assert_eq!(serde_json::to_string(&Label::Anomaly).unwrap(), "\"ANOMALY\"");
    }

    #[test]
    fn test_latent_code_layout() {
        let z = LatentCode::from_activation(&Array2::from_shape_fn((4, 1), |(c, _)| c as f32));
        assert_eq!(z.dim(), 4);
        assert_eq!(z.as_slice(), &[0.0, 1.0, 2.0, 3.0]);
        assert_eq!(z.to_activation().dim(), (4, 1));
    }
}

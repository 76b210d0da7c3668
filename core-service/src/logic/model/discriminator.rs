//! Discriminator - shared feature extractor + real/fake head
//!
//! `classify` runs the head on the embedding produced by `extract_features`;
//! both go through the same weights in a single pass.

use ndarray::Array2;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use super::architecture::Architecture;
use crate::error::{DetectorError, DetectorResult};
use crate::logic::features::FeatureVector;
use crate::logic::nn::{sigmoid, Adam, Conv1d, ConvGrad, ConvStack, StackGrad, StackTrace};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Discriminator {
    architecture: Architecture,
    features: ConvStack,
    classifier: Conv1d,
}

/// Traced pass: embedding plus the real/fake logit computed from it
#[derive(Debug, Clone)]
pub struct DiscriminatorPass {
    features: StackTrace,
    logit: f32,
}

impl DiscriminatorPass {
    pub fn embedding(&self) -> &Array2<f32> {
        self.features.output()
    }

    pub fn logit(&self) -> f32 {
        self.logit
    }

    /// Probability that the input is real
    pub fn probability(&self) -> f32 {
        sigmoid(self.logit)
    }
}

#[derive(Debug, Clone)]
pub struct DiscriminatorGrads {
    pub features: StackGrad,
    pub classifier: ConvGrad,
}

impl DiscriminatorGrads {
    pub fn zeros_like(discriminator: &Discriminator) -> Self {
        Self {
            features: StackGrad::zeros_like(&discriminator.features),
            classifier: ConvGrad::zeros_like(&discriminator.classifier),
        }
    }

    pub fn is_finite(&self) -> bool {
        self.features.is_finite() && self.classifier.is_finite()
    }
}

impl Discriminator {
    pub fn new<R: Rng + ?Sized>(architecture: Architecture, rng: &mut R) -> Self {
        Self {
            architecture,
            features: architecture.feature_extractor(rng),
            classifier: architecture.classifier(rng),
        }
    }

    pub fn architecture(&self) -> Architecture {
        self.architecture
    }

    pub fn num_parameters(&self) -> usize {
        self.features.num_parameters() + self.classifier.num_parameters()
    }

    /// Extractor and head have the layer shapes the architecture builds
    pub fn check_shapes(&self) -> DetectorResult<()> {
        let expected = Discriminator::new(self.architecture, &mut StdRng::seed_from_u64(0));
        if let Some(reason) = self.features.shape_mismatch(&expected.features) {
            return Err(DetectorError::CheckpointCorrupt(format!("discriminator features: {}", reason)));
        }
        if !self.classifier.same_shape(&expected.classifier) {
            return Err(DetectorError::CheckpointCorrupt(format!(
                "discriminator classifier: weight {:?}, expected {:?}",
                self.classifier.weight.dim(),
                expected.classifier.weight.dim()
            )));
        }
        Ok(())
    }

    /// Intermediate embedding, `(4 * base_channels, 14)`
    pub fn extract_features(&self, x: &FeatureVector) -> Array2<f32> {
        self.embed(&x.to_activation())
    }

    /// Probability that `x` is a real record
    pub fn classify(&self, x: &FeatureVector) -> f32 {
        self.forward_traced(&x.to_activation()).probability()
    }

    pub fn embed(&self, x: &Array2<f32>) -> Array2<f32> {
        self.features.forward(x)
    }

    pub fn forward_traced(&self, x: &Array2<f32>) -> DiscriminatorPass {
        let features = self.features.forward_traced(x);
        let logit = self.classifier.forward(features.output())[[0, 0]];
        DiscriminatorPass { features, logit }
    }

    /// Back-propagate a gradient on the logit and/or on the embedding.
    ///
    /// Parameter gradients go into `grads` when given (discriminator update);
    /// the generator update passes `None` and only uses the returned input
    /// gradient.
    pub fn backward(
        &self,
        pass: &DiscriminatorPass,
        grad_logit: f32,
        grad_embedding: Option<&Array2<f32>>,
        mut grads: Option<&mut DiscriminatorGrads>,
    ) -> Array2<f32> {
        let embedding = pass.embedding();
        let mut g = match grad_embedding {
            Some(ge) => ge.clone(),
            None => Array2::zeros(embedding.raw_dim()),
        };
        if grad_logit != 0.0 {
            let gy = Array2::from_elem((1, 1), grad_logit);
            let head_grad = grads.as_mut().map(|gs| &mut gs.classifier);
            g += &self.classifier.backward(embedding, &gy, head_grad);
        }
        let feature_grad = grads.map(|gs| &mut gs.features);
        self.features.backward(&pass.features, &g, feature_grad)
    }

    pub fn apply(&mut self, grads: &DiscriminatorGrads, optimizer: &mut Adam) {
        optimizer.begin_step();
        let slot = self.features.apply(&grads.features, optimizer, 0);
        optimizer.update(slot, &mut self.classifier.weight, &grads.classifier.weight);
        optimizer.update(slot + 1, &mut self.classifier.bias, &grads.classifier.bias);
    }

    /// Fresh weights with the same architecture
    pub fn reinitialize<R: Rng + ?Sized>(&mut self, rng: &mut R) {
        *self = Discriminator::new(self.architecture, rng);
    }
}

#[cfg(test)]
impl Discriminator {
    /// Hand-set discriminator that is near certain on both sides of
    /// `midpoint`: inputs whose values all lie at or below
    /// `midpoint - spread` get a logit of at least `margin`, inputs at or
    /// above `midpoint + spread` at most `-margin`.
    pub(crate) fn saturated(architecture: Architecture, midpoint: f32, spread: f32, margin: f32) -> Self {
        let mut d = Discriminator::new(architecture, &mut StdRng::seed_from_u64(0));
        // Positive weights and zero bias make the embedding sum linear and
        // increasing in every input value
        for layer in &mut d.features.layers {
            layer.weight.fill(0.25);
            layer.bias.fill(0.0);
        }
        let response = |v: f32| {
            let x = Array2::from_elem((1, architecture.feature_count), v);
            d.features.forward(&x).sum()
        };
        let at_mid = response(midpoint);
        let below = response(midpoint - spread);
        let scale = margin / (at_mid - below);
        d.classifier.weight.fill(-scale);
        d.classifier.bias.fill(scale * at_mid);
        d
    }
}

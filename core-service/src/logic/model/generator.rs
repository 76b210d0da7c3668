//! Generator - encoder / decoder / re-encoder
//!
//! `reconstruct(x) = decode(encode(x))`. The second encoder maps the
//! reconstruction back into latent space so the encoding loss can compare
//! `z = encode(x)` with `z' = reencode(x_hat)`.

use ndarray::Array2;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use super::architecture::Architecture;
use crate::error::{DetectorError, DetectorResult};
use crate::logic::features::{FeatureVector, LatentCode};
use crate::logic::nn::{Adam, ConvStack, StackGrad, StackTrace};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Generator {
    architecture: Architecture,
    encoder: ConvStack,
    decoder: ConvStack,
    reencoder: ConvStack,
}

/// Plain forward outputs for one record
#[derive(Debug, Clone)]
pub struct GeneratorOutput {
    pub latent: Array2<f32>,
    pub reconstruction: Array2<f32>,
    pub relatent: Array2<f32>,
}

/// Traced forward pass, consumed by `Generator::backward`
#[derive(Debug, Clone)]
pub struct GeneratorPass {
    encoder: StackTrace,
    decoder: StackTrace,
    reencoder: StackTrace,
}

impl GeneratorPass {
    pub fn latent(&self) -> &Array2<f32> {
        self.encoder.output()
    }

    pub fn reconstruction(&self) -> &Array2<f32> {
        self.decoder.output()
    }

    pub fn relatent(&self) -> &Array2<f32> {
        self.reencoder.output()
    }
}

/// Upstream gradients for one traced pass
#[derive(Debug, Clone)]
pub struct GeneratorLossGrad {
    /// d loss / d x_hat (reconstruction + adversarial terms)
    pub reconstruction: Array2<f32>,
    /// d loss / d z
    pub latent: Array2<f32>,
    /// d loss / d z'
    pub relatent: Array2<f32>,
}

#[derive(Debug, Clone)]
pub struct GeneratorGrads {
    pub encoder: StackGrad,
    pub decoder: StackGrad,
    pub reencoder: StackGrad,
}

impl GeneratorGrads {
    pub fn zeros_like(generator: &Generator) -> Self {
        Self {
            encoder: StackGrad::zeros_like(&generator.encoder),
            decoder: StackGrad::zeros_like(&generator.decoder),
            reencoder: StackGrad::zeros_like(&generator.reencoder),
        }
    }

    pub fn is_finite(&self) -> bool {
        self.encoder.is_finite() && self.decoder.is_finite() && self.reencoder.is_finite()
    }
}

impl Generator {
    pub fn new<R: Rng + ?Sized>(architecture: Architecture, rng: &mut R) -> Self {
        Self {
            architecture,
            encoder: architecture.encoder(rng),
            decoder: architecture.decoder(rng),
            reencoder: architecture.encoder(rng),
        }
    }

    pub fn architecture(&self) -> Architecture {
        self.architecture
    }

    pub fn num_parameters(&self) -> usize {
        self.encoder.num_parameters() + self.decoder.num_parameters() + self.reencoder.num_parameters()
    }

    /// Every stack has the layer shapes its architecture builds
    pub fn check_shapes(&self) -> DetectorResult<()> {
        let expected = Generator::new(self.architecture, &mut StdRng::seed_from_u64(0));
        let stacks = [
            ("encoder", &self.encoder, &expected.encoder),
            ("decoder", &self.decoder, &expected.decoder),
            ("reencoder", &self.reencoder, &expected.reencoder),
        ];
        for (name, stack, reference) in stacks {
            if let Some(reason) = stack.shape_mismatch(reference) {
                return Err(DetectorError::CheckpointCorrupt(format!("generator {}: {}", name, reason)));
            }
        }
        Ok(())
    }

    pub fn encode(&self, x: &FeatureVector) -> LatentCode {
        LatentCode::from_activation(&self.encoder.forward(&x.to_activation()))
    }

    pub fn decode(&self, z: &LatentCode) -> DetectorResult<FeatureVector> {
        FeatureVector::from_activation(self.decoder.forward(&z.to_activation()).view())
    }

    pub fn reconstruct(&self, x: &FeatureVector) -> DetectorResult<FeatureVector> {
        self.decode(&self.encode(x))
    }

    /// Encode a reconstruction with the second encoder
    pub fn reencode(&self, x_hat: &FeatureVector) -> LatentCode {
        LatentCode::from_activation(&self.reencoder.forward(&x_hat.to_activation()))
    }

    /// Full inference pass on a `(1, feature_count)` activation
    pub fn forward(&self, x: &Array2<f32>) -> GeneratorOutput {
        let latent = self.encoder.forward(x);
        let reconstruction = self.decoder.forward(&latent);
        let relatent = self.reencoder.forward(&reconstruction);
        GeneratorOutput { latent, reconstruction, relatent }
    }

    pub fn forward_traced(&self, x: &Array2<f32>) -> GeneratorPass {
        let encoder = self.encoder.forward_traced(x);
        let decoder = self.decoder.forward_traced(encoder.output());
        let reencoder = self.reencoder.forward_traced(decoder.output());
        GeneratorPass { encoder, decoder, reencoder }
    }

    /// Accumulate parameter gradients for one record into `grads`
    pub fn backward(&self, pass: &GeneratorPass, upstream: &GeneratorLossGrad, grads: &mut GeneratorGrads) {
        // x_hat feeds the loss directly and through the re-encoder
        let through_reencoder =
            self.reencoder.backward(&pass.reencoder, &upstream.relatent, Some(&mut grads.reencoder));
        let grad_reconstruction = &upstream.reconstruction + &through_reencoder;

        let through_decoder = self.decoder.backward(&pass.decoder, &grad_reconstruction, Some(&mut grads.decoder));
        let grad_latent = &upstream.latent + &through_decoder;

        self.encoder.backward(&pass.encoder, &grad_latent, Some(&mut grads.encoder));
    }

    /// One optimizer step over all three stacks
    pub fn apply(&mut self, grads: &GeneratorGrads, optimizer: &mut Adam) {
        optimizer.begin_step();
        let slot = self.encoder.apply(&grads.encoder, optimizer, 0);
        let slot = self.decoder.apply(&grads.decoder, optimizer, slot);
        self.reencoder.apply(&grads.reencoder, optimizer, slot);
    }

    pub fn is_finite(&self) -> bool {
        [&self.encoder, &self.decoder, &self.reencoder]
            .iter()
            .flat_map(|stack| stack.layers.iter())
            .all(|layer| layer.weight.iter().chain(layer.bias.iter()).all(|v| v.is_finite()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logic::features::FEATURE_COUNT;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn generator() -> Generator {
        Generator::new(Architecture::new(6, 2), &mut StdRng::seed_from_u64(11))
    }

    fn sample() -> FeatureVector {
        let values: Vec<f32> = (0..FEATURE_COUNT).map(|i| (i % 7) as f32 / 7.0).collect();
        FeatureVector::try_from(values).unwrap()
    }

    #[test]
    fn test_encode_is_narrower_than_input() {
        let g = generator();
        let z = g.encode(&sample());
        assert_eq!(z.dim(), 6);
        assert!(z.dim() < FEATURE_COUNT);
    }

    #[test]
    fn test_reconstruct_shape_and_range() {
        let g = generator();
        let x_hat = g.reconstruct(&sample()).unwrap();
        assert_eq!(x_hat.len(), FEATURE_COUNT);
        assert!(x_hat.as_slice().iter().all(|v| (0.0..=1.0).contains(v)));
        assert_eq!(g.reencode(&x_hat).dim(), 6);
    }

    #[test]
    fn test_same_seed_same_weights() {
        assert_eq!(generator(), generator());
    }

    #[test]
    fn test_traced_matches_plain_forward() {
        let g = generator();
        let x = sample().to_activation();
        let plain = g.forward(&x);
        let pass = g.forward_traced(&x);
        assert_eq!(&plain.latent, pass.latent());
        assert_eq!(&plain.reconstruction, pass.reconstruction());
        assert_eq!(&plain.relatent, pass.relatent());
    }

    #[test]
    fn test_apply_moves_weights() {
        let mut g = generator();
        let before = g.clone();
        let x = sample().to_activation();
        let pass = g.forward_traced(&x);
        let upstream = GeneratorLossGrad {
            reconstruction: pass.reconstruction().mapv(|v| v - 0.5),
            latent: Array2::zeros(pass.latent().raw_dim()),
            relatent: Array2::zeros(pass.relatent().raw_dim()),
        };
        let mut grads = GeneratorGrads::zeros_like(&g);
        g.backward(&pass, &upstream, &mut grads);
        assert!(grads.is_finite());

        let mut adam = Adam::new(0.01, 0.5);
        g.apply(&grads, &mut adam);
        assert_ne!(g, before);
        assert!(g.is_finite());
    }
}

//! Adversarial loss composition
//!
//! Discriminator: 0.5 * (BCE(D(x), real) + BCE(D(x_hat), fake))
//! Generator:     w_adv * mean((f(x) - f(x_hat))^2)
//!              + w_con * mean|x - x_hat|
//!              + w_enc * mean((z - z')^2)
//!
//! Both steps work record by record and accumulate gradients already
//! scaled by `1 / batch_len`, so the sum over a batch is the batch mean.

use ndarray::Array2;
use serde::{Deserialize, Serialize};

use crate::logic::config::TrainingConfig;
use crate::logic::model::{Discriminator, DiscriminatorGrads, Generator, GeneratorGrads, GeneratorLossGrad};
use crate::logic::nn::loss::{bce_with_logit, bce_with_logit_grad, l1, l1_grad, l2, l2_grad};

const REAL: f32 = 1.0;
const FAKE: f32 = 0.0;

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct DiscriminatorLoss {
    pub total: f32,
    pub real: f32,
    pub fake: f32,
}

impl DiscriminatorLoss {
    pub fn is_finite(&self) -> bool {
        self.total.is_finite()
    }

    fn accumulate(&mut self, other: &DiscriminatorLoss, scale: f32) {
        self.total += other.total * scale;
        self.real += other.real * scale;
        self.fake += other.fake * scale;
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct GeneratorLoss {
    pub total: f32,
    pub adversarial: f32,
    pub reconstruction: f32,
    pub encoding: f32,
}

impl GeneratorLoss {
    pub fn is_finite(&self) -> bool {
        self.total.is_finite()
    }

    fn accumulate(&mut self, other: &GeneratorLoss, scale: f32) {
        self.total += other.total * scale;
        self.adversarial += other.adversarial * scale;
        self.reconstruction += other.reconstruction * scale;
        self.encoding += other.encoding * scale;
    }
}

/// Generator loss weights
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LossWeights {
    pub w_adv: f32,
    pub w_con: f32,
    pub w_enc: f32,
}

impl From<&TrainingConfig> for LossWeights {
    fn from(config: &TrainingConfig) -> Self {
        Self { w_adv: config.w_adv, w_con: config.w_con, w_enc: config.w_enc }
    }
}

/// Discriminator forward/backward over a batch. The generator only
/// produces the fake inputs; no gradient reaches it.
pub fn discriminator_batch(
    generator: &Generator,
    discriminator: &Discriminator,
    batch: &[Array2<f32>],
    grads: &mut DiscriminatorGrads,
) -> DiscriminatorLoss {
    let scale = 1.0 / batch.len().max(1) as f32;
    let mut loss = DiscriminatorLoss::default();

    for x in batch {
        let x_hat = generator.forward(x).reconstruction;

        let real = discriminator.forward_traced(x);
        let fake = discriminator.forward_traced(&x_hat);

        let real_loss = bce_with_logit(real.logit(), REAL);
        let fake_loss = bce_with_logit(fake.logit(), FAKE);

        discriminator.backward(&real, 0.5 * scale * bce_with_logit_grad(real.logit(), REAL), None, Some(&mut *grads));
        discriminator.backward(&fake, 0.5 * scale * bce_with_logit_grad(fake.logit(), FAKE), None, Some(&mut *grads));

        let record = DiscriminatorLoss {
            total: 0.5 * (real_loss + fake_loss),
            real: real_loss,
            fake: fake_loss,
        };
        loss.accumulate(&record, scale);
    }
    loss
}

/// Generator forward/backward over a batch. Gradients flow through the
/// discriminator's feature extractor but only generator grads are kept.
pub fn generator_batch(
    generator: &Generator,
    discriminator: &Discriminator,
    batch: &[Array2<f32>],
    weights: &LossWeights,
    grads: &mut GeneratorGrads,
) -> GeneratorLoss {
    let scale = 1.0 / batch.len().max(1) as f32;
    let mut loss = GeneratorLoss::default();

    for x in batch {
        let pass = generator.forward_traced(x);
        let x_hat = pass.reconstruction();
        let z = pass.latent();
        let z_re = pass.relatent();

        // Feature matching on the discriminator embedding
        let f_real = discriminator.embed(x);
        let fake = discriminator.forward_traced(x_hat);
        let adversarial = l2(fake.embedding(), &f_real);
        let g_embedding = l2_grad(fake.embedding(), &f_real) * (weights.w_adv * scale);
        let g_adv = discriminator.backward(&fake, 0.0, Some(&g_embedding), None);

        let reconstruction = l1(x_hat, x);
        let g_con = l1_grad(x_hat, x) * (weights.w_con * scale);

        let encoding = l2(z, z_re);
        let enc_scale = weights.w_enc * scale;

        let upstream = GeneratorLossGrad {
            reconstruction: g_adv + &g_con,
            latent: l2_grad(z, z_re) * enc_scale,
            relatent: l2_grad(z_re, z) * enc_scale,
        };
        generator.backward(&pass, &upstream, grads);

        let record = GeneratorLoss {
            total: weights.w_adv * adversarial + weights.w_con * reconstruction + weights.w_enc * encoding,
            adversarial,
            reconstruction,
            encoding,
        };
        loss.accumulate(&record, scale);
    }
    loss
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logic::features::FEATURE_COUNT;
    use crate::logic::model::Architecture;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn setup() -> (Generator, Discriminator, Vec<Array2<f32>>) {
        let arch = Architecture::new(4, 2);
        let mut rng = StdRng::seed_from_u64(21);
        let g = Generator::new(arch, &mut rng);
        let d = Discriminator::new(arch, &mut rng);
        let batch = (0..4)
            .map(|k| Array2::from_shape_fn((1, FEATURE_COUNT), |(_, i)| ((i + k) % 5) as f32 / 5.0))
            .collect();
        (g, d, batch)
    }

    #[test]
    fn test_fresh_discriminator_loss_near_ln2() {
        let (g, d, batch) = setup();
        let mut grads = DiscriminatorGrads::zeros_like(&d);
        let loss = discriminator_batch(&g, &d, &batch, &mut grads);
        // Near-zero init: D outputs ~0.5 for everything
        assert!((loss.total - std::f32::consts::LN_2).abs() < 0.05, "{:?}", loss);
        assert!(grads.is_finite());
    }

    #[test]
    fn test_generator_loss_is_weighted_sum() {
        let (g, d, batch) = setup();
        let weights = LossWeights { w_adv: 1.0, w_con: 50.0, w_enc: 1.0 };
        let mut grads = GeneratorGrads::zeros_like(&g);
        let loss = generator_batch(&g, &d, &batch, &weights, &mut grads);

        let expected = loss.adversarial + 50.0 * loss.reconstruction + loss.encoding;
        assert!((loss.total - expected).abs() < 1e-3 * expected.max(1.0));
        assert!(loss.reconstruction > 0.0);
        assert!(grads.is_finite());
    }

    #[test]
    fn test_generator_steps_reduce_loss() {
        let (mut g, d, batch) = setup();
        let weights = LossWeights { w_adv: 1.0, w_con: 50.0, w_enc: 1.0 };
        let mut adam = crate::logic::nn::Adam::new(0.002, 0.5);

        let mut grads = GeneratorGrads::zeros_like(&g);
        let first = generator_batch(&g, &d, &batch, &weights, &mut grads);
        for _ in 0..15 {
            let mut grads = GeneratorGrads::zeros_like(&g);
            generator_batch(&g, &d, &batch, &weights, &mut grads);
            g.apply(&grads, &mut adam);
        }
        let mut grads = GeneratorGrads::zeros_like(&g);
        let last = generator_batch(&g, &d, &batch, &weights, &mut grads);
        assert!(last.total < first.total, "{} -> {}", first.total, last.total);
    }
}

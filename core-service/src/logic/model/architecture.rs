//! Network geometry shared by the Generator and the Discriminator.
//!
//! Downsampling stages are Conv1d(k=4, s=2, p=1) until the length drops to
//! `MIN_LENGTH` or below: 116 -> 58 -> 29 -> 14. Channels go 1 -> ngf ->
//! 2ngf -> 4ngf. A final full-width conv collapses the length to 1.

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::{DetectorError, DetectorResult};
use crate::logic::features::FEATURE_COUNT;
use crate::logic::nn::{Activation, Conv1d, ConvStack};

const KERNEL: usize = 4;
const STRIDE: usize = 2;
const PADDING: usize = 1;
const MIN_LENGTH: usize = 16;
const LEAKY_SLOPE: f32 = 0.2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Architecture {
    pub feature_count: usize,
    /// Bottleneck width (nz)
    pub latent_dim: usize,
    /// Channels of the first stage (ngf); doubles every stage
    pub base_channels: usize,
}

impl Architecture {
    pub fn new(latent_dim: usize, base_channels: usize) -> Self {
        Self { feature_count: FEATURE_COUNT, latent_dim, base_channels }
    }

    pub fn validate(&self) -> DetectorResult<()> {
        if self.feature_count != FEATURE_COUNT {
            return Err(DetectorError::Shape { expected: FEATURE_COUNT, actual: self.feature_count });
        }
        if self.base_channels == 0 {
            return Err(DetectorError::Config("base_channels must be > 0".into()));
        }
        if self.latent_dim == 0 || self.latent_dim >= self.feature_count {
            return Err(DetectorError::Config(format!(
                "latent_dim must be in 1..{}, got {}",
                self.feature_count, self.latent_dim
            )));
        }
        Ok(())
    }

    /// Activation lengths along the downsampling path, input first
    pub fn lengths(&self) -> Vec<usize> {
        let mut lengths = vec![self.feature_count];
        let mut len = self.feature_count;
        while len > MIN_LENGTH {
            len = (len + 2 * PADDING - KERNEL) / STRIDE + 1;
            lengths.push(len);
        }
        lengths
    }

    /// Channel counts along the downsampling path, input first
    pub fn channels(&self) -> Vec<usize> {
        let stages = self.lengths().len() - 1;
        std::iter::once(1)
            .chain((0..stages).map(|i| self.base_channels << i))
            .collect()
    }

    /// `(channels, length)` of the discriminator embedding
    pub fn embedding_shape(&self) -> (usize, usize) {
        let lengths = self.lengths();
        let channels = self.channels();
        (channels[channels.len() - 1], lengths[lengths.len() - 1])
    }

    fn downsampling<R: Rng + ?Sized>(&self, rng: &mut R) -> Vec<Conv1d> {
        self.channels()
            .windows(2)
            .map(|pair| Conv1d::new(pair[0], pair[1], KERNEL, STRIDE, PADDING, rng))
            .collect()
    }

    /// Encoder: downsampling stages + bottleneck to `(latent_dim, 1)`
    pub fn encoder<R: Rng + ?Sized>(&self, rng: &mut R) -> ConvStack {
        let (top_channels, top_len) = self.embedding_shape();
        let mut layers = self.downsampling(rng);
        layers.push(Conv1d::new(top_channels, self.latent_dim, top_len, 1, 0, rng));
        ConvStack::new(layers, Activation::LeakyRelu(LEAKY_SLOPE), Activation::Identity)
    }

    /// Decoder: mirror of the encoder back to `(1, feature_count)` in [0, 1]
    pub fn decoder<R: Rng + ?Sized>(&self, rng: &mut R) -> ConvStack {
        let lengths = self.lengths();
        let channels = self.channels();
        let (top_channels, top_len) = self.embedding_shape();

        let mut layers = vec![Conv1d::transposed(self.latent_dim, top_channels, top_len, 1, 0, 0, rng)];
        for i in (0..lengths.len() - 1).rev() {
            // Recover odd lengths lost to integer division (29 -> 14)
            let output_padding = lengths[i] - STRIDE * lengths[i + 1];
            layers.push(Conv1d::transposed(
                channels[i + 1],
                channels[i],
                KERNEL,
                STRIDE,
                PADDING,
                output_padding,
                rng,
            ));
        }
        ConvStack::new(layers, Activation::Relu, Activation::Sigmoid)
    }

    /// Discriminator feature extractor; its output is the embedding
    pub fn feature_extractor<R: Rng + ?Sized>(&self, rng: &mut R) -> ConvStack {
        let act = Activation::LeakyRelu(LEAKY_SLOPE);
        ConvStack::new(self.downsampling(rng), act, act)
    }

    /// Discriminator head: embedding -> single logit
    pub fn classifier<R: Rng + ?Sized>(&self, rng: &mut R) -> Conv1d {
        let (top_channels, top_len) = self.embedding_shape();
        Conv1d::new(top_channels, 1, top_len, 1, 0, rng)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_lengths_and_channels() {
        let arch = Architecture::new(8, 4);
        assert_eq!(arch.lengths(), vec![116, 58, 29, 14]);
        assert_eq!(arch.channels(), vec![1, 4, 8, 16]);
        assert_eq!(arch.embedding_shape(), (16, 14));
    }

    #[test]
    fn test_encoder_decoder_shapes() {
        let arch = Architecture::new(8, 2);
        let mut rng = StdRng::seed_from_u64(1);
        let x = Array2::from_elem((1, FEATURE_COUNT), 0.5);

        let z = arch.encoder(&mut rng).forward(&x);
        assert_eq!(z.dim(), (8, 1));

        let x_hat = arch.decoder(&mut rng).forward(&z);
        assert_eq!(x_hat.dim(), (1, FEATURE_COUNT));
        assert!(x_hat.iter().all(|v| (0.0..=1.0).contains(v)));

        let f = arch.feature_extractor(&mut rng).forward(&x);
        assert_eq!(f.dim(), arch.embedding_shape());
        assert_eq!(arch.classifier(&mut rng).forward(&f).dim(), (1, 1));
    }

    #[test]
    fn test_validate() {
        assert!(Architecture::new(32, 16).validate().is_ok());
        assert!(Architecture::new(0, 16).validate().is_err());
        assert!(Architecture::new(FEATURE_COUNT, 16).validate().is_err());
        assert!(Architecture::new(8, 0).validate().is_err());
    }
}

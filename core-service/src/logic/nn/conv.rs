//! 1-D convolution and transposed convolution with explicit backward pass.
//!
//! Activations are `(channels, length)` arrays for a single record; batches
//! are handled by the caller, which accumulates gradients record by record.

use ndarray::{Array1, Array2, Array3};
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Standard deviation of the DCGAN-style weight init
pub const INIT_STD: f64 = 0.02;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConvKind {
    /// Strided convolution, shrinks the length
    Forward,
    /// Transposed convolution, grows the length
    Transposed,
}

/// Conv layer parameters.
///
/// Weight layout is `(out, in, kernel)` for `Forward` and
/// `(in, out, kernel)` for `Transposed`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conv1d {
    pub kind: ConvKind,
    pub stride: usize,
    pub padding: usize,
    pub output_padding: usize,
    pub weight: Array3<f32>,
    pub bias: Array1<f32>,
}

/// Gradient buffers matching one `Conv1d`
#[derive(Debug, Clone)]
pub struct ConvGrad {
    pub weight: Array3<f32>,
    pub bias: Array1<f32>,
}

impl ConvGrad {
    pub fn zeros_like(layer: &Conv1d) -> Self {
        Self {
            weight: Array3::zeros(layer.weight.raw_dim()),
            bias: Array1::zeros(layer.bias.raw_dim()),
        }
    }

    pub fn is_finite(&self) -> bool {
        self.weight.iter().chain(self.bias.iter()).all(|v| v.is_finite())
    }
}

/// Box-Muller normal sample
pub fn sample_normal<R: Rng + ?Sized>(rng: &mut R, std: f64) -> f32 {
    let u1: f64 = rng.gen::<f64>().max(1e-10);
    let u2: f64 = rng.gen::<f64>();
    let z = (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos();
    (z * std) as f32
}

impl Conv1d {
    /// Strided convolution `in_channels -> out_channels`
    pub fn new<R: Rng + ?Sized>(
        in_channels: usize,
        out_channels: usize,
        kernel: usize,
        stride: usize,
        padding: usize,
        rng: &mut R,
    ) -> Self {
        Self {
            kind: ConvKind::Forward,
            stride,
            padding,
            output_padding: 0,
            weight: Array3::from_shape_fn((out_channels, in_channels, kernel), |_| {
                sample_normal(rng, INIT_STD)
            }),
            bias: Array1::zeros(out_channels),
        }
    }

    /// Transposed convolution `in_channels -> out_channels`
    pub fn transposed<R: Rng + ?Sized>(
        in_channels: usize,
        out_channels: usize,
        kernel: usize,
        stride: usize,
        padding: usize,
        output_padding: usize,
        rng: &mut R,
    ) -> Self {
        Self {
            kind: ConvKind::Transposed,
            stride,
            padding,
            output_padding,
            weight: Array3::from_shape_fn((in_channels, out_channels, kernel), |_| {
                sample_normal(rng, INIT_STD)
            }),
            bias: Array1::zeros(out_channels),
        }
    }

    pub fn in_channels(&self) -> usize {
        match self.kind {
            ConvKind::Forward => self.weight.dim().1,
            ConvKind::Transposed => self.weight.dim().0,
        }
    }

    pub fn out_channels(&self) -> usize {
        match self.kind {
            ConvKind::Forward => self.weight.dim().0,
            ConvKind::Transposed => self.weight.dim().1,
        }
    }

    pub fn kernel(&self) -> usize {
        self.weight.dim().2
    }

    pub fn num_parameters(&self) -> usize {
        self.weight.len() + self.bias.len()
    }

    /// Same kind, geometry and parameter shapes as `other`
    pub fn same_shape(&self, other: &Conv1d) -> bool {
        self.kind == other.kind
            && self.stride == other.stride
            && self.padding == other.padding
            && self.output_padding == other.output_padding
            && self.weight.dim() == other.weight.dim()
            && self.bias.len() == other.bias.len()
    }

    /// Output length for an input of `len`
    pub fn output_len(&self, len: usize) -> usize {
        let (k, s, p) = (self.kernel(), self.stride, self.padding);
        match self.kind {
            ConvKind::Forward => (len + 2 * p).saturating_sub(k) / s + 1,
            ConvKind::Transposed => ((len - 1) * s + k + self.output_padding).saturating_sub(2 * p),
        }
    }

    /// Input position feeding output `t` through tap `j` (forward kind)
    #[inline]
    fn tap(&self, t: usize, j: usize, len: usize) -> Option<usize> {
        let pos = (t * self.stride + j) as isize - self.padding as isize;
        (pos >= 0 && (pos as usize) < len).then_some(pos as usize)
    }

    pub fn forward(&self, x: &Array2<f32>) -> Array2<f32> {
        let (c_in, l_in) = x.dim();
        let c_out = self.out_channels();
        let l_out = self.output_len(l_in);
        let k = self.kernel();
        let mut y = Array2::zeros((c_out, l_out));

        match self.kind {
            ConvKind::Forward => {
                for o in 0..c_out {
                    for t in 0..l_out {
                        let mut acc = self.bias[o];
                        for j in 0..k {
                            if let Some(pos) = self.tap(t, j, l_in) {
                                for c in 0..c_in {
                                    acc += self.weight[[o, c, j]] * x[[c, pos]];
                                }
                            }
                        }
                        y[[o, t]] = acc;
                    }
                }
            }
            ConvKind::Transposed => {
                for o in 0..c_out {
                    y.row_mut(o).fill(self.bias[o]);
                }
                for c in 0..c_in {
                    for i in 0..l_in {
                        let xv = x[[c, i]];
                        for j in 0..k {
                            if let Some(t) = self.tap(i, j, l_out) {
                                for o in 0..c_out {
                                    y[[o, t]] += self.weight[[c, o, j]] * xv;
                                }
                            }
                        }
                    }
                }
            }
        }
        y
    }

    /// Backward pass for input `x` and upstream gradient `gy`.
    ///
    /// Accumulates parameter gradients into `grad` when given and returns
    /// the gradient with respect to `x`.
    pub fn backward(
        &self,
        x: &Array2<f32>,
        gy: &Array2<f32>,
        mut grad: Option<&mut ConvGrad>,
    ) -> Array2<f32> {
        let (c_in, l_in) = x.dim();
        let (c_out, l_out) = gy.dim();
        let k = self.kernel();
        let mut gx = Array2::zeros((c_in, l_in));

        if let Some(g) = grad.as_mut() {
            for o in 0..c_out {
                g.bias[o] += gy.row(o).sum();
            }
        }

        match self.kind {
            ConvKind::Forward => {
                for o in 0..c_out {
                    for t in 0..l_out {
                        let g_out = gy[[o, t]];
                        if g_out == 0.0 {
                            continue;
                        }
                        for j in 0..k {
                            if let Some(pos) = self.tap(t, j, l_in) {
                                for c in 0..c_in {
                                    gx[[c, pos]] += g_out * self.weight[[o, c, j]];
                                    if let Some(g) = grad.as_mut() {
                                        g.weight[[o, c, j]] += g_out * x[[c, pos]];
                                    }
                                }
                            }
                        }
                    }
                }
            }
            ConvKind::Transposed => {
                for c in 0..c_in {
                    for i in 0..l_in {
                        let xv = x[[c, i]];
                        for j in 0..k {
                            if let Some(t) = self.tap(i, j, l_out) {
                                for o in 0..c_out {
                                    let g_out = gy[[o, t]];
                                    gx[[c, i]] += g_out * self.weight[[c, o, j]];
                                    if let Some(g) = grad.as_mut() {
                                        g.weight[[c, o, j]] += g_out * xv;
                                    }
                                }
                            }
                        }
                    }
                }
            }
        }
        gx
    }
}

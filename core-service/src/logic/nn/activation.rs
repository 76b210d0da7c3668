//! Element-wise activations and their derivatives.

use ndarray::{Array2, Zip};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Activation {
    Identity,
    Relu,
    LeakyRelu(f32),
    Sigmoid,
    Tanh,
}

/// Numerically stable logistic function
pub fn sigmoid(x: f32) -> f32 {
    if x >= 0.0 {
        1.0 / (1.0 + (-x).exp())
    } else {
        let e = x.exp();
        e / (1.0 + e)
    }
}

impl Activation {
    pub fn apply(self, x: f32) -> f32 {
        match self {
            Activation::Identity => x,
            Activation::Relu => x.max(0.0),
            Activation::LeakyRelu(slope) => {
                if x > 0.0 {
                    x
                } else {
                    slope * x
                }
            }
            Activation::Sigmoid => sigmoid(x),
            Activation::Tanh => x.tanh(),
        }
    }

    pub fn forward(self, pre: &Array2<f32>) -> Array2<f32> {
        match self {
            Activation::Identity => pre.clone(),
            _ => pre.mapv(|v| self.apply(v)),
        }
    }

    /// Gradient through the activation, given the pre-activation `pre`, the
    /// activation output `out` and the upstream gradient `grad`.
    pub fn backward(self, pre: &Array2<f32>, out: &Array2<f32>, grad: &Array2<f32>) -> Array2<f32> {
        let mut result = Array2::zeros(grad.raw_dim());
        Zip::from(&mut result)
            .and(pre)
            .and(out)
            .and(grad)
            .for_each(|r, &z, &y, &g| {
                *r = match self {
                    Activation::Identity => g,
                    Activation::Relu => {
                        if z > 0.0 {
                            g
                        } else {
                            0.0
                        }
                    }
                    Activation::LeakyRelu(slope) => {
                        if z > 0.0 {
                            g
                        } else {
                            slope * g
                        }
                    }
                    Activation::Sigmoid => g * y * (1.0 - y),
                    Activation::Tanh => g * (1.0 - y * y),
                };
            });
        result
    }
}

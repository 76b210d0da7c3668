//! Loss primitives with their gradients.
//!
//! Each `*_grad` returns d loss / d `a` for the matching mean-reduced loss.

use ndarray::{Array2, Zip};

use super::activation::sigmoid;

/// Floor on probabilities inside the log
const PROB_EPS: f32 = 1e-7;

/// Binary cross-entropy of a logit against target `y` in {0, 1}
pub fn bce_with_logit(logit: f32, target: f32) -> f32 {
    let p = sigmoid(logit).clamp(PROB_EPS, 1.0 - PROB_EPS);
    -(target * p.ln() + (1.0 - target) * (1.0 - p).ln())
}

/// d BCE / d logit = sigmoid(logit) - target
pub fn bce_with_logit_grad(logit: f32, target: f32) -> f32 {
    sigmoid(logit) - target
}

/// mean |a - b|
pub fn l1(a: &Array2<f32>, b: &Array2<f32>) -> f32 {
    mean_of(a, b, |d| d.abs())
}

pub fn l1_grad(a: &Array2<f32>, b: &Array2<f32>) -> Array2<f32> {
    let n = a.len().max(1) as f32;
    let mut grad = Array2::zeros(a.raw_dim());
    Zip::from(&mut grad).and(a).and(b).for_each(|g, &x, &y| {
        let d = x - y;
        *g = if d > 0.0 {
            1.0 / n
        } else if d < 0.0 {
            -1.0 / n
        } else {
            0.0
        };
    });
    grad
}

/// mean (a - b)^2
pub fn l2(a: &Array2<f32>, b: &Array2<f32>) -> f32 {
    mean_of(a, b, |d| d * d)
}

pub fn l2_grad(a: &Array2<f32>, b: &Array2<f32>) -> Array2<f32> {
    let n = a.len().max(1) as f32;
    let mut grad = Array2::zeros(a.raw_dim());
    Zip::from(&mut grad).and(a).and(b).for_each(|g, &x, &y| *g = 2.0 * (x - y) / n);
    grad
}

fn mean_of<F: Fn(f32) -> f32>(a: &Array2<f32>, b: &Array2<f32>, f: F) -> f32 {
    if a.is_empty() {
        return 0.0;
    }
    let mut sum = 0.0f32;
    Zip::from(a).and(b).for_each(|&x, &y| sum += f(x - y));
    sum / a.len() as f32
}

//! Adam optimizer
//!
//! θ_t = θ_{t-1} - lr * m̂_t / (√v̂_t + ε), with bias-corrected moments.
//! `beta1` is the momentum term exchanged in `TrainingConfig`.

use ndarray::{Array, Dimension};

#[derive(Debug, Clone, Default, PartialEq)]
struct Moments {
    first: Vec<f32>,
    second: Vec<f32>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Adam {
    lr: f32,
    beta1: f32,
    beta2: f32,
    epsilon: f32,
    t: u64,
    moments: Vec<Moments>,
}

impl Adam {
    pub fn new(lr: f32, beta1: f32) -> Self {
        Self { lr, beta1, beta2: 0.999, epsilon: 1e-8, t: 0, moments: Vec::new() }
    }

    /// Get optimizer step counter.
    pub fn step_count(&self) -> u64 {
        self.t
    }

    /// Drop all moment buffers and the step counter
    pub fn reset(&mut self) {
        self.t = 0;
        self.moments.clear();
    }

    /// Start a new update step; call once before the `update` calls of a step.
    pub fn begin_step(&mut self) {
        self.t += 1;
    }

    /// Update one parameter tensor in place. `slot` identifies the tensor
    /// across steps and must be stable for the lifetime of the optimizer.
    pub fn update<D: Dimension>(&mut self, slot: usize, param: &mut Array<f32, D>, grad: &Array<f32, D>) {
        if self.moments.len() <= slot {
            self.moments.resize_with(slot + 1, Moments::default);
        }
        let state = &mut self.moments[slot];
        if state.first.len() != param.len() {
            state.first = vec![0.0; param.len()];
            state.second = vec![0.0; param.len()];
        }

        let t = self.t.max(1) as i32;
        let bias1 = 1.0 - self.beta1.powi(t);
        let bias2 = 1.0 - self.beta2.powi(t);
        let (beta1, beta2, lr, eps) = (self.beta1, self.beta2, self.lr, self.epsilon);

        for (((p, &g), m), v) in param
            .iter_mut()
            .zip(grad.iter())
            .zip(state.first.iter_mut())
            .zip(state.second.iter_mut())
        {
            *m = beta1 * *m + (1.0 - beta1) * g;
            *v = beta2 * *v + (1.0 - beta2) * g * g;
            let m_hat = *m / bias1;
            let v_hat = *v / bias2;
            *p -= lr * m_hat / (v_hat.sqrt() + eps);
        }
    }
}

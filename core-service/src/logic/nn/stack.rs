//! Sequential stack of conv layers with one hidden and one output activation.

use ndarray::Array2;
use serde::{Deserialize, Serialize};

use super::activation::Activation;
use super::conv::{Conv1d, ConvGrad};
use super::optim::Adam;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConvStack {
    pub layers: Vec<Conv1d>,
    /// Applied after every layer but the last
    pub hidden: Activation,
    /// Applied after the last layer
    pub output: Activation,
}

/// Cached activations of one traced forward pass
#[derive(Debug, Clone)]
pub struct StackTrace {
    inputs: Vec<Array2<f32>>,
    pre: Vec<Array2<f32>>,
    outputs: Vec<Array2<f32>>,
}

impl StackTrace {
    /// Final activation of the stack
    pub fn output(&self) -> &Array2<f32> {
        // A stack always has at least one layer
        &self.outputs[self.outputs.len() - 1]
    }
}

/// Gradient buffers for every layer of a stack
#[derive(Debug, Clone)]
pub struct StackGrad {
    pub layers: Vec<ConvGrad>,
}

impl StackGrad {
    pub fn zeros_like(stack: &ConvStack) -> Self {
        Self { layers: stack.layers.iter().map(ConvGrad::zeros_like).collect() }
    }

    pub fn is_finite(&self) -> bool {
        self.layers.iter().all(ConvGrad::is_finite)
    }
}

impl ConvStack {
    pub fn new(layers: Vec<Conv1d>, hidden: Activation, output: Activation) -> Self {
        debug_assert!(!layers.is_empty());
        Self { layers, hidden, output }
    }

    fn activation_for(&self, index: usize) -> Activation {
        if index + 1 == self.layers.len() {
            self.output
        } else {
            self.hidden
        }
    }

    pub fn num_parameters(&self) -> usize {
        self.layers.iter().map(Conv1d::num_parameters).sum()
    }

    /// Describes the first difference from `expected`'s layer shapes
    pub fn shape_mismatch(&self, expected: &ConvStack) -> Option<String> {
        if self.layers.len() != expected.layers.len() {
            return Some(format!("{} layers, expected {}", self.layers.len(), expected.layers.len()));
        }
        if self.hidden != expected.hidden || self.output != expected.output {
            return Some("activations differ".into());
        }
        self.layers
            .iter()
            .zip(&expected.layers)
            .enumerate()
            .find(|(_, (layer, reference))| !layer.same_shape(reference))
            .map(|(i, (layer, reference))| {
                format!(
                    "layer {}: weight {:?} bias {}, expected weight {:?} bias {}",
                    i,
                    layer.weight.dim(),
                    layer.bias.len(),
                    reference.weight.dim(),
                    reference.bias.len()
                )
            })
    }

    /// Inference-only forward pass
    pub fn forward(&self, x: &Array2<f32>) -> Array2<f32> {
        let mut h = x.clone();
        for (i, layer) in self.layers.iter().enumerate() {
            h = self.activation_for(i).forward(&layer.forward(&h));
        }
        h
    }

    /// Forward pass keeping what `backward` needs
    pub fn forward_traced(&self, x: &Array2<f32>) -> StackTrace {
        let n = self.layers.len();
        let mut trace = StackTrace {
            inputs: Vec::with_capacity(n),
            pre: Vec::with_capacity(n),
            outputs: Vec::with_capacity(n),
        };
        let mut h = x.clone();
        for (i, layer) in self.layers.iter().enumerate() {
            let pre = layer.forward(&h);
            let out = self.activation_for(i).forward(&pre);
            trace.inputs.push(h);
            trace.pre.push(pre);
            h = out.clone();
            trace.outputs.push(out);
        }
        trace
    }

    /// Back-propagate `grad_out` (gradient w.r.t. the stack output).
    ///
    /// Parameter gradients are accumulated into `grads` when given; the
    /// return value is the gradient w.r.t. the stack input.
    pub fn backward(
        &self,
        trace: &StackTrace,
        grad_out: &Array2<f32>,
        mut grads: Option<&mut StackGrad>,
    ) -> Array2<f32> {
        let mut g = grad_out.clone();
        for i in (0..self.layers.len()).rev() {
            g = self.activation_for(i).backward(&trace.pre[i], &trace.outputs[i], &g);
            let layer_grad = grads.as_mut().map(|gs| &mut gs.layers[i]);
            g = self.layers[i].backward(&trace.inputs[i], &g, layer_grad);
        }
        g
    }

    /// Apply one optimizer update; `slot` is the first optimizer slot owned
    /// by this stack. Returns the next free slot.
    pub fn apply(&mut self, grads: &StackGrad, optimizer: &mut Adam, slot: usize) -> usize {
        let mut slot = slot;
        for (layer, grad) in self.layers.iter_mut().zip(&grads.layers) {
            optimizer.update(slot, &mut layer.weight, &grad.weight);
            optimizer.update(slot + 1, &mut layer.bias, &grad.bias);
            slot += 2;
        }
        slot
    }
}

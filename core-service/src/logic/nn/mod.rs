//! NN Module - minimal differentiable building blocks
//!
//! Just what the adversarial pair needs: strided and transposed 1-D
//! convolutions with hand-written backward passes, activations, sequential
//! stacks and Adam. Everything runs on `ndarray` on the CPU.

pub mod activation;
pub mod conv;
pub mod loss;
pub mod optim;
pub mod stack;

pub use activation::{sigmoid, Activation};
pub use conv::{Conv1d, ConvGrad, ConvKind};
pub use optim::Adam;
pub use stack::{ConvStack, StackGrad, StackTrace};

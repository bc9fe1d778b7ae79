//! Module Trait
//!
//! Base trait for all neural network modules.

use rampart_autograd::Tensor;

/// Base trait for all neural network modules.
///
/// # Example
/// ```rust,no_run
/// use rampart::nn::{Linear, Module};
/// use rampart_autograd::Tensor;
///
/// struct TwoLayer {
///     fc1: Linear,
///     fc2: Linear,
/// }
///
/// impl Module for TwoLayer {
///     fn forward(&self, x: &Tensor) -> Tensor {
///         let x = self.fc1.forward(x).relu();
///         self.fc2.forward(&x)
///     }
///
///     fn parameters(&self) -> Vec<Tensor> {
///         let mut p = self.fc1.parameters();
///         p.extend(self.fc2.parameters());
///         p
///     }
/// }
/// ```
pub trait Module {
    /// Forward pass.
    fn forward(&self, x: &Tensor) -> Tensor;

    /// Get all parameters, trainable or not.
    fn parameters(&self) -> Vec<Tensor>;

    /// Set training mode.
    fn train(&mut self) {}

    /// Set evaluation mode.
    fn eval(&mut self) {}

    /// Zero gradients for all parameters.
    fn zero_grad(&self) {
        for param in self.parameters() {
            param.zero_grad();
        }
    }

    /// Count total number of parameters.
    fn num_parameters(&self) -> usize {
        self.parameters().iter().map(|p| p.numel()).sum()
    }
}

impl<M: Module + ?Sized> Module for Box<M> {
    fn forward(&self, x: &Tensor) -> Tensor {
        (**self).forward(x)
    }

    fn parameters(&self) -> Vec<Tensor> {
        (**self).parameters()
    }

    fn train(&mut self) {
        (**self).train()
    }

    fn eval(&mut self) {
        (**self).eval()
    }
}

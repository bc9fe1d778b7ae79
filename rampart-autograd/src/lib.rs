//! # Rampart Autograd - CPU Automatic Differentiation
//!
//! A small reverse-mode autodiff engine over `f32` CPU tensors. Every
//! differentiable op records a creator node; `backward` walks the recorded
//! graph in reverse topological order and accumulates gradients into the
//! gradient cell of each tensor that requires them.
//!
//! ```rust,no_run
//! use rampart_autograd::{no_grad, Tensor};
//!
//! let w = Tensor::from_vec(vec![0.5, -1.0], &[2, 1]).requires_grad_();
//! let x = Tensor::from_vec(vec![1.0, 2.0, 3.0, 4.0], &[2, 2]);
//! let loss = x.matmul(&w).sum();
//! loss.backward();
//! assert!(w.grad().is_some());
//!
//! // Nothing inside a no-grad scope records a graph.
//! let y = no_grad(|| x.matmul(&w));
//! assert!(!y.requires_grad);
//! ```

#![warn(missing_docs)]

mod grad_mode;
mod ops;
mod tensor;

pub mod optim;

pub use grad_mode::{is_grad_enabled, no_grad};
pub use ops::{
    AddBiasNode, AddNode, CrossEntropyNode, LogSoftmaxNode, MarginNode, MatMulNode, MulNode, ReluNode,
    ReshapeNode, ScaleNode, SigmoidNode, SubNode, SumNode, SumPerExampleNode, TanhNode,
};
pub use optim::{Adam, Optimizer};
pub use tensor::Tensor;

/// A recorded operation that can propagate gradients to its inputs.
pub trait AutogradNode {
    /// Tensors this node was computed from, in the order `backward` returns gradients.
    fn inputs(&self) -> Vec<Tensor>;

    /// Gradients with respect to each input given the gradient of the output.
    ///
    /// `None` marks an input that receives no gradient (for example a label tensor).
    fn backward(&self, grad: &[f32]) -> Vec<Option<Vec<f32>>>;
}

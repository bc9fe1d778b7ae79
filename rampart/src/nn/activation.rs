//! Activation Functions
//!
//! Parameter-free layers: non-linearities, flattening and closure layers.

use std::rc::Rc;

use rampart_autograd::Tensor;

use super::Module;

/// ReLU activation: max(0, x)
#[derive(Debug, Clone, Copy)]
pub struct ReLU;

impl Module for ReLU {
    fn forward(&self, x: &Tensor) -> Tensor {
        x.relu()
    }

    fn parameters(&self) -> Vec<Tensor> {
        vec![]
    }
}

/// Sigmoid activation: 1 / (1 + exp(-x))
#[derive(Debug, Clone, Copy)]
pub struct Sigmoid;

impl Module for Sigmoid {
    fn forward(&self, x: &Tensor) -> Tensor {
        x.sigmoid()
    }

    fn parameters(&self) -> Vec<Tensor> {
        vec![]
    }
}

/// Tanh activation
#[derive(Debug, Clone, Copy)]
pub struct Tanh;

impl Module for Tanh {
    fn forward(&self, x: &Tensor) -> Tensor {
        x.tanh()
    }

    fn parameters(&self) -> Vec<Tensor> {
        vec![]
    }
}

/// Flattens every non-batch dimension: `[b, ...] -> [b, rest]`.
#[derive(Debug, Clone, Copy)]
pub struct Flatten;

impl Module for Flatten {
    fn forward(&self, x: &Tensor) -> Tensor {
        x.flatten_batch()
    }

    fn parameters(&self) -> Vec<Tensor> {
        vec![]
    }
}

/// A named, parameter-free layer wrapping a tensor function.
///
/// # Example
/// ```rust,no_run
/// use rampart::nn::{Func, Module};
/// use rampart_autograd::Tensor;
///
/// let double = Func::new("double", |x: &Tensor| x.mul_scalar(2.0));
/// assert_eq!(double.forward(&Tensor::ones(&[2])).to_vec(), vec![2.0, 2.0]);
/// ```
#[derive(Clone)]
pub struct Func {
    name: String,
    f: Rc<dyn Fn(&Tensor) -> Tensor>,
}

impl Func {
    /// Wrap `f` under a display name.
    pub fn new(name: impl Into<String>, f: impl Fn(&Tensor) -> Tensor + 'static) -> Self {
        Self {
            name: name.into(),
            f: Rc::new(f),
        }
    }

    /// Display name.
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Module for Func {
    fn forward(&self, x: &Tensor) -> Tensor {
        (self.f)(x)
    }

    fn parameters(&self) -> Vec<Tensor> {
        vec![]
    }
}

impl std::fmt::Debug for Func {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Func").field(&self.name).finish()
    }
}

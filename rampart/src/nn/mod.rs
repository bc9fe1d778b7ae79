//! Neural Network Module
//!
//! Layers, the module tree and model construction helpers.

mod activation;
mod container;
mod error;
mod linear;
mod models;
mod module;

pub use activation::{Flatten, Func, ReLU, Sigmoid, Tanh};
pub use container::{Flow, Layer, Node, Table};
pub use error::{NnError, NnResult};
pub use linear::Linear;
pub use models::{mlp_classifier, parameter_count, ClassificationModel, ParameterCount};
pub use module::Module;

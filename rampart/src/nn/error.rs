//! Module tree errors.

/// Errors produced while running, navigating or restructuring a module tree.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum NnError {
    /// A path component names no child.
    #[error("no submodule named {name:?}; children: {available:?}")]
    NoSuchModule {
        /// Requested child name
        name: String,
        /// Names of the existing children
        available: Vec<String>,
    },
    /// The node kind cannot be split or joined.
    #[error("splitting and joining are not supported for {0} nodes")]
    UnsupportedSplit(&'static str),
    /// A node received a different number of inputs than it consumes.
    #[error("expected {expected} inputs, found {found}")]
    Arity {
        /// Inputs the node consumes
        expected: usize,
        /// Inputs it received
        found: usize,
    },
    /// Summed tensors differ in shape.
    #[error("cannot sum tensors of shapes {expected:?} and {found:?}")]
    ShapeMismatch {
        /// Shape of the running sum
        expected: Vec<usize>,
        /// Shape of the offending term
        found: Vec<usize>,
    },
    /// A path has an empty component.
    #[error("module path has an empty component")]
    EmptyPath,
}

/// Result alias for module tree operations.
pub type NnResult<T> = Result<T, NnError>;

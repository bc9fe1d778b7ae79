//! Core Tensor Implementation
//!
//! The Tensor struct is the fundamental data type for all operations.

use std::cell::{Ref, RefCell};
use std::collections::HashSet;
use std::rc::Rc;

use rand::Rng;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::grad_mode::is_grad_enabled;
use crate::AutogradNode;

/// A row-major `f32` array with automatic differentiation support.
///
/// Clones are cheap and share both the data buffer and the gradient cell.
///
/// # Example
/// ```rust,no_run
/// use rampart_autograd::Tensor;
///
/// let a = Tensor::from_vec(vec![1.0, 2.0, 3.0], &[3]);
/// let b = Tensor::ones(&[3]);
/// let c = a.add(&b);
/// assert_eq!(c.to_vec(), vec![2.0, 3.0, 4.0]);
/// ```
#[derive(Clone)]
pub struct Tensor {
    pub(crate) data: Rc<RefCell<Vec<f32>>>,
    /// Shape of the tensor
    pub shape: Vec<usize>,
    pub(crate) grad: Rc<RefCell<Option<Vec<f32>>>>,
    /// Whether gradients are accumulated for this tensor
    pub requires_grad: bool,
    pub(crate) creator: Option<Rc<dyn AutogradNode>>,
}

impl Tensor {
    // ========================================================================
    // CREATION METHODS
    // ========================================================================

    /// Create a tensor from owned data.
    pub fn from_vec(data: Vec<f32>, shape: &[usize]) -> Self {
        let size: usize = shape.iter().product();
        assert_eq!(data.len(), size, "Data length must match shape {:?}", shape);
        Self {
            data: Rc::new(RefCell::new(data)),
            shape: shape.to_vec(),
            grad: Rc::new(RefCell::new(None)),
            requires_grad: false,
            creator: None,
        }
    }

    /// Create a tensor from borrowed data.
    pub fn from_data(data: &[f32], shape: &[usize]) -> Self {
        Self::from_vec(data.to_vec(), shape)
    }

    /// Create a one-dimensional tensor.
    pub fn from_slice(data: &[f32]) -> Self {
        Self::from_vec(data.to_vec(), &[data.len()])
    }

    /// Create a single-element tensor of shape `[1]`.
    pub fn scalar(value: f32) -> Self {
        Self::from_vec(vec![value], &[1])
    }

    /// Create a tensor filled with zeros.
    pub fn zeros(shape: &[usize]) -> Self {
        Self::full(shape, 0.0)
    }

    /// Create a tensor filled with ones.
    pub fn ones(shape: &[usize]) -> Self {
        Self::full(shape, 1.0)
    }

    /// Create a tensor filled with a constant value.
    pub fn full(shape: &[usize], value: f32) -> Self {
        let size: usize = shape.iter().product();
        Self::from_vec(vec![value; size], shape)
    }

    /// Create a zero tensor with the shape of `other`.
    pub fn zeros_like(other: &Tensor) -> Self {
        Self::zeros(&other.shape)
    }

    /// Create a tensor with random normal values (mean=0, std=1).
    pub fn randn<R: Rng + ?Sized>(shape: &[usize], rng: &mut R) -> Self {
        let size: usize = shape.iter().product();

        // Box-Muller transform for normal distribution
        let data: Vec<f32> = (0..size)
            .map(|_| {
                let u1: f32 = rng.gen::<f32>().max(f32::MIN_POSITIVE);
                let u2: f32 = rng.gen();
                (-2.0 * u1.ln()).sqrt() * (2.0 * std::f32::consts::PI * u2).cos()
            })
            .collect();

        Self::from_vec(data, shape)
    }

    /// Create a tensor with random uniform values in [low, high).
    pub fn uniform<R: Rng + ?Sized>(shape: &[usize], low: f32, high: f32, rng: &mut R) -> Self {
        let size: usize = shape.iter().product();
        let data: Vec<f32> = (0..size)
            .map(|_| rng.gen::<f32>() * (high - low) + low)
            .collect();
        Self::from_vec(data, shape)
    }

    /// Stack equally shaped tensors along a new leading dimension.
    ///
    /// Panics when `tensors` is empty or shapes differ; callers that accept
    /// user data check shapes first.
    pub fn stack(tensors: &[Tensor]) -> Tensor {
        assert!(!tensors.is_empty(), "Cannot stack an empty list of tensors");
        let inner = tensors[0].shape.clone();
        let mut data = Vec::with_capacity(tensors.len() * tensors[0].numel());
        for t in tensors {
            assert_eq!(t.shape, inner, "All stacked tensors must share a shape");
            data.extend_from_slice(&t.data());
        }
        let mut shape = vec![tensors.len()];
        shape.extend(inner);
        Tensor::from_vec(data, &shape)
    }

    /// Concatenate tensors along the leading dimension.
    pub fn cat(tensors: &[Tensor]) -> Tensor {
        assert!(!tensors.is_empty(), "Cannot concatenate an empty list of tensors");
        let row_shape = tensors[0].shape[1..].to_vec();
        let mut rows = 0;
        let mut data = Vec::new();
        for t in tensors {
            assert_eq!(t.shape[1..], row_shape[..], "Trailing shapes must match");
            rows += t.shape[0];
            data.extend_from_slice(&t.data());
        }
        let mut shape = vec![rows];
        shape.extend(row_shape);
        Tensor::from_vec(data, &shape)
    }

    // ========================================================================
    // PROPERTIES
    // ========================================================================

    /// Return the total number of elements.
    pub fn numel(&self) -> usize {
        self.shape.iter().product()
    }

    /// Return the number of dimensions.
    pub fn ndim(&self) -> usize {
        self.shape.len()
    }

    /// Return the shape as a slice.
    pub fn size(&self) -> &[usize] {
        &self.shape
    }

    /// Size of the leading (batch) dimension.
    pub fn batch_size(&self) -> usize {
        self.shape.first().copied().unwrap_or(1)
    }

    /// Number of elements per leading-dimension row.
    pub fn row_len(&self) -> usize {
        self.shape.iter().skip(1).product()
    }

    /// Check if this tensor holds a single element.
    pub fn is_scalar(&self) -> bool {
        self.numel() == 1
    }

    /// Set requires_grad flag.
    pub fn set_requires_grad(&mut self, requires_grad: bool) {
        self.requires_grad = requires_grad;
    }

    /// Return this tensor marked as a gradient leaf.
    pub fn requires_grad_(mut self) -> Self {
        self.requires_grad = true;
        self
    }

    /// Detach from the computation graph while sharing the data buffer.
    pub fn detach(&self) -> Self {
        Self {
            data: Rc::clone(&self.data),
            shape: self.shape.clone(),
            grad: Rc::new(RefCell::new(None)),
            requires_grad: false,
            creator: None,
        }
    }

    /// Detached tensor owning a fresh copy of the data.
    ///
    /// Later in-place writes to either tensor are not visible through the other.
    pub fn deep_clone(&self) -> Self {
        Self::from_vec(self.to_vec(), &self.shape)
    }

    // ========================================================================
    // DATA ACCESS
    // ========================================================================

    /// Borrow the underlying data.
    pub fn data(&self) -> Ref<'_, Vec<f32>> {
        self.data.borrow()
    }

    /// Copy tensor data into a Vec<f32>.
    pub fn to_vec(&self) -> Vec<f32> {
        self.data.borrow().clone()
    }

    /// Get a single scalar value (for single-element tensors).
    pub fn item(&self) -> f32 {
        assert!(self.is_scalar(), "item() only works on single-element tensors");
        self.data.borrow()[0]
    }

    /// Overwrite this tensor's data in place.
    pub fn copy_from_slice(&self, data: &[f32]) {
        assert_eq!(data.len(), self.numel(), "Data length must match tensor size");
        self.data.borrow_mut().copy_from_slice(data);
    }

    /// Mutate the data buffer in place.
    pub fn update(&self, f: impl FnOnce(&mut [f32])) {
        f(&mut self.data.borrow_mut());
    }

    /// Borrow row `index` of the leading dimension.
    pub fn row(&self, index: usize) -> Tensor {
        let len = self.row_len();
        let data = self.data.borrow()[index * len..(index + 1) * len].to_vec();
        Tensor::from_vec(data, &self.shape[1..])
    }

    // ========================================================================
    // GRADIENT METHODS
    // ========================================================================

    /// Get the gradient if it exists.
    pub fn grad(&self) -> Option<Tensor> {
        self.grad
            .borrow()
            .as_ref()
            .map(|g| Tensor::from_vec(g.clone(), &self.shape))
    }

    /// Zero out the gradient.
    pub fn zero_grad(&self) {
        *self.grad.borrow_mut() = None;
    }

    pub(crate) fn accumulate_grad(&self, new_grad: &[f32]) {
        let mut grad_ref = self.grad.borrow_mut();
        match grad_ref.as_mut() {
            Some(existing) => {
                for (g, n) in existing.iter_mut().zip(new_grad) {
                    *g += n;
                }
            }
            None => *grad_ref = Some(new_grad.to_vec()),
        }
    }

    /// Result tensor of a differentiable op.
    ///
    /// The creator is attached only when recording is on and some input
    /// requires gradients.
    pub(crate) fn with_creator(
        data: Vec<f32>,
        shape: &[usize],
        inputs: &[&Tensor],
        node: impl FnOnce() -> Rc<dyn AutogradNode>,
    ) -> Tensor {
        let mut out = Tensor::from_vec(data, shape);
        if is_grad_enabled() && inputs.iter().any(|t| t.requires_grad) {
            out.requires_grad = true;
            out.creator = Some(node());
        }
        out
    }

    /// Backward pass - compute gradients for all tensors in the graph.
    pub fn backward(&self) {
        let mut sorted = Vec::new();
        let mut visited = HashSet::new();
        self.build_topo(&mut sorted, &mut visited);

        // Initial gradient = 1.0 if not already set
        if self.grad.borrow().is_none() {
            *self.grad.borrow_mut() = Some(vec![1.0; self.numel()]);
        }

        for tensor in sorted.into_iter().rev() {
            let Some(creator) = &tensor.creator else { continue };
            let grad = tensor.grad.borrow().clone();
            if let Some(grad) = grad {
                let input_grads = creator.backward(&grad);
                for (input, input_grad) in creator.inputs().iter().zip(input_grads) {
                    if let (true, Some(g)) = (input.requires_grad, input_grad) {
                        input.accumulate_grad(&g);
                    }
                }
            }
        }
    }

    /// Clear the gradients of every tensor reachable from this one.
    pub fn zero_grad_graph(&self) {
        let mut sorted = Vec::new();
        let mut visited = HashSet::new();
        self.build_topo(&mut sorted, &mut visited);
        for t in sorted {
            t.zero_grad();
        }
    }

    fn build_topo(&self, sorted: &mut Vec<Tensor>, visited: &mut HashSet<*const ()>) {
        let ptr = Rc::as_ptr(&self.grad) as *const ();
        if !visited.insert(ptr) {
            return;
        }
        if let Some(creator) = &self.creator {
            for input in creator.inputs() {
                input.build_topo(sorted, visited);
            }
        }
        sorted.push(self.clone());
    }
}

impl PartialEq for Tensor {
    fn eq(&self, other: &Self) -> bool {
        self.shape == other.shape && *self.data.borrow() == *other.data.borrow()
    }
}

impl std::fmt::Debug for Tensor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tensor")
            .field("shape", &self.shape)
            .field("requires_grad", &self.requires_grad)
            .finish()
    }
}

impl std::fmt::Display for Tensor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let data = self.data.borrow();
        if self.ndim() == 1 {
            write!(
                f,
                "tensor([{}])",
                data.iter()
                    .map(|x| format!("{:.4}", x))
                    .collect::<Vec<_>>()
                    .join(", ")
            )
        } else if self.ndim() == 2 {
            writeln!(f, "tensor([")?;
            for row in data.chunks(self.shape[1].max(1)) {
                let row: String = row
                    .iter()
                    .map(|x| format!("{:8.4}", x))
                    .collect::<Vec<_>>()
                    .join(", ");
                writeln!(f, "  [{}]", row)?;
            }
            write!(f, "])")
        } else {
            write!(f, "tensor(shape={:?})", self.shape)
        }
    }
}

// ============================================================================
// SERDE
// ============================================================================

#[derive(Serialize, Deserialize)]
struct TensorRepr {
    shape: Vec<usize>,
    data: Vec<f32>,
}

impl Serialize for Tensor {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        TensorRepr {
            shape: self.shape.clone(),
            data: self.to_vec(),
        }
        .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Tensor {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let repr = TensorRepr::deserialize(deserializer)?;
        let size: usize = repr.shape.iter().product();
        if size != repr.data.len() {
            return Err(D::Error::custom(format!(
                "tensor of shape {:?} needs {} values, found {}",
                repr.shape,
                size,
                repr.data.len()
            )));
        }
        Ok(Tensor::from_vec(repr.data, &repr.shape))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detach_shares_data_deep_clone_does_not() {
        let a = Tensor::from_slice(&[1.0, 2.0]);
        let shared = a.detach();
        let copied = a.deep_clone();
        a.copy_from_slice(&[5.0, 6.0]);
        assert_eq!(shared.to_vec(), vec![5.0, 6.0]);
        assert_eq!(copied.to_vec(), vec![1.0, 2.0]);
    }

    #[test]
    fn test_stack_and_cat() {
        let a = Tensor::from_slice(&[1.0, 2.0]);
        let b = Tensor::from_slice(&[3.0, 4.0]);
        let s = Tensor::stack(&[a.clone(), b.clone()]);
        assert_eq!(s.shape, vec![2, 2]);
        let c = Tensor::cat(&[s.clone(), s]);
        assert_eq!(c.shape, vec![4, 2]);
        assert_eq!(c.row(3).to_vec(), vec![3.0, 4.0]);
    }

    #[test]
    fn test_serde_rejects_inconsistent_shape() {
        let json = r#"{"shape":[2,2],"data":[1.0,2.0,3.0]}"#;
        assert!(serde_json::from_str::<Tensor>(json).is_err());
        let t: Tensor = serde_json::from_str(r#"{"shape":[3],"data":[1.0,2.0,3.0]}"#).unwrap();
        assert_eq!(t, Tensor::from_slice(&[1.0, 2.0, 3.0]));
    }

    #[test]
    fn test_bincode_preserves_shape() {
        let t = Tensor::from_vec(vec![0.5; 6], &[2, 3]);
        let bytes = bincode::serialize(&t).unwrap();
        let back: Tensor = bincode::deserialize(&bytes).unwrap();
        assert_eq!(back, t);
    }
}

//! Dataset Sources
//!
//! Leaf datasets that own or generate their elements.

use std::cell::Cell;
use std::rc::Rc;

use rampart_autograd::Tensor;

use super::dataset::{Dataset, Info};
use super::identity::Identity;

/// A named in-memory dataset.
///
/// # Example
/// ```rust,no_run
/// use rampart::data::{Dataset, VecDataset};
///
/// let ds = VecDataset::new("letters", vec!['a', 'b', 'c']);
/// assert_eq!(ds.get(-1).unwrap(), 'c');
/// ```
#[derive(Clone)]
pub struct VecDataset<T> {
    data: Rc<Vec<T>>,
    identity: Identity,
    info: Info,
}

impl<T: Clone> VecDataset<T> {
    /// Create a dataset named `name` over `data`.
    pub fn new(name: impl Into<String>, data: Vec<T>) -> Self {
        Self::with_identity(Identity::new(name), data)
    }

    /// Create a dataset with a full identity, e.g. one carrying a subset.
    pub fn with_identity(identity: Identity, data: Vec<T>) -> Self {
        Self {
            data: Rc::new(data),
            identity,
            info: Info::new(),
        }
    }
}

impl<T: Clone> Dataset for VecDataset<T> {
    type Item = T;

    fn len(&self) -> usize {
        self.data.len()
    }

    fn get_example(&self, index: usize) -> T {
        self.data[index].clone()
    }

    fn identity(&self) -> &Identity {
        &self.identity
    }

    fn info(&self) -> &Info {
        &self.info
    }
}

/// A named dataset whose elements are generated from their index.
///
/// The generator must be pure: the same index always yields the same element.
pub struct FnDataset<T> {
    len: usize,
    generate: Rc<dyn Fn(usize) -> T>,
    identity: Identity,
    info: Info,
}

impl<T> FnDataset<T> {
    /// Create a dataset of `len` elements produced by `generate`.
    pub fn new(identity: Identity, len: usize, generate: impl Fn(usize) -> T + 'static) -> Self {
        Self {
            len,
            generate: Rc::new(generate),
            identity,
            info: Info::new(),
        }
    }
}

impl<T> Clone for FnDataset<T> {
    fn clone(&self) -> Self {
        Self {
            len: self.len,
            generate: Rc::clone(&self.generate),
            identity: self.identity.clone(),
            info: self.info.clone(),
        }
    }
}

impl<T> Dataset for FnDataset<T> {
    type Item = T;

    fn len(&self) -> usize {
        self.len
    }

    fn get_example(&self, index: usize) -> T {
        (self.generate)(index)
    }

    fn identity(&self) -> &Identity {
        &self.identity
    }

    fn info(&self) -> &Info {
        &self.info
    }
}

/// A simple in-memory dataset of `(input, target)` tensor pairs.
#[derive(Clone)]
pub struct TensorDataset {
    inputs: Rc<Vec<Vec<f32>>>,
    targets: Rc<Vec<Vec<f32>>>,
    input_shape: Vec<usize>,
    target_shape: Vec<usize>,
    identity: Identity,
    info: Info,
}

impl TensorDataset {
    /// Create a new TensorDataset; inputs and targets must have the same length.
    pub fn new(
        name: impl Into<String>,
        inputs: Vec<Vec<f32>>,
        targets: Vec<Vec<f32>>,
        input_shape: Vec<usize>,
        target_shape: Vec<usize>,
    ) -> super::DataResult<Self> {
        if inputs.len() != targets.len() {
            return Err(super::DataError::LengthMismatch {
                expected: inputs.len(),
                found: targets.len(),
            });
        }
        Ok(Self {
            inputs: Rc::new(inputs),
            targets: Rc::new(targets),
            input_shape,
            target_shape,
            identity: Identity::new(name),
            info: Info::new(),
        })
    }
}

impl Dataset for TensorDataset {
    type Item = (Tensor, Tensor);

    fn len(&self) -> usize {
        self.inputs.len()
    }

    fn get_example(&self, index: usize) -> Self::Item {
        (
            Tensor::from_data(&self.inputs[index], &self.input_shape),
            Tensor::from_data(&self.targets[index], &self.target_shape),
        )
    }

    fn identity(&self) -> &Identity {
        &self.identity
    }

    fn info(&self) -> &Info {
        &self.info
    }
}

/// Hands out names for anonymous datasets: `prefix0`, `prefix1`, ...
///
/// Owned by whoever builds the datasets, so naming depends only on construction order.
#[derive(Debug, Default)]
pub struct DatasetNamer {
    prefix: String,
    next: Cell<usize>,
}

impl DatasetNamer {
    /// Create a namer with the given prefix.
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            next: Cell::new(0),
        }
    }

    /// Next unused name.
    pub fn next_name(&self) -> String {
        let n = self.next.get();
        self.next.set(n + 1);
        format!("{}{}", self.prefix, n)
    }

    /// Wrap anonymous data in a freshly named dataset.
    pub fn dataset<T: Clone>(&self, data: Vec<T>) -> VecDataset<T> {
        VecDataset::new(self.next_name(), data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fn_dataset_is_pure() {
        let ds = FnDataset::new(Identity::new("squares"), 5, |i| i * i);
        assert_eq!(ds.get(3).unwrap(), 9);
        assert_eq!(ds.get(3).unwrap(), 9);
        assert!(ds.get(5).is_err());
    }

    #[test]
    fn test_namer_counts_per_instance() {
        let a = DatasetNamer::new("anon");
        let b = DatasetNamer::new("anon");
        assert_eq!(a.next_name(), "anon0");
        assert_eq!(a.dataset(vec![1]).identifier(), "anon1");
        assert_eq!(b.next_name(), "anon0");
    }

    #[test]
    fn test_tensor_dataset_length_check() {
        let err = TensorDataset::new("t", vec![vec![1.0]], vec![], vec![1], vec![1]);
        assert!(err.is_err());
        let ds = TensorDataset::new("t", vec![vec![1.0, 2.0]], vec![vec![0.0]], vec![2], vec![1]).unwrap();
        let (x, y) = ds.get(0).unwrap();
        assert_eq!(x.shape, vec![2]);
        assert_eq!(y.to_vec(), vec![0.0]);
    }
}

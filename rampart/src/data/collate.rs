//! Collation
//!
//! Merging a batch of elements into one value, e.g. a list of equally shaped
//! tensors into a single tensor with a leading batch dimension.

use rampart_autograd::Tensor;

use super::dataset::{Dataset, Info};
use super::identity::{Identity, Modifier};
use super::record::Record;
use super::{DataError, DataResult};

/// Element groups with a default merge.
pub trait Collate: Sized {
    /// Merged value.
    type Output;

    /// Fail if the group cannot be merged.
    fn check(&self) -> DataResult<()>;

    /// Merge the group. Only called on groups that pass [`Collate::check`].
    fn collate(self) -> Self::Output;
}

/// Default collation function of an element type.
pub type CollateFn<T> = fn(T) -> <T as Collate>::Output;

fn check_shapes<'a>(mut shapes: impl Iterator<Item = &'a [usize]>) -> DataResult<()> {
    let first = shapes
        .next()
        .ok_or_else(|| DataError::Collate("empty group".into()))?;
    match shapes.find(|s| *s != first) {
        Some(other) => Err(DataError::Collate(format!(
            "shapes differ: {:?} vs {:?}",
            first, other
        ))),
        None => Ok(()),
    }
}

impl Collate for Vec<Tensor> {
    type Output = Tensor;

    fn check(&self) -> DataResult<()> {
        check_shapes(self.iter().map(|t| t.size()))
    }

    fn collate(self) -> Tensor {
        Tensor::stack(&self)
    }
}

impl Collate for Vec<f32> {
    type Output = Tensor;

    fn check(&self) -> DataResult<()> {
        Ok(())
    }

    fn collate(self) -> Tensor {
        Tensor::from_slice(&self)
    }
}

impl Collate for Vec<(Tensor, Tensor)> {
    type Output = (Tensor, Tensor);

    fn check(&self) -> DataResult<()> {
        check_shapes(self.iter().map(|(x, _)| x.size()))?;
        check_shapes(self.iter().map(|(_, y)| y.size()))
    }

    fn collate(self) -> (Tensor, Tensor) {
        let (xs, ys): (Vec<Tensor>, Vec<Tensor>) = self.into_iter().unzip();
        (Tensor::stack(&xs), Tensor::stack(&ys))
    }
}

impl Collate for Vec<Record<Tensor>> {
    type Output = Record<Tensor>;

    fn check(&self) -> DataResult<()> {
        let first = self
            .first()
            .ok_or_else(|| DataError::Collate("empty group".into()))?;
        let keys: Vec<&str> = first.keys().collect();
        if let Some(other) = self.iter().find(|r| r.keys().ne(keys.iter().copied())) {
            return Err(DataError::Collate(format!(
                "record fields differ: {:?} vs {:?}",
                keys,
                other.keys().collect::<Vec<_>>()
            )));
        }
        for key in keys {
            check_shapes(self.iter().filter_map(|r| r.get(key)).map(|t| t.size()))?;
        }
        Ok(())
    }

    fn collate(self) -> Record<Tensor> {
        let mut out = Record::new();
        let keys: Vec<String> = match self.first() {
            Some(first) => first.keys().map(str::to_string).collect(),
            None => return out,
        };
        for key in &keys {
            let column: Vec<Tensor> = self.iter().filter_map(|r| r.get(key)).cloned().collect();
            out = out.with(key, Tensor::stack(&column));
        }
        out
    }
}

/// Elements merged with a collation function.
#[derive(Clone)]
pub struct CollateDataset<D, F> {
    inner: D,
    f: F,
    identity: Identity,
}

impl<D: Dataset, F> CollateDataset<D, F> {
    pub(crate) fn new(inner: D, f: F, name: Option<String>) -> Self {
        let identity = inner.identity().with_modifier(Modifier::Collate(name));
        Self { inner, f, identity }
    }
}

impl<D, F, U> Dataset for CollateDataset<D, F>
where
    D: Dataset,
    F: Fn(D::Item) -> U,
{
    type Item = U;

    fn len(&self) -> usize {
        self.inner.len()
    }

    fn get_example(&self, index: usize) -> U {
        (self.f)(self.inner.get_example(index))
    }

    fn identity(&self) -> &Identity {
        &self.identity
    }

    fn info(&self) -> &Info {
        self.inner.info()
    }

    fn clear_persistent_cache(&self) -> DataResult<()> {
        self.inner.clear_persistent_cache()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::VecDataset;

    #[test]
    fn test_batches_of_tensors_are_stacked() {
        let xs: Vec<Tensor> = (0..5).map(|i| Tensor::full(&[2], i as f32)).collect();
        let ds = VecDataset::new("t", xs).batch(2).unwrap().collate().unwrap();
        assert_eq!(ds.identifier(), "t.batch(2).collate");
        let last = ds.get(-1).unwrap();
        assert_eq!(last.shape, vec![1, 2]);
        assert_eq!(last.to_vec(), vec![4.0, 4.0]);
    }

    #[test]
    fn test_mismatched_shapes_fail_at_construction() {
        let xs = vec![Tensor::zeros(&[2]), Tensor::zeros(&[3])];
        let err = VecDataset::new("t", xs).batch(2).unwrap().collate().err().unwrap();
        assert!(matches!(err, DataError::Collate(_)));
    }

    #[test]
    fn test_records_collate_per_field() {
        let rs: Vec<Record<Tensor>> = (0..3)
            .map(|i| {
                Record::new()
                    .with("x", Tensor::full(&[2, 2], i as f32))
                    .with("y", Tensor::scalar(i as f32))
            })
            .collect();
        let merged = rs.collate();
        assert_eq!(merged.get("x").unwrap().shape, vec![3, 2, 2]);
        assert_eq!(merged.get("y").unwrap().to_vec(), vec![0.0, 1.0, 2.0]);
    }

    #[test]
    fn test_named_collation() {
        let ds = VecDataset::new("n", vec![1.0f32, 2.0, 3.0])
            .batch(3)
            .unwrap()
            .collate_with("sum", |b: Vec<f32>| b.iter().sum::<f32>());
        assert_eq!(ds.get(0).unwrap(), 6.0);
        assert_eq!(ds.identifier(), "n.batch(3).collate_sum");
    }
}

//! Dataset Views
//!
//! Lazy wrappers produced by the [`Dataset`] operators. Each view owns its
//! operand, extends the operand's identity by one modifier and forwards
//! persistent-cache clearing to it.

use std::cell::RefCell;
use std::rc::Rc;

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use super::dataset::{Dataset, Info};
use super::identity::{Identity, Modifier};
use super::record::{Field, Project};
use super::DataResult;

// ============================================================================
// ELEMENTWISE
// ============================================================================

/// Elements transformed by a function.
#[derive(Clone)]
pub struct MapDataset<D, F> {
    inner: D,
    f: F,
    identity: Identity,
}

impl<D: Dataset, F> MapDataset<D, F> {
    pub(crate) fn new(inner: D, f: F, name: Option<String>) -> Self {
        let identity = inner.identity().with_modifier(Modifier::Map(name));
        Self { inner, f, identity }
    }
}

impl<D, F, U> Dataset for MapDataset<D, F>
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

/// Elements restricted to some of their fields.
#[derive(Clone)]
pub struct ProjectDataset<D> {
    inner: D,
    fields: Vec<Field>,
    identity: Identity,
}

impl<D: Dataset> ProjectDataset<D> {
    pub(crate) fn new(inner: D, fields: Vec<Field>) -> Self {
        let names = fields.iter().map(|f| f.to_string()).collect();
        let identity = inner.identity().with_modifier(Modifier::Fields(names));
        Self {
            inner,
            fields,
            identity,
        }
    }
}

impl<D> Dataset for ProjectDataset<D>
where
    D: Dataset,
    D::Item: Project,
{
    type Item = D::Item;

    fn len(&self) -> usize {
        self.inner.len()
    }

    fn get_example(&self, index: usize) -> D::Item {
        self.inner.get_example(index).project(&self.fields)
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

// ============================================================================
// INDEX REMAPPING
// ============================================================================

/// Elements at an explicit list of indices (subsets, filters, permutations).
#[derive(Clone)]
pub struct SubDataset<D> {
    inner: D,
    indices: Rc<[usize]>,
    identity: Identity,
}

impl<D: Dataset> SubDataset<D> {
    pub(crate) fn new(inner: D, indices: Vec<usize>, modifier: Modifier) -> Self {
        let identity = inner.identity().with_modifier(modifier);
        Self {
            inner,
            indices: indices.into(),
            identity,
        }
    }

    /// Indices into the operand, in order.
    pub fn indices(&self) -> &[usize] {
        &self.indices
    }
}

impl<D: Dataset> Dataset for SubDataset<D> {
    type Item = D::Item;

    fn len(&self) -> usize {
        self.indices.len()
    }

    fn get_example(&self, index: usize) -> D::Item {
        self.inner.get_example(self.indices[index])
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

/// Strided range `start, start + step, ...` below `stop`.
#[derive(Clone)]
pub struct SubrangeDataset<D> {
    inner: D,
    start: usize,
    step: usize,
    len: usize,
    identity: Identity,
}

impl<D: Dataset> SubrangeDataset<D> {
    pub(crate) fn new(inner: D, start: usize, stop: usize, step: usize) -> Self {
        let identity = inner
            .identity()
            .with_modifier(Modifier::Slice { start, stop, step });
        let len = (stop.saturating_sub(start) + step - 1) / step;
        Self {
            inner,
            start,
            step,
            len,
            identity,
        }
    }
}

impl<D: Dataset> Dataset for SubrangeDataset<D> {
    type Item = D::Item;

    fn len(&self) -> usize {
        self.len
    }

    fn get_example(&self, index: usize) -> D::Item {
        self.inner.get_example(self.start + self.step * index)
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

/// The operand repeated end to end.
#[derive(Clone)]
pub struct RepeatDataset<D> {
    inner: D,
    repeats: usize,
    identity: Identity,
}

impl<D: Dataset> RepeatDataset<D> {
    pub(crate) fn new(inner: D, repeats: usize) -> Self {
        let identity = inner.identity().with_modifier(Modifier::Repeat(repeats));
        Self {
            inner,
            repeats,
            identity,
        }
    }
}

impl<D: Dataset> Dataset for RepeatDataset<D> {
    type Item = D::Item;

    fn len(&self) -> usize {
        self.inner.len() * self.repeats
    }

    fn get_example(&self, index: usize) -> D::Item {
        self.inner.get_example(index % self.inner.len())
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

/// Seeded sample, with or without replacement.
#[derive(Clone)]
pub struct SampleDataset<D> {
    inner: D,
    indices: Rc<[usize]>,
    identity: Identity,
}

impl<D: Dataset> SampleDataset<D> {
    pub(crate) fn new(inner: D, indices: Vec<usize>, seed: u64, length: Option<usize>, replace: bool) -> Self {
        let identity = inner.identity().with_modifier(Modifier::Sample {
            seed,
            length,
            replace,
        });
        Self {
            inner,
            indices: indices.into(),
            identity,
        }
    }
}

impl<D: Dataset> Dataset for SampleDataset<D> {
    type Item = D::Item;

    fn len(&self) -> usize {
        self.indices.len()
    }

    fn get_example(&self, index: usize) -> D::Item {
        self.inner.get_example(self.indices[index])
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

/// Every access draws a fresh seeded-random element, ignoring the index.
#[derive(Clone)]
pub struct RandomDataset<D> {
    inner: D,
    len: usize,
    rng: RefCell<ChaCha8Rng>,
    identity: Identity,
}

impl<D: Dataset> RandomDataset<D> {
    pub(crate) fn new(inner: D, length: Option<usize>, seed: u64) -> Self {
        let identity = inner
            .identity()
            .with_modifier(Modifier::Random { seed, length });
        let len = length.unwrap_or_else(|| inner.len());
        Self {
            inner,
            len,
            rng: RefCell::new(ChaCha8Rng::seed_from_u64(seed)),
            identity,
        }
    }
}

impl<D: Dataset> Dataset for RandomDataset<D> {
    type Item = D::Item;

    fn len(&self) -> usize {
        if self.inner.is_empty() {
            0
        } else {
            self.len
        }
    }

    fn get_example(&self, _index: usize) -> D::Item {
        let pick = self.rng.borrow_mut().gen_range(0..self.inner.len());
        self.inner.get_example(pick)
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

// ============================================================================
// GROUPING
// ============================================================================

/// Consecutive elements grouped into batches; the last batch may be smaller.
#[derive(Clone)]
pub struct BatchDataset<D> {
    inner: D,
    size: usize,
    identity: Identity,
}

impl<D: Dataset> BatchDataset<D> {
    pub(crate) fn new(inner: D, size: usize) -> Self {
        let identity = inner.identity().with_modifier(Modifier::Batch(size));
        Self {
            inner,
            size,
            identity,
        }
    }
}

impl<D: Dataset> Dataset for BatchDataset<D> {
    type Item = Vec<D::Item>;

    fn len(&self) -> usize {
        (self.inner.len() + self.size - 1) / self.size
    }

    fn get_example(&self, index: usize) -> Vec<D::Item> {
        let start = index * self.size;
        let end = (start + self.size).min(self.inner.len());
        (start..end).map(|i| self.inner.get_example(i)).collect()
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

/// Pairs of elements from two equally long datasets.
#[derive(Clone)]
pub struct ZipDataset<A, B> {
    first: A,
    second: B,
    identity: Identity,
    info: Info,
}

impl<A: Dataset, B: Dataset> ZipDataset<A, B> {
    pub(crate) fn new(first: A, second: B) -> Self {
        let identity = Identity::combined(
            "zip",
            '[',
            ']',
            &[first.identity().clone(), second.identity().clone()],
        );
        let mut info = first.info().clone();
        info.extend(second.info().clone());
        Self {
            first,
            second,
            identity,
            info,
        }
    }
}

impl<A: Dataset, B: Dataset> Dataset for ZipDataset<A, B> {
    type Item = (A::Item, B::Item);

    fn len(&self) -> usize {
        self.first.len()
    }

    fn get_example(&self, index: usize) -> Self::Item {
        (self.first.get_example(index), self.second.get_example(index))
    }

    fn identity(&self) -> &Identity {
        &self.identity
    }

    fn info(&self) -> &Info {
        &self.info
    }

    fn clear_persistent_cache(&self) -> DataResult<()> {
        self.first.clear_persistent_cache()?;
        self.second.clear_persistent_cache()
    }
}

/// Tuples of elements from any number of equally long datasets of one type.
#[derive(Clone)]
pub struct ZipAllDataset<D> {
    parts: Vec<D>,
    identity: Identity,
    info: Info,
}

impl<D: Dataset> ZipAllDataset<D> {
    pub(crate) fn new(parts: Vec<D>) -> Self {
        let ids: Vec<Identity> = parts.iter().map(|p| p.identity().clone()).collect();
        let mut info = Info::new();
        for part in &parts {
            info.extend(part.info().clone());
        }
        Self {
            identity: Identity::combined("zip", '[', ']', &ids),
            parts,
            info,
        }
    }
}

impl<D: Dataset> Dataset for ZipAllDataset<D> {
    type Item = Vec<D::Item>;

    fn len(&self) -> usize {
        self.parts.first().map_or(0, |p| p.len())
    }

    fn get_example(&self, index: usize) -> Vec<D::Item> {
        self.parts.iter().map(|p| p.get_example(index)).collect()
    }

    fn identity(&self) -> &Identity {
        &self.identity
    }

    fn info(&self) -> &Info {
        &self.info
    }

    fn clear_persistent_cache(&self) -> DataResult<()> {
        self.parts.iter().try_for_each(|p| p.clear_persistent_cache())
    }
}

/// Datasets concatenated end to end.
///
/// Metadata keeps only the entries all operands agree on.
#[derive(Clone)]
pub struct JoinDataset<D> {
    parts: Vec<D>,
    ends: Vec<usize>,
    identity: Identity,
    info: Info,
}

impl<D: Dataset> JoinDataset<D> {
    pub(crate) fn new(parts: Vec<D>) -> Self {
        let ids: Vec<Identity> = parts.iter().map(|p| p.identity().clone()).collect();
        let mut ends = Vec::with_capacity(parts.len());
        let mut total = 0;
        for part in &parts {
            total += part.len();
            ends.push(total);
        }
        let info = match parts.split_first() {
            Some((first, rest)) => first
                .info()
                .iter()
                .filter(|(k, v)| rest.iter().all(|p| p.info().get(*k) == Some(*v)))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            None => Info::new(),
        };
        Self {
            identity: Identity::combined("join", '(', ')', &ids),
            parts,
            ends,
            info,
        }
    }
}

impl<D: Dataset> Dataset for JoinDataset<D> {
    type Item = D::Item;

    fn len(&self) -> usize {
        self.ends.last().copied().unwrap_or(0)
    }

    fn get_example(&self, index: usize) -> D::Item {
        let part = self.ends.partition_point(|&end| end <= index);
        let offset = if part == 0 { 0 } else { self.ends[part - 1] };
        self.parts[part].get_example(index - offset)
    }

    fn identity(&self) -> &Identity {
        &self.identity
    }

    fn info(&self) -> &Info {
        &self.info
    }

    fn clear_persistent_cache(&self) -> DataResult<()> {
        self.parts.iter().try_for_each(|p| p.clear_persistent_cache())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{DataError, SplitPoint, VecDataset};

    fn numbers(n: i32) -> VecDataset<i32> {
        VecDataset::new("numbers", (0..n).collect())
    }

    #[test]
    fn test_strided_slice() {
        let ds = numbers(10).slice(1..8, 3).unwrap();
        assert_eq!(ds.iter().collect::<Vec<_>>(), vec![1, 4, 7]);
        assert_eq!(ds.identifier(), "numbers.[1..8;3]");
    }

    #[test]
    fn test_negative_slice_bounds_wrap_and_clamp() {
        let ds = numbers(10).slice(-3.., 1).unwrap();
        assert_eq!(ds.iter().collect::<Vec<_>>(), vec![7, 8, 9]);
        let ds = numbers(10).slice(..=-2, 1).unwrap();
        assert_eq!(ds.len(), 9);
        let ds = numbers(3).slice(5..100, 1).unwrap();
        assert!(ds.is_empty());
    }

    #[test]
    fn test_zero_step_is_rejected() {
        assert!(matches!(
            numbers(3).slice(.., 0),
            Err(DataError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_batch_last_size() {
        let ds = numbers(7).batch(3).unwrap();
        assert_eq!(ds.len(), 3);
        assert_eq!(ds.get(-1).unwrap(), vec![6]);
        assert_eq!(ds.get(0).unwrap(), vec![0, 1, 2]);
    }

    #[test]
    fn test_repeat_wraps_around() {
        let ds = numbers(3).repeat(2);
        assert_eq!(ds.iter().collect::<Vec<_>>(), vec![0, 1, 2, 0, 1, 2]);
    }

    #[test]
    fn test_sample_without_replacement_too_large() {
        assert!(numbers(3).sample(Some(4), false, 1).is_err());
        let ds = numbers(3).sample(Some(5), true, 1).unwrap();
        assert_eq!(ds.len(), 5);
        assert!(ds.iter().all(|x| (0..3).contains(&x)));
    }

    #[test]
    fn test_random_is_seeded() {
        let a: Vec<i32> = numbers(50).random(Some(8), 3).iter().collect();
        let b: Vec<i32> = numbers(50).random(Some(8), 3).iter().collect();
        assert_eq!(a, b);
    }

    #[test]
    fn test_random_same_index_draws_independently() {
        let random = numbers(50).random(Some(8), 3);
        let first = random.get_example(0);
        assert!((0..32).any(|_| random.get_example(0) != first));
    }

    #[test]
    fn test_zip_requires_equal_lengths() {
        let err = numbers(3).zip(numbers(4)).err().unwrap();
        assert!(matches!(err, DataError::LengthMismatch { expected: 3, found: 4 }));
        let zipped = numbers(3).zip(numbers(3).map(|x| x * 2)).unwrap();
        assert_eq!(zipped.get(2).unwrap(), (2, 4));
        assert_eq!(zipped.identifier(), "zip[numbers,numbers.map]");
    }

    #[test]
    fn test_join_keeps_agreeing_info() {
        let a = numbers(2).with_info("classes", 10).with_info("split", "a");
        let b = numbers(3).with_info("classes", 10).with_info("split", "b");
        let joined = a.join(vec![b]);
        assert_eq!(joined.len(), 5);
        assert_eq!(joined.get(2).unwrap(), 0);
        assert_eq!(joined.info().get("classes"), Some(&serde_json::json!(10)));
        assert!(joined.info().get("split").is_none());
    }

    #[test]
    fn test_join_skips_empty_parts() {
        let joined = numbers(0).join(vec![numbers(2), numbers(0), numbers(1)]);
        assert_eq!(joined.iter().collect::<Vec<_>>(), vec![0, 1, 0]);
    }

    #[test]
    fn test_split_ratio_and_position() {
        let (a, b) = numbers(10).split(SplitPoint::Ratio(0.75)).unwrap();
        assert_eq!((a.len(), b.len()), (8, 2));
        let (a, b) = numbers(10).split(SplitPoint::Position(3)).unwrap();
        assert_eq!((a.len(), b.len()), (3, 7));
        assert_eq!(b.get(0).unwrap(), 3);
        assert!(numbers(10).split(SplitPoint::Ratio(1.5)).is_err());
    }

    #[test]
    fn test_subset_validates_indices() {
        assert!(matches!(
            numbers(3).subset(vec![0, 3]),
            Err(DataError::IndexOutOfRange { index: 3, len: 3 })
        ));
        let ds = numbers(5).subset(vec![4, 0]).unwrap();
        assert_eq!(ds.iter().collect::<Vec<_>>(), vec![4, 0]);
    }
}

//! Dataset Trait
//!
//! Random-access collections with a deterministic identity. Every operator
//! returns a new lazy view over its operand; nothing is materialised until an
//! element is requested, except where an operator documents eager work.

use std::collections::BTreeMap;
use std::ops::{Bound, RangeBounds};
use std::path::Path;
use std::rc::Rc;

use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::de::DeserializeOwned;
use serde::Serialize;

use super::cache::{CacheDataset, HddRamCacheDataset};
use super::collate::{Collate, CollateDataset, CollateFn};
use super::hdd_cache::{HddCacheDataset, HddFieldCacheDataset};
use super::identity::{subset_hash, Identity, Modifier};
use super::info::{InfoDataset, InfoStore};
use super::record::{Field, Project, Record};
use super::views::{
    BatchDataset, JoinDataset, MapDataset, ProjectDataset, RandomDataset, RepeatDataset,
    SampleDataset, SubDataset, SubrangeDataset, ZipAllDataset, ZipDataset,
};
use super::{DataError, DataResult};

/// Dataset metadata, e.g. class count or pixel statistics.
pub type Info = BTreeMap<String, serde_json::Value>;

/// Default seed of seeded operators.
pub const DEFAULT_SEED: u64 = 53;

/// Where to split a dataset in two.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SplitPoint {
    /// Fraction of the length going to the first part; rounded to the nearest index.
    Ratio(f64),
    /// Length of the first part.
    Position(usize),
}

/// Trait for datasets.
///
/// Implementors provide `len`, `get_example`, `identity` and `info`; every
/// operator is a provided method returning a lazy view.
///
/// # Example
/// ```rust,no_run
/// use rampart::data::{Dataset, VecDataset};
///
/// let ds = VecDataset::new("digits", (0..10).collect::<Vec<i32>>());
/// let evens = ds.filter_named("even", |x| x % 2 == 0).map(|x| x * 10);
/// assert_eq!(evens.get(-1).unwrap(), 80);
/// assert_eq!(evens.identifier(), "digits.filter(even).map");
/// ```
pub trait Dataset {
    /// The type of item returned by the dataset.
    type Item;

    /// Get the number of items in the dataset.
    fn len(&self) -> usize;

    /// Get an item by an index already known to be in `[0, len)`.
    fn get_example(&self, index: usize) -> Self::Item;

    /// Name, subset and applied operators.
    fn identity(&self) -> &Identity;

    /// Metadata.
    fn info(&self) -> &Info;

    /// Delete every persistent cache in this composition tree.
    fn clear_persistent_cache(&self) -> DataResult<()> {
        Ok(())
    }

    /// Check if the dataset is empty.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// String form of the identity, used as a cache key.
    fn identifier(&self) -> String {
        self.identity().to_string()
    }

    /// Get an item; negative indices count from the end.
    fn get(&self, index: isize) -> DataResult<Self::Item> {
        let len = self.len();
        let resolved = if index < 0 {
            index + len as isize
        } else {
            index
        };
        if resolved < 0 || resolved as usize >= len {
            return Err(DataError::IndexOutOfRange { index, len });
        }
        Ok(self.get_example(resolved as usize))
    }

    /// Get an item restricted to some of its fields.
    fn get_fields(&self, index: isize, fields: &[Field]) -> DataResult<Self::Item>
    where
        Self::Item: Project,
    {
        let item = self.get(index)?;
        if let Some(missing) = fields.iter().find(|f| !item.has_field(f)) {
            return Err(DataError::UnknownField(missing.to_string()));
        }
        Ok(item.project(fields))
    }

    /// Iterate over all items in order.
    fn iter(&self) -> DatasetIter<'_, Self>
    where
        Self: Sized,
    {
        DatasetIter {
            dataset: self,
            index: 0,
        }
    }

    /// Average serialized size of a few seeded-randomly chosen elements, in bytes.
    fn approx_example_size(&self, sample_count: usize) -> DataResult<u64>
    where
        Self::Item: Serialize,
    {
        if self.is_empty() || sample_count == 0 {
            return Ok(0);
        }
        let indices = permutation(self.len(), DEFAULT_SEED);
        let count = sample_count.min(self.len());
        let mut total = 0;
        for &i in &indices[..count] {
            total += bincode::serialized_size(&self.get_example(i))?;
        }
        Ok(total / count as u64)
    }

    /// Transform every element with `f`.
    fn map<U, F>(self, f: F) -> MapDataset<Self, F>
    where
        Self: Sized,
        F: Fn(Self::Item) -> U,
    {
        MapDataset::new(self, f, None)
    }

    /// Transform every element with a named function; the name enters the identifier.
    fn map_named<U, F>(self, name: &str, f: F) -> MapDataset<Self, F>
    where
        Self: Sized,
        F: Fn(Self::Item) -> U,
    {
        MapDataset::new(self, f, Some(name.to_string()))
    }

    /// Keep the elements satisfying `predicate`.
    ///
    /// Scans the whole dataset once at construction.
    fn filter<P>(self, predicate: P) -> SubDataset<Self>
    where
        Self: Sized,
        P: Fn(&Self::Item) -> bool,
    {
        let indices = matching_indices(&self, predicate);
        let name = format!("{:x}", subset_hash(&indices));
        SubDataset::new(self, indices, Modifier::Filter(name))
    }

    /// Keep the elements satisfying a named predicate.
    fn filter_named<P>(self, name: &str, predicate: P) -> SubDataset<Self>
    where
        Self: Sized,
        P: Fn(&Self::Item) -> bool,
    {
        let indices = matching_indices(&self, predicate);
        SubDataset::new(self, indices, Modifier::Filter(name.to_string()))
    }

    /// View of the elements at `indices`, in that order.
    fn subset(self, indices: Vec<usize>) -> DataResult<SubDataset<Self>>
    where
        Self: Sized,
    {
        let len = self.len();
        if let Some(&bad) = indices.iter().find(|&&i| i >= len) {
            return Err(DataError::IndexOutOfRange {
                index: bad as isize,
                len,
            });
        }
        let hash = subset_hash(&indices);
        Ok(SubDataset::new(self, indices, Modifier::Indices(hash)))
    }

    /// Strided view over a range; bounds are clamped and negative bounds wrap.
    fn slice<R>(self, range: R, step: usize) -> DataResult<SubrangeDataset<Self>>
    where
        Self: Sized,
        R: RangeBounds<isize>,
    {
        if step == 0 {
            return Err(DataError::InvalidArgument("slice step must be positive".into()));
        }
        let len = self.len() as isize;
        let resolve = |i: isize| -> usize {
            let i = if i < 0 { i + len } else { i };
            i.clamp(0, len) as usize
        };
        let start = match range.start_bound() {
            Bound::Included(&s) => resolve(s),
            Bound::Excluded(&s) => resolve(s.saturating_add(1)),
            Bound::Unbounded => 0,
        };
        let stop = match range.end_bound() {
            Bound::Included(&e) => {
                let e = if e < 0 { e + len } else { e };
                (e + 1).clamp(0, len) as usize
            }
            Bound::Excluded(&e) => resolve(e),
            Bound::Unbounded => len as usize,
        };
        let stop = stop.max(start);
        Ok(SubrangeDataset::new(self, start, stop, step))
    }

    /// Seeded permutation.
    fn permute(self, seed: u64) -> SubDataset<Self>
    where
        Self: Sized,
    {
        let indices = permutation(self.len(), seed);
        SubDataset::new(self, indices, Modifier::Permute(seed))
    }

    /// Seeded sample of `length` elements (all of them by default).
    fn sample(self, length: Option<usize>, replace: bool, seed: u64) -> DataResult<SampleDataset<Self>>
    where
        Self: Sized,
    {
        let len = self.len();
        let n = length.unwrap_or(len);
        let indices = if replace {
            if len == 0 && n > 0 {
                return Err(DataError::InvalidArgument(
                    "cannot sample from an empty dataset".into(),
                ));
            }
            let mut rng = ChaCha8Rng::seed_from_u64(seed);
            (0..n).map(|_| rng.gen_range(0..len)).collect()
        } else {
            if n > len {
                return Err(DataError::InvalidArgument(format!(
                    "a sample without replacement cannot be larger than the dataset ({} > {})",
                    n, len
                )));
            }
            let mut indices = permutation(len, seed);
            indices.truncate(n);
            indices
        };
        Ok(SampleDataset::new(self, indices, seed, length, replace))
    }

    /// Concatenate `n` copies of the dataset.
    fn repeat(self, n: usize) -> RepeatDataset<Self>
    where
        Self: Sized,
    {
        RepeatDataset::new(self, n)
    }

    /// Index-independent seeded random draws.
    ///
    /// Draws are independent, so the same index may yield different elements.
    fn random(self, length: Option<usize>, seed: u64) -> RandomDataset<Self>
    where
        Self: Sized,
    {
        RandomDataset::new(self, length, seed)
    }

    /// Group consecutive elements into batches of `size`; the last may be smaller.
    fn batch(self, size: usize) -> DataResult<BatchDataset<Self>>
    where
        Self: Sized,
    {
        if size == 0 {
            return Err(DataError::InvalidArgument("batch size must be positive".into()));
        }
        Ok(BatchDataset::new(self, size))
    }

    /// Pair elements with those of an equally long dataset.
    fn zip<O>(self, other: O) -> DataResult<ZipDataset<Self, O>>
    where
        Self: Sized,
        O: Dataset,
    {
        if self.len() != other.len() {
            return Err(DataError::LengthMismatch {
                expected: self.len(),
                found: other.len(),
            });
        }
        Ok(ZipDataset::new(self, other))
    }

    /// Zip with any number of equally long datasets of the same type.
    fn zip_all(self, others: Vec<Self>) -> DataResult<ZipAllDataset<Self>>
    where
        Self: Sized,
    {
        if let Some(bad) = others.iter().find(|d| d.len() != self.len()) {
            return Err(DataError::LengthMismatch {
                expected: self.len(),
                found: bad.len(),
            });
        }
        let mut parts = vec![self];
        parts.extend(others);
        Ok(ZipAllDataset::new(parts))
    }

    /// Merge every batch (or zipped tuple) into one value with the default collation.
    ///
    /// The first element is collated eagerly so incompatible elements fail here.
    fn collate(self) -> DataResult<CollateDataset<Self, CollateFn<Self::Item>>>
    where
        Self: Sized,
        Self::Item: Collate,
    {
        if !self.is_empty() {
            self.get_example(0).check()?;
        }
        let f: CollateFn<Self::Item> = <Self::Item as Collate>::collate;
        Ok(CollateDataset::new(self, f, None))
    }

    /// Merge every batch (or zipped tuple) with a custom named function.
    fn collate_with<U, F>(self, name: &str, f: F) -> CollateDataset<Self, F>
    where
        Self: Sized,
        F: Fn(Self::Item) -> U,
    {
        CollateDataset::new(self, f, Some(name.to_string()))
    }

    /// Concatenate with other datasets of the same type.
    fn join(self, others: Vec<Self>) -> JoinDataset<Self>
    where
        Self: Sized,
    {
        let mut parts = vec![self];
        parts.extend(others);
        JoinDataset::new(parts)
    }

    /// Split into a prefix and the remainder.
    fn split(self, at: SplitPoint) -> DataResult<(SubrangeDataset<Self>, SubrangeDataset<Self>)>
    where
        Self: Sized + Clone,
    {
        let len = self.len();
        let position = match at {
            SplitPoint::Ratio(r) if (0.0..=1.0).contains(&r) => (r * len as f64).round() as usize,
            SplitPoint::Ratio(r) => {
                return Err(DataError::InvalidArgument(format!(
                    "split ratio must be in [0, 1], got {}",
                    r
                )))
            }
            SplitPoint::Position(p) if p <= len => p,
            SplitPoint::Position(p) => {
                return Err(DataError::IndexOutOfRange {
                    index: p as isize,
                    len,
                })
            }
        };
        let head = SubrangeDataset::new(self.clone(), 0, position, 1);
        let tail = SubrangeDataset::new(self, position, len, 1);
        Ok((head, tail))
    }

    /// Restrict every element to `fields`.
    fn project(self, fields: Vec<Field>) -> DataResult<ProjectDataset<Self>>
    where
        Self: Sized,
        Self::Item: Project,
    {
        if !self.is_empty() {
            let first = self.get_example(0);
            if let Some(missing) = fields.iter().find(|f| !first.has_field(f)) {
                return Err(DataError::UnknownField(missing.to_string()));
            }
        }
        Ok(ProjectDataset::new(self, fields))
    }

    /// Cache the first `max_size` elements (all by default) in memory.
    fn cache(self, max_size: Option<usize>) -> CacheDataset<Self>
    where
        Self: Sized,
        Self::Item: Clone,
    {
        CacheDataset::new(self, max_size)
    }

    /// Materialise everything in memory, persisted as one chunked file under `dir`.
    fn cache_hdd_ram(self, dir: impl AsRef<Path>, chunk_size: usize) -> DataResult<HddRamCacheDataset<Self>>
    where
        Self: Sized,
        Self::Item: Serialize + DeserializeOwned + Clone,
    {
        HddRamCacheDataset::new(self, dir.as_ref(), chunk_size)
    }

    /// Cache each element in its own file under `dir`, computed on first access.
    fn cache_hdd(self, dir: impl AsRef<Path>) -> DataResult<HddCacheDataset<Self>>
    where
        Self: Sized,
        Self::Item: Serialize + DeserializeOwned,
    {
        HddCacheDataset::new(self, dir.as_ref())
    }

    /// Cache each field of each record in its own file, loaded lazily.
    fn cache_hdd_fields<V>(self, dir: impl AsRef<Path>) -> DataResult<HddFieldCacheDataset<Self, V>>
    where
        Self: Dataset<Item = Record<V>> + Sized + 'static,
        V: Serialize + DeserializeOwned + Clone + 'static,
    {
        HddFieldCacheDataset::new(self, dir.as_ref())
    }

    /// Attach a metadata entry.
    fn with_info(self, key: &str, value: impl Into<serde_json::Value>) -> InfoDataset<Self>
    where
        Self: Sized,
    {
        InfoDataset::new(self, key, value.into())
    }

    /// Compute a metadata entry from the dataset and attach it.
    fn info_cache<F>(self, key: &str, compute: F) -> DataResult<InfoDataset<Self>>
    where
        Self: Sized,
        F: FnOnce(&Self) -> DataResult<serde_json::Value>,
    {
        let value = compute(&self)?;
        Ok(InfoDataset::new(self, key, value))
    }

    /// Like [`Dataset::info_cache`], but the computed value is persisted under `dir`
    /// and reused by later runs over the same identifier.
    fn info_cache_hdd<F>(self, key: &str, compute: F, dir: impl AsRef<Path>) -> DataResult<InfoDataset<Self>>
    where
        Self: Sized,
        F: FnOnce(&Self) -> DataResult<serde_json::Value>,
    {
        let path = dir.as_ref().join(format!("{}.info.json", self.identifier()));
        let mut store = InfoStore::open(&path)?;
        let value = match store.get(key) {
            Some(value) => value.clone(),
            None => {
                let value = compute(&self)?;
                store.insert(key, value.clone())?;
                value
            }
        };
        Ok(InfoDataset::new(self, key, value).with_store(path))
    }

    /// Type-erase into a cheaply clonable handle.
    fn boxed(self) -> DynDataset<Self::Item>
    where
        Self: Sized + 'static,
    {
        DynDataset(Rc::new(self))
    }
}

/// Iterator over the items of a dataset.
pub struct DatasetIter<'a, D> {
    dataset: &'a D,
    index: usize,
}

impl<'a, D: Dataset> Iterator for DatasetIter<'a, D> {
    type Item = D::Item;

    fn next(&mut self) -> Option<Self::Item> {
        if self.index >= self.dataset.len() {
            return None;
        }
        let item = self.dataset.get_example(self.index);
        self.index += 1;
        Some(item)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.dataset.len().saturating_sub(self.index);
        (remaining, Some(remaining))
    }
}

impl<'a, D: Dataset> ExactSizeIterator for DatasetIter<'a, D> {}

/// Type-erased, reference-counted dataset.
pub struct DynDataset<T>(Rc<dyn Dataset<Item = T>>);

impl<T> Clone for DynDataset<T> {
    fn clone(&self) -> Self {
        Self(Rc::clone(&self.0))
    }
}

impl<T> Dataset for DynDataset<T> {
    type Item = T;

    fn len(&self) -> usize {
        self.0.len()
    }

    fn get_example(&self, index: usize) -> T {
        self.0.get_example(index)
    }

    fn identity(&self) -> &Identity {
        self.0.identity()
    }

    fn info(&self) -> &Info {
        self.0.info()
    }

    fn clear_persistent_cache(&self) -> DataResult<()> {
        self.0.clear_persistent_cache()
    }
}

impl<T: 'static> std::ops::Add for DynDataset<T> {
    type Output = JoinDataset<DynDataset<T>>;

    fn add(self, other: Self) -> Self::Output {
        self.join(vec![other])
    }
}

impl<T> std::fmt::Debug for DynDataset<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dataset")
            .field("identifier", &self.identifier())
            .field("len", &self.len())
            .field("info", self.info())
            .finish()
    }
}

/// Seeded permutation of `0..len`.
pub(crate) fn permutation(len: usize, seed: u64) -> Vec<usize> {
    let mut indices: Vec<usize> = (0..len).collect();
    indices.shuffle(&mut ChaCha8Rng::seed_from_u64(seed));
    indices
}

fn matching_indices<D: Dataset>(dataset: &D, predicate: impl Fn(&D::Item) -> bool) -> Vec<usize> {
    (0..dataset.len())
        .filter(|&i| predicate(&dataset.get_example(i)))
        .collect()
}

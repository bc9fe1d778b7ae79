//! DataLoader
//!
//! Batched iteration over datasets of `(input, target)` tensor pairs.

use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rampart_autograd::Tensor;

use super::Dataset;

/// DataLoader for batched iteration over datasets.
///
/// # Example
/// ```rust,no_run
/// use rampart::data::{DataLoader, TensorDataset};
///
/// let dataset = TensorDataset::new(
///     "toy",
///     vec![vec![1.0, 2.0], vec![3.0, 4.0], vec![5.0, 6.0], vec![7.0, 8.0]],
///     vec![vec![0.0], vec![1.0], vec![0.0], vec![1.0]],
///     vec![2],
///     vec![1],
/// )
/// .unwrap();
///
/// let loader = DataLoader::new(dataset, 2, true).seed(7);
/// for (batch_x, batch_y) in loader.iter() {
///     // batch_x: [2, 2], batch_y: [2, 1]
/// }
/// ```
pub struct DataLoader<D: Dataset> {
    dataset: D,
    batch_size: usize,
    shuffle: bool,
    drop_last: bool,
    seed: Option<u64>,
}

impl<D: Dataset> DataLoader<D> {
    /// Create a new DataLoader. A batch size of zero is treated as one.
    pub fn new(dataset: D, batch_size: usize, shuffle: bool) -> Self {
        Self {
            dataset,
            batch_size: batch_size.max(1),
            shuffle,
            drop_last: false,
            seed: None,
        }
    }

    /// Set whether to drop the last incomplete batch.
    pub fn drop_last(mut self, drop_last: bool) -> Self {
        self.drop_last = drop_last;
        self
    }

    /// Shuffle reproducibly from `seed`.
    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Get the number of batches.
    pub fn num_batches(&self) -> usize {
        let len = self.dataset.len();
        if self.drop_last {
            len / self.batch_size
        } else {
            (len + self.batch_size - 1) / self.batch_size
        }
    }

    /// Get the batch size.
    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Get reference to the underlying dataset.
    pub fn dataset(&self) -> &D {
        &self.dataset
    }
}

impl<D: Dataset<Item = (Tensor, Tensor)>> DataLoader<D> {
    /// Create an iterator over batches.
    pub fn iter(&self) -> DataLoaderIterator<'_, D> {
        let mut indices: Vec<usize> = (0..self.dataset.len()).collect();

        if self.shuffle {
            match self.seed {
                Some(seed) => indices.shuffle(&mut ChaCha8Rng::seed_from_u64(seed)),
                None => indices.shuffle(&mut rand::thread_rng()),
            }
        }

        DataLoaderIterator {
            loader: self,
            indices,
            current: 0,
        }
    }
}

/// Iterator over batches from a DataLoader.
pub struct DataLoaderIterator<'a, D: Dataset> {
    loader: &'a DataLoader<D>,
    indices: Vec<usize>,
    current: usize,
}

impl<'a, D: Dataset<Item = (Tensor, Tensor)>> Iterator for DataLoaderIterator<'a, D> {
    type Item = (Tensor, Tensor);

    fn next(&mut self) -> Option<Self::Item> {
        if self.current >= self.indices.len() {
            return None;
        }

        let start = self.current;
        let end = (start + self.loader.batch_size).min(self.indices.len());

        if self.loader.drop_last && end - start < self.loader.batch_size {
            return None;
        }

        self.current = end;

        let (inputs, targets): (Vec<Tensor>, Vec<Tensor>) = self.indices[start..end]
            .iter()
            .map(|&i| self.loader.dataset.get_example(i))
            .unzip();

        Some((Tensor::stack(&inputs), Tensor::stack(&targets)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::TensorDataset;

    fn toy(n: usize) -> TensorDataset {
        TensorDataset::new(
            "toy",
            (0..n).map(|i| vec![i as f32, 0.0]).collect(),
            (0..n).map(|i| vec![(i % 2) as f32]).collect(),
            vec![2],
            vec![1],
        )
        .unwrap()
    }

    #[test]
    fn test_batches_cover_dataset() {
        let loader = DataLoader::new(toy(5), 2, false);
        assert_eq!(loader.num_batches(), 3);
        let batches: Vec<_> = loader.iter().collect();
        assert_eq!(batches[0].0.shape, vec![2, 2]);
        assert_eq!(batches[2].0.shape, vec![1, 2]);
        assert_eq!(batches[2].1.to_vec(), vec![0.0]);
    }

    #[test]
    fn test_drop_last() {
        let loader = DataLoader::new(toy(5), 2, false).drop_last(true);
        assert_eq!(loader.num_batches(), 2);
        assert_eq!(loader.iter().count(), 2);
    }

    #[test]
    fn test_seeded_shuffle_is_reproducible() {
        let a: Vec<Vec<f32>> = DataLoader::new(toy(10), 3, true).seed(1).iter().map(|b| b.0.to_vec()).collect();
        let b: Vec<Vec<f32>> = DataLoader::new(toy(10), 3, true).seed(1).iter().map(|b| b.0.to_vec()).collect();
        assert_eq!(a, b);
    }
}

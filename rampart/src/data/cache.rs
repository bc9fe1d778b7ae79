//! In-Memory Caches
//!
//! A RAM cache over a prefix of the dataset, and a whole-dataset cache that is
//! mirrored in memory and persisted as a single chunked file.

use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::rc::Rc;

use log::{info, warn};
use serde::de::DeserializeOwned;
use serde::Serialize;

use super::dataset::{Dataset, Info};
use super::identity::{Identity, Modifier};
use super::info::remove_if_exists;
use super::progress::Progress;
use super::{DataError, DataResult};

/// Default number of elements per serialized chunk.
pub const DEFAULT_CHUNK_SIZE: usize = 100;

// ============================================================================
// RAM CACHE
// ============================================================================

/// The first `max_size` elements held in memory; later indices fall through.
pub struct CacheDataset<D: Dataset> {
    inner: D,
    cached: Rc<Vec<D::Item>>,
    identity: Identity,
}

impl<D: Dataset> CacheDataset<D>
where
    D::Item: Clone,
{
    pub(crate) fn new(inner: D, max_size: Option<usize>) -> Self {
        let len = inner.len();
        let (count, modifier) = match max_size {
            Some(n) if n < len => (n, Modifier::Cache(Some(n))),
            _ => (len, Modifier::Cache(None)),
        };
        let identity = inner.identity().with_modifier(modifier);
        let mut progress = Progress::new(format!("Caching {} in RAM", identity), count);
        let mut cached = Vec::with_capacity(count);
        for i in 0..count {
            cached.push(inner.get_example(i));
            progress.tick();
        }
        progress.finish();
        Self {
            inner,
            cached: Rc::new(cached),
            identity,
        }
    }

    /// Number of elements held in memory.
    pub fn cached_len(&self) -> usize {
        self.cached.len()
    }
}

impl<D: Dataset + Clone> Clone for CacheDataset<D> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            cached: Rc::clone(&self.cached),
            identity: self.identity.clone(),
        }
    }
}

impl<D: Dataset> Dataset for CacheDataset<D>
where
    D::Item: Clone,
{
    type Item = D::Item;

    fn len(&self) -> usize {
        self.inner.len()
    }

    fn get_example(&self, index: usize) -> D::Item {
        match self.cached.get(index) {
            Some(item) => item.clone(),
            None => self.inner.get_example(index),
        }
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
// WHOLE-DATASET DISK CACHE
// ============================================================================

/// Every element held in memory and persisted as `<dir>/<identifier>.p`.
///
/// The file holds the element count followed by chunks of at most
/// `chunk_size` elements. A file that cannot be decoded, or decodes to the
/// wrong number of elements, is deleted and rebuilt from the source.
pub struct HddRamCacheDataset<D: Dataset> {
    inner: D,
    data: Rc<Vec<D::Item>>,
    path: PathBuf,
    identity: Identity,
}

/// Best-effort removal of a bad cache file; the data is recomputed either way.
fn discard(path: &Path) {
    if let Err(e) = remove_if_exists(path) {
        warn!("Could not delete {}: {}", path.display(), e);
    }
}

impl<D: Dataset> HddRamCacheDataset<D>
where
    D::Item: Serialize + DeserializeOwned + Clone,
{
    pub(crate) fn new(inner: D, dir: &Path, chunk_size: usize) -> DataResult<Self> {
        if chunk_size == 0 {
            return Err(DataError::InvalidArgument("chunk size must be positive".into()));
        }
        let identity = inner.identity().with_modifier(Modifier::CacheHddRam);
        let path = dir.join(format!("{}.p", identity));

        let loaded = if path.exists() {
            match read_chunks(&path, inner.len()) {
                Ok(data) => Some(data),
                Err(e) => {
                    warn!("Cache file {} is corrupt ({}); rebuilding it", path.display(), e);
                    discard(&path);
                    None
                }
            }
        } else {
            None
        };

        let data = match loaded {
            Some(data) => {
                info!("Loaded {} elements from {}", data.len(), path.display());
                data
            }
            None => {
                let mut progress = Progress::new(format!("Caching {}", identity), inner.len());
                let mut data = Vec::with_capacity(inner.len());
                for i in 0..inner.len() {
                    data.push(inner.get_example(i));
                    progress.tick();
                }
                progress.finish();
                if let Err(e) = write_chunks(&path, &data, chunk_size) {
                    warn!("Could not write cache file {}: {}", path.display(), e);
                    discard(&path);
                }
                data
            }
        };

        Ok(Self {
            inner,
            data: Rc::new(data),
            path,
            identity,
        })
    }

    /// Location of the cache file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn read_chunks<T: DeserializeOwned>(path: &Path, expected: usize) -> DataResult<Vec<T>> {
    let mut reader = BufReader::new(File::open(path)?);
    let count: u64 = bincode::deserialize_from(&mut reader)?;
    if count as usize != expected {
        return Err(DataError::LengthMismatch {
            expected,
            found: count as usize,
        });
    }
    let mut data = Vec::with_capacity(expected);
    while data.len() < expected {
        let chunk: Vec<T> = bincode::deserialize_from(&mut reader)?;
        if chunk.is_empty() {
            return Err(DataError::InvalidArgument("empty chunk in cache file".into()));
        }
        data.extend(chunk);
    }
    if data.len() != expected {
        return Err(DataError::LengthMismatch {
            expected,
            found: data.len(),
        });
    }
    Ok(data)
}

fn write_chunks<T: Serialize>(path: &Path, data: &[T], chunk_size: usize) -> DataResult<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut writer = BufWriter::new(File::create(path)?);
    bincode::serialize_into(&mut writer, &(data.len() as u64))?;
    for chunk in data.chunks(chunk_size) {
        bincode::serialize_into(&mut writer, chunk)?;
    }
    writer.flush()?;
    Ok(())
}

impl<D: Dataset + Clone> Clone for HddRamCacheDataset<D> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            data: Rc::clone(&self.data),
            path: self.path.clone(),
            identity: self.identity.clone(),
        }
    }
}

impl<D: Dataset> Dataset for HddRamCacheDataset<D>
where
    D::Item: Clone,
{
    type Item = D::Item;

    fn len(&self) -> usize {
        self.data.len()
    }

    fn get_example(&self, index: usize) -> D::Item {
        self.data[index].clone()
    }

    fn identity(&self) -> &Identity {
        &self.identity
    }

    fn info(&self) -> &Info {
        self.inner.info()
    }

    fn clear_persistent_cache(&self) -> DataResult<()> {
        remove_if_exists(&self.path)?;
        self.inner.clear_persistent_cache()
    }
}

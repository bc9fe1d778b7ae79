//! Per-Example Disk Caches
//!
//! One file per element (`{index}.p`) or one file per record field
//! (`{index}_{field}.p`) under `<dir>/<identifier>`. Files are written on first
//! access. A file that fails to decode is deleted and that single entry is
//! recomputed; a sample of entries that disagrees with the source invalidates
//! the whole directory.

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use log::{debug, warn};
use serde::de::DeserializeOwned;
use serde::Serialize;

use super::dataset::{Dataset, Info};
use super::identity::{Identity, Modifier};
use super::info::remove_if_exists;
use super::record::Record;
use super::DataResult;

/// Number of evenly spaced elements compared against the source on construction.
pub const CONSISTENCY_CHECK_SAMPLES: usize = 16;

/// A directory of individually serialized entries.
#[derive(Debug)]
struct CacheDir {
    path: PathBuf,
}

impl CacheDir {
    fn open(path: PathBuf) -> DataResult<Self> {
        fs::create_dir_all(&path)?;
        Ok(Self { path })
    }

    fn file(&self, name: &str) -> PathBuf {
        self.path.join(name)
    }

    /// Decode an entry; a corrupt file is deleted and reported as missing.
    fn load<T: DeserializeOwned>(&self, name: &str) -> Option<T> {
        let path = self.file(name);
        let bytes = fs::read(&path).ok()?;
        match bincode::deserialize(&bytes) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!("Deleting corrupt cache entry {}: {}", path.display(), e);
                if let Err(e) = fs::remove_file(&path) {
                    warn!("Could not delete {}: {}", path.display(), e);
                }
                None
            }
        }
    }

    /// Write an entry; failures are logged and leave no partial file.
    fn store<T: Serialize>(&self, name: &str, value: &T) {
        let path = self.file(name);
        let result = File::create(&path).map_err(bincode::Error::from).and_then(|file| {
            let mut writer = BufWriter::new(file);
            bincode::serialize_into(&mut writer, value)?;
            writer.flush().map_err(bincode::Error::from)
        });
        if let Err(e) = result {
            warn!("Could not write cache entry {}: {}", path.display(), e);
            let _ = fs::remove_file(&path);
        }
    }

    fn load_or_compute<T: Serialize + DeserializeOwned>(&self, name: &str, compute: impl FnOnce() -> T) -> T {
        if let Some(value) = self.load(name) {
            return value;
        }
        let value = compute();
        self.store(name, &value);
        value
    }

    /// Whether an existing entry serializes identically to the recomputed value.
    /// Missing entries agree trivially.
    fn agrees<T: Serialize>(&self, name: &str, expected: impl FnOnce() -> T) -> bool {
        let cached = match fs::read(self.file(name)) {
            Ok(bytes) => bytes,
            Err(_) => return true,
        };
        match bincode::serialize(&expected()) {
            Ok(bytes) => bytes == cached,
            Err(_) => false,
        }
    }

    fn reset(&self) -> DataResult<()> {
        self.remove()?;
        fs::create_dir_all(&self.path)?;
        Ok(())
    }

    fn remove(&self) -> DataResult<()> {
        match fs::remove_dir_all(&self.path) {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e.into()),
            _ => Ok(()),
        }
    }
}

/// `CONSISTENCY_CHECK_SAMPLES` evenly spaced indices, without repeats.
fn check_indices(len: usize) -> Vec<usize> {
    let mut indices: Vec<usize> = (0..CONSISTENCY_CHECK_SAMPLES)
        .map(|i| i * len / CONSISTENCY_CHECK_SAMPLES)
        .filter(|&i| i < len)
        .collect();
    indices.dedup();
    indices
}

fn open_checked(path: PathBuf, consistent: impl FnOnce(&CacheDir) -> bool) -> DataResult<CacheDir> {
    let dir = CacheDir::open(path)?;
    if consistent(&dir) {
        debug!("Cache {} is consistent", dir.path.display());
    } else {
        warn!(
            "Cache {} disagrees with its source; deleting it",
            dir.path.display()
        );
        dir.reset()?;
    }
    Ok(dir)
}

// ============================================================================
// ONE FILE PER ELEMENT
// ============================================================================

/// Elements cached as `<dir>/<identifier>/{index}.p`.
pub struct HddCacheDataset<D> {
    inner: D,
    dir: Rc<CacheDir>,
    identity: Identity,
}

impl<D> HddCacheDataset<D>
where
    D: Dataset,
    D::Item: Serialize + DeserializeOwned,
{
    pub(crate) fn new(inner: D, dir: &Path) -> DataResult<Self> {
        let identity = inner.identity().with_modifier(Modifier::CacheHdd(false));
        let dir = open_checked(dir.join(identity.to_string()), |cache| {
            check_indices(inner.len())
                .into_iter()
                .all(|i| cache.agrees(&format!("{}.p", i), || inner.get_example(i)))
        })?;
        Ok(Self {
            inner,
            dir: Rc::new(dir),
            identity,
        })
    }

    /// Directory holding the entries.
    pub fn cache_dir(&self) -> &Path {
        &self.dir.path
    }
}

impl<D: Clone> Clone for HddCacheDataset<D> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            dir: Rc::clone(&self.dir),
            identity: self.identity.clone(),
        }
    }
}

impl<D> Dataset for HddCacheDataset<D>
where
    D: Dataset,
    D::Item: Serialize + DeserializeOwned,
{
    type Item = D::Item;

    fn len(&self) -> usize {
        self.inner.len()
    }

    fn get_example(&self, index: usize) -> D::Item {
        self.dir
            .load_or_compute(&format!("{}.p", index), || self.inner.get_example(index))
    }

    fn identity(&self) -> &Identity {
        &self.identity
    }

    fn info(&self) -> &Info {
        self.inner.info()
    }

    fn clear_persistent_cache(&self) -> DataResult<()> {
        self.dir.remove()?;
        self.inner.clear_persistent_cache()
    }
}

// ============================================================================
// ONE FILE PER RECORD FIELD
// ============================================================================

/// Record fields cached as `<dir>/<identifier>/{index}_{field}.p`.
///
/// Returned records are lazy: a field's file is read (or written) only when the
/// field is accessed, and the source element is computed only when that file
/// is missing. Field names are taken from the first element.
pub struct HddFieldCacheDataset<D, V> {
    inner: Rc<D>,
    fields: Rc<[String]>,
    dir: Rc<CacheDir>,
    identity: Identity,
    _value: PhantomData<V>,
}

impl<D, V> HddFieldCacheDataset<D, V>
where
    D: Dataset<Item = Record<V>>,
    V: Serialize + DeserializeOwned + Clone + 'static,
{
    pub(crate) fn new(inner: D, dir: &Path) -> DataResult<Self> {
        let identity = inner.identity().with_modifier(Modifier::CacheHdd(true));
        let dir = open_checked(dir.join(identity.to_string()), |cache| {
            check_indices(inner.len()).into_iter().all(|i| {
                inner
                    .get_example(i)
                    .handles()
                    .into_iter()
                    .all(|(field, handle)| cache.agrees(&field_file(i, &field), || handle.get().clone()))
            })
        })?;
        let fields: Rc<[String]> = if inner.is_empty() {
            Rc::from(Vec::new())
        } else {
            inner.get_example(0).keys().map(str::to_string).collect()
        };
        Ok(Self {
            inner: Rc::new(inner),
            fields,
            dir: Rc::new(dir),
            identity,
            _value: PhantomData,
        })
    }

    /// Directory holding the entries.
    pub fn cache_dir(&self) -> &Path {
        &self.dir.path
    }
}

fn field_file(index: usize, field: &str) -> String {
    format!("{}_{}.p", index, field)
}

impl<D, V> Clone for HddFieldCacheDataset<D, V> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
            fields: Rc::clone(&self.fields),
            dir: Rc::clone(&self.dir),
            identity: self.identity.clone(),
            _value: PhantomData,
        }
    }
}

impl<D, V> Dataset for HddFieldCacheDataset<D, V>
where
    D: Dataset<Item = Record<V>> + 'static,
    V: Serialize + DeserializeOwned + Clone + 'static,
{
    type Item = Record<V>;

    fn len(&self) -> usize {
        self.inner.len()
    }

    /// # Panics
    /// When a missing entry is recomputed and the source element lacks a field
    /// the first element had.
    fn get_example(&self, index: usize) -> Record<V> {
        let mut record = Record::new();
        for field in self.fields.iter() {
            let inner = Rc::clone(&self.inner);
            let dir = Rc::clone(&self.dir);
            let file = field_file(index, field);
            let name = field.clone();
            record = record.with_lazy(field, move || {
                dir.load_or_compute(&file, || match inner.get_example(index).get(&name) {
                    Some(value) => value.clone(),
                    None => panic!("element {} has no field `{}`", index, name),
                })
            });
        }
        record
    }

    fn identity(&self) -> &Identity {
        &self.identity
    }

    fn info(&self) -> &Info {
        self.inner.info()
    }

    fn clear_persistent_cache(&self) -> DataResult<()> {
        self.dir.remove()?;
        self.inner.clear_persistent_cache()
    }
}

/// Remove a cache directory or file, ignoring a missing one.
pub(crate) fn remove_path(path: &Path) -> DataResult<()> {
    if path.is_dir() {
        CacheDir {
            path: path.to_path_buf(),
        }
        .remove()
    } else {
        remove_if_exists(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{FnDataset, VecDataset};
    use std::cell::Cell;

    fn counted(calls: &Rc<Cell<usize>>, len: usize) -> FnDataset<Vec<u32>> {
        let counter = Rc::clone(calls);
        FnDataset::new(Identity::new("seq"), len, move |i| {
            counter.set(counter.get() + 1);
            vec![i as u32; 3]
        })
    }

    #[test]
    fn test_check_indices() {
        assert_eq!(check_indices(0), Vec::<usize>::new());
        assert_eq!(check_indices(3), vec![0, 1, 2]);
        let many = check_indices(160);
        assert_eq!(many.len(), 16);
        assert_eq!(many[1], 10);
    }

    #[test]
    fn test_entries_are_written_on_access_and_reused() {
        let dir = tempfile::tempdir().unwrap();
        let calls = Rc::new(Cell::new(0));
        let ds = counted(&calls, 5).cache_hdd(dir.path()).unwrap();
        assert_eq!(ds.cache_dir(), dir.path().join("seq.cache_hdd"));
        assert_eq!(ds.get(2).unwrap(), vec![2, 2, 2]);
        assert!(ds.cache_dir().join("2.p").exists());
        assert_eq!(ds.get(2).unwrap(), vec![2, 2, 2]);
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn test_corrupt_entry_is_healed() {
        let dir = tempfile::tempdir().unwrap();
        let calls = Rc::new(Cell::new(0));
        let ds = counted(&calls, 5).cache_hdd(dir.path()).unwrap();
        ds.get(4).unwrap();
        let file = ds.cache_dir().join("4.p");
        fs::write(&file, [0xffu8; 2]).unwrap();
        assert_eq!(ds.get(4).unwrap(), vec![4, 4, 4]);
        let healed: Vec<u32> = bincode::deserialize(&fs::read(&file).unwrap()).unwrap();
        assert_eq!(healed, vec![4, 4, 4]);
    }

    #[test]
    fn test_stale_cache_is_discarded() {
        let dir = tempfile::tempdir().unwrap();
        let old = VecDataset::new("d", vec![1u8, 2, 3]).cache_hdd(dir.path()).unwrap();
        old.iter().for_each(drop);
        let stale = old.cache_dir().join("1.p");
        assert!(stale.exists());

        let new = VecDataset::new("d", vec![1u8, 9, 3]).cache_hdd(dir.path()).unwrap();
        assert!(!stale.exists());
        assert_eq!(new.get(1).unwrap(), 9);
    }

    #[test]
    fn test_field_cache_is_lazy_per_field() {
        let dir = tempfile::tempdir().unwrap();
        let records: Vec<Record<f32>> = (0..4)
            .map(|i| Record::new().with("x", i as f32).with("y", -(i as f32)))
            .collect();
        let ds = VecDataset::new("r", records).cache_hdd_fields(dir.path()).unwrap();
        assert_eq!(ds.identifier(), "r.cache_hdd_s");
        let r = ds.get(3).unwrap();
        assert_eq!(r.get("y"), Some(&-3.0));
        assert!(ds.cache_dir().join("3_y.p").exists());
        assert!(!ds.cache_dir().join("3_x.p").exists());

        ds.clear_persistent_cache().unwrap();
        assert!(!ds.cache_dir().exists());
    }

    #[test]
    fn test_warm_field_cache_skips_the_source() {
        let dir = tempfile::tempdir().unwrap();
        let calls = Rc::new(Cell::new(0));
        let make = |calls: &Rc<Cell<usize>>| {
            let counter = Rc::clone(calls);
            FnDataset::new(Identity::new("rec"), 4, move |i| {
                counter.set(counter.get() + 1);
                Record::new().with("x", i as f32).with("y", 10.0 * i as f32)
            })
        };

        let ds = make(&calls).cache_hdd_fields(dir.path()).unwrap();
        calls.set(0);
        let first = ds.get(2).unwrap();
        assert_eq!(first.get("x"), Some(&2.0));
        assert_eq!(first.get("y"), Some(&20.0));
        assert_eq!(calls.get(), 2);

        calls.set(0);
        for _ in 0..3 {
            let r = ds.get(2).unwrap();
            assert_eq!(r.get("y"), Some(&20.0));
            assert_eq!(r.get("x"), Some(&2.0));
        }
        assert_eq!(calls.get(), 0);

        let fresh = make(&calls).cache_hdd_fields(dir.path()).unwrap();
        calls.set(0);
        let r = fresh.get(2).unwrap();
        assert_eq!(r.get("x"), Some(&2.0));
        assert_eq!(r.get("y"), Some(&20.0));
        assert_eq!(calls.get(), 0);
    }

    #[test]
    fn test_empty_field_cache() {
        let dir = tempfile::tempdir().unwrap();
        let ds = VecDataset::new("none", Vec::<Record<f32>>::new())
            .cache_hdd_fields(dir.path())
            .unwrap();
        assert_eq!(ds.len(), 0);
    }
}

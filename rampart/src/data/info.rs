//! Dataset Metadata
//!
//! Wrappers that extend a dataset's info map, and a small JSON store that
//! persists computed entries across runs.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use log::warn;
use serde_json::Value;

use super::dataset::{Dataset, Info};
use super::identity::Identity;
use super::DataResult;

/// A dataset with one extra metadata entry; elements and identity are unchanged.
#[derive(Clone)]
pub struct InfoDataset<D> {
    inner: D,
    info: Info,
    store: Option<PathBuf>,
}

impl<D: Dataset> InfoDataset<D> {
    pub(crate) fn new(inner: D, key: &str, value: Value) -> Self {
        let mut info = inner.info().clone();
        info.insert(key.to_string(), value);
        Self {
            inner,
            info,
            store: None,
        }
    }

    /// Remember the file the entry was persisted in, so cache clearing removes it.
    pub(crate) fn with_store(mut self, path: PathBuf) -> Self {
        self.store = Some(path);
        self
    }
}

impl<D: Dataset> Dataset for InfoDataset<D> {
    type Item = D::Item;

    fn len(&self) -> usize {
        self.inner.len()
    }

    fn get_example(&self, index: usize) -> D::Item {
        self.inner.get_example(index)
    }

    fn identity(&self) -> &Identity {
        self.inner.identity()
    }

    fn info(&self) -> &Info {
        &self.info
    }

    fn clear_persistent_cache(&self) -> DataResult<()> {
        if let Some(path) = &self.store {
            remove_if_exists(path)?;
        }
        self.inner.clear_persistent_cache()
    }
}

/// Key-value metadata persisted as one JSON object.
#[derive(Debug)]
pub struct InfoStore {
    path: PathBuf,
    entries: Info,
}

impl InfoStore {
    /// Open the store at `path`. A missing file is an empty store; an unreadable one
    /// is deleted with a warning and treated as empty.
    pub fn open(path: &Path) -> DataResult<Self> {
        let entries = match fs::read_to_string(path) {
            Ok(text) => match serde_json::from_str(&text) {
                Ok(entries) => entries,
                Err(e) => {
                    warn!("Deleting corrupt info cache {}: {}", path.display(), e);
                    remove_if_exists(path)?;
                    Info::new()
                }
            },
            Err(e) if e.kind() == ErrorKind::NotFound => Info::new(),
            Err(e) => return Err(e.into()),
        };
        Ok(Self {
            path: path.to_path_buf(),
            entries,
        })
    }

    /// Stored value of `key`.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries.get(key)
    }

    /// Store a value and write the file.
    pub fn insert(&mut self, key: &str, value: Value) -> DataResult<()> {
        self.entries.insert(key.to_string(), value);
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&self.path, serde_json::to_string_pretty(&self.entries)?)?;
        Ok(())
    }

    /// Location of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

pub(crate) fn remove_if_exists(path: &Path) -> DataResult<()> {
    match fs::remove_file(path) {
        Err(e) if e.kind() != ErrorKind::NotFound => Err(e.into()),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::VecDataset;
    use std::cell::Cell;

    #[test]
    fn test_info_entry_keeps_identity() {
        let ds = VecDataset::new("d", vec![1, 2]).with_info("classes", 2);
        assert_eq!(ds.identifier(), "d");
        assert_eq!(ds.info()["classes"], serde_json::json!(2));
    }

    #[test]
    fn test_info_cache_hdd_computes_once() {
        let dir = tempfile::tempdir().unwrap();
        let calls = Cell::new(0);
        let compute = |d: &VecDataset<i32>| {
            calls.set(calls.get() + 1);
            Ok(serde_json::json!(d.iter().sum::<i32>()))
        };
        let a = VecDataset::new("d", vec![1, 2, 3])
            .info_cache_hdd("total", compute, dir.path())
            .unwrap();
        let b = VecDataset::new("d", vec![1, 2, 3])
            .info_cache_hdd("total", compute, dir.path())
            .unwrap();
        assert_eq!(calls.get(), 1);
        assert_eq!(a.info()["total"], b.info()["total"]);

        b.clear_persistent_cache().unwrap();
        assert!(!dir.path().join("d.info.json").exists());
    }

    #[test]
    fn test_corrupt_store_is_reset() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("x.info.json");
        fs::write(&path, "{not json").unwrap();
        let mut store = InfoStore::open(&path).unwrap();
        assert!(store.get("k").is_none());
        assert!(!path.exists());
        store.insert("k", serde_json::json!(1.5)).unwrap();
        assert_eq!(InfoStore::open(&path).unwrap().get("k"), Some(&serde_json::json!(1.5)));
    }
}

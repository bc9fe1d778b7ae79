//! Dataset Registry
//!
//! Named dataset sources, datasets partitioned into named parts, and the
//! built-in synthetic noise sources.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use log::debug;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rampart_autograd::Tensor;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use super::dataset::{Dataset, DynDataset, SplitPoint};
use super::identity::Identity;
use super::record::Record;
use super::sources::FnDataset;
use super::{DataError, DataResult};

/// `whole -> (first, second, ratio of whole going to first)`.
pub type SplitTable = BTreeMap<String, (String, String, f64)>;

/// Part transform applied lazily by [`PartedDataset::with_transform`].
pub type PartTransform<T> = Rc<dyn Fn(DynDataset<T>) -> DataResult<DynDataset<T>>>;

/// `all -> (trainval, test) @ 0.8` and `trainval -> (train, val) @ 0.8`.
pub fn default_splits() -> SplitTable {
    let mut table = SplitTable::new();
    table.insert("all".into(), ("trainval".into(), "test".into(), 0.8));
    table.insert("trainval".into(), ("train".into(), "val".into(), 0.8));
    table
}

// ============================================================================
// PARTED DATASET
// ============================================================================

struct PartStore<T> {
    parts: RefCell<BTreeMap<String, DynDataset<T>>>,
    loaded: Vec<String>,
    splits: SplitTable,
}

impl<T: 'static> PartStore<T> {
    fn derive(&self, name: &str, visiting: &mut Vec<String>) -> Option<DynDataset<T>> {
        if let Some(part) = self.parts.borrow().get(name) {
            return Some(part.clone());
        }
        if visiting.iter().any(|v| v == name) {
            return None;
        }
        visiting.push(name.to_string());
        let derived = self.derive_by_split(name, visiting).or_else(|| {
            if name == "trainval" {
                self.derive_by_join("train", "val", visiting)
            } else {
                None
            }
        });
        visiting.pop();
        derived
    }

    fn derive_by_split(&self, name: &str, visiting: &mut Vec<String>) -> Option<DynDataset<T>> {
        let (whole, (first, second, ratio)) = self
            .splits
            .iter()
            .find(|(_, (a, b, _))| a == name || b == name)?;
        let source = self.derive(whole, visiting)?;
        let (head, tail) = source.split(SplitPoint::Ratio(*ratio)).ok()?;
        debug!("Derived parts {} and {} from {}", first, second, whole);
        let mut parts = self.parts.borrow_mut();
        parts.insert(first.clone(), head.boxed());
        parts.insert(second.clone(), tail.boxed());
        parts.get(name).cloned()
    }

    fn derive_by_join(&self, a: &str, b: &str, visiting: &mut Vec<String>) -> Option<DynDataset<T>> {
        let first = self.derive(a, visiting)?;
        let second = self.derive(b, visiting)?;
        let joined = (first + second).boxed();
        debug!("Derived trainval by joining {} and {}", a, b);
        self.parts
            .borrow_mut()
            .insert("trainval".into(), joined.clone());
        Some(joined)
    }

    fn can_derive(&self, name: &str, visiting: &mut Vec<String>) -> bool {
        if self.parts.borrow().contains_key(name) {
            return true;
        }
        if visiting.iter().any(|v| v == name) {
            return false;
        }
        visiting.push(name.to_string());
        let by_split = self
            .splits
            .iter()
            .find(|(_, (a, b, _))| a == name || b == name)
            .map_or(false, |(whole, _)| self.can_derive(whole, visiting));
        let ok = by_split
            || (name == "trainval"
                && self.can_derive("train", visiting)
                && self.can_derive("val", visiting));
        visiting.pop();
        ok
    }
}

/// A dataset partitioned into named parts such as `train`, `val` and `test`.
///
/// Parts that were not loaded are derived on first access: by splitting a
/// larger part according to the split table, or, for `trainval`, by joining
/// `train` and `val`.
///
/// # Example
/// ```rust,no_run
/// use rampart::data::{Dataset, PartedDataset, VecDataset};
///
/// let all = VecDataset::new("digits", (0..100).collect::<Vec<i32>>()).boxed();
/// let pds = PartedDataset::new(vec![("all".to_string(), all)]);
/// assert_eq!(pds.part("test").unwrap().len(), 20);
/// assert_eq!(pds.part("train").unwrap().len(), 64);
/// ```
pub struct PartedDataset<T> {
    store: Rc<PartStore<T>>,
    transforms: Vec<PartTransform<T>>,
    transformed: RefCell<BTreeMap<String, DynDataset<T>>>,
}

impl<T: 'static> PartedDataset<T> {
    /// Create a parted dataset with the default split table.
    pub fn new(parts: Vec<(String, DynDataset<T>)>) -> Self {
        Self::with_splits(parts, default_splits())
    }

    /// Create a parted dataset with a custom split table.
    pub fn with_splits(parts: Vec<(String, DynDataset<T>)>, splits: SplitTable) -> Self {
        let loaded = parts.iter().map(|(name, _)| name.clone()).collect();
        Self {
            store: Rc::new(PartStore {
                parts: RefCell::new(parts.into_iter().collect()),
                loaded,
                splits,
            }),
            transforms: Vec::new(),
            transformed: RefCell::new(BTreeMap::new()),
        }
    }

    /// Get a part, deriving and transforming it if needed.
    pub fn part(&self, name: &str) -> DataResult<DynDataset<T>> {
        if let Some(part) = self.transformed.borrow().get(name) {
            return Ok(part.clone());
        }
        let mut part = self
            .store
            .derive(name, &mut Vec::new())
            .ok_or_else(|| DataError::UnknownPart {
                part: name.to_string(),
                available: self.keys(),
            })?;
        for transform in &self.transforms {
            part = transform(part)?;
        }
        self.transformed
            .borrow_mut()
            .insert(name.to_string(), part.clone());
        Ok(part)
    }

    /// Names of the parts that were loaded, in loading order.
    pub fn loaded_parts(&self) -> &[String] {
        &self.store.loaded
    }

    /// Names of every part that is loaded or derivable.
    pub fn keys(&self) -> Vec<String> {
        let mut candidates: Vec<String> = self.store.parts.borrow().keys().cloned().collect();
        for (whole, (a, b, _)) in &self.store.splits {
            candidates.extend([whole.clone(), a.clone(), b.clone()]);
        }
        candidates.push("trainval".into());
        candidates.sort();
        candidates.dedup();
        candidates
            .into_iter()
            .filter(|name| self.store.can_derive(name, &mut Vec::new()))
            .collect()
    }

    /// Whether a part is loaded or derivable.
    pub fn contains(&self, name: &str) -> bool {
        self.store.can_derive(name, &mut Vec::new())
    }

    /// A view whose parts additionally pass through `transform`, applied on
    /// first access to each part and memoised.
    pub fn with_transform(
        &self,
        transform: impl Fn(DynDataset<T>) -> DataResult<DynDataset<T>> + 'static,
    ) -> Self {
        let mut transforms = self.transforms.clone();
        transforms.push(Rc::new(transform));
        Self {
            store: Rc::clone(&self.store),
            transforms,
            transformed: RefCell::new(BTreeMap::new()),
        }
    }
}

impl<T> std::fmt::Debug for PartedDataset<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PartedDataset")
            .field("loaded", &self.store.loaded)
            .field("splits", &self.store.splits)
            .field("transforms", &self.transforms.len())
            .finish()
    }
}

// ============================================================================
// FACTORY
// ============================================================================

/// Arguments passed to a source builder.
#[derive(Debug, Clone)]
pub struct SourceArgs {
    /// Data directory of the source, if it has one.
    pub root: Option<PathBuf>,
    /// Subset being loaded; `None` for sources without subsets.
    pub subset: Option<String>,
    /// Default arguments overridden by the caller's.
    pub args: Map<String, Value>,
}

impl SourceArgs {
    /// Typed argument, or `default` when absent.
    pub fn get_or<A: DeserializeOwned>(&self, key: &str, default: A) -> DataResult<A> {
        match self.args.get(key) {
            Some(value) => Ok(serde_json::from_value(value.clone())?),
            None => Ok(default),
        }
    }
}

type Builder<T> = Rc<dyn Fn(&SourceArgs) -> DataResult<DynDataset<T>>>;

/// A registered dataset source.
pub struct DatasetSource<T> {
    subsets: Vec<String>,
    path: Option<String>,
    defaults: Map<String, Value>,
    splits: Option<SplitTable>,
    build: Builder<T>,
}

impl<T> DatasetSource<T> {
    /// Source built by `build`, once per subset.
    pub fn new(build: impl Fn(&SourceArgs) -> DataResult<DynDataset<T>> + 'static) -> Self {
        Self {
            subsets: Vec::new(),
            path: None,
            defaults: Map::new(),
            splits: None,
            build: Rc::new(build),
        }
    }

    /// Subsets the source provides; none means a single part `all`.
    pub fn subsets(mut self, subsets: &[&str]) -> Self {
        self.subsets = subsets.iter().map(|s| s.to_string()).collect();
        self
    }

    /// Directory of the source relative to the datasets directory.
    pub fn path(mut self, path: &str) -> Self {
        self.path = Some(path.to_string());
        self
    }

    /// Default value of a builder argument.
    pub fn default_arg(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.defaults.insert(key.to_string(), value.into());
        self
    }

    /// Split table replacing the default one.
    pub fn splits(mut self, splits: SplitTable) -> Self {
        self.splits = Some(splits);
        self
    }
}

/// Creates parted datasets by name.
///
/// # Example
/// ```rust,no_run
/// use rampart::data::{Dataset, DatasetFactory};
/// use serde_json::json;
///
/// let factory = DatasetFactory::with_builtin("/data");
/// let pds = factory
///     .create("WhiteNoise", json!({"length": 50}).as_object().cloned().unwrap_or_default())
///     .unwrap();
/// assert_eq!(pds.part("all").unwrap().len(), 50);
/// ```
pub struct DatasetFactory<T> {
    datasets_dir: PathBuf,
    sources: BTreeMap<String, DatasetSource<T>>,
}

impl<T: 'static> DatasetFactory<T> {
    /// Create an empty factory reading data from `datasets_dir`.
    pub fn new(datasets_dir: impl AsRef<Path>) -> Self {
        Self {
            datasets_dir: datasets_dir.as_ref().to_path_buf(),
            sources: BTreeMap::new(),
        }
    }

    /// Register a source under a case-insensitive name.
    pub fn register(&mut self, name: &str, source: DatasetSource<T>) {
        self.sources.insert(name.to_lowercase(), source);
    }

    /// Registered names.
    pub fn names(&self) -> Vec<String> {
        self.sources.keys().cloned().collect()
    }

    /// Directory that relative source paths are resolved against.
    pub fn datasets_dir(&self) -> &Path {
        &self.datasets_dir
    }

    /// Build every subset of the named source into a parted dataset.
    pub fn create(&self, name: &str, args: Map<String, Value>) -> DataResult<PartedDataset<T>> {
        let key = name.to_lowercase();
        let source = self.sources.get(&key).ok_or_else(|| DataError::UnknownDataset {
            name: key.clone(),
            available: self.names(),
        })?;

        let mut merged = source.defaults.clone();
        merged.extend(args);
        let root = source.path.as_ref().map(|p| self.datasets_dir.join(p));

        let parts = if source.subsets.is_empty() {
            let args = SourceArgs {
                root,
                subset: None,
                args: merged,
            };
            vec![("all".to_string(), (source.build)(&args)?)]
        } else {
            source
                .subsets
                .iter()
                .map(|subset| {
                    let args = SourceArgs {
                        root: root.clone(),
                        subset: Some(subset.clone()),
                        args: merged.clone(),
                    };
                    Ok((subset.clone(), (source.build)(&args)?))
                })
                .collect::<DataResult<Vec<_>>>()?
        };

        let splits = source.splits.clone().unwrap_or_else(default_splits);
        Ok(PartedDataset::with_splits(parts, splits))
    }
}

impl DatasetFactory<Record<Tensor>> {
    /// Factory with the synthetic `whitenoise` and `rademachernoise` sources.
    pub fn with_builtin(datasets_dir: impl AsRef<Path>) -> Self {
        let mut factory = Self::new(datasets_dir);
        factory.register(
            "whitenoise",
            DatasetSource::new(|args| Ok(NoiseConfig::from_args(args)?.build(Noise::Normal))),
        );
        factory.register(
            "rademachernoise",
            DatasetSource::new(|args| Ok(NoiseConfig::from_args(args)?.build(Noise::Rademacher))),
        );
        factory
    }
}

// ============================================================================
// SYNTHETIC SOURCES
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq)]
enum Noise {
    Normal,
    Rademacher,
}

#[derive(Debug, Clone)]
struct NoiseConfig {
    example_shape: Vec<usize>,
    length: usize,
    seed: u64,
    class_count: usize,
}

impl NoiseConfig {
    fn from_args(args: &SourceArgs) -> DataResult<Self> {
        let config = Self {
            example_shape: args.get_or("example_shape", vec![32, 32, 3])?,
            length: args.get_or("length", 1000)?,
            seed: args.get_or("seed", super::DEFAULT_SEED)?,
            class_count: args.get_or("class_count", 10)?,
        };
        if config.class_count == 0 {
            return Err(DataError::InvalidArgument("class_count must be positive".into()));
        }
        Ok(config)
    }

    fn build(self, noise: Noise) -> DynDataset<Record<Tensor>> {
        let kind = match noise {
            Noise::Normal => "whitenoise",
            Noise::Rademacher => "rademachernoise",
        };
        let shape: Vec<String> = self.example_shape.iter().map(|d| d.to_string()).collect();
        let identity = Identity::new(format!(
            "{}_{}_{}_{}",
            kind,
            shape.join("x"),
            self.length,
            self.seed
        ));
        let class_count = self.class_count;
        let config = Rc::new(self);
        let generator = Rc::clone(&config);
        FnDataset::new(identity, config.length, move |i| noise_example(&generator, noise, i))
            .with_info("class_count", class_count)
            .boxed()
    }
}

/// One lazily generated example; each field has its own random stream.
fn noise_example(config: &Rc<NoiseConfig>, noise: Noise, index: usize) -> Record<Tensor> {
    let stream = |field: u64| {
        let mut rng = ChaCha8Rng::seed_from_u64(config.seed);
        rng.set_stream(2 * index as u64 + field);
        rng
    };
    let x_config = Rc::clone(config);
    let x_rng = stream(0);
    let y_config = Rc::clone(config);
    let y_rng = stream(1);
    Record::new()
        .with_lazy("x", move || {
            let mut rng = x_rng.clone();
            match noise {
                Noise::Normal => Tensor::randn(&x_config.example_shape, &mut rng),
                Noise::Rademacher => {
                    let n: usize = x_config.example_shape.iter().product();
                    let data = (0..n)
                        .map(|_| if rng.gen::<bool>() { 1.0 } else { -1.0 })
                        .collect();
                    Tensor::from_vec(data, &x_config.example_shape)
                }
            }
        })
        .with_lazy("y", move || {
            let mut rng = y_rng.clone();
            Tensor::scalar(rng.gen_range(0..y_config.class_count) as f32)
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::VecDataset;
    use std::cell::Cell;

    fn numbers(name: &str, n: i32) -> DynDataset<i32> {
        VecDataset::new(name, (0..n).collect()).boxed()
    }

    fn args(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_parts_derived_by_splitting() {
        let pds = PartedDataset::new(vec![("all".into(), numbers("d", 100))]);
        let train = pds.part("train").unwrap();
        assert_eq!(train.len(), 64);
        assert_eq!(pds.part("val").unwrap().len(), 16);
        assert_eq!(pds.part("test").unwrap().get(0).unwrap(), 80);
        assert_eq!(train.identifier(), "d.[0..80].[0..64]");
        assert_eq!(pds.keys(), vec!["all", "test", "train", "trainval", "val"]);
    }

    #[test]
    fn test_trainval_derived_by_joining() {
        let pds = PartedDataset::new(vec![
            ("train".into(), numbers("a", 3)),
            ("val".into(), numbers("b", 2)),
        ]);
        let trainval = pds.part("trainval").unwrap();
        assert_eq!(trainval.len(), 5);
        assert_eq!(trainval.identifier(), "join(a,b)");
        assert!(!pds.contains("test"));
        assert!(matches!(pds.part("test"), Err(DataError::UnknownPart { .. })));
    }

    #[test]
    fn test_missing_sibling_is_not_derivable() {
        let pds = PartedDataset::new(vec![
            ("train".into(), numbers("a", 3)),
            ("test".into(), numbers("t", 2)),
        ]);
        assert!(!pds.contains("val"));
        assert!(pds.part("val").is_err());
    }

    #[test]
    fn test_transforms_are_lazy_and_memoised() {
        let calls = Rc::new(Cell::new(0));
        let counter = Rc::clone(&calls);
        let pds = PartedDataset::new(vec![("all".into(), numbers("d", 10))]);
        let doubled = pds.with_transform(move |ds| {
            counter.set(counter.get() + 1);
            Ok(ds.map(|x| x * 2).boxed())
        });
        assert_eq!(calls.get(), 0);
        assert_eq!(doubled.part("test").unwrap().get(0).unwrap(), 16);
        doubled.part("test").unwrap();
        assert_eq!(calls.get(), 1);
        assert_eq!(pds.part("test").unwrap().get(0).unwrap(), 8);
    }

    #[test]
    fn test_factory_names_are_case_insensitive() {
        let factory = DatasetFactory::with_builtin("/nonexistent");
        let pds = factory
            .create("RademacherNoise", args(serde_json::json!({"length": 20, "example_shape": [4, 4, 1]})))
            .unwrap();
        let all = pds.part("all").unwrap();
        assert_eq!(all.len(), 20);
        assert_eq!(all.identifier(), "rademachernoise_4x4x1_20_53");
        let x = all.get(0).unwrap().get("x").unwrap().clone();
        assert!(x.to_vec().iter().all(|v| *v == 1.0 || *v == -1.0));
        assert_eq!(all.info()["class_count"], serde_json::json!(10));
    }

    #[test]
    fn test_unknown_dataset_lists_available() {
        let factory = DatasetFactory::with_builtin("/nonexistent");
        match factory.create("cifar10", Map::new()) {
            Err(DataError::UnknownDataset { name, available }) => {
                assert_eq!(name, "cifar10");
                assert_eq!(available, vec!["rademachernoise", "whitenoise"]);
            }
            other => panic!("unexpected result: {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_noise_is_deterministic_per_index() {
        let factory = DatasetFactory::with_builtin("/nonexistent");
        let make = || {
            factory
                .create("whitenoise", args(serde_json::json!({"length": 5, "example_shape": [3], "seed": 9})))
                .unwrap()
                .part("all")
                .unwrap()
        };
        let (a, b) = (make(), make());
        assert_eq!(a.get(3).unwrap(), b.get(3).unwrap());
        assert_ne!(a.get(3).unwrap().get("x"), a.get(2).unwrap().get("x"));
    }

    #[test]
    fn test_subsets_become_parts() {
        let mut factory: DatasetFactory<i32> = DatasetFactory::new("/data");
        factory.register(
            "Toy",
            DatasetSource::new(|args| {
                let n: i32 = args.get_or("n", 4)?;
                let subset = args.subset.clone().unwrap_or_default();
                Ok(VecDataset::with_identity(Identity::new("toy").with_subset(subset), (0..n).collect()).boxed())
            })
            .subsets(&["trainval", "test"])
            .path("toy")
            .default_arg("n", 10),
        );
        let pds = factory.create("toy", Map::new()).unwrap();
        assert_eq!(pds.loaded_parts(), ["trainval".to_string(), "test".to_string()]);
        assert_eq!(pds.part("val").unwrap().len(), 2);
        assert_eq!(pds.part("test").unwrap().identifier(), "toy-test");
    }
}

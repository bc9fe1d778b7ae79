//! Caching Orchestration
//!
//! Pixel statistics attached to dataset metadata, the disk-space policy that
//! decides whether a part is cached on disk, and a factory that applies both.

use std::cell::RefCell;
use std::fs;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use log::{info, warn};
use rampart_autograd::Tensor;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sysinfo::Disks;

use super::dataset::{Dataset, DynDataset};
use super::hdd_cache::remove_path;
use super::identity::Modifier;
use super::progress::Progress;
use super::record::Record;
use super::registry::{DatasetFactory, PartedDataset};
use super::{DataError, DataResult};

const GIB: f64 = (1u64 << 30) as f64;

// ============================================================================
// PIXEL STATISTICS
// ============================================================================

/// Elements that carry an image tensor, laid out `[height, width, channels]`
/// or `[height, width]`.
pub trait ImageExample {
    /// The image, if the element has one.
    fn image(&self) -> Option<&Tensor>;
}

impl ImageExample for Tensor {
    fn image(&self) -> Option<&Tensor> {
        Some(self)
    }
}

impl ImageExample for (Tensor, Tensor) {
    fn image(&self) -> Option<&Tensor> {
        Some(&self.0)
    }
}

impl ImageExample for Record<Tensor> {
    /// Field `x`, else the first field.
    fn image(&self) -> Option<&Tensor> {
        self.get("x").or_else(|| self.iter().next().map(|(_, v)| v))
    }
}

/// Per-channel pixel mean and standard deviation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PixelStats {
    /// Mean of every channel
    pub mean: Vec<f32>,
    /// Standard deviation of every channel
    pub std: Vec<f32>,
}

/// Pixel statistics over every image of a dataset.
///
/// Images are weighted by pixel count for the mean. The variance is the mean
/// of per-image variances plus the weighted variance of per-image means.
/// With `div255`, both statistics are divided by 255.
pub fn compute_pixel_stats<D>(dataset: &D, div255: bool) -> DataResult<PixelStats>
where
    D: Dataset,
    D::Item: ImageExample,
{
    if dataset.is_empty() {
        return Err(DataError::InvalidArgument(
            "cannot compute pixel statistics of an empty dataset".into(),
        ));
    }
    let mut channels = None;
    let mut means: Vec<Vec<f64>> = Vec::with_capacity(dataset.len());
    let mut vars: Vec<Vec<f64>> = Vec::with_capacity(dataset.len());
    let mut counts: Vec<f64> = Vec::with_capacity(dataset.len());
    let mut progress = Progress::new(format!("Pixel statistics of {}", dataset.identifier()), dataset.len());

    for item in dataset.iter() {
        let image = item
            .image()
            .ok_or_else(|| DataError::InvalidArgument("element has no image".into()))?;
        let c = match image.shape.as_slice() {
            [_, _, c] if *c > 0 => *c,
            [_, _] => 1,
            shape => {
                return Err(DataError::InvalidArgument(format!(
                    "expected an HWC or HW image, got shape {:?}",
                    shape
                )))
            }
        };
        if *channels.get_or_insert(c) != c {
            return Err(DataError::InvalidArgument(format!(
                "images have different channel counts: {:?} vs {}",
                channels, c
            )));
        }
        let pixels = image.numel() / c.max(1);
        let data = image.data();
        let mut mean = vec![0.0f64; c];
        for px in data.chunks(c) {
            for (m, v) in mean.iter_mut().zip(px) {
                *m += *v as f64;
            }
        }
        mean.iter_mut().for_each(|m| *m /= pixels as f64);
        let mut var = vec![0.0f64; c];
        for px in data.chunks(c) {
            for ((s, v), m) in var.iter_mut().zip(px).zip(&mean) {
                *s += (*v as f64 - m).powi(2);
            }
        }
        var.iter_mut().for_each(|s| *s /= pixels as f64);
        means.push(mean);
        vars.push(var);
        counts.push(pixels as f64);
        progress.tick();
    }
    progress.finish();

    let c = channels.unwrap_or(1);
    let total: f64 = counts.iter().sum();
    let weights: Vec<f64> = counts.iter().map(|n| n / total).collect();
    let scale = if div255 { 255.0 } else { 1.0 };
    let mut stats = PixelStats {
        mean: Vec::with_capacity(c),
        std: Vec::with_capacity(c),
    };
    for ch in 0..c {
        let mean: f64 = weights.iter().zip(&means).map(|(w, m)| w * m[ch]).sum();
        let mean_sq: f64 = weights.iter().zip(&means).map(|(w, m)| w * m[ch] * m[ch]).sum();
        let avg_var = vars.iter().map(|v| v[ch]).sum::<f64>() / vars.len() as f64;
        let var = (avg_var + mean_sq - mean * mean).max(0.0);
        stats.mean.push((mean / scale) as f32);
        stats.std.push((var.sqrt() / scale) as f32);
    }
    Ok(stats)
}

/// Attach `pixel_stats` (divided by 255) to the metadata of every part.
///
/// Statistics come from `trainval` (joined from `train` and `val` if needed),
/// else from the first loaded part with a warning. They are computed when the
/// first part is accessed and persisted under `cache_dir`.
pub fn add_pixel_stats_to_info<T>(parted: &PartedDataset<T>, cache_dir: &Path) -> DataResult<PartedDataset<T>>
where
    T: ImageExample + 'static,
{
    let source = if parted.contains("trainval") {
        parted.part("trainval")?
    } else {
        let first = parted
            .loaded_parts()
            .first()
            .cloned()
            .ok_or_else(|| DataError::InvalidArgument("parted dataset has no parts".into()))?;
        warn!(
            "The parted dataset has no \"trainval\" or \"train\" and \"val\" parts. \"{}\" is used instead.",
            first
        );
        parted.part(&first)?
    };

    let cache_dir = cache_dir.to_path_buf();
    let stats: Rc<RefCell<Option<Value>>> = Rc::new(RefCell::new(None));
    Ok(parted.with_transform(move |ds| {
        let value = pixel_stats_value(&stats, &source, &cache_dir)?;
        Ok(ds.with_info("pixel_stats", value).boxed())
    }))
}

fn pixel_stats_value<T: ImageExample + 'static>(
    memo: &RefCell<Option<Value>>,
    source: &DynDataset<T>,
    cache_dir: &Path,
) -> DataResult<Value> {
    if let Some(value) = memo.borrow().as_ref() {
        return Ok(value.clone());
    }
    let with_stats = source.clone().info_cache_hdd(
        "pixel_stats",
        |ds| Ok(serde_json::to_value(compute_pixel_stats(ds, true)?)?),
        cache_dir,
    )?;
    let value = with_stats
        .info()
        .get("pixel_stats")
        .cloned()
        .unwrap_or(Value::Null);
    *memo.borrow_mut() = Some(value.clone());
    Ok(value)
}

// ============================================================================
// DISK-SPACE POLICY
// ============================================================================

/// Probe for the free space of the disk holding a path.
pub trait DiskSpace {
    /// Available bytes, or `None` if unknown.
    fn available_space(&self, path: &Path) -> Option<u64>;
}

/// Free space reported by the operating system.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemDiskSpace;

impl DiskSpace for SystemDiskSpace {
    fn available_space(&self, path: &Path) -> Option<u64> {
        let path = path.canonicalize().ok()?;
        let disks = Disks::new_with_refreshed_list();
        disks
            .list()
            .iter()
            .filter(|disk| path.starts_with(disk.mount_point()))
            .max_by_key(|disk| disk.mount_point().as_os_str().len())
            .map(|disk| disk.available_space())
    }
}

/// A fixed amount of free space, for tests and dry runs.
#[derive(Debug, Clone, Copy)]
pub struct FixedDiskSpace(pub u64);

impl DiskSpace for FixedDiskSpace {
    fn available_space(&self, _path: &Path) -> Option<u64> {
        Some(self.0)
    }
}

fn default_min_free_space() -> u64 {
    20 << 30
}

/// Headroom that disk caching must leave free.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CachingPolicy {
    /// Bytes that must remain free after caching
    #[serde(default = "default_min_free_space")]
    pub min_free_space: u64,
}

impl Default for CachingPolicy {
    fn default() -> Self {
        Self {
            min_free_space: default_min_free_space(),
        }
    }
}

/// Total size of the files under `path`; zero if it does not exist.
pub fn dir_size(path: &Path) -> u64 {
    let entries = match fs::read_dir(path) {
        Ok(entries) => entries,
        Err(_) => return fs::metadata(path).map(|m| m.len()).unwrap_or(0),
    };
    entries
        .filter_map(Result::ok)
        .map(|entry| match entry.metadata() {
            Ok(meta) if meta.is_dir() => dir_size(&entry.path()),
            Ok(meta) => meta.len(),
            Err(_) => 0,
        })
        .sum()
}

/// Cache `dataset` per example under `<cache_dir>/datasets` if the policy allows it.
///
/// An existing cache holding more than a tenth of the estimated size is kept.
/// Otherwise caching needs `free + cached - estimate >= min_free_space`; when
/// that fails, or free space is unknown, any partial cache is deleted and the
/// dataset is returned uncached.
pub fn cache_if_space<T>(
    dataset: DynDataset<T>,
    cache_dir: &Path,
    policy: &CachingPolicy,
    probe: &dyn DiskSpace,
) -> DataResult<DynDataset<T>>
where
    T: Serialize + DeserializeOwned + 'static,
{
    cache_with_policy(dataset, cache_dir, policy, probe, false, |ds, dir| {
        Ok(ds.cache_hdd(dir)?.boxed())
    })
}

/// Like [`cache_if_space`], but each record field gets its own file and
/// cached records stay lazy per field.
pub fn cache_record_fields_if_space<V>(
    dataset: DynDataset<Record<V>>,
    cache_dir: &Path,
    policy: &CachingPolicy,
    probe: &dyn DiskSpace,
) -> DataResult<DynDataset<Record<V>>>
where
    V: Serialize + DeserializeOwned + Clone + 'static,
{
    cache_with_policy(dataset, cache_dir, policy, probe, true, |ds, dir| {
        Ok(ds.cache_hdd_fields(dir)?.boxed())
    })
}

fn cache_with_policy<T>(
    dataset: DynDataset<T>,
    cache_dir: &Path,
    policy: &CachingPolicy,
    probe: &dyn DiskSpace,
    separate_fields: bool,
    cache: impl FnOnce(DynDataset<T>, &Path) -> DataResult<DynDataset<T>>,
) -> DataResult<DynDataset<T>>
where
    T: Serialize + DeserializeOwned + 'static,
{
    let datasets_dir = cache_dir.join("datasets");
    fs::create_dir_all(&datasets_dir)?;
    let size = dataset.len() as u64 * dataset.approx_example_size(4)?;
    let target = datasets_dir.join(
        dataset
            .identity()
            .with_modifier(Modifier::CacheHdd(separate_fields))
            .to_string(),
    );
    let cached = dir_size(&target);

    let keep = if cached as f64 > 0.1 * size as f64 {
        true
    } else {
        match probe.available_space(&datasets_dir) {
            Some(free) => (free as i128 + cached as i128 - size as i128) >= policy.min_free_space as i128,
            None => {
                warn!(
                    "Free space of {} is unknown; {} will not be cached",
                    datasets_dir.display(),
                    dataset.identifier()
                );
                remove_path(&target)?;
                return Ok(dataset);
            }
        }
    };

    if keep {
        info!("Caching {} in {}", dataset.identifier(), datasets_dir.display());
        cache(dataset, &datasets_dir)
    } else {
        let free = probe.available_space(&datasets_dir).unwrap_or(0);
        warn!(
            "The dataset {} will not be cached because there is not much space left. \
             Available space: {:.3} GiB. Data size: {:.3} GiB.",
            dataset.identifier(),
            free.saturating_add(cached) as f64 / GIB,
            size as f64 / GIB
        );
        remove_path(&target)?;
        Ok(dataset)
    }
}

/// Signature shared by [`cache_if_space`] and [`cache_record_fields_if_space`].
type Cacher<T> = Rc<dyn Fn(DynDataset<T>, &Path, &CachingPolicy, &dyn DiskSpace) -> DataResult<DynDataset<T>>>;

fn cache_lazily_with<T: 'static>(
    parted: &PartedDataset<T>,
    cache_dir: &Path,
    policy: CachingPolicy,
    probe: Rc<dyn DiskSpace>,
    cacher: Cacher<T>,
) -> PartedDataset<T> {
    let cache_dir = cache_dir.to_path_buf();
    parted.with_transform(move |ds| cacher(ds, &cache_dir, &policy, probe.as_ref()))
}

/// Apply [`cache_if_space`] to every part on first access.
pub fn cache_data_lazily<T>(
    parted: &PartedDataset<T>,
    cache_dir: &Path,
    policy: CachingPolicy,
    probe: Rc<dyn DiskSpace>,
) -> PartedDataset<T>
where
    T: Serialize + DeserializeOwned + 'static,
{
    cache_lazily_with(parted, cache_dir, policy, probe, Rc::new(cache_if_space::<T>))
}

/// Apply [`cache_record_fields_if_space`] to every part on first access.
pub fn cache_record_data_lazily<V>(
    parted: &PartedDataset<Record<V>>,
    cache_dir: &Path,
    policy: CachingPolicy,
    probe: Rc<dyn DiskSpace>,
) -> PartedDataset<Record<V>>
where
    V: Serialize + DeserializeOwned + Clone + 'static,
{
    cache_lazily_with(
        parted,
        cache_dir,
        policy,
        probe,
        Rc::new(cache_record_fields_if_space::<V>),
    )
}

// ============================================================================
// CACHING FACTORY
// ============================================================================

type PartedTransform<T> = Rc<dyn Fn(&PartedDataset<T>) -> DataResult<PartedDataset<T>>>;

/// A [`DatasetFactory`] whose datasets pass through parted transforms and are
/// then cached on disk under the disk-space policy.
pub struct CachingDatasetFactory<T> {
    factory: DatasetFactory<T>,
    cache_dir: PathBuf,
    policy: CachingPolicy,
    probe: Rc<dyn DiskSpace>,
    cacher: Cacher<T>,
    transforms: Vec<PartedTransform<T>>,
}

impl<T> CachingDatasetFactory<T>
where
    T: Serialize + DeserializeOwned + 'static,
{
    /// Wrap `factory`, caching under `cache_dir` with the default policy.
    pub fn new(factory: DatasetFactory<T>, cache_dir: impl AsRef<Path>) -> Self {
        Self {
            factory,
            cache_dir: cache_dir.as_ref().to_path_buf(),
            policy: CachingPolicy::default(),
            probe: Rc::new(SystemDiskSpace),
            cacher: Rc::new(cache_if_space::<T>),
            transforms: Vec::new(),
        }
    }

    /// Replace the disk-space policy.
    pub fn with_policy(mut self, policy: CachingPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Replace the free-space probe.
    pub fn with_probe(mut self, probe: impl DiskSpace + 'static) -> Self {
        self.probe = Rc::new(probe);
        self
    }

    /// Add a transform applied to every created parted dataset, before caching.
    pub fn with_parted_transform(
        mut self,
        transform: impl Fn(&PartedDataset<T>) -> DataResult<PartedDataset<T>> + 'static,
    ) -> Self {
        self.transforms.push(Rc::new(transform));
        self
    }

    /// Create, transform and lazily cache the named dataset.
    pub fn create(&self, name: &str, args: Map<String, Value>) -> DataResult<PartedDataset<T>> {
        let mut parted = self.factory.create(name, args)?;
        for transform in &self.transforms {
            parted = transform(&parted)?;
        }
        Ok(cache_lazily_with(
            &parted,
            &self.cache_dir,
            self.policy,
            Rc::clone(&self.probe),
            Rc::clone(&self.cacher),
        ))
    }

    /// The wrapped factory.
    pub fn factory(&self) -> &DatasetFactory<T> {
        &self.factory
    }
}

impl<V> CachingDatasetFactory<Record<V>>
where
    V: Serialize + DeserializeOwned + Clone + 'static,
{
    /// Cache each record field in its own file, so cached records stay lazy.
    pub fn with_separate_fields(mut self) -> Self {
        self.cacher = Rc::new(cache_record_fields_if_space::<V>);
        self
    }
}

impl<T> CachingDatasetFactory<T>
where
    T: ImageExample + Serialize + DeserializeOwned + 'static,
{
    /// Attach pixel statistics, cached under the cache directory.
    pub fn with_pixel_stats(self) -> Self {
        let dir = self.cache_dir.join("info");
        self.with_parted_transform(move |parted| add_pixel_stats_to_info(parted, &dir))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{Identity, VecDataset};

    fn image(value: f32, h: usize, w: usize) -> Tensor {
        Tensor::full(&[h, w, 2], value)
    }

    #[test]
    fn test_pixel_stats_weight_by_pixel_count() {
        let ds = VecDataset::new("imgs", vec![image(0.0, 1, 1), image(3.0, 1, 3)]);
        let stats = compute_pixel_stats(&ds, false).unwrap();
        approx::assert_abs_diff_eq!(stats.mean[0], 2.25, epsilon = 1e-6);
        // per-image variances are zero; spread comes from the means
        approx::assert_abs_diff_eq!(stats.std[1], 1.6875f32.sqrt(), epsilon = 1e-5);
        let scaled = compute_pixel_stats(&ds, true).unwrap();
        approx::assert_abs_diff_eq!(scaled.mean[0] * 255.0, 2.25, epsilon = 1e-4);
    }

    #[test]
    fn test_pixel_stats_reject_bad_shapes() {
        let ds = VecDataset::new("v", vec![Tensor::zeros(&[4])]);
        assert!(compute_pixel_stats(&ds, false).is_err());
        let empty = VecDataset::new("e", Vec::<Tensor>::new());
        assert!(compute_pixel_stats(&empty, false).is_err());
    }

    #[test]
    fn test_dir_size_counts_nested_files() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("sub")).unwrap();
        fs::write(dir.path().join("a"), [0u8; 10]).unwrap();
        fs::write(dir.path().join("sub").join("b"), [0u8; 5]).unwrap();
        assert_eq!(dir_size(dir.path()), 15);
        assert_eq!(dir_size(&dir.path().join("missing")), 0);
    }

    #[test]
    fn test_policy_skips_caching_without_headroom() {
        let dir = tempfile::tempdir().unwrap();
        let ds = VecDataset::new("v", vec![vec![1u8; 64]; 10]).boxed();
        let policy = CachingPolicy { min_free_space: 1 << 20 };
        let uncached = cache_if_space(ds.clone(), dir.path(), &policy, &FixedDiskSpace(1000)).unwrap();
        assert_eq!(uncached.identifier(), "v");
        let cached = cache_if_space(ds, dir.path(), &policy, &FixedDiskSpace(1 << 30)).unwrap();
        assert_eq!(cached.identifier(), "v.cache_hdd");
    }

    #[test]
    fn test_existing_cache_is_kept_without_headroom() {
        let dir = tempfile::tempdir().unwrap();
        let ds = VecDataset::new("v", vec![vec![1u8; 64]; 10]).boxed();
        let policy = CachingPolicy::default();
        let cached = cache_if_space(ds.clone(), dir.path(), &policy, &FixedDiskSpace(u64::MAX / 4)).unwrap();
        cached.iter().for_each(drop);
        let again = cache_if_space(ds, dir.path(), &policy, &FixedDiskSpace(0)).unwrap();
        assert_eq!(again.identifier(), "v.cache_hdd");
    }

    #[test]
    fn test_record_fields_cached_separately() {
        let dir = tempfile::tempdir().unwrap();
        let records: Vec<Record<f32>> = (0..6)
            .map(|i| Record::new().with("x", i as f32).with("y", 1.0))
            .collect();
        let ds = VecDataset::new("r", records).boxed();
        let policy = CachingPolicy { min_free_space: 0 };
        let cached = cache_record_fields_if_space(ds, dir.path(), &policy, &FixedDiskSpace(1 << 30)).unwrap();
        assert_eq!(cached.identifier(), "r.cache_hdd_s");
        let r = cached.get(4).unwrap();
        assert_eq!(r.is_evaluated("x"), Some(false));
        assert_eq!(r.get("x"), Some(&4.0));
        let entries = dir.path().join("datasets").join("r.cache_hdd_s");
        assert!(entries.join("4_x.p").exists());
        assert!(!entries.join("4_y.p").exists());
    }

    #[test]
    fn test_pixel_stats_attached_to_every_part() {
        let dir = tempfile::tempdir().unwrap();
        let all = VecDataset::with_identity(
            Identity::new("imgs"),
            (0..10).map(|i| image(i as f32, 2, 2)).collect(),
        )
        .boxed();
        let parted = PartedDataset::new(vec![("all".into(), all)]);
        let with_stats = add_pixel_stats_to_info(&parted, dir.path()).unwrap();
        let test = with_stats.part("test").unwrap();
        let stats: PixelStats = serde_json::from_value(test.info()["pixel_stats"].clone()).unwrap();
        // trainval holds images 0..8
        approx::assert_abs_diff_eq!(stats.mean[0] * 255.0, 3.5, epsilon = 1e-4);
        assert!(dir.path().join("imgs.[0..8].info.json").exists());
    }
}

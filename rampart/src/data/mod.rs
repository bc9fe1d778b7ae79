//! Data Loading Utilities
//!
//! Lazy, composable datasets with stable identities, RAM and disk caches, a
//! dataset registry and a DataLoader for batch training.

mod cache;
mod caching;
mod collate;
mod dataloader;
mod dataset;
mod error;
mod hdd_cache;
mod identity;
mod info;
mod progress;
mod record;
mod registry;
mod sources;
mod views;

pub use cache::{CacheDataset, HddRamCacheDataset, DEFAULT_CHUNK_SIZE};
pub use caching::{
    add_pixel_stats_to_info, cache_data_lazily, cache_if_space, cache_record_data_lazily,
    cache_record_fields_if_space, compute_pixel_stats, dir_size, CachingDatasetFactory, CachingPolicy, DiskSpace, FixedDiskSpace, ImageExample, PixelStats,
    SystemDiskSpace,
};
pub use collate::{Collate, CollateDataset, CollateFn};
pub use dataloader::{DataLoader, DataLoaderIterator};
pub use dataset::{Dataset, DatasetIter, DynDataset, Info, SplitPoint, DEFAULT_SEED};
pub use error::{DataError, DataResult};
pub use hdd_cache::{HddCacheDataset, HddFieldCacheDataset, CONSISTENCY_CHECK_SAMPLES};
pub use identity::{subset_hash, Identity, Modifier};
pub use info::{InfoDataset, InfoStore};
pub use record::{Field, Project, Record};
pub use registry::{
    default_splits, DatasetFactory, DatasetSource, PartTransform, PartedDataset, SourceArgs,
    SplitTable,
};
pub use sources::{DatasetNamer, FnDataset, TensorDataset, VecDataset};
pub use views::{
    BatchDataset, JoinDataset, MapDataset, ProjectDataset, RandomDataset, RepeatDataset,
    SampleDataset, SubDataset, SubrangeDataset, ZipAllDataset, ZipDataset,
};

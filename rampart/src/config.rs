//! Configuration
//!
//! JSON-readable descriptions of attacks and caches.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::attack::{
    AdversarialAttack, AttackBase, AttackResult, CarliniWagnerL2, CwParams, FgsmParams,
    GradientSign, Model, Pgd, PgdParams,
};
use crate::data::{DataError, DataResult, Dataset, DynDataset, Record, DEFAULT_CHUNK_SIZE};

pub use crate::data::CachingPolicy;

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The file cannot be read.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    /// The file is not valid JSON for the expected type.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    /// The values are inconsistent.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Result alias for configuration loading.
pub type ConfigResult<T> = Result<T, ConfigError>;

fn read_json<T: DeserializeOwned>(path: &Path) -> ConfigResult<T> {
    let content = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&content)?)
}

/// Algorithm and parameters of an attack.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum AttackKind {
    /// One-step gradient sign
    Fgsm(FgsmParams),
    /// Projected gradient descent
    Pgd(PgdParams),
    /// Carlini-Wagner L2
    Cw(CwParams),
}

/// An attack description.
///
/// ```json
/// { "kind": "pgd", "eps": 0.03, "step_count": 10, "clip_bounds": [0.0, 1.0] }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttackConfig {
    /// Algorithm and parameters
    #[serde(flatten)]
    pub kind: AttackKind,
    /// Valid input interval
    #[serde(default)]
    pub clip_bounds: Option<(f32, f32)>,
    /// Treat labels as targets
    #[serde(default)]
    pub targeted: bool,
}

impl AttackConfig {
    /// Load from a JSON file.
    pub fn from_file(path: &Path) -> ConfigResult<Self> {
        let config: Self = read_json(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Check values that serde cannot.
    pub fn validate(&self) -> ConfigResult<()> {
        if let Some((min, max)) = self.clip_bounds {
            if !(min <= max) {
                return Err(ConfigError::Invalid(format!(
                    "clip_bounds [{}, {}] is not an interval",
                    min, max
                )));
            }
        }
        if let AttackKind::Cw(_) = self.kind {
            if self.clip_bounds.is_none() {
                return Err(ConfigError::Invalid("the cw attack needs clip_bounds".into()));
            }
        }
        Ok(())
    }

    /// Construct the configured attack on `model`.
    pub fn build(&self, model: Model) -> AttackResult<Box<dyn AdversarialAttack>> {
        let mut base = AttackBase::new(model);
        if let Some((min, max)) = self.clip_bounds {
            base = base.with_clip_bounds(min, max)?;
        }
        if self.targeted {
            base = base.targeted();
        }
        Ok(match &self.kind {
            AttackKind::Fgsm(params) => Box::new(GradientSign::attack(base, *params)?),
            AttackKind::Pgd(params) => Box::new(Pgd::attack(base, params.clone())?),
            AttackKind::Cw(params) => Box::new(CarliniWagnerL2::attack(base, params.clone())?),
        })
    }
}

fn default_chunk_size() -> usize {
    DEFAULT_CHUNK_SIZE
}

/// How a dataset is cached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CacheConfig {
    /// In memory, optionally only a prefix
    Ram {
        /// Number of leading elements to cache
        #[serde(default)]
        max_size: Option<usize>,
    },
    /// In memory, persisted as one chunked file
    HddRam {
        /// Cache directory
        dir: PathBuf,
        /// Elements per serialized chunk
        #[serde(default = "default_chunk_size")]
        chunk_size: usize,
    },
    /// One file per element, or per record field
    Hdd {
        /// Cache directory
        dir: PathBuf,
        /// One file per field of record elements
        #[serde(default)]
        separate_fields: bool,
    },
}

impl CacheConfig {
    /// Load from a JSON file.
    pub fn from_file(path: &Path) -> ConfigResult<Self> {
        read_json(path)
    }

    /// Wrap `ds` in the configured cache.
    ///
    /// `separate_fields` needs record elements; use
    /// [`apply_records`](Self::apply_records) for those.
    pub fn apply<D>(&self, ds: D) -> DataResult<DynDataset<D::Item>>
    where
        D: Dataset + 'static,
        D::Item: Serialize + DeserializeOwned + Clone + 'static,
    {
        match self {
            CacheConfig::Ram { max_size } => Ok(ds.cache(*max_size).boxed()),
            CacheConfig::HddRam { dir, chunk_size } => Ok(ds.cache_hdd_ram(dir, *chunk_size)?.boxed()),
            CacheConfig::Hdd {
                dir,
                separate_fields: false,
            } => Ok(ds.cache_hdd(dir)?.boxed()),
            CacheConfig::Hdd {
                separate_fields: true,
                ..
            } => Err(DataError::InvalidArgument(
                "separate_fields requires a dataset of records".into(),
            )),
        }
    }

    /// Wrap a record dataset in the configured cache.
    pub fn apply_records<D, V>(&self, ds: D) -> DataResult<DynDataset<Record<V>>>
    where
        D: Dataset<Item = Record<V>> + 'static,
        V: Serialize + DeserializeOwned + Clone + 'static,
    {
        match self {
            CacheConfig::Hdd {
                dir,
                separate_fields: true,
            } => Ok(ds.cache_hdd_fields(dir)?.boxed()),
            other => other.apply(ds),
        }
    }
}

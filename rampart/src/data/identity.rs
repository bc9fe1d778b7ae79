//! Dataset Identity
//!
//! Every dataset carries a deterministic identity: a base name, an optional
//! subset and the ordered list of operators applied since. Its string form is
//! the cache key used by the persistent caches, so two pipelines built the
//! same way map to the same files on disk.

use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// One applied operator with its parameters.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Modifier {
    /// Elementwise transform, optionally named.
    Map(Option<String>),
    /// Contiguous or strided range `[start..stop]` / `[start..stop;step]`.
    Slice {
        /// First index
        start: usize,
        /// One past the last index
        stop: usize,
        /// Stride
        step: usize,
    },
    /// Arbitrary subset, identified by a hash of its indices.
    Indices(u32),
    /// Predicate subset, identified by name or by the hash of the kept indices.
    Filter(String),
    /// Seeded permutation.
    Permute(u64),
    /// Seeded sample.
    Sample {
        /// RNG seed
        seed: u64,
        /// Requested length
        length: Option<usize>,
        /// Drawn with replacement
        replace: bool,
    },
    /// Whole-dataset repetition.
    Repeat(usize),
    /// Index-independent random draws.
    Random {
        /// RNG seed
        seed: u64,
        /// Requested length
        length: Option<usize>,
    },
    /// Grouping into tuples of this size.
    Batch(usize),
    /// Merging of batch or zip elements, optionally with a named function.
    Collate(Option<String>),
    /// Field projection.
    Fields(Vec<String>),
    /// In-memory cache; `Some(n)` when only the first `n` elements are cached.
    Cache(Option<usize>),
    /// Whole-dataset disk cache mirrored in memory.
    CacheHddRam,
    /// Per-example disk cache; `true` when record fields are stored separately.
    CacheHdd(bool),
}

impl fmt::Display for Modifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Modifier::Map(None) => write!(f, "map"),
            Modifier::Map(Some(name)) => write!(f, "map_{}", name),
            Modifier::Slice { start, stop, step } if *step == 1 => {
                write!(f, "[{}..{}]", start, stop)
            }
            Modifier::Slice { start, stop, step } => write!(f, "[{}..{};{}]", start, stop, step),
            Modifier::Indices(hash) => write!(f, "[indices_{:x}]", hash),
            Modifier::Filter(name) => write!(f, "filter({})", name),
            Modifier::Permute(seed) => write!(f, "permute({})", seed),
            Modifier::Sample {
                seed,
                length,
                replace,
            } => {
                write!(f, "sample{}({}", if *replace { "_r" } else { "" }, seed)?;
                if let Some(length) = length {
                    write!(f, ",{}", length)?;
                }
                write!(f, ")")
            }
            Modifier::Repeat(n) => write!(f, "repeat({})", n),
            Modifier::Random { seed, length } => {
                write!(f, "random({}", seed)?;
                if let Some(length) = length {
                    write!(f, ",{}", length)?;
                }
                write!(f, ")")
            }
            Modifier::Batch(size) => write!(f, "batch({})", size),
            Modifier::Collate(None) => write!(f, "collate"),
            Modifier::Collate(Some(name)) => write!(f, "collate_{}", name),
            Modifier::Fields(fields) => write!(f, "[{}]", fields.join(",")),
            Modifier::Cache(None) => write!(f, "cache"),
            Modifier::Cache(Some(n)) => write!(f, "cache[..{}]", n),
            Modifier::CacheHddRam => write!(f, "cache_hdd_ram"),
            Modifier::CacheHdd(false) => write!(f, "cache_hdd"),
            Modifier::CacheHdd(true) => write!(f, "cache_hdd_s"),
        }
    }
}

/// Base name, optional subset and applied operators of a dataset.
///
/// # Example
/// ```rust
/// use rampart::data::{Identity, Modifier};
///
/// let id = Identity::new("cifar10")
///     .with_subset("train")
///     .with_modifier(Modifier::Map(None))
///     .with_modifier(Modifier::Slice { start: 0, stop: 10, step: 1 });
/// assert_eq!(id.to_string(), "cifar10-train.map.[0..10]");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Identity {
    name: String,
    subset: Option<String>,
    modifiers: Vec<Modifier>,
}

impl Identity {
    /// Identity of a source dataset.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            subset: None,
            modifiers: Vec::new(),
        }
    }

    /// Attach a subset name.
    pub fn with_subset(mut self, subset: impl Into<String>) -> Self {
        self.subset = Some(subset.into());
        self
    }

    /// Identity after one more operator.
    pub fn with_modifier(&self, modifier: Modifier) -> Self {
        let mut id = self.clone();
        id.modifiers.push(modifier);
        id
    }

    /// Base name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Subset name, if any.
    pub fn subset(&self) -> Option<&str> {
        self.subset.as_deref()
    }

    /// Applied operators, oldest first.
    pub fn modifiers(&self) -> &[Modifier] {
        &self.modifiers
    }

    /// Identity of a combinator over several datasets, e.g. `zip[a,b]`.
    pub(crate) fn combined(kind: &str, open: char, close: char, parts: &[Identity]) -> Self {
        let inner = parts
            .iter()
            .map(|p| p.to_string())
            .collect::<Vec<_>>()
            .join(",");
        Identity::new(format!("{}{}{}{}", kind, open, inner, close))
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)?;
        if let Some(subset) = &self.subset {
            write!(f, "-{}", subset)?;
        }
        for modifier in &self.modifiers {
            write!(f, ".{}", modifier)?;
        }
        Ok(())
    }
}

/// Deterministic 20-bit hash of an index list.
///
/// Stable across processes and platforms, unlike the standard library hasher.
pub fn subset_hash(indices: &[usize]) -> u32 {
    let mut hasher = Sha256::new();
    for &i in indices {
        hasher.update((i as u64).to_le_bytes());
    }
    let digest = hasher.finalize();
    let head = u32::from_le_bytes([digest[0], digest[1], digest[2], digest[3]]);
    head % (1 << 20)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identifier_rendering() {
        let id = Identity::new("mnist")
            .with_modifier(Modifier::Map(Some("norm".into())))
            .with_modifier(Modifier::Slice {
                start: 2,
                stop: 10,
                step: 3,
            })
            .with_modifier(Modifier::Sample {
                seed: 53,
                length: Some(4),
                replace: true,
            })
            .with_modifier(Modifier::CacheHdd(true));
        assert_eq!(
            id.to_string(),
            "mnist.map_norm.[2..10;3].sample_r(53,4).cache_hdd_s"
        );
    }

    #[test]
    fn test_subset_appears_before_modifiers() {
        let id = Identity::new("voc").with_subset("val");
        assert_eq!(id.to_string(), "voc-val");
        assert_eq!(id.with_modifier(Modifier::Permute(7)).to_string(), "voc-val.permute(7)");
    }

    #[test]
    fn test_subset_hash_is_deterministic_and_bounded() {
        let a = subset_hash(&[1, 2, 3]);
        assert_eq!(a, subset_hash(&[1, 2, 3]));
        assert_ne!(a, subset_hash(&[3, 2, 1]));
        assert!(a < 1 << 20);
    }

    #[test]
    fn test_combined_names() {
        let a = Identity::new("a").with_modifier(Modifier::Batch(2));
        let b = Identity::new("b");
        assert_eq!(Identity::combined("zip", '[', ']', &[a.clone(), b.clone()]).to_string(), "zip[a.batch(2),b]");
        assert_eq!(Identity::combined("join", '(', ')', &[a, b]).to_string(), "join(a.batch(2),b)");
    }
}

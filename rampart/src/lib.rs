//! # Rampart - Datasets and Adversarial Attacks
//!
//! Rampart is a toolkit for robustness experiments on CPU, written in pure Rust.
//!
//! ## Features
//!
//! - **Lazy Datasets**: composable views (map, slice, permute, zip, batch, ...)
//!   with deterministic identities used as cache keys
//! - **Caching**: in-memory, single-file and per-example disk caches that
//!   recover from corrupt entries
//! - **Dataset Registry**: named sources with subsets and derived splits
//! - **Module Trees**: named sequential, fork, parallel and sum containers
//!   that can be split and rejoined along a path
//! - **Attacks**: FGSM, PGD and Carlini-Wagner L2 behind one interface
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::rc::Rc;
//! use rampart::prelude::*;
//!
//! // Data
//! let ds = VecDataset::new("points", (0..8).map(|i| i as f32 / 8.0).collect());
//! let batches = ds.permute(3).batch(4).unwrap();
//!
//! // Model
//! let model = Rc::new(nn::mlp_classifier(4, &[16], 3, 0));
//!
//! // Attack
//! let pgd = Pgd::attack(
//!     AttackBase::new(model).with_clip_bounds(0.0, 1.0).unwrap(),
//!     PgdParams::default(),
//! )
//! .unwrap();
//! let x = Tensor::from_vec(batches.get(0).unwrap(), &[1, 4]);
//! let x_adv = pgd.perturb(&x, None).unwrap();
//! ```

#![allow(dead_code)]
#![warn(missing_docs)]

pub mod attack;
pub mod config;
pub mod data;
pub mod functional;
pub mod nn;

pub use rampart_autograd as autograd;

/// Prelude module - import everything you need with `use rampart::prelude::*`
pub mod prelude {
    pub use crate::attack::{
        AdversarialAttack, AttackBase, CarliniWagnerL2, CwParams, FgsmParams, GradientSign, PNorm,
        Pgd, PgdParams,
    };
    pub use crate::config::{AttackConfig, CacheConfig};
    pub use crate::data::{DataLoader, Dataset, DatasetFactory, DynDataset, Record, VecDataset};
    pub use crate::functional as F;
    pub use crate::nn;
    pub use crate::nn::Module;
    pub use rampart_autograd::Tensor;
}

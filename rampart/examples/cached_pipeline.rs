//! Example: Cached Dataset Pipeline
//!
//! Builds a synthetic dataset through the registry, derives its parts, caches
//! them on disk when there is room, and batches the training part.
//!
//! Run with: cargo run --example cached_pipeline [cache_dir]

use std::path::PathBuf;

use anyhow::Result;
use log::info;
use rampart::config::CacheConfig;
use rampart::data::{CachingDatasetFactory, CachingPolicy, PixelStats};
use rampart::prelude::*;
use serde_json::json;

fn main() -> Result<()> {
    env_logger::init();

    println!("Rampart - Cached Pipeline Example");
    println!("=================================\n");

    let cache_dir: PathBuf = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| std::env::temp_dir().join("rampart-cache"));

    // 1. Registry with a disk-space policy
    let factory = CachingDatasetFactory::new(DatasetFactory::with_builtin(&cache_dir), &cache_dir)
        .with_policy(CachingPolicy {
            min_free_space: 1 << 30,
        })
        .with_separate_fields()
        .with_pixel_stats();
    let args = json!({ "length": 200, "example_shape": [8, 8, 3], "seed": 42 });
    let parted = factory.create(
        "WhiteNoise",
        args.as_object().cloned().unwrap_or_default(),
    )?;
    println!("Parts: {:?}\n", parted.keys());

    // 2. Derived parts are cached lazily on first access, one file per field
    for name in ["train", "val", "test"] {
        let part = parted.part(name)?;
        println!("{:>5}: {:>4} examples  {}", name, part.len(), part.identifier());
    }
    let train = parted.part("train")?;
    if let Some(stats) = train.info().get("pixel_stats") {
        let stats: PixelStats = serde_json::from_value(stats.clone())?;
        println!("\nPixel mean: {:?}", stats.mean);
        println!("Pixel std:  {:?}", stats.std);
    }

    // 3. Batching over labels, with an in-memory cache on top
    let labels = train
        .clone()
        .map_named("label", |r| r.get("y").map(|y| y.item()).unwrap_or(-1.0));
    let cached = CacheConfig::Ram { max_size: None }.apply(labels)?;
    let batches = cached.permute(0).batch(32)?;
    for (i, batch) in batches.iter().enumerate().take(2) {
        info!("batch {}: {} labels", i, batch.len());
    }
    println!("\n{} batches from {}", batches.len(), batches.identifier());

    // 4. Cleanup
    train.clear_persistent_cache()?;
    println!("Cleared the on-disk cache of the training part");
    Ok(())
}

//! Rampart Performance Report
//!
//! Quick wall-clock measurements of dataset access, disk caching and
//! attack throughput on the CPU.
//! Run with: cargo run -p rampart-benchmarks --release

use rampart::attack::{AdversarialAttack, AttackBase, Model, Pgd, PgdParams};
use rampart::data::{Dataset, VecDataset};
use rampart::nn::mlp_classifier;
use rampart_autograd::Tensor;
use std::rc::Rc;
use std::time::Instant;

const WARMUP_ITERS: usize = 2;
const BENCH_ITERS: usize = 10;

fn main() {
    env_logger::init();

    println!("======================================================================");
    println!("                 RAMPART - PERFORMANCE REPORT                         ");
    println!("======================================================================");
    println!();

    println!("[BENCH] Dataset access");
    println!("----------------------------------------------------------------------");
    bench_view(10_000, 64);
    bench_view(10_000, 1024);
    bench_hdd_cache(2_000, 1024);

    println!("----------------------------------------------------------------------");
    println!("[BENCH] Attacks");
    println!("----------------------------------------------------------------------");
    bench_pgd(32, 64, 10);
    bench_pgd(32, 64, 40);
    bench_pgd(128, 256, 10);

    println!();
    println!("======================================================================");
    println!("                     REPORT COMPLETE                                  ");
    println!("======================================================================");
}

fn source(len: usize, width: usize) -> VecDataset<Vec<f32>> {
    VecDataset::new("report", (0..len).map(|i| vec![i as f32; width]).collect())
}

/// Average milliseconds per call of `f` after warmup.
fn time_ms(mut f: impl FnMut()) -> f64 {
    for _ in 0..WARMUP_ITERS {
        f();
    }
    let start = Instant::now();
    for _ in 0..BENCH_ITERS {
        f();
    }
    start.elapsed().as_secs_f64() * 1000.0 / BENCH_ITERS as f64
}

fn bench_view(len: usize, width: usize) {
    let ds = source(len, width)
        .map(|v| v.into_iter().map(|x| x * 0.5).collect::<Vec<f32>>())
        .permute(0);
    let avg_ms = time_ms(|| ds.iter().for_each(drop));
    let throughput = len as f64 / (avg_ms / 1000.0) / 1e6;
    println!(
        "  map+permute [{:>6}x{:>5}]:   {:>8.3} ms  |  {:>8.2} M elem/s",
        len, width, avg_ms, throughput
    );
}

fn bench_hdd_cache(len: usize, width: usize) {
    let dir = match tempfile::tempdir() {
        Ok(dir) => dir,
        Err(e) => {
            println!("  hdd cache: skipped ({})", e);
            return;
        }
    };
    let ds = match source(len, width).cache_hdd(dir.path()) {
        Ok(ds) => ds,
        Err(e) => {
            println!("  hdd cache: skipped ({})", e);
            return;
        }
    };
    let start = Instant::now();
    ds.iter().for_each(drop);
    let cold_ms = start.elapsed().as_secs_f64() * 1000.0;
    let warm_ms = time_ms(|| ds.iter().for_each(drop));

    // Serialized payload: 4 bytes per value plus the length prefix
    let bytes = (len * (width * 4 + 8)) as f64;
    println!(
        "  hdd cache [{:>6}x{:>5}]:     cold {:>8.3} ms  |  warm {:>8.3} ms  |  {:>6.2} MB/s",
        len,
        width,
        cold_ms,
        warm_ms,
        bytes / (warm_ms / 1000.0) / 1e6
    );
}

fn bench_pgd(batch: usize, features: usize, steps: usize) {
    let model: Model = Rc::new(mlp_classifier(features, &[128], 10, 0));
    let base = match AttackBase::new(model).with_clip_bounds(0.0, 1.0) {
        Ok(base) => base,
        Err(e) => {
            println!("  PGD: skipped ({})", e);
            return;
        }
    };
    let params = PgdParams {
        step_count: steps,
        seed: Some(0),
        ..Default::default()
    };
    let attack = match Pgd::attack(base, params) {
        Ok(attack) => attack,
        Err(e) => {
            println!("  PGD: skipped ({})", e);
            return;
        }
    };
    let x = Tensor::full(&[batch, features], 0.5);
    let avg_ms = time_ms(|| {
        if let Err(e) = attack.perturb(&x, None) {
            log::warn!("PGD failed: {}", e);
        }
    });
    println!(
        "  PGD [{:>4}x{:>4}, {:>2} steps]:    {:>8.3} ms  |  {:>8.2} ex/s",
        batch,
        features,
        steps,
        avg_ms,
        batch as f64 / (avg_ms / 1000.0)
    );
}

//! Attack Benchmark
//!
//! Cost of one `perturb` call on a small MLP for:
//! - FGSM (one gradient)
//! - PGD with and without early stopping
//! - CW-L2 with a short search
//!
//! Run with: cargo bench --bench attack_benchmark

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use rampart::attack::{
    AdversarialAttack, AttackBase, CarliniWagnerL2, CwParams, FgsmParams, GradientSign, Model,
    Pgd, PgdParams,
};
use rampart::nn::mlp_classifier;
use rampart_autograd::Tensor;
use std::rc::Rc;

const BATCH: usize = 64;
const FEATURES: usize = 32;

fn model() -> Model {
    Rc::new(mlp_classifier(FEATURES, &[128, 64], 10, 0))
}

fn base() -> AttackBase {
    AttackBase::new(model()).with_clip_bounds(0.0, 1.0).unwrap()
}

fn inputs() -> Tensor {
    Tensor::from_vec(
        (0..BATCH * FEATURES).map(|i| (i % 97) as f32 / 97.0).collect(),
        &[BATCH, FEATURES],
    )
}

fn bench_fgsm(c: &mut Criterion) {
    let attack = GradientSign::attack(base(), FgsmParams::default()).unwrap();
    let x = inputs();
    c.bench_function("fgsm", |b| b.iter(|| black_box(attack.perturb(&x, None).unwrap())));
}

fn bench_pgd(c: &mut Criterion) {
    let mut group = c.benchmark_group("pgd");
    group.throughput(Throughput::Elements(BATCH as u64));
    let x = inputs();

    for steps in [10usize, 40] {
        for stop_on_success in [false, true] {
            let params = PgdParams {
                step_count: steps,
                stop_on_success,
                seed: Some(0),
                ..Default::default()
            };
            let attack = Pgd::attack(base(), params).unwrap();
            let id = BenchmarkId::new(if stop_on_success { "early_stop" } else { "full" }, steps);
            group.bench_with_input(id, &x, |b, x| {
                b.iter(|| black_box(attack.perturb(x, None).unwrap()));
            });
        }
    }
    group.finish();
}

fn bench_cw(c: &mut Criterion) {
    let params = CwParams {
        binary_search_steps: 2,
        max_iter: 20,
        ..Default::default()
    };
    let attack = CarliniWagnerL2::attack(base(), params).unwrap();
    let x = inputs();
    let mut group = c.benchmark_group("cw");
    group.sample_size(10);
    group.bench_function("bss2_iter20", |b| b.iter(|| black_box(attack.perturb(&x, None).unwrap())));
    group.finish();
}

criterion_group!(benches, bench_fgsm, bench_pgd, bench_cw);
criterion_main!(benches);

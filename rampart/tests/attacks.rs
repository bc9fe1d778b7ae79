//! End-to-end attack scenarios on a small classifier.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use approx::assert_abs_diff_eq;
use rampart::attack::{
    rand_init_delta, AdversarialAttack, AttackBase, AttackError, AttackState, CarliniWagnerL2,
    CwParams, FgsmParams, GradientSign, Model, PNorm, Pgd, PgdParams,
};
use rampart::config::{AttackConfig, AttackKind};
use rampart::functional::{cross_entropy, label_tensor, Reduction};
use rampart::nn::{mlp_classifier, Func, Module};
use rampart_autograd::Tensor;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

fn init() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn classifier() -> Model {
    Rc::new(mlp_classifier(6, &[8], 3, 11))
}

fn inputs(batch: usize, seed: u64) -> Tensor {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    Tensor::from_vec((0..batch * 6).map(|_| rng.gen_range(0.1..0.9)).collect(), &[batch, 6])
}

fn base() -> AttackBase {
    AttackBase::new(classifier()).with_clip_bounds(0.0, 1.0).unwrap()
}

#[test]
fn pgd_with_zero_radius_is_the_identity() {
    init();
    let x = inputs(4, 0);
    let params = PgdParams {
        eps: 0.0,
        step_count: 5,
        seed: Some(3),
        ..Default::default()
    };
    let x_adv = Pgd::attack(base(), params).unwrap().perturb(&x, None).unwrap();
    assert_eq!(x_adv.to_vec(), x.to_vec());
}

#[test]
fn pgd_without_steps_returns_the_initial_point() {
    init();
    let x = inputs(3, 1);
    let params = PgdParams {
        eps: 0.05,
        step_count: 0,
        seed: Some(17),
        ..Default::default()
    };
    let x_adv = Pgd::attack(base(), params).unwrap().perturb(&x, None).unwrap();

    let mut rng = ChaCha8Rng::seed_from_u64(17);
    let delta = rand_init_delta(&x, PNorm::Inf, 0.05, Some((0.0, 1.0)), &mut rng);
    let expected = x.zip_map(&delta, |x, d| x + d).clamp(0.0, 1.0);
    assert_eq!(x_adv.to_vec(), expected.to_vec());
    for (a, b) in x_adv.to_vec().iter().zip(x.to_vec()) {
        assert_abs_diff_eq!(*a, b, epsilon = 0.05 + 1e-6);
    }
}

#[test]
fn pgd_stops_at_the_first_success_check() {
    init();
    let calls = Rc::new(Cell::new(0));
    let counter = Rc::clone(&calls);
    let inner = classifier();
    let model: Model = Rc::new(Func::new("counted", move |x: &Tensor| {
        counter.set(counter.get() + 1);
        inner.forward(x)
    }));
    let base = AttackBase::new(model)
        .with_clip_bounds(0.0, 1.0)
        .unwrap()
        .with_success(|out: &Tensor, _: &Tensor| vec![true; out.batch_size()]);
    let params = PgdParams {
        step_count: 40,
        stop_on_success: true,
        rand_init: false,
        ..Default::default()
    };
    let attack = Pgd::attack(base, params).unwrap();
    let x = inputs(5, 2);
    let x_adv = attack.perturb(&x, Some(&label_tensor(&[0, 1, 2, 0, 1]))).unwrap();
    assert_eq!(calls.get(), 1);
    assert_eq!(x_adv.to_vec(), x.to_vec());
}

#[test]
fn pgd_rejects_norms_without_projection() {
    let params = PgdParams {
        p: PNorm::L2,
        ..Default::default()
    };
    assert!(matches!(
        Pgd::attack(base(), params),
        Err(AttackError::NotImplemented(_))
    ));
}

#[test]
fn cw_with_one_iteration_keeps_the_shape() {
    init();
    let params = CwParams {
        binary_search_steps: 1,
        max_iter: 1,
        ..Default::default()
    };
    let attack = CarliniWagnerL2::attack(base(), params).unwrap();
    let x = inputs(4, 3);
    let x_adv = attack.perturb(&x, None).unwrap();
    assert_eq!(x_adv.shape, x.shape);
    assert!(x_adv.to_vec().iter().all(|v| (0.0..=1.0).contains(v)));
}

#[test]
fn cw_requires_clip_bounds_and_its_own_loss() {
    let unbounded = AttackBase::new(classifier());
    assert!(matches!(
        CarliniWagnerL2::attack(unbounded, CwParams::default()),
        Err(AttackError::Misconfigured(_))
    ));
    let custom = base().with_loss(|out: &Tensor, _: &Tensor| out.sum());
    assert!(matches!(
        CarliniWagnerL2::attack(custom, CwParams::default()),
        Err(AttackError::UnsupportedLoss(_))
    ));
}

#[test]
fn fgsm_moves_every_coordinate_by_eps() {
    init();
    let attack = GradientSign::attack(base(), FgsmParams { eps: 0.02 }).unwrap();
    let x = inputs(2, 4);
    let x_adv = attack.perturb(&x, None).unwrap();
    for (a, b) in x_adv.to_vec().iter().zip(x.to_vec()) {
        let moved = (a - b).abs();
        assert!(moved == 0.0 || (moved - 0.02).abs() < 1e-5);
    }
}

#[test]
fn completion_handlers_observe_the_result() {
    init();
    let attack = AttackConfig {
        kind: AttackKind::Fgsm(FgsmParams { eps: 0.1 }),
        clip_bounds: Some((0.0, 1.0)),
        targeted: false,
    }
    .build(classifier())
    .unwrap();

    let seen: Rc<RefCell<Vec<(Vec<f32>, Vec<f32>)>>> = Rc::new(RefCell::new(Vec::new()));
    let log = Rc::clone(&seen);
    let id = attack.perturb_completed().subscribe(move |p| {
        log.borrow_mut().push((p.x.to_vec(), p.x_adv.to_vec()));
    });

    let x = inputs(3, 5);
    let x_adv = attack.perturb(&x, None).unwrap();
    assert_eq!(attack.state(), AttackState::Configured);
    assert_eq!(seen.borrow().len(), 1);
    assert_eq!(seen.borrow()[0], (x.to_vec(), x_adv.to_vec()));

    assert!(attack.perturb_completed().unsubscribe(id));
    attack.perturb(&x, None).unwrap();
    assert_eq!(seen.borrow().len(), 1);
}

#[test]
fn label_count_must_match_the_batch() {
    let attack = GradientSign::attack(base(), FgsmParams::default()).unwrap();
    let err = attack
        .perturb(&inputs(3, 6), Some(&label_tensor(&[0, 1])))
        .unwrap_err();
    assert!(matches!(err, AttackError::Shape(_)));
    assert_eq!(attack.state(), AttackState::Configured);
}

#[test]
fn targeted_pgd_moves_towards_the_target() {
    init();
    let model = classifier();
    let x = inputs(6, 7);
    let clean = model.forward(&x).argmax_rows();
    let targets: Vec<usize> = clean.iter().map(|&c| (c + 1) % 3).collect();
    let y = label_tensor(&targets);

    let base = AttackBase::new(Rc::clone(&model))
        .with_clip_bounds(0.0, 1.0)
        .unwrap()
        .with_loss(|out: &Tensor, y: &Tensor| cross_entropy(out, y, Reduction::Sum).mul_scalar(-1.0))
        .targeted();
    let params = PgdParams {
        eps: 0.3,
        step_count: 20,
        step_size: 0.02,
        rand_init: false,
        ..Default::default()
    };
    let x_adv = Pgd::attack(base, params).unwrap().perturb(&x, Some(&y)).unwrap();

    let loss = |input: &Tensor| cross_entropy(&model.forward(input), &y, Reduction::Sum).item();
    assert!(loss(&x_adv) <= loss(&x));
    for (a, b) in x_adv.to_vec().iter().zip(x.to_vec()) {
        assert!((a - b).abs() <= 0.3 + 1e-6);
    }
}

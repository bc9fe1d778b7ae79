//! Adversarial Attacks
//!
//! Gradient-based adversarial example generation. Every attack is a
//! [`PerturbStep`] wrapped in an [`Attack`], which derives missing labels from
//! the model, hands the step owned copies of the inputs, clips the result and
//! notifies [`Attack::perturb_completed`](AdversarialAttack::perturb_completed)
//! subscribers.
//!
//! ```rust,no_run
//! use std::rc::Rc;
//! use rampart::attack::{AdversarialAttack, AttackBase, FgsmParams, GradientSign};
//! use rampart::nn::mlp_classifier;
//! use rampart_autograd::Tensor;
//!
//! let model = Rc::new(mlp_classifier(4, &[8], 3, 0));
//! let base = AttackBase::new(model).with_clip_bounds(0.0, 1.0).unwrap();
//! let fgsm = GradientSign::attack(base, FgsmParams { eps: 0.05 }).unwrap();
//! fgsm.perturb_completed().subscribe(|p| log::info!("adversarial batch {:?}", p.x_adv.shape));
//! let x_adv = fgsm.perturb(&Tensor::full(&[2, 4], 0.5), None).unwrap();
//! ```

mod base;
mod cw;
mod error;
mod event;
mod fgsm;
mod ops;
mod pgd;

pub use base::{
    default_loss, predict_hard, predict_soft, targeted_success, untargeted_success,
    AdversarialAttack, Attack, AttackBase, AttackState, LabelFn, Loss, Model, PerturbStep,
    Perturbation, SuccessFn,
};
pub use cw::{
    CarliniWagnerL2, CarliniWagnerL2Attack, CwParams, CARLINI_COEFF_UPPER, CARLINI_L2DIST_UPPER,
    NUM_CHECKS, ONE_MINUS_EPS, PREV_LOSS_INIT, REPEAT_STEP, UPPER_CHECK,
};
pub use error::{AttackError, AttackResult};
pub use event::{Event, HandlerId};
pub use fgsm::{FgsmParams, GradientSign, GradientSignAttack};
pub use ops::{
    arctanh_clip, l2_distance_sqr, project_to_p_ball, rand_init_delta, scaled_tanh,
    uniform_sample_from_p_ball, PNorm,
};
pub use pgd::{
    check_norm, perturb_iterative, GradPreprocessing, IterativeSettings, Pgd, PgdAttack, PgdParams,
};

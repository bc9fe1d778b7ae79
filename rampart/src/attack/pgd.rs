//! Projected gradient descent and the shared iterative optimizer.

use std::cell::RefCell;

use log::debug;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rampart_autograd::{no_grad, Tensor};
use serde::{Deserialize, Serialize};

use super::ops::{project_to_p_ball, rand_init_delta};
use super::{Attack, AttackBase, AttackError, AttackResult, PNorm, PerturbStep};
use crate::nn::Module;

/// What is done to the gradient before it is scaled by the step size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GradPreprocessing {
    /// Keep only the sign
    #[default]
    Sign,
    /// Divide by the per-example p-norm
    Normalize,
}

/// Settings of [`perturb_iterative`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IterativeSettings {
    /// Number of gradient steps
    pub step_count: usize,
    /// Radius of the allowed ball
    pub eps: f32,
    /// Step size
    pub step_size: f32,
    /// Gradient preprocessing
    pub grad_preprocessing: GradPreprocessing,
    /// Norm of the allowed ball
    pub p: PNorm,
}

/// Fail with [`AttackError::NotImplemented`] for norms without a projection.
pub fn check_norm(p: PNorm) -> AttackResult<()> {
    match p {
        PNorm::Inf => Ok(()),
        PNorm::L1 | PNorm::L2 => Err(AttackError::NotImplemented(format!(
            "iterative perturbation for p = {}",
            p
        ))),
    }
}

/// Iteratively increase `loss` over `x + delta` within the p-ball of radius
/// `eps` and within `clip_bounds`.
///
/// With `is_success`, examples that succeed are frozen at the delta that
/// produced the success and dropped from further steps; the loop ends early
/// once every remaining example succeeds. Examples that never succeed keep
/// their delta after the last step.
#[allow(clippy::too_many_arguments)]
pub fn perturb_iterative(
    x: &Tensor,
    y: &Tensor,
    model: &dyn Module,
    loss: &dyn Fn(&Tensor, &Tensor) -> Tensor,
    settings: &IterativeSettings,
    delta_init: Option<Tensor>,
    clip_bounds: Option<(f32, f32)>,
    is_success: Option<&dyn Fn(&Tensor, &Tensor) -> Vec<bool>>,
) -> AttackResult<Tensor> {
    check_norm(settings.p)?;
    let p = settings.p.exponent();

    let result = Tensor::zeros_like(x);
    let mut x_work = x.clone();
    let mut y_work = y.clone();
    let mut delta = match delta_init {
        Some(d) => d.deep_clone(),
        None => Tensor::zeros_like(x),
    };
    let mut origin: Vec<usize> = (0..x.batch_size()).collect();

    for step in 0..settings.step_count {
        let leaf = delta.detach().requires_grad_();
        let output = model.forward(&x_work.add(&leaf));
        let objective = loss(&output, &y_work);
        objective.backward();
        let mut grad = leaf.grad().unwrap_or_else(|| Tensor::zeros_like(&leaf));
        objective.zero_grad_graph();

        if let Some(is_success) = is_success {
            let success = no_grad(|| is_success(&output.detach(), &y_work));
            let (done, keep): (Vec<usize>, Vec<usize>) =
                (0..success.len()).partition(|&i| success[i]);
            if !done.is_empty() {
                let done_origin: Vec<usize> = done.iter().map(|&i| origin[i]).collect();
                result.scatter_rows(&done_origin, &delta.index_select(&done));
                if keep.is_empty() {
                    debug!("every example succeeded after {} of {} steps", step + 1, settings.step_count);
                    origin.clear();
                    break;
                }
                x_work = x_work.index_select(&keep);
                y_work = y_work.index_select(&keep);
                delta = delta.index_select(&keep);
                grad = grad.index_select(&keep);
                origin = keep.iter().map(|&i| origin[i]).collect();
            }
        }

        let pgrad = match settings.grad_preprocessing {
            GradPreprocessing::Sign => grad.sign(),
            GradPreprocessing::Normalize => {
                let inv: Vec<f32> = grad
                    .norm_per_example(p)
                    .into_iter()
                    .map(|n| 1.0 / n.max(f32::MIN_POSITIVE))
                    .collect();
                grad.scale_rows(&inv)
            }
        };
        let step_size = settings.step_size;
        delta = delta.zip_map(&pgrad, |d, g| d + g * step_size);
        delta = project_to_p_ball(&delta, settings.eps, settings.p)?;
        if let Some((min, max)) = clip_bounds {
            delta = x_work.zip_map(&delta, |x, d| (x + d).max(min).min(max) - x);
        }
    }

    if !origin.is_empty() {
        result.scatter_rows(&origin, &delta);
    }
    let x_adv = x.zip_map(&result, |x, d| x + d);
    Ok(match clip_bounds {
        Some((min, max)) => x_adv.clamp(min, max),
        None => x_adv,
    })
}

fn default_eps() -> f32 {
    8.0 / 255.0
}

fn default_step_count() -> usize {
    40
}

fn default_step_size() -> f32 {
    2.0 / 255.0
}

fn default_true() -> bool {
    true
}

/// Parameters of [`Pgd`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PgdParams {
    /// Radius of the allowed ball
    #[serde(default = "default_eps")]
    pub eps: f32,
    /// Number of gradient steps
    #[serde(default = "default_step_count")]
    pub step_count: usize,
    /// Step size
    #[serde(default = "default_step_size")]
    pub step_size: f32,
    /// Gradient preprocessing
    #[serde(default)]
    pub grad_preprocessing: GradPreprocessing,
    /// Start from a random point of the ball instead of `x`
    #[serde(default = "default_true")]
    pub rand_init: bool,
    /// Norm of the allowed ball
    #[serde(default)]
    pub p: PNorm,
    /// Freeze examples once they succeed and stop when all have
    #[serde(default)]
    pub stop_on_success: bool,
    /// Seed of the random start; unseeded when absent
    #[serde(default)]
    pub seed: Option<u64>,
}

impl Default for PgdParams {
    fn default() -> Self {
        Self {
            eps: default_eps(),
            step_count: default_step_count(),
            step_size: default_step_size(),
            grad_preprocessing: GradPreprocessing::Sign,
            rand_init: true,
            p: PNorm::Inf,
            stop_on_success: false,
            seed: None,
        }
    }
}

impl PgdParams {
    /// Settings of the underlying iterative optimizer.
    pub fn settings(&self) -> IterativeSettings {
        IterativeSettings {
            step_count: self.step_count,
            eps: self.eps,
            step_size: self.step_size,
            grad_preprocessing: self.grad_preprocessing,
            p: self.p,
        }
    }
}

/// The PGD attack (Madry et al., 2017): `step_count` steps of size
/// `step_size`, always staying within `eps` of the input.
///
/// # Example
/// ```rust,no_run
/// use std::rc::Rc;
/// use rampart::attack::{AdversarialAttack, AttackBase, Pgd, PgdAttack, PgdParams};
/// use rampart::nn::mlp_classifier;
/// use rampart_autograd::Tensor;
///
/// let model = Rc::new(mlp_classifier(4, &[8], 3, 0));
/// let base = AttackBase::new(model).with_clip_bounds(0.0, 1.0).unwrap();
/// let params = PgdParams { eps: 0.1, step_count: 10, step_size: 0.02, seed: Some(1), ..Default::default() };
/// let attack: PgdAttack = Pgd::attack(base, params).unwrap();
/// let x_adv = attack.perturb(&Tensor::full(&[2, 4], 0.5), None).unwrap();
/// ```
pub struct Pgd {
    base: AttackBase,
    params: PgdParams,
    rng: RefCell<ChaCha8Rng>,
}

/// PGD wrapped in the `perturb` protocol.
pub type PgdAttack = Attack<Pgd>;

impl Pgd {
    /// Validate parameters; norms without a projection are rejected here.
    pub fn new(base: AttackBase, params: PgdParams) -> AttackResult<Self> {
        check_norm(params.p)?;
        if !(params.eps >= 0.0) || !(params.step_size >= 0.0) {
            return Err(AttackError::Misconfigured(format!(
                "eps ({}) and step_size ({}) must be non-negative",
                params.eps, params.step_size
            )));
        }
        let rng = match params.seed {
            Some(seed) => ChaCha8Rng::seed_from_u64(seed),
            None => ChaCha8Rng::from_entropy(),
        };
        Ok(Self {
            base,
            params,
            rng: RefCell::new(rng),
        })
    }

    /// Validated step wrapped in an [`Attack`].
    pub fn attack(base: AttackBase, params: PgdParams) -> AttackResult<PgdAttack> {
        Ok(Attack::new(Self::new(base, params)?))
    }

    /// Parameters.
    pub fn params(&self) -> &PgdParams {
        &self.params
    }
}

impl PerturbStep for Pgd {
    fn base(&self) -> &AttackBase {
        &self.base
    }

    fn perturb_step(&self, x: Tensor, y: Tensor) -> AttackResult<Tensor> {
        let delta_init = if self.params.rand_init {
            rand_init_delta(
                &x,
                self.params.p,
                self.params.eps,
                self.base.clip_bounds,
                &mut *self.rng.borrow_mut(),
            )
        } else {
            Tensor::zeros_like(&x)
        };
        let stop: Option<&dyn Fn(&Tensor, &Tensor) -> Vec<bool>> = if self.params.stop_on_success {
            Some(self.base.is_success.as_ref())
        } else {
            None
        };
        perturb_iterative(
            &x,
            &y,
            self.base.model.as_ref(),
            self.base.loss.as_ref(),
            &self.params.settings(),
            Some(delta_init),
            self.base.clip_bounds,
            stop,
        )
    }
}

impl std::fmt::Debug for Pgd {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pgd")
            .field("base", &self.base)
            .field("params", &self.params)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::functional::label_tensor;
    use crate::nn::Func;
    use std::cell::Cell;
    use std::rc::Rc;

    fn counting_identity(calls: &Rc<Cell<usize>>) -> Rc<dyn Module> {
        let calls = Rc::clone(calls);
        Rc::new(Func::new("identity", move |x: &Tensor| {
            calls.set(calls.get() + 1);
            x.clone()
        }))
    }

    fn settings(step_count: usize, eps: f32) -> IterativeSettings {
        IterativeSettings {
            step_count,
            eps,
            step_size: 0.1,
            grad_preprocessing: GradPreprocessing::Sign,
            p: PNorm::Inf,
        }
    }

    #[test]
    fn test_linf_steps_follow_gradient_sign() {
        let calls = Rc::new(Cell::new(0));
        let model = counting_identity(&calls);
        let base = AttackBase::new(Rc::clone(&model));
        let x = Tensor::from_vec(vec![0.5, 0.5], &[1, 2]);
        let x_adv = perturb_iterative(
            &x,
            &label_tensor(&[0]),
            model.as_ref(),
            base.loss.as_ref(),
            &settings(2, 0.15),
            None,
            Some((0.0, 1.0)),
            None,
        )
        .unwrap();
        let v = x_adv.to_vec();
        assert!((v[0] - 0.35).abs() < 1e-6);
        assert!((v[1] - 0.65).abs() < 1e-6);
        assert_eq!(calls.get(), 2);
    }

    #[test]
    fn test_early_stop_freezes_successful_rows() {
        let calls = Rc::new(Cell::new(0));
        let model = counting_identity(&calls);
        let base = AttackBase::new(Rc::clone(&model));
        // Row 0 already succeeds, row 1 must be pushed past the boundary.
        let x = Tensor::from_vec(vec![0.0, 1.0, 0.6, 0.4], &[2, 2]);
        let succeed = |out: &Tensor, y: &Tensor| crate::attack::untargeted_success(out, y);
        let x_adv = perturb_iterative(
            &x,
            &label_tensor(&[0, 0]),
            model.as_ref(),
            base.loss.as_ref(),
            &settings(10, 1.0),
            None,
            None,
            Some(&succeed),
        )
        .unwrap();
        let v = x_adv.to_vec();
        assert_eq!(&v[..2], &[0.0, 1.0]);
        assert!(v[3] > v[2]);
        // Row 1 is still class 0 at the second evaluation and flips at the third.
        assert_eq!(calls.get(), 3);
    }

    #[test]
    fn test_l2_fails_before_model_evaluation() {
        let calls = Rc::new(Cell::new(0));
        let model = counting_identity(&calls);
        let base = AttackBase::new(Rc::clone(&model));
        let mut s = settings(3, 0.1);
        s.p = PNorm::L2;
        let err = perturb_iterative(
            &Tensor::zeros(&[1, 2]),
            &label_tensor(&[0]),
            model.as_ref(),
            base.loss.as_ref(),
            &s,
            None,
            None,
            None,
        )
        .unwrap_err();
        assert!(matches!(err, AttackError::NotImplemented(_)));
        assert_eq!(calls.get(), 0);
        let params = PgdParams { p: PNorm::L1, ..Default::default() };
        assert!(matches!(Pgd::new(base, params), Err(AttackError::NotImplemented(_))));
    }

    #[test]
    fn test_params_from_json_defaults() {
        let params: PgdParams = serde_json::from_str(r#"{"eps": 0.5, "p": "inf"}"#).unwrap();
        assert_eq!(params.eps, 0.5);
        assert_eq!(params.step_count, 40);
        assert!(params.rand_init);
        assert_eq!(params.grad_preprocessing, GradPreprocessing::Sign);
    }
}

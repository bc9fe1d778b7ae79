//! Carlini-Wagner L2 attack (<https://arxiv.org/abs/1608.04644>).
//!
//! Binary search over a per-example coefficient `c`; for each `c`, Adam
//! minimises `c * margin + |adv - x|^2` in tanh space.

use log::debug;
use rampart_autograd::{no_grad, Adam, Optimizer, Tensor};
use serde::{Deserialize, Serialize};

use super::ops::{arctanh_clip, l2_distance_sqr, scaled_tanh};
use super::{Attack, AttackBase, AttackError, AttackResult, PerturbStep};
use crate::functional::{label_classes, one_hot};

/// Initial "no success yet" distance.
pub const CARLINI_L2DIST_UPPER: f32 = 1e10;
/// Initial upper bound of the coefficient search.
pub const CARLINI_COEFF_UPPER: f32 = 1e10;
/// Binary search step count from which the last step retries at the upper bound.
pub const REPEAT_STEP: usize = 10;
/// Plateau factor of the early abort, also the arctanh shrink factor.
pub const ONE_MINUS_EPS: f32 = 0.999999;
/// Upper bounds below this count as known.
pub const UPPER_CHECK: f32 = 1e9;
/// Loss the first plateau check compares against.
pub const PREV_LOSS_INIT: f32 = 1e6;
/// Number of plateau checks per inner loop.
pub const NUM_CHECKS: usize = 10;

fn default_learning_rate() -> f32 {
    0.01
}

fn default_binary_search_steps() -> usize {
    9
}

fn default_max_iter() -> usize {
    10000
}

fn default_true() -> bool {
    true
}

fn default_initial_const() -> f32 {
    1e-3
}

/// Parameters of [`CarliniWagnerL2`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CwParams {
    /// Class count; checked against the model output when given
    #[serde(default)]
    pub num_classes: Option<usize>,
    /// Logit margin required of adversarial examples
    #[serde(default)]
    pub confidence: f32,
    /// Adam learning rate
    #[serde(default = "default_learning_rate")]
    pub learning_rate: f32,
    /// Outer binary search steps
    #[serde(default = "default_binary_search_steps")]
    pub binary_search_steps: usize,
    /// Inner optimisation steps
    #[serde(default = "default_max_iter")]
    pub max_iter: usize,
    /// Leave the inner loop when the loss plateaus
    #[serde(default = "default_true")]
    pub abort_early: bool,
    /// Initial coefficient
    #[serde(default = "default_initial_const")]
    pub initial_const: f32,
}

impl Default for CwParams {
    fn default() -> Self {
        Self {
            num_classes: None,
            confidence: 0.0,
            learning_rate: default_learning_rate(),
            binary_search_steps: default_binary_search_steps(),
            max_iter: default_max_iter(),
            abort_early: true,
            initial_const: default_initial_const(),
        }
    }
}

/// The Carlini-Wagner L2 step.
///
/// Requires clip bounds and the built-in objective.
#[derive(Debug)]
pub struct CarliniWagnerL2 {
    base: AttackBase,
    params: CwParams,
    bounds: (f32, f32),
    repeat: bool,
}

/// CW-L2 wrapped in the `perturb` protocol.
pub type CarliniWagnerL2Attack = Attack<CarliniWagnerL2>;

// Per-example running best over successful iterates.
struct Best {
    l2: Vec<f32>,
    labels: Vec<Option<usize>>,
}

impl Best {
    fn new(batch: usize) -> Self {
        Self {
            l2: vec![CARLINI_L2DIST_UPPER; batch],
            labels: vec![None; batch],
        }
    }
}

impl CarliniWagnerL2 {
    /// Validate the configuration.
    pub fn new(base: AttackBase, params: CwParams) -> AttackResult<Self> {
        if base.has_custom_loss() {
            return Err(AttackError::UnsupportedLoss(
                "the CW attack optimises its own margin objective; a custom loss has no effect"
                    .into(),
            ));
        }
        let bounds = base.clip_bounds.ok_or_else(|| {
            AttackError::Misconfigured("the CW attack requires clip bounds".into())
        })?;
        if !(bounds.0 < bounds.1) {
            return Err(AttackError::Misconfigured(format!(
                "the CW attack requires a non-empty clip interval, got {:?}",
                bounds
            )));
        }
        Ok(Self {
            repeat: params.binary_search_steps >= REPEAT_STEP,
            base,
            params,
            bounds,
        })
    }

    /// Validated step wrapped in an [`Attack`].
    pub fn attack(base: AttackBase, params: CwParams) -> AttackResult<CarliniWagnerL2Attack> {
        Ok(Attack::new(Self::new(base, params)?))
    }

    /// Parameters.
    pub fn params(&self) -> &CwParams {
        &self.params
    }

    // Success of confidence-adjusted logits under the configured predicate.
    fn is_successful(&self, output: &Tensor, y: &Tensor, labels: &[usize]) -> Vec<bool> {
        let classes = output.shape[1];
        let shift = if self.base.is_targeted() {
            -self.params.confidence
        } else {
            self.params.confidence
        };
        let adjusted = output.deep_clone();
        adjusted.update(|z| {
            for (i, &label) in labels.iter().enumerate() {
                z[i * classes + label] += shift;
            }
        });
        (self.base.is_success)(&adjusted, y)
    }

    // Success of a recorded label, through the same predicate.
    fn label_succeeds(&self, label: Option<usize>, y: &Tensor, classes: usize) -> bool {
        match label {
            Some(l) => (self.base.is_success)(&one_hot(&[l], classes), y)
                .first()
                .copied()
                .unwrap_or(false),
            None => false,
        }
    }

    fn update_coeffs(
        &self,
        y: &Tensor,
        classes: usize,
        current: &Best,
        coeffs: &mut [f32],
        lower: &mut [f32],
        upper: &mut [f32],
    ) {
        for i in 0..coeffs.len() {
            let y_i = y.index_select(&[i]);
            if self.label_succeeds(current.labels[i], &y_i, classes) {
                upper[i] = upper[i].min(coeffs[i]);
                if upper[i] < UPPER_CHECK {
                    coeffs[i] = (lower[i] + upper[i]) / 2.0;
                }
            } else {
                lower[i] = lower[i].max(coeffs[i]);
                if upper[i] < UPPER_CHECK {
                    coeffs[i] = (lower[i] + upper[i]) / 2.0;
                } else {
                    coeffs[i] *= 10.0;
                }
            }
        }
    }
}

impl PerturbStep for CarliniWagnerL2 {
    fn base(&self) -> &AttackBase {
        &self.base
    }

    fn perturb_step(&self, x: Tensor, y: Tensor) -> AttackResult<Tensor> {
        let batch = x.batch_size();
        let labels = label_classes(&y)
            .into_iter()
            .collect::<Option<Vec<usize>>>()
            .ok_or_else(|| AttackError::InvalidLabels("every example needs a class".into()))?;
        let (min, max) = self.bounds;
        let targeted = self.base.is_targeted();
        let model = self.base.model.as_ref();

        let mut lower = vec![0.0f32; batch];
        let mut upper = vec![CARLINI_COEFF_UPPER; batch];
        let mut coeffs = vec![self.params.initial_const; batch];
        let final_advs = x.deep_clone();
        let mut best = Best::new(batch);

        let x_atanh = arctanh_clip(&x, min, max, ONE_MINUS_EPS);
        let origin = no_grad(|| scaled_tanh(&x_atanh, min, max));
        let mut classes = 0;
        let check_every = (self.params.max_iter / NUM_CHECKS).max(1);

        for outer in 0..self.params.binary_search_steps {
            let delta = Tensor::zeros_like(&x).requires_grad_();
            let mut optimizer = Adam::new(vec![delta.clone()], self.params.learning_rate);
            let mut current = Best::new(batch);
            let mut prev_loss = PREV_LOSS_INIT;

            if self.repeat && outer + 1 == self.params.binary_search_steps {
                coeffs.copy_from_slice(&upper);
            }
            let c = Tensor::from_data(&coeffs, &[batch]);

            for iteration in 0..self.params.max_iter {
                optimizer.zero_grad();
                let adv = scaled_tanh(&delta.add(&x_atanh), min, max);
                let l2 = l2_distance_sqr(&adv, &origin);
                let output = model.forward(&adv);
                if output.ndim() != 2 || output.batch_size() != batch {
                    return Err(AttackError::Shape(format!(
                        "expected [{}, classes] logits, got {:?}",
                        batch, output.shape
                    )));
                }
                classes = output.shape[1];
                if let Some(expected) = self.params.num_classes {
                    if expected != classes {
                        return Err(AttackError::Shape(format!(
                            "expected {} classes, the model outputs {}",
                            expected, classes
                        )));
                    }
                }
                if let Some(&bad) = labels.iter().find(|&&l| l >= classes) {
                    return Err(AttackError::InvalidLabels(format!(
                        "label {} out of range for {} classes",
                        bad, classes
                    )));
                }

                let margin = output.margin(&labels, self.params.confidence, targeted);
                let loss = c.mul(&margin).sum().add(&l2.sum());
                loss.backward();
                optimizer.step();
                loss.zero_grad_graph();
                let loss = loss.item();

                if self.params.abort_early && iteration % check_every == 0 {
                    if loss > prev_loss * ONE_MINUS_EPS {
                        debug!("CW search step {}: loss plateaued at iteration {}", outer, iteration);
                        break;
                    }
                    prev_loss = loss;
                }

                let output = output.detach();
                let predicted = output.argmax_rows();
                let success = self.is_successful(&output, &y, &labels);
                let l2 = l2.to_vec();
                let mut improved = Vec::new();
                for i in 0..batch {
                    if !success[i] {
                        continue;
                    }
                    if l2[i] < current.l2[i] {
                        current.l2[i] = l2[i];
                        current.labels[i] = Some(predicted[i]);
                    }
                    if l2[i] < best.l2[i] {
                        best.l2[i] = l2[i];
                        best.labels[i] = Some(predicted[i]);
                        improved.push(i);
                    }
                }
                if !improved.is_empty() {
                    final_advs.scatter_rows(&improved, &adv.index_select(&improved));
                }
            }

            self.update_coeffs(&y, classes, &current, &mut coeffs, &mut lower, &mut upper);
        }

        debug!(
            "CW finished: {} of {} examples adversarial",
            best.labels.iter().flatten().count(),
            batch
        );
        Ok(final_advs)
    }
}

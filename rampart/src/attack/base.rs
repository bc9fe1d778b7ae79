//! Attack Base
//!
//! Shared configuration, the `perturb` protocol and the default label,
//! loss and success functions.

use std::cell::Cell;
use std::rc::Rc;

use rampart_autograd::{no_grad, Tensor};

use super::{AttackError, AttackResult, Event};
use crate::functional::{cross_entropy, label_classes, Reduction};
use crate::nn::Module;

/// A model under attack.
pub type Model = Rc<dyn Module>;

/// `(output, label) -> scalar` objective that the attack increases.
pub type Loss = Rc<dyn Fn(&Tensor, &Tensor) -> Tensor>;

/// `(output, label) -> per-example success`.
pub type SuccessFn = Rc<dyn Fn(&Tensor, &Tensor) -> Vec<bool>>;

/// `(model, input) -> label` used when `perturb` gets no label.
pub type LabelFn = Rc<dyn Fn(&dyn Module, &Tensor) -> Tensor>;

/// Hard prediction: the arg-max class of every example, computed without
/// recording a graph.
pub fn predict_hard(model: &dyn Module, x: &Tensor) -> Tensor {
    no_grad(|| {
        let classes = model.forward(x).argmax_rows();
        Tensor::from_vec(classes.iter().map(|&c| c as f32).collect(), &[classes.len()])
    })
}

/// Soft prediction: `softmax(output / temperature)`. Lower temperatures give
/// harder labels.
pub fn predict_soft(model: &dyn Module, x: &Tensor, temperature: f32) -> Tensor {
    no_grad(|| model.forward(x).softmax_rows(temperature))
}

/// Success when the predicted class differs from the label.
///
/// Ignored (negative) labels count as successes.
pub fn untargeted_success(output: &Tensor, y: &Tensor) -> Vec<bool> {
    output
        .argmax_rows()
        .into_iter()
        .zip(label_classes(y))
        .map(|(pred, label)| label.map_or(true, |l| pred != l))
        .collect()
}

/// Success when the predicted class equals the target label.
pub fn targeted_success(output: &Tensor, y: &Tensor) -> Vec<bool> {
    output
        .argmax_rows()
        .into_iter()
        .zip(label_classes(y))
        .map(|(pred, label)| label == Some(pred))
        .collect()
}

/// Softmax cross-entropy summed over examples, ignoring negative labels.
pub fn default_loss() -> Loss {
    Rc::new(|output: &Tensor, y: &Tensor| cross_entropy(output, y, Reduction::Sum))
}

/// Configuration shared by every attack.
///
/// # Example
/// ```rust,no_run
/// use std::rc::Rc;
/// use rampart::attack::AttackBase;
/// use rampart::nn::mlp_classifier;
///
/// let base = AttackBase::new(Rc::new(mlp_classifier(4, &[8], 3, 0)))
///     .with_clip_bounds(0.0, 1.0)
///     .unwrap()
///     .targeted();
/// assert!(base.is_targeted());
/// ```
#[derive(Clone)]
pub struct AttackBase {
    /// The attacked model
    pub model: Model,
    /// Objective to increase
    pub loss: Loss,
    /// Valid input interval
    pub clip_bounds: Option<(f32, f32)>,
    /// Per-example success predicate
    pub is_success: SuccessFn,
    /// Label source when none is given
    pub get_predicted_label: LabelFn,
    targeted: bool,
    custom_loss: bool,
}

impl AttackBase {
    /// Untargeted attack on `model` with the default loss and label source.
    pub fn new(model: Model) -> Self {
        Self {
            model,
            loss: default_loss(),
            clip_bounds: None,
            is_success: Rc::new(untargeted_success),
            get_predicted_label: Rc::new(predict_hard),
            targeted: false,
            custom_loss: false,
        }
    }

    /// Replace the objective.
    pub fn with_loss(mut self, loss: impl Fn(&Tensor, &Tensor) -> Tensor + 'static) -> Self {
        self.loss = Rc::new(loss);
        self.custom_loss = true;
        self
    }

    /// Clamp results into `[min, max]`.
    pub fn with_clip_bounds(mut self, min: f32, max: f32) -> AttackResult<Self> {
        if !(min <= max) {
            return Err(AttackError::Misconfigured(format!(
                "clip bounds ({}, {}) are not an interval",
                min, max
            )));
        }
        self.clip_bounds = Some((min, max));
        Ok(self)
    }

    /// Replace the success predicate.
    pub fn with_success(mut self, f: impl Fn(&Tensor, &Tensor) -> Vec<bool> + 'static) -> Self {
        self.is_success = Rc::new(f);
        self
    }

    /// Replace the label source.
    pub fn with_label_fn(mut self, f: impl Fn(&dyn Module, &Tensor) -> Tensor + 'static) -> Self {
        self.get_predicted_label = Rc::new(f);
        self
    }

    /// Treat labels as targets: success means reaching them.
    pub fn targeted(mut self) -> Self {
        self.targeted = true;
        self.is_success = Rc::new(targeted_success);
        self
    }

    /// Whether labels are targets.
    pub fn is_targeted(&self) -> bool {
        self.targeted
    }

    /// Whether the loss was replaced.
    pub fn has_custom_loss(&self) -> bool {
        self.custom_loss
    }

    /// Model output, loss and the loss gradient with respect to `x`.
    ///
    /// Gradients recorded on the way, including those of model parameters,
    /// are cleared before returning.
    pub fn output_loss_grad(&self, x: &Tensor, y: &Tensor) -> (Tensor, Tensor, Tensor) {
        let x = x.detach().requires_grad_();
        let output = self.model.forward(&x);
        let loss = (self.loss)(&output, y);
        loss.backward();
        let grad = x.grad().unwrap_or_else(|| Tensor::zeros_like(&x));
        loss.zero_grad_graph();
        (output.detach(), loss.detach(), grad)
    }

    /// Clamp into the clip bounds, if any.
    pub fn clip(&self, x: &Tensor) -> Tensor {
        match self.clip_bounds {
            Some((min, max)) => x.clamp(min, max),
            None => x.clone(),
        }
    }
}

impl std::fmt::Debug for AttackBase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AttackBase")
            .field("clip_bounds", &self.clip_bounds)
            .field("targeted", &self.targeted)
            .field("custom_loss", &self.custom_loss)
            .finish()
    }
}

/// The per-attack perturbation.
pub trait PerturbStep {
    /// Shared configuration.
    fn base(&self) -> &AttackBase;

    /// Adversarial input for owned copies of `x` and `y`.
    ///
    /// Clipping and notification are done by [`Attack::perturb`].
    fn perturb_step(&self, x: Tensor, y: Tensor) -> AttackResult<Tensor>;
}

/// Lifecycle of an [`Attack`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttackState {
    /// Ready for a `perturb` call
    Configured,
    /// Inside `perturb`
    Perturbing,
    /// Result computed; completion handlers are running
    Completed,
}

/// Payload of the completion event.
#[derive(Debug, Clone)]
pub struct Perturbation {
    /// The caller's input
    pub x: Tensor,
    /// The label used, given or predicted
    pub y: Tensor,
    /// The clipped adversarial input
    pub x_adv: Tensor,
}

/// Object-safe attack interface.
pub trait AdversarialAttack {
    /// Generate adversarial inputs; without `y` the model's own hard
    /// prediction is the label.
    fn perturb(&self, x: &Tensor, y: Option<&Tensor>) -> AttackResult<Tensor>;

    /// Notified once per successful `perturb`, after clipping.
    fn perturb_completed(&self) -> &Event<Perturbation>;

    /// Current lifecycle state.
    fn state(&self) -> AttackState;
}

/// An attack: a perturbation step wrapped in the `perturb` protocol.
pub struct Attack<S> {
    step: S,
    state: Cell<AttackState>,
    perturb_completed: Event<Perturbation>,
}

impl<S: PerturbStep> Attack<S> {
    /// Wrap a configured step.
    pub fn new(step: S) -> Self {
        Self {
            step,
            state: Cell::new(AttackState::Configured),
            perturb_completed: Event::new(),
        }
    }

    /// The perturbation step.
    pub fn step(&self) -> &S {
        &self.step
    }

    /// Shared configuration.
    pub fn base(&self) -> &AttackBase {
        self.step.base()
    }
}

impl<S: PerturbStep> AdversarialAttack for Attack<S> {
    fn perturb(&self, x: &Tensor, y: Option<&Tensor>) -> AttackResult<Tensor> {
        let base = self.step.base();
        let y = match y {
            Some(y) => y.clone(),
            None => (base.get_predicted_label)(base.model.as_ref(), x),
        };
        if y.batch_size() != x.batch_size() {
            return Err(AttackError::Shape(format!(
                "{} labels for a batch of {}",
                y.batch_size(),
                x.batch_size()
            )));
        }

        self.state.set(AttackState::Perturbing);
        let x_adv = match self.step.perturb_step(x.deep_clone(), y.deep_clone()) {
            Ok(x_adv) => base.clip(&x_adv),
            Err(e) => {
                self.state.set(AttackState::Configured);
                return Err(e);
            }
        };

        self.state.set(AttackState::Completed);
        self.perturb_completed.emit(&Perturbation {
            x: x.clone(),
            y,
            x_adv: x_adv.clone(),
        });
        self.state.set(AttackState::Configured);
        Ok(x_adv)
    }

    fn perturb_completed(&self) -> &Event<Perturbation> {
        &self.perturb_completed
    }

    fn state(&self) -> AttackState {
        self.state.get()
    }
}

impl<S: PerturbStep + std::fmt::Debug> std::fmt::Debug for Attack<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Attack")
            .field("step", &self.step)
            .field("state", &self.state.get())
            .finish()
    }
}

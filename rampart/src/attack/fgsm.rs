//! One-step fast gradient sign method (Goodfellow et al., 2014).

use rampart_autograd::Tensor;
use serde::{Deserialize, Serialize};

use super::{Attack, AttackBase, AttackError, AttackResult, PerturbStep};

fn default_eps() -> f32 {
    0.3
}

/// Parameters of [`GradientSign`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FgsmParams {
    /// Step size
    #[serde(default = "default_eps")]
    pub eps: f32,
}

impl Default for FgsmParams {
    fn default() -> Self {
        Self { eps: default_eps() }
    }
}

/// `x + eps * sign(grad_x loss)`.
#[derive(Debug)]
pub struct GradientSign {
    base: AttackBase,
    eps: f32,
}

/// FGSM wrapped in the `perturb` protocol.
pub type GradientSignAttack = Attack<GradientSign>;

impl GradientSign {
    /// Create the step; `eps` must be finite.
    pub fn new(base: AttackBase, params: FgsmParams) -> AttackResult<Self> {
        if !params.eps.is_finite() {
            return Err(AttackError::Misconfigured(format!("eps must be finite, got {}", params.eps)));
        }
        Ok(Self { base, eps: params.eps })
    }

    /// Validated step wrapped in an [`Attack`].
    pub fn attack(base: AttackBase, params: FgsmParams) -> AttackResult<GradientSignAttack> {
        Ok(Attack::new(Self::new(base, params)?))
    }
}

impl PerturbStep for GradientSign {
    fn base(&self) -> &AttackBase {
        &self.base
    }

    fn perturb_step(&self, x: Tensor, y: Tensor) -> AttackResult<Tensor> {
        let (_, _, grad) = self.base.output_loss_grad(&x, &y);
        let eps = self.eps;
        Ok(x.zip_map(&grad.sign(), |x, s| x + eps * s))
    }
}

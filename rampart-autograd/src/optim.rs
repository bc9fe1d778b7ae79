//! Optimizers
//!
//! First-order optimizers that update leaf tensors in place from their
//! accumulated gradients.

use crate::Tensor;

/// Base trait for all optimizers.
pub trait Optimizer {
    /// Perform one optimization step (update parameters).
    fn step(&mut self);

    /// Zero all parameter gradients.
    fn zero_grad(&self);

    /// Get the learning rate.
    fn lr(&self) -> f32;

    /// Set the learning rate.
    fn set_lr(&mut self, lr: f32);
}

/// Adam optimizer, with optional decoupled weight decay.
///
/// # Example
/// ```rust,no_run
/// use rampart_autograd::{Adam, Optimizer, Tensor};
///
/// let w = Tensor::zeros(&[4]).requires_grad_();
/// let mut optimizer = Adam::new(vec![w.clone()], 1e-2);
///
/// w.add_scalar(-1.0).square().sum().backward();
/// optimizer.step();
/// optimizer.zero_grad();
/// ```
pub struct Adam {
    params: Vec<Tensor>,
    lr: f32,
    beta1: f32,
    beta2: f32,
    eps: f32,
    weight_decay: f32,
    t: usize,
    // First moment estimates
    m: Vec<Vec<f32>>,
    // Second moment estimates
    v: Vec<Vec<f32>>,
}

impl Adam {
    /// Create a new Adam optimizer with default hyperparameters.
    pub fn new(params: Vec<Tensor>, lr: f32) -> Self {
        Self::with_params(params, lr, 0.9, 0.999, 1e-8, 0.0)
    }

    /// Create Adam with custom hyperparameters.
    pub fn with_params(
        params: Vec<Tensor>,
        lr: f32,
        beta1: f32,
        beta2: f32,
        eps: f32,
        weight_decay: f32,
    ) -> Self {
        let m: Vec<Vec<f32>> = params.iter().map(|p| vec![0.0; p.numel()]).collect();
        let v: Vec<Vec<f32>> = params.iter().map(|p| vec![0.0; p.numel()]).collect();

        Self {
            params,
            lr,
            beta1,
            beta2,
            eps,
            weight_decay,
            t: 0,
            m,
            v,
        }
    }

    /// Set decoupled weight decay.
    pub fn weight_decay(mut self, wd: f32) -> Self {
        self.weight_decay = wd;
        self
    }

    /// Number of steps taken so far.
    pub fn steps(&self) -> usize {
        self.t
    }
}

impl Optimizer for Adam {
    fn step(&mut self) {
        self.t += 1;
        let t = self.t as f32;
        let bias_correction1 = 1.0 - self.beta1.powf(t);
        let bias_correction2 = 1.0 - self.beta2.powf(t);

        for (i, param) in self.params.iter().enumerate() {
            let Some(grad) = param.grad.borrow().clone() else {
                continue;
            };

            for (m_i, g) in self.m[i].iter_mut().zip(grad.iter()) {
                *m_i = self.beta1 * *m_i + (1.0 - self.beta1) * *g;
            }
            for (v_i, g) in self.v[i].iter_mut().zip(grad.iter()) {
                *v_i = self.beta2 * *v_i + (1.0 - self.beta2) * *g * *g;
            }

            let (m, v) = (&self.m[i], &self.v[i]);
            let (lr, eps, wd) = (self.lr, self.eps, self.weight_decay);
            param.update(|weights| {
                for ((w, m_i), v_i) in weights.iter_mut().zip(m.iter()).zip(v.iter()) {
                    let m_hat = *m_i / bias_correction1;
                    let v_hat = *v_i / bias_correction2;
                    *w -= lr * (m_hat / (v_hat.sqrt() + eps) + wd * *w);
                }
            });
        }
    }

    fn zero_grad(&self) {
        for param in &self.params {
            param.zero_grad();
        }
    }

    fn lr(&self) -> f32 {
        self.lr
    }

    fn set_lr(&mut self, lr: f32) {
        self.lr = lr;
    }
}

impl std::fmt::Debug for Adam {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Adam")
            .field("lr", &self.lr)
            .field("beta1", &self.beta1)
            .field("beta2", &self.beta2)
            .field("eps", &self.eps)
            .field("weight_decay", &self.weight_decay)
            .field("t", &self.t)
            .field("num_params", &self.params.len())
            .finish()
    }
}

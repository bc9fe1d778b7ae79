//! Linear Layer
//!
//! Fully connected layer: y = xW + b

use rand::Rng;
use rampart_autograd::Tensor;

use super::Module;

/// Linear (fully connected) layer.
///
/// Applies a linear transformation: y = xW + b
///
/// # Example
/// ```rust,no_run
/// use rampart::nn::{Linear, Module};
/// use rampart_autograd::Tensor;
/// use rand::SeedableRng;
/// use rand_chacha::ChaCha8Rng;
///
/// let mut rng = ChaCha8Rng::seed_from_u64(0);
/// let linear = Linear::new(784, 256, &mut rng);
/// let x = Tensor::randn(&[32, 784], &mut rng);
/// let y = linear.forward(&x); // [32, 256]
/// ```
#[derive(Clone)]
pub struct Linear {
    /// Weight matrix [in_features, out_features]
    pub weight: Tensor,
    /// Bias vector [out_features] (optional)
    pub bias: Option<Tensor>,
}

impl Linear {
    /// Create a new Linear layer with Xavier initialization.
    pub fn new<R: Rng + ?Sized>(in_features: usize, out_features: usize, rng: &mut R) -> Self {
        let bias = Tensor::zeros(&[out_features]).requires_grad_();
        Self {
            weight: xavier(in_features, out_features, rng),
            bias: Some(bias),
        }
    }

    /// Create a Linear layer without bias.
    pub fn new_no_bias<R: Rng + ?Sized>(
        in_features: usize,
        out_features: usize,
        rng: &mut R,
    ) -> Self {
        Self {
            weight: xavier(in_features, out_features, rng),
            bias: None,
        }
    }

    /// Create a Linear layer from existing weights.
    pub fn from_weights(weight: Tensor, bias: Option<Tensor>) -> Self {
        Self { weight, bias }
    }

    /// Input width.
    pub fn in_features(&self) -> usize {
        self.weight.shape[0]
    }

    /// Output width.
    pub fn out_features(&self) -> usize {
        self.weight.shape[1]
    }

    /// Re-draw the weights in place and zero the bias.
    pub fn reset_parameters<R: Rng + ?Sized>(&self, rng: &mut R) {
        let fresh = xavier(self.in_features(), self.out_features(), rng);
        self.weight.copy_from_slice(&fresh.data());
        if let Some(bias) = &self.bias {
            bias.update(|b| b.fill(0.0));
        }
    }
}

// Xavier/Glorot initialization: scale = sqrt(2 / (in + out))
fn xavier<R: Rng + ?Sized>(in_features: usize, out_features: usize, rng: &mut R) -> Tensor {
    let scale = (2.0 / (in_features + out_features) as f32).sqrt();
    Tensor::randn(&[in_features, out_features], rng)
        .mul_scalar(scale)
        .requires_grad_()
}

impl Module for Linear {
    fn forward(&self, x: &Tensor) -> Tensor {
        // x: [batch, in_features] @ weight: [in_features, out_features]
        let out = x.matmul(&self.weight);
        match &self.bias {
            Some(bias) => out.add_bias(bias),
            None => out,
        }
    }

    fn parameters(&self) -> Vec<Tensor> {
        let mut params = vec![self.weight.clone()];
        if let Some(ref bias) = self.bias {
            params.push(bias.clone());
        }
        params
    }
}

impl std::fmt::Debug for Linear {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Linear")
            .field("in_features", &self.in_features())
            .field("out_features", &self.out_features())
            .field("bias", &self.bias.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    #[test]
    fn test_forward_shape_and_bias() {
        let weight = Tensor::from_vec(vec![1.0, 0.0, 0.0, 1.0, 1.0, 1.0], &[3, 2]);
        let bias = Tensor::from_slice(&[0.5, -0.5]);
        let linear = Linear::from_weights(weight, Some(bias));
        let y = linear.forward(&Tensor::from_vec(vec![1.0, 2.0, 3.0], &[1, 3]));
        assert_eq!(y.shape, vec![1, 2]);
        assert_eq!(y.to_vec(), vec![4.5, 4.5]);
    }

    #[test]
    fn test_seeded_init_is_reproducible() {
        let a = Linear::new(4, 3, &mut ChaCha8Rng::seed_from_u64(1));
        let b = Linear::new(4, 3, &mut ChaCha8Rng::seed_from_u64(1));
        assert_eq!(a.weight.to_vec(), b.weight.to_vec());
        assert_eq!(a.num_parameters(), 15);
        assert_eq!(Linear::new_no_bias(4, 3, &mut ChaCha8Rng::seed_from_u64(1)).num_parameters(), 12);
    }

    #[test]
    fn test_reset_parameters_keeps_shared_storage() {
        let linear = Linear::new(2, 2, &mut ChaCha8Rng::seed_from_u64(1));
        let alias = linear.clone();
        linear.reset_parameters(&mut ChaCha8Rng::seed_from_u64(2));
        assert_eq!(alias.weight.to_vec(), linear.weight.to_vec());
        assert_ne!(
            alias.weight.to_vec(),
            Linear::new(2, 2, &mut ChaCha8Rng::seed_from_u64(1)).weight.to_vec()
        );
    }
}

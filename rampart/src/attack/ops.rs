//! Perturbation geometry: p-norms, ball sampling and projection, and the
//! tanh reparametrisation of box-constrained inputs.

use rand::Rng;
use rampart_autograd::Tensor;
use serde::{Deserialize, Serialize};

use super::{AttackError, AttackResult};

/// Norm defining the allowed perturbation ball.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PNorm {
    /// Max norm
    #[default]
    Inf,
    /// Sum of absolute values
    L1,
    /// Euclidean norm
    L2,
}

impl PNorm {
    /// The exponent, `inf` for the max norm.
    pub fn exponent(self) -> f32 {
        match self {
            PNorm::Inf => f32::INFINITY,
            PNorm::L1 => 1.0,
            PNorm::L2 => 2.0,
        }
    }
}

impl std::fmt::Display for PNorm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PNorm::Inf => f.write_str("inf"),
            PNorm::L1 => f.write_str("1"),
            PNorm::L2 => f.write_str("2"),
        }
    }
}

/// Project every example of `delta` onto the p-ball of radius `eps`.
///
/// Only the max norm has a projection (a per-coordinate clamp); L1 and L2
/// fail with [`AttackError::NotImplemented`].
pub fn project_to_p_ball(delta: &Tensor, eps: f32, p: PNorm) -> AttackResult<Tensor> {
    match p {
        PNorm::Inf => Ok(delta.clamp(-eps, eps)),
        PNorm::L1 | PNorm::L2 => Err(AttackError::NotImplemented(format!(
            "projection onto the L{} ball",
            p
        ))),
    }
}

/// Uniform sample from the unit p-ball of the given shape.
///
/// For L1 and L2, draws `g` with density `exp(-|g|^p)` per coordinate and an
/// exponential `z`, and returns `g / (|g|_p^p + z)^(1/p)`.
pub fn uniform_sample_from_p_ball<R: Rng + ?Sized>(p: PNorm, shape: &[usize], rng: &mut R) -> Tensor {
    let n: usize = shape.iter().product();
    let values: Vec<f32> = match p {
        PNorm::Inf => (0..n).map(|_| rng.gen_range(-1.0f32..1.0)).collect(),
        PNorm::L1 | PNorm::L2 => {
            let exponent = p.exponent();
            let g: Vec<f32> = match p {
                PNorm::L1 => (0..n)
                    .map(|_| {
                        let magnitude = exponential(rng);
                        if rng.gen::<bool>() {
                            magnitude
                        } else {
                            -magnitude
                        }
                    })
                    .collect(),
                _ => Tensor::randn(&[n], rng)
                    .to_vec()
                    .into_iter()
                    .map(|v| v * std::f32::consts::FRAC_1_SQRT_2)
                    .collect(),
            };
            let z = exponential(rng);
            let total: f32 = g.iter().map(|v| v.abs().powf(exponent)).sum::<f32>() + z;
            let scale = total.powf(-1.0 / exponent);
            g.into_iter().map(|v| v * scale).collect()
        }
    };
    Tensor::from_vec(values, shape)
}

fn exponential<R: Rng + ?Sized>(rng: &mut R) -> f32 {
    -(1.0 - rng.gen::<f32>()).max(f32::MIN_POSITIVE).ln()
}

/// Random initial perturbation: a uniform sample from the unit p-ball per
/// example, scaled by `eps`, then shrunk so that `x + delta` lies within
/// `bounds`.
pub fn rand_init_delta<R: Rng + ?Sized>(
    x: &Tensor,
    p: PNorm,
    eps: f32,
    bounds: Option<(f32, f32)>,
    rng: &mut R,
) -> Tensor {
    let rows: Vec<Tensor> = (0..x.batch_size())
        .map(|_| uniform_sample_from_p_ball(p, &x.shape[1..], rng))
        .collect();
    let delta = if rows.is_empty() {
        Tensor::zeros_like(x)
    } else {
        Tensor::stack(&rows).mul_scalar(eps)
    };
    match bounds {
        Some((min, max)) => x.zip_map(&delta, |x, d| (x + d).max(min).min(max) - x),
        None => delta,
    }
}

/// Differentiable map of unconstrained values into `[min, max]`:
/// `(tanh(x) + 1) / 2 * (max - min) + min`.
pub fn scaled_tanh(x: &Tensor, min: f32, max: f32) -> Tensor {
    x.tanh().affine((max - min) / 2.0, (max + min) / 2.0)
}

/// Approximate inverse of [`scaled_tanh`], pulled slightly inside the
/// interval so the result stays finite at the bounds.
pub fn arctanh_clip(x: &Tensor, min: f32, max: f32, shrink: f32) -> Tensor {
    let width = max - min;
    x.map(|v| (((v - min) / width).max(0.0).min(1.0) * 2.0 - 1.0) * shrink)
        .atanh()
}

/// Per-example squared L2 distance, shape `[batch]`.
pub fn l2_distance_sqr(a: &Tensor, b: &Tensor) -> Tensor {
    a.sub(b).square().sum_per_example()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    #[test]
    fn test_linf_projection_is_clamp() {
        let delta = Tensor::from_slice(&[-0.5, 0.05, 0.3]);
        let projected = project_to_p_ball(&delta, 0.1, PNorm::Inf).unwrap();
        assert_eq!(projected.to_vec(), vec![-0.1, 0.05, 0.1]);
    }

    #[test]
    fn test_l1_l2_projection_not_implemented() {
        let delta = Tensor::zeros(&[1, 2]);
        for p in [PNorm::L1, PNorm::L2] {
            assert!(matches!(
                project_to_p_ball(&delta, 1.0, p),
                Err(AttackError::NotImplemented(_))
            ));
        }
    }

    #[test]
    fn test_ball_samples_stay_inside() {
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        for p in [PNorm::Inf, PNorm::L1, PNorm::L2] {
            for _ in 0..50 {
                let s = uniform_sample_from_p_ball(p, &[1, 6], &mut rng);
                assert!(s.norm_per_example(p.exponent())[0] <= 1.0 + 1e-5);
            }
        }
    }

    #[test]
    fn test_rand_init_respects_eps_and_bounds() {
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        let x = Tensor::from_vec(vec![0.0, 0.5, 1.0, 0.98], &[2, 2]);
        let delta = rand_init_delta(&x, PNorm::Inf, 0.1, Some((0.0, 1.0)), &mut rng);
        for (x, d) in x.to_vec().iter().zip(delta.to_vec()) {
            assert!(d.abs() <= 0.1 + 1e-6);
            assert!((0.0..=1.0).contains(&(x + d)));
        }
    }

    #[test]
    fn test_tanh_reparametrisation_round_trip() {
        let x = Tensor::from_slice(&[0.0, 0.25, 0.9]);
        let back = scaled_tanh(&arctanh_clip(&x, 0.0, 1.0, 0.999999), 0.0, 1.0);
        for (a, b) in x.to_vec().iter().zip(back.to_vec()) {
            assert_abs_diff_eq!(*a, b, epsilon = 1e-3);
        }
    }

    #[test]
    fn test_l2_distance_sqr() {
        let a = Tensor::from_vec(vec![1.0, 2.0, 0.0, 0.0], &[2, 2]);
        let b = Tensor::zeros(&[2, 2]);
        assert_eq!(l2_distance_sqr(&a, &b).to_vec(), vec![5.0, 0.0]);
    }
}

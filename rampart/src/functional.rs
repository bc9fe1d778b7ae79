//! Functional Module
//!
//! Stateless losses and label helpers (like PyTorch's F namespace).
//!
//! Labels travel as tensors: hard labels are a `[batch]` tensor of class
//! indices where a negative value marks an ignored example, soft labels are a
//! `[batch, classes]` tensor of probabilities.

use rampart_autograd::Tensor;

/// How per-example losses are combined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Reduction {
    /// Sum over examples
    #[default]
    Sum,
    /// Mean over non-ignored examples
    Mean,
    /// Keep the `[batch]` vector
    None,
}

/// Mean Squared Error loss.
///
/// MSE = mean((pred - target)^2)
pub fn mse_loss(pred: &Tensor, target: &Tensor) -> Tensor {
    assert_eq!(pred.shape, target.shape, "Shapes must match for MSE loss");
    pred.sub(target).square().mean()
}

/// Softmax cross-entropy of `[batch, classes]` logits.
///
/// Hard labels below zero are ignored: they contribute no loss, no gradient
/// and do not count towards the mean.
///
/// # Example
/// ```rust,no_run
/// use rampart::functional::{cross_entropy, label_tensor, Reduction};
/// use rampart_autograd::Tensor;
///
/// let logits = Tensor::from_vec(vec![2.0, 0.0, 0.0, 2.0], &[2, 2]);
/// let loss = cross_entropy(&logits, &label_tensor(&[0, 1]), Reduction::Mean);
/// assert!(loss.item() < 0.2);
/// ```
pub fn cross_entropy(logits: &Tensor, y: &Tensor, reduction: Reduction) -> Tensor {
    if y.ndim() == 2 {
        assert_eq!(y.shape, logits.shape, "Soft labels must match the logits shape");
        let losses = y.mul(&logits.log_softmax_rows()).sum_per_example().mul_scalar(-1.0);
        let count = losses.numel();
        return reduce(losses, count, reduction);
    }
    let labels = hard_labels(y);
    let count = labels.iter().flatten().count();
    reduce(logits.cross_entropy_per_example(&labels), count, reduction)
}

fn reduce(losses: Tensor, count: usize, reduction: Reduction) -> Tensor {
    match reduction {
        Reduction::Sum => losses.sum(),
        Reduction::Mean => losses.sum().mul_scalar(1.0 / count.max(1) as f32),
        Reduction::None => losses,
    }
}

/// Class indices of a hard label tensor; negative entries become `None`.
pub fn hard_labels(y: &Tensor) -> Vec<Option<usize>> {
    y.data()
        .iter()
        .map(|&v| if v < 0.0 { None } else { Some(v.round() as usize) })
        .collect()
}

/// A `[batch]` label tensor from class indices.
pub fn label_tensor(labels: &[usize]) -> Tensor {
    Tensor::from_vec(labels.iter().map(|&c| c as f32).collect(), &[labels.len()])
}

/// Class per example: the index itself for hard labels, the argmax for soft ones.
pub fn label_classes(y: &Tensor) -> Vec<Option<usize>> {
    if y.ndim() == 2 {
        y.argmax_rows().into_iter().map(Some).collect()
    } else {
        hard_labels(y)
    }
}

/// Softmax of `logits / temperature` over the last dimension.
pub fn softmax(logits: &Tensor, temperature: f32) -> Tensor {
    logits.softmax_rows(temperature)
}

/// One-hot encoding.
pub fn one_hot(indices: &[usize], num_classes: usize) -> Tensor {
    let batch_size = indices.len();
    let mut data = vec![0.0f32; batch_size * num_classes];

    for (i, &idx) in indices.iter().enumerate() {
        data[i * num_classes + idx] = 1.0;
    }

    Tensor::from_vec(data, &[batch_size, num_classes])
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_cross_entropy_reductions_skip_ignored() {
        let logits = Tensor::from_vec(vec![0.0, 0.0, 5.0, 0.0, 0.0, 0.0], &[3, 2]);
        let y = Tensor::from_slice(&[0.0, -1.0, 1.0]);
        let per = cross_entropy(&logits, &y, Reduction::None).to_vec();
        assert_eq!(per[1], 0.0);
        let sum = cross_entropy(&logits, &y, Reduction::Sum).item();
        let mean = cross_entropy(&logits, &y, Reduction::Mean).item();
        assert_abs_diff_eq!(sum, 2.0 * 2.0f32.ln(), epsilon = 1e-5);
        assert_abs_diff_eq!(mean, 2.0f32.ln(), epsilon = 1e-5);
    }

    #[test]
    fn test_soft_cross_entropy_matches_hard_for_one_hot() {
        let logits = Tensor::from_vec(vec![1.0, 2.0, 0.5, -1.0, 0.0, 3.0], &[2, 3]);
        let hard = cross_entropy(&logits, &label_tensor(&[1, 2]), Reduction::Sum).item();
        let soft = cross_entropy(&logits, &one_hot(&[1, 2], 3), Reduction::Sum).item();
        assert_abs_diff_eq!(hard, soft, epsilon = 1e-4);
    }

    #[test]
    fn test_label_classes() {
        let soft = Tensor::from_vec(vec![0.1, 0.9, 0.7, 0.3], &[2, 2]);
        assert_eq!(label_classes(&soft), vec![Some(1), Some(0)]);
        assert_eq!(label_classes(&Tensor::from_slice(&[2.0, -1.0])), vec![Some(2), None]);
    }

    #[test]
    fn test_mse_loss() {
        let a = Tensor::from_slice(&[1.0, 3.0]);
        let b = Tensor::from_slice(&[0.0, 1.0]);
        assert_abs_diff_eq!(mse_loss(&a, &b).item(), 2.5);
    }
}

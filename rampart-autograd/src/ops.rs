//! Tensor Operations
//!
//! Differentiable ops record a backward node; the remaining helpers work on
//! raw values and always return detached leaves.

use std::rc::Rc;

use crate::{AutogradNode, Tensor};

// ============================================================================
// BINARY OPERATION NODES
// ============================================================================

/// Addition backward node.
pub struct AddNode {
    /// Left operand
    pub a: Tensor,
    /// Right operand
    pub b: Tensor,
}

impl AutogradNode for AddNode {
    fn inputs(&self) -> Vec<Tensor> {
        vec![self.a.clone(), self.b.clone()]
    }

    fn backward(&self, grad: &[f32]) -> Vec<Option<Vec<f32>>> {
        vec![Some(grad.to_vec()), Some(grad.to_vec())]
    }
}

/// Subtraction backward node.
pub struct SubNode {
    /// Minuend
    pub a: Tensor,
    /// Subtrahend
    pub b: Tensor,
}

impl AutogradNode for SubNode {
    fn inputs(&self) -> Vec<Tensor> {
        vec![self.a.clone(), self.b.clone()]
    }

    fn backward(&self, grad: &[f32]) -> Vec<Option<Vec<f32>>> {
        vec![
            Some(grad.to_vec()),
            Some(grad.iter().map(|g| -g).collect()),
        ]
    }
}

/// Elementwise multiplication backward node.
pub struct MulNode {
    /// Left operand
    pub a: Tensor,
    /// Right operand
    pub b: Tensor,
}

impl AutogradNode for MulNode {
    fn inputs(&self) -> Vec<Tensor> {
        vec![self.a.clone(), self.b.clone()]
    }

    fn backward(&self, grad: &[f32]) -> Vec<Option<Vec<f32>>> {
        let a = self.a.data();
        let b = self.b.data();
        let grad_a = grad.iter().zip(b.iter()).map(|(g, b)| g * b).collect();
        let grad_b = grad.iter().zip(a.iter()).map(|(g, a)| g * a).collect();
        vec![Some(grad_a), Some(grad_b)]
    }
}

/// Affine-by-constant backward node (`x * factor + offset`).
pub struct ScaleNode {
    /// Input tensor
    pub input: Tensor,
    /// Multiplicative factor
    pub factor: f32,
}

impl AutogradNode for ScaleNode {
    fn inputs(&self) -> Vec<Tensor> {
        vec![self.input.clone()]
    }

    fn backward(&self, grad: &[f32]) -> Vec<Option<Vec<f32>>> {
        vec![Some(grad.iter().map(|g| g * self.factor).collect())]
    }
}

/// Matrix multiplication backward node.
pub struct MatMulNode {
    /// `[m, k]` operand
    pub a: Tensor,
    /// `[k, n]` operand
    pub b: Tensor,
}

impl AutogradNode for MatMulNode {
    fn inputs(&self) -> Vec<Tensor> {
        vec![self.a.clone(), self.b.clone()]
    }

    fn backward(&self, grad: &[f32]) -> Vec<Option<Vec<f32>>> {
        let (m, k) = (self.a.shape[0], self.a.shape[1]);
        let n = self.b.shape[1];
        let a = self.a.data();
        let b = self.b.data();

        // grad_a = grad @ b^T
        let mut grad_a = vec![0.0; m * k];
        for i in 0..m {
            for j in 0..n {
                let g = grad[i * n + j];
                if g == 0.0 {
                    continue;
                }
                for p in 0..k {
                    grad_a[i * k + p] += g * b[p * n + j];
                }
            }
        }

        // grad_b = a^T @ grad
        let mut grad_b = vec![0.0; k * n];
        for i in 0..m {
            for p in 0..k {
                let a_ip = a[i * k + p];
                for j in 0..n {
                    grad_b[p * n + j] += a_ip * grad[i * n + j];
                }
            }
        }
        vec![Some(grad_a), Some(grad_b)]
    }
}

/// Row-broadcast bias addition backward node.
pub struct AddBiasNode {
    /// `[..., n]` input
    pub input: Tensor,
    /// `[n]` bias
    pub bias: Tensor,
}

impl AutogradNode for AddBiasNode {
    fn inputs(&self) -> Vec<Tensor> {
        vec![self.input.clone(), self.bias.clone()]
    }

    fn backward(&self, grad: &[f32]) -> Vec<Option<Vec<f32>>> {
        let n = self.bias.numel();
        let mut grad_bias = vec![0.0; n];
        for row in grad.chunks(n) {
            for (gb, g) in grad_bias.iter_mut().zip(row) {
                *gb += g;
            }
        }
        vec![Some(grad.to_vec()), Some(grad_bias)]
    }
}

// ============================================================================
// UNARY OPERATION NODES
// ============================================================================

/// ReLU backward node.
pub struct ReluNode {
    /// Input tensor
    pub input: Tensor,
}

impl AutogradNode for ReluNode {
    fn inputs(&self) -> Vec<Tensor> {
        vec![self.input.clone()]
    }

    fn backward(&self, grad: &[f32]) -> Vec<Option<Vec<f32>>> {
        let x = self.input.data();
        let grad_in = grad
            .iter()
            .zip(x.iter())
            .map(|(g, x)| if *x > 0.0 { *g } else { 0.0 })
            .collect();
        vec![Some(grad_in)]
    }
}

/// Tanh backward node.
pub struct TanhNode {
    /// Input tensor
    pub input: Tensor,
    /// Forward output, reused by the derivative
    pub output: Vec<f32>,
}

impl AutogradNode for TanhNode {
    fn inputs(&self) -> Vec<Tensor> {
        vec![self.input.clone()]
    }

    fn backward(&self, grad: &[f32]) -> Vec<Option<Vec<f32>>> {
        let grad_in = grad
            .iter()
            .zip(&self.output)
            .map(|(g, y)| g * (1.0 - y * y))
            .collect();
        vec![Some(grad_in)]
    }
}

/// Sigmoid backward node.
pub struct SigmoidNode {
    /// Input tensor
    pub input: Tensor,
    /// Forward output, reused by the derivative
    pub output: Vec<f32>,
}

impl AutogradNode for SigmoidNode {
    fn inputs(&self) -> Vec<Tensor> {
        vec![self.input.clone()]
    }

    fn backward(&self, grad: &[f32]) -> Vec<Option<Vec<f32>>> {
        let grad_in = grad
            .iter()
            .zip(&self.output)
            .map(|(g, y)| g * y * (1.0 - y))
            .collect();
        vec![Some(grad_in)]
    }
}

/// Shape change backward node.
pub struct ReshapeNode {
    /// Input tensor
    pub input: Tensor,
}

impl AutogradNode for ReshapeNode {
    fn inputs(&self) -> Vec<Tensor> {
        vec![self.input.clone()]
    }

    fn backward(&self, grad: &[f32]) -> Vec<Option<Vec<f32>>> {
        vec![Some(grad.to_vec())]
    }
}

// ============================================================================
// REDUCTION NODES
// ============================================================================

/// Full sum backward node.
pub struct SumNode {
    /// Input tensor
    pub input: Tensor,
}

impl AutogradNode for SumNode {
    fn inputs(&self) -> Vec<Tensor> {
        vec![self.input.clone()]
    }

    fn backward(&self, grad: &[f32]) -> Vec<Option<Vec<f32>>> {
        vec![Some(vec![grad[0]; self.input.numel()])]
    }
}

/// Per-example sum (over every non-leading dimension) backward node.
pub struct SumPerExampleNode {
    /// Input tensor
    pub input: Tensor,
}

impl AutogradNode for SumPerExampleNode {
    fn inputs(&self) -> Vec<Tensor> {
        vec![self.input.clone()]
    }

    fn backward(&self, grad: &[f32]) -> Vec<Option<Vec<f32>>> {
        let row = self.input.row_len();
        let grad_in = grad
            .iter()
            .flat_map(|g| std::iter::repeat(*g).take(row))
            .collect();
        vec![Some(grad_in)]
    }
}

// ============================================================================
// FUSED LOSS NODES
// ============================================================================

/// Per-example softmax cross-entropy backward node.
///
/// Backward: softmax(logits) - one_hot(label), zero for ignored rows.
pub struct CrossEntropyNode {
    /// `[batch, classes]` logits
    pub logits: Tensor,
    /// Softmax of the logits
    pub probs: Vec<f32>,
    /// Class per row, `None` for ignored rows
    pub labels: Vec<Option<usize>>,
}

impl AutogradNode for CrossEntropyNode {
    fn inputs(&self) -> Vec<Tensor> {
        vec![self.logits.clone()]
    }

    fn backward(&self, grad: &[f32]) -> Vec<Option<Vec<f32>>> {
        let classes = self.logits.shape[1];
        let mut grad_in = vec![0.0; self.probs.len()];
        for (i, label) in self.labels.iter().enumerate() {
            let Some(label) = label else { continue };
            let row = &self.probs[i * classes..(i + 1) * classes];
            for (c, p) in row.iter().enumerate() {
                let target = if c == *label { 1.0 } else { 0.0 };
                grad_in[i * classes + c] = grad[i] * (p - target);
            }
        }
        vec![Some(grad_in)]
    }
}

/// Row-wise log-softmax backward node.
///
/// Backward: g - softmax * sum(g) per row.
pub struct LogSoftmaxNode {
    /// `[batch, classes]` input
    pub input: Tensor,
    /// Softmax of the input
    pub probs: Vec<f32>,
}

impl AutogradNode for LogSoftmaxNode {
    fn inputs(&self) -> Vec<Tensor> {
        vec![self.input.clone()]
    }

    fn backward(&self, grad: &[f32]) -> Vec<Option<Vec<f32>>> {
        let classes = self.input.shape[1].max(1);
        let mut grad_in = Vec::with_capacity(grad.len());
        for (g, p) in grad.chunks(classes).zip(self.probs.chunks(classes)) {
            let total: f32 = g.iter().sum();
            grad_in.extend(g.iter().zip(p).map(|(g, p)| g - p * total));
        }
        vec![Some(grad_in)]
    }
}

/// Per-example classification margin backward node.
///
/// The margin compares the logit of the labelled class with the largest
/// competing logit; rows whose margin is clipped at zero get no gradient.
pub struct MarginNode {
    /// `[batch, classes]` logits
    pub logits: Tensor,
    /// Labelled class per row
    pub labels: Vec<usize>,
    /// Index of the strongest competing class per row
    pub others: Vec<usize>,
    /// Whether the hinge was active per row
    pub active: Vec<bool>,
    /// `+1` when the labelled logit enters positively, `-1` otherwise
    pub sign: f32,
}

impl AutogradNode for MarginNode {
    fn inputs(&self) -> Vec<Tensor> {
        vec![self.logits.clone()]
    }

    fn backward(&self, grad: &[f32]) -> Vec<Option<Vec<f32>>> {
        let classes = self.logits.shape[1];
        let mut grad_in = vec![0.0; self.logits.numel()];
        for i in 0..self.labels.len() {
            if !self.active[i] {
                continue;
            }
            grad_in[i * classes + self.labels[i]] += self.sign * grad[i];
            grad_in[i * classes + self.others[i]] -= self.sign * grad[i];
        }
        vec![Some(grad_in)]
    }
}

// ============================================================================
// DIFFERENTIABLE OPS
// ============================================================================

impl Tensor {
    /// Elementwise addition.
    pub fn add(&self, other: &Tensor) -> Tensor {
        assert_eq!(self.shape, other.shape, "Shapes must match for add");
        let data = zip_values(self, other, |a, b| a + b);
        Tensor::with_creator(data, &self.shape, &[self, other], || {
            Rc::new(AddNode {
                a: self.clone(),
                b: other.clone(),
            })
        })
    }

    /// Elementwise subtraction.
    pub fn sub(&self, other: &Tensor) -> Tensor {
        assert_eq!(self.shape, other.shape, "Shapes must match for sub");
        let data = zip_values(self, other, |a, b| a - b);
        Tensor::with_creator(data, &self.shape, &[self, other], || {
            Rc::new(SubNode {
                a: self.clone(),
                b: other.clone(),
            })
        })
    }

    /// Elementwise multiplication.
    pub fn mul(&self, other: &Tensor) -> Tensor {
        assert_eq!(self.shape, other.shape, "Shapes must match for mul");
        let data = zip_values(self, other, |a, b| a * b);
        Tensor::with_creator(data, &self.shape, &[self, other], || {
            Rc::new(MulNode {
                a: self.clone(),
                b: other.clone(),
            })
        })
    }

    /// Elementwise square.
    pub fn square(&self) -> Tensor {
        self.mul(self)
    }

    /// Multiply by a constant.
    pub fn mul_scalar(&self, factor: f32) -> Tensor {
        self.affine(factor, 0.0)
    }

    /// Add a constant.
    pub fn add_scalar(&self, offset: f32) -> Tensor {
        self.affine(1.0, offset)
    }

    /// `self * factor + offset`.
    pub fn affine(&self, factor: f32, offset: f32) -> Tensor {
        let data = self.data().iter().map(|x| x * factor + offset).collect();
        Tensor::with_creator(data, &self.shape, &[self], || {
            Rc::new(ScaleNode {
                input: self.clone(),
                factor,
            })
        })
    }

    /// Matrix multiplication of `[m, k]` by `[k, n]`.
    pub fn matmul(&self, other: &Tensor) -> Tensor {
        assert_eq!(self.ndim(), 2, "matmul expects a 2D left operand");
        assert_eq!(other.ndim(), 2, "matmul expects a 2D right operand");
        let (m, k) = (self.shape[0], self.shape[1]);
        assert_eq!(other.shape[0], k, "Inner dimensions must match for matmul");
        let n = other.shape[1];

        let a = self.data();
        let b = other.data();
        let mut out = vec![0.0; m * n];
        for i in 0..m {
            for p in 0..k {
                let a_ip = a[i * k + p];
                if a_ip == 0.0 {
                    continue;
                }
                for j in 0..n {
                    out[i * n + j] += a_ip * b[p * n + j];
                }
            }
        }
        drop((a, b));

        Tensor::with_creator(out, &[m, n], &[self, other], || {
            Rc::new(MatMulNode {
                a: self.clone(),
                b: other.clone(),
            })
        })
    }

    /// Add a `[n]` bias to every row of a `[..., n]` tensor.
    pub fn add_bias(&self, bias: &Tensor) -> Tensor {
        let n = bias.numel();
        assert_eq!(
            self.shape.last().copied(),
            Some(n),
            "Bias must match the last dimension"
        );
        let b = bias.to_vec();
        let data = self
            .data()
            .chunks(n)
            .flat_map(|row| row.iter().zip(b.iter()).map(|(x, b)| x + b))
            .collect();
        Tensor::with_creator(data, &self.shape, &[self, bias], || {
            Rc::new(AddBiasNode {
                input: self.clone(),
                bias: bias.clone(),
            })
        })
    }

    /// ReLU activation.
    pub fn relu(&self) -> Tensor {
        let data = self.data().iter().map(|x| x.max(0.0)).collect();
        Tensor::with_creator(data, &self.shape, &[self], || {
            Rc::new(ReluNode {
                input: self.clone(),
            })
        })
    }

    /// Hyperbolic tangent.
    pub fn tanh(&self) -> Tensor {
        let output: Vec<f32> = self.data().iter().map(|x| x.tanh()).collect();
        let saved = output.clone();
        Tensor::with_creator(output, &self.shape, &[self], || {
            Rc::new(TanhNode {
                input: self.clone(),
                output: saved,
            })
        })
    }

    /// Logistic sigmoid.
    pub fn sigmoid(&self) -> Tensor {
        let output: Vec<f32> = self
            .data()
            .iter()
            .map(|x| 1.0 / (1.0 + (-x).exp()))
            .collect();
        let saved = output.clone();
        Tensor::with_creator(output, &self.shape, &[self], || {
            Rc::new(SigmoidNode {
                input: self.clone(),
                output: saved,
            })
        })
    }

    /// View the same values under a new shape.
    pub fn reshape(&self, shape: &[usize]) -> Tensor {
        let size: usize = shape.iter().product();
        assert_eq!(size, self.numel(), "Reshape must preserve the element count");
        Tensor::with_creator(self.to_vec(), shape, &[self], || {
            Rc::new(ReshapeNode {
                input: self.clone(),
            })
        })
    }

    /// Flatten every non-leading dimension: `[b, ...] -> [b, rest]`.
    pub fn flatten_batch(&self) -> Tensor {
        self.reshape(&[self.batch_size(), self.row_len()])
    }

    /// Sum of all elements, shape `[1]`.
    pub fn sum(&self) -> Tensor {
        let total = self.data().iter().sum();
        Tensor::with_creator(vec![total], &[1], &[self], || {
            Rc::new(SumNode {
                input: self.clone(),
            })
        })
    }

    /// Mean of all elements, shape `[1]`.
    pub fn mean(&self) -> Tensor {
        let n = self.numel().max(1) as f32;
        self.sum().mul_scalar(1.0 / n)
    }

    /// Sum over every non-leading dimension, shape `[batch]`.
    pub fn sum_per_example(&self) -> Tensor {
        let row = self.row_len().max(1);
        let data = self.data().chunks(row).map(|r| r.iter().sum()).collect();
        Tensor::with_creator(data, &[self.batch_size()], &[self], || {
            Rc::new(SumPerExampleNode {
                input: self.clone(),
            })
        })
    }

    /// Per-example softmax cross-entropy of `[batch, classes]` logits, shape `[batch]`.
    ///
    /// Rows labelled `None` contribute zero loss and zero gradient.
    pub fn cross_entropy_per_example(&self, labels: &[Option<usize>]) -> Tensor {
        assert_eq!(self.ndim(), 2, "cross_entropy expects [batch, classes] logits");
        let (batch, classes) = (self.shape[0], self.shape[1]);
        assert_eq!(labels.len(), batch, "One label per row is required");

        let probs = softmax_values(&self.data(), classes, 1.0);
        let losses = labels
            .iter()
            .enumerate()
            .map(|(i, label)| match label {
                Some(c) => {
                    assert!(*c < classes, "Label {} out of range for {} classes", c, classes);
                    -probs[i * classes + c].max(1e-12).ln()
                }
                None => 0.0,
            })
            .collect();
        Tensor::with_creator(losses, &[batch], &[self], || {
            Rc::new(CrossEntropyNode {
                logits: self.clone(),
                probs,
                labels: labels.to_vec(),
            })
        })
    }

    /// Row-wise log-softmax of a `[batch, classes]` tensor.
    pub fn log_softmax_rows(&self) -> Tensor {
        assert_eq!(self.ndim(), 2, "log_softmax_rows expects a 2D tensor");
        let classes = self.shape[1];
        let probs = softmax_values(&self.data(), classes, 1.0);
        let data: Vec<f32> = probs.iter().map(|p| p.max(1e-30).ln()).collect();
        Tensor::with_creator(data, &self.shape, &[self], || {
            Rc::new(LogSoftmaxNode {
                input: self.clone(),
                probs,
            })
        })
    }

    /// Per-example hinge on the classification margin, shape `[batch]`.
    ///
    /// Untargeted: `max(z[label] - max_{j != label} z[j] + confidence, 0)`.
    /// Targeted: `max(max_{j != label} z[j] - z[label] + confidence, 0)`.
    pub fn margin(&self, labels: &[usize], confidence: f32, targeted: bool) -> Tensor {
        assert_eq!(self.ndim(), 2, "margin expects [batch, classes] logits");
        let (batch, classes) = (self.shape[0], self.shape[1]);
        assert_eq!(labels.len(), batch, "One label per row is required");
        assert!(classes > 1, "margin needs at least two classes");

        let sign = if targeted { -1.0 } else { 1.0 };
        let mut others = Vec::with_capacity(batch);
        let mut active = Vec::with_capacity(batch);
        let mut values = Vec::with_capacity(batch);
        {
            let z = self.data();
            for (i, &label) in labels.iter().enumerate() {
                let row = &z[i * classes..(i + 1) * classes];
                let (other, other_logit) = row
                    .iter()
                    .enumerate()
                    .filter(|(j, _)| *j != label)
                    .fold((0, f32::NEG_INFINITY), |best, (j, v)| {
                        if *v > best.1 {
                            (j, *v)
                        } else {
                            best
                        }
                    });
                let value = sign * (row[label] - other_logit) + confidence;
                others.push(other);
                active.push(value > 0.0);
                values.push(value.max(0.0));
            }
        }
        Tensor::with_creator(values, &[batch], &[self], || {
            Rc::new(MarginNode {
                logits: self.clone(),
                labels: labels.to_vec(),
                others,
                active,
                sign,
            })
        })
    }

    // ========================================================================
    // NON-DIFFERENTIABLE HELPERS
    // ========================================================================

    /// Apply `f` elementwise, producing a detached tensor.
    pub fn map(&self, f: impl Fn(f32) -> f32) -> Tensor {
        Tensor::from_vec(self.data().iter().map(|x| f(*x)).collect(), &self.shape)
    }

    /// Combine two equally shaped tensors elementwise, producing a detached tensor.
    pub fn zip_map(&self, other: &Tensor, f: impl Fn(f32, f32) -> f32) -> Tensor {
        assert_eq!(self.shape, other.shape, "Shapes must match");
        Tensor::from_vec(zip_values(self, other, f), &self.shape)
    }

    /// Elementwise sign (`0` stays `0`).
    pub fn sign(&self) -> Tensor {
        self.map(|x| {
            if x > 0.0 {
                1.0
            } else if x < 0.0 {
                -1.0
            } else {
                0.0
            }
        })
    }

    /// Clamp every element into `[min, max]`.
    pub fn clamp(&self, min: f32, max: f32) -> Tensor {
        self.map(|x| x.max(min).min(max))
    }

    /// Elementwise inverse hyperbolic tangent.
    pub fn atanh(&self) -> Tensor {
        self.map(f32::atanh)
    }

    /// Row-wise softmax of a `[batch, classes]` tensor.
    pub fn softmax_rows(&self, temperature: f32) -> Tensor {
        assert_eq!(self.ndim(), 2, "softmax_rows expects a 2D tensor");
        Tensor::from_vec(
            softmax_values(&self.data(), self.shape[1], temperature),
            &self.shape,
        )
    }

    /// Index of the maximum of every leading-dimension row.
    pub fn argmax_rows(&self) -> Vec<usize> {
        let row = self.row_len().max(1);
        self.data()
            .chunks(row)
            .map(|r| {
                r.iter()
                    .enumerate()
                    .fold((0, f32::NEG_INFINITY), |best, (j, v)| {
                        if *v > best.1 {
                            (j, *v)
                        } else {
                            best
                        }
                    })
                    .0
            })
            .collect()
    }

    /// L-p norm of every leading-dimension row (`p = inf` gives the max norm).
    pub fn norm_per_example(&self, p: f32) -> Vec<f32> {
        let row = self.row_len().max(1);
        self.data()
            .chunks(row)
            .map(|r| {
                if p.is_infinite() {
                    r.iter().fold(0.0f32, |m, x| m.max(x.abs()))
                } else if p == 1.0 {
                    r.iter().map(|x| x.abs()).sum()
                } else {
                    r.iter().map(|x| x.abs().powf(p)).sum::<f32>().powf(1.0 / p)
                }
            })
            .collect()
    }

    /// Multiply every leading-dimension row by its own factor.
    pub fn scale_rows(&self, factors: &[f32]) -> Tensor {
        let row = self.row_len().max(1);
        assert_eq!(factors.len(), self.numel() / row, "One factor per row is required");
        let data = self
            .data()
            .chunks(row)
            .zip(factors)
            .flat_map(|(r, f)| r.iter().map(move |x| x * f))
            .collect();
        Tensor::from_vec(data, &self.shape)
    }

    /// Gather leading-dimension rows into a new detached tensor.
    pub fn index_select(&self, indices: &[usize]) -> Tensor {
        let row = self.row_len();
        let src = self.data();
        let mut data = Vec::with_capacity(indices.len() * row);
        for &i in indices {
            data.extend_from_slice(&src[i * row..(i + 1) * row]);
        }
        let mut shape = self.shape.clone();
        if shape.is_empty() {
            shape.push(indices.len());
        } else {
            shape[0] = indices.len();
        }
        Tensor::from_vec(data, &shape)
    }

    /// Write the rows of `src` into rows `indices` of this tensor, in place.
    pub fn scatter_rows(&self, indices: &[usize], src: &Tensor) {
        let row = self.row_len();
        assert_eq!(src.row_len(), row, "Row sizes must match for scatter");
        assert_eq!(src.batch_size(), indices.len(), "One index per source row is required");
        let values = src.data();
        let mut dst = self.data.borrow_mut();
        for (k, &i) in indices.iter().enumerate() {
            dst[i * row..(i + 1) * row].copy_from_slice(&values[k * row..(k + 1) * row]);
        }
    }
}

fn zip_values(a: &Tensor, b: &Tensor, f: impl Fn(f32, f32) -> f32) -> Vec<f32> {
    let a = a.data();
    let b = b.data();
    a.iter().zip(b.iter()).map(|(x, y)| f(*x, *y)).collect()
}

fn softmax_values(logits: &[f32], classes: usize, temperature: f32) -> Vec<f32> {
    let mut out = Vec::with_capacity(logits.len());
    for row in logits.chunks(classes.max(1)) {
        let max = row.iter().fold(f32::NEG_INFINITY, |m, x| m.max(*x));
        let exps: Vec<f32> = row.iter().map(|x| ((x - max) / temperature).exp()).collect();
        let total: f32 = exps.iter().sum();
        out.extend(exps.iter().map(|e| e / total));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::no_grad;
    use approx::assert_abs_diff_eq;

    fn numeric_grad(f: impl Fn(&Tensor) -> f32, x: &Tensor) -> Vec<f32> {
        let eps = 1e-3;
        let base = x.to_vec();
        (0..base.len())
            .map(|i| {
                let mut plus = base.clone();
                plus[i] += eps;
                let mut minus = base.clone();
                minus[i] -= eps;
                let fp = f(&Tensor::from_vec(plus, &x.shape));
                let fm = f(&Tensor::from_vec(minus, &x.shape));
                (fp - fm) / (2.0 * eps)
            })
            .collect()
    }

    #[test]
    fn test_matmul_bias_relu_gradients() {
        let w = Tensor::from_vec(vec![0.3, -0.2, 0.5, 0.1, -0.4, 0.7], &[3, 2]).requires_grad_();
        let b = Tensor::from_slice(&[0.05, -0.1]).requires_grad_();
        let x = Tensor::from_vec(vec![1.0, 2.0, -1.0, 0.5, 0.0, 1.5], &[2, 3]);

        let loss = x.matmul(&w).add_bias(&b).relu().sum();
        loss.backward();

        let analytic = w.grad().unwrap().to_vec();
        let numeric = numeric_grad(|w| x.matmul(w).add_bias(&b).relu().sum().item(), &w);
        for (a, n) in analytic.iter().zip(&numeric) {
            assert_abs_diff_eq!(a, n, epsilon = 1e-2);
        }
        assert_eq!(b.grad().unwrap().shape, vec![2]);
    }

    #[test]
    fn test_cross_entropy_matches_numeric_gradient() {
        let logits = Tensor::from_vec(vec![1.0, 2.0, 0.5, -1.0, 0.0, 3.0], &[2, 3]).requires_grad_();
        let labels = [Some(1), Some(2)];
        logits.cross_entropy_per_example(&labels).sum().backward();
        let analytic = logits.grad().unwrap().to_vec();
        let numeric = numeric_grad(|z| z.cross_entropy_per_example(&labels).sum().item(), &logits);
        for (a, n) in analytic.iter().zip(&numeric) {
            assert_abs_diff_eq!(a, n, epsilon = 1e-2);
        }
    }

    #[test]
    fn test_cross_entropy_ignores_unlabelled_rows() {
        let logits = Tensor::from_vec(vec![1.0, 2.0, 0.5, -1.0], &[2, 2]).requires_grad_();
        let loss = logits.cross_entropy_per_example(&[None, Some(0)]);
        assert_eq!(loss.to_vec()[0], 0.0);
        loss.sum().backward();
        assert_eq!(&logits.grad().unwrap().to_vec()[..2], &[0.0, 0.0]);
    }

    #[test]
    fn test_log_softmax_matches_numeric_gradient() {
        let z = Tensor::from_vec(vec![0.5, -1.0, 2.0, 1.0, 1.0, 0.0], &[2, 3]).requires_grad_();
        let w = Tensor::from_vec(vec![0.2, 0.3, 0.5, 1.0, 0.0, 0.0], &[2, 3]);
        z.log_softmax_rows().mul(&w).sum().backward();
        let numeric = numeric_grad(|z| z.log_softmax_rows().mul(&w).sum().item(), &z);
        for (a, n) in z.grad().unwrap().to_vec().iter().zip(&numeric) {
            assert_abs_diff_eq!(a, n, epsilon = 1e-2);
        }
        let total: f32 = z.log_softmax_rows().to_vec()[..3].iter().map(|v| v.exp()).sum();
        assert_abs_diff_eq!(total, 1.0, epsilon = 1e-5);
    }

    #[test]
    fn test_margin_untargeted_and_targeted() {
        let z = Tensor::from_vec(vec![3.0, 1.0, 2.0], &[1, 3]);
        assert_abs_diff_eq!(z.margin(&[0], 0.0, false).item(), 1.0);
        assert_abs_diff_eq!(z.margin(&[0], 0.0, true).item(), 0.0);
        assert_abs_diff_eq!(z.margin(&[1], 0.5, true).item(), 2.5);
    }

    #[test]
    fn test_margin_gradient_flows_to_label_and_runner_up() {
        let z = Tensor::from_vec(vec![3.0, 1.0, 2.0], &[1, 3]).requires_grad_();
        z.margin(&[0], 0.0, false).sum().backward();
        assert_eq!(z.grad().unwrap().to_vec(), vec![1.0, 0.0, -1.0]);
    }

    #[test]
    fn test_square_accumulates_both_paths() {
        let x = Tensor::from_slice(&[3.0]).requires_grad_();
        x.square().sum().backward();
        assert_abs_diff_eq!(x.grad().unwrap().item(), 6.0);
    }

    #[test]
    fn test_tanh_chain_gradient() {
        let x = Tensor::from_slice(&[0.2, -0.7]).requires_grad_();
        x.tanh().affine(0.5, 0.5).sum_per_example().sum().backward();
        let numeric = numeric_grad(|x| x.tanh().affine(0.5, 0.5).sum().item(), &x);
        for (a, n) in x.grad().unwrap().to_vec().iter().zip(&numeric) {
            assert_abs_diff_eq!(a, n, epsilon = 1e-3);
        }
    }

    #[test]
    fn test_no_grad_records_nothing() {
        let w = Tensor::ones(&[2, 2]).requires_grad_();
        let y = no_grad(|| w.matmul(&w));
        assert!(!y.requires_grad);
        assert!(y.creator.is_none());
    }

    #[test]
    fn test_zero_grad_graph_clears_leaves() {
        let w = Tensor::ones(&[2]).requires_grad_();
        let loss = w.mul_scalar(2.0).sum();
        loss.backward();
        assert!(w.grad().is_some());
        loss.zero_grad_graph();
        assert!(w.grad().is_none());
    }

    #[test]
    fn test_gradients_accumulate_across_backward_calls() {
        let w = Tensor::ones(&[2]).requires_grad_();
        w.sum().backward();
        w.sum().backward();
        assert_eq!(w.grad().unwrap().to_vec(), vec![2.0, 2.0]);
    }

    #[test]
    fn test_index_select_and_scatter_rows() {
        let x = Tensor::from_vec((0..6).map(|v| v as f32).collect(), &[3, 2]);
        let picked = x.index_select(&[2, 0]);
        assert_eq!(picked.to_vec(), vec![4.0, 5.0, 0.0, 1.0]);
        let target = Tensor::zeros(&[3, 2]);
        target.scatter_rows(&[2, 0], &picked);
        assert_eq!(target.to_vec(), vec![0.0, 1.0, 0.0, 0.0, 4.0, 5.0]);
    }

    #[test]
    fn test_norm_per_example() {
        let x = Tensor::from_vec(vec![3.0, -4.0, 1.0, 1.0], &[2, 2]);
        assert_eq!(x.norm_per_example(2.0), vec![5.0, 2.0f32.sqrt()]);
        assert_eq!(x.norm_per_example(1.0), vec![7.0, 2.0]);
        assert_eq!(x.norm_per_example(f32::INFINITY), vec![4.0, 1.0]);
    }
}

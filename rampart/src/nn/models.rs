//! Model Helpers
//!
//! Parameter counting and classifier construction over the module tree.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rampart_autograd::Tensor;

use super::{Flatten, Layer, Linear, Module, Node, NnResult, ReLU, Table};

/// Number of trainable and non-trainable parameter scalars.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ParameterCount {
    /// Scalars in tensors that require gradients
    pub trainable: usize,
    /// Scalars in frozen tensors
    pub non_trainable: usize,
}

/// Count parameters, split by whether they require gradients.
pub fn parameter_count<M: Module + ?Sized>(module: &M) -> ParameterCount {
    module
        .parameters()
        .iter()
        .fold(ParameterCount::default(), |mut count, p| {
            if p.requires_grad {
                count.trainable += p.numel();
            } else {
                count.non_trainable += p.numel();
            }
            count
        })
}

/// A classifier: a `Seq` of a `backbone` followed by a `head` producing logits.
///
/// Submodule paths are rooted at the sequence, e.g. `"backbone.fc0"`.
#[derive(Clone)]
pub struct ClassificationModel {
    root: Node,
}

impl ClassificationModel {
    /// Compose a backbone and a head.
    pub fn new(backbone: impl Into<Node>, head: impl Into<Node>) -> Self {
        Self {
            root: Node::Seq(Table::new().add("backbone", backbone).add("head", head)),
        }
    }

    /// The whole model as a module tree.
    pub fn root(&self) -> &Node {
        &self.root
    }

    /// Feature extractor.
    pub fn backbone(&self) -> NnResult<&Node> {
        self.root.get_submodule("backbone")
    }

    /// Logits layer(s).
    pub fn head(&self) -> NnResult<&Node> {
        self.root.get_submodule("head")
    }

    /// Re-initialize every linear layer in place.
    pub fn initialize<R: Rng + ?Sized>(&self, rng: &mut R) {
        for layer in self.root.leaves() {
            if let Layer::Linear(linear) = layer {
                linear.reset_parameters(rng);
            }
        }
    }
}

impl Module for ClassificationModel {
    fn forward(&self, x: &Tensor) -> Tensor {
        self.root.forward(x)
    }

    fn parameters(&self) -> Vec<Tensor> {
        self.root.parameters()
    }

    fn train(&mut self) {
        self.root.train()
    }

    fn eval(&mut self) {
        self.root.eval()
    }
}

impl From<ClassificationModel> for Node {
    fn from(model: ClassificationModel) -> Self {
        model.root
    }
}

impl std::fmt::Debug for ClassificationModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClassificationModel")
            .field("root", &self.root)
            .field("num_parameters", &self.num_parameters())
            .finish()
    }
}

/// Multi-layer perceptron classifier over flattened inputs.
///
/// The backbone holds `flatten`, then `fc{i}`/`act{i}` pairs per hidden width;
/// the head holds one `logits` layer.
///
/// # Example
/// ```rust,no_run
/// use rampart::nn::{mlp_classifier, Module};
/// use rampart_autograd::Tensor;
///
/// let model = mlp_classifier(4, &[16], 3, 0);
/// let logits = model.forward(&Tensor::ones(&[8, 2, 2]));
/// assert_eq!(logits.shape, vec![8, 3]);
/// ```
pub fn mlp_classifier(
    input_dim: usize,
    hidden: &[usize],
    class_count: usize,
    seed: u64,
) -> ClassificationModel {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let mut backbone = Table::new().add("flatten", Flatten);
    let mut width = input_dim;
    for (i, &h) in hidden.iter().enumerate() {
        backbone.push(format!("fc{}", i), Linear::new(width, h, &mut rng));
        backbone.push(format!("act{}", i), ReLU);
        width = h;
    }
    let head = Table::new().add("logits", Linear::new(width, class_count, &mut rng));
    ClassificationModel::new(Node::Seq(backbone), Node::Seq(head))
}

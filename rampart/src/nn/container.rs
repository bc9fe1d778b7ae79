//! Container Modules
//!
//! Layers and the module tree. A [`Node`] is a tagged union over sequential,
//! fork, parallel and sum composition; leaves wrap a [`Layer`].

use std::rc::Rc;

use rampart_autograd::Tensor;

use super::{Flatten, Func, Linear, Module, NnError, NnResult, ReLU, Sigmoid, Tanh};

/// A layer that can be a leaf of the module tree.
#[derive(Clone)]
pub enum Layer {
    /// Fully connected layer
    Linear(Linear),
    /// ReLU activation
    ReLU(ReLU),
    /// Sigmoid activation
    Sigmoid(Sigmoid),
    /// Tanh activation
    Tanh(Tanh),
    /// Batch flattening
    Flatten(Flatten),
    /// Closure layer
    Func(Func),
    /// Any other module
    Custom(Rc<dyn Module>),
}

impl Module for Layer {
    fn forward(&self, x: &Tensor) -> Tensor {
        match self {
            Layer::Linear(l) => l.forward(x),
            Layer::ReLU(l) => l.forward(x),
            Layer::Sigmoid(l) => l.forward(x),
            Layer::Tanh(l) => l.forward(x),
            Layer::Flatten(l) => l.forward(x),
            Layer::Func(l) => l.forward(x),
            Layer::Custom(l) => l.forward(x),
        }
    }

    fn parameters(&self) -> Vec<Tensor> {
        match self {
            Layer::Linear(l) => l.parameters(),
            Layer::Custom(l) => l.parameters(),
            _ => vec![],
        }
    }
}

impl std::fmt::Debug for Layer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        use std::fmt::Debug;
        match self {
            Layer::Linear(l) => l.fmt(f),
            Layer::ReLU(l) => l.fmt(f),
            Layer::Sigmoid(l) => l.fmt(f),
            Layer::Tanh(l) => l.fmt(f),
            Layer::Flatten(l) => l.fmt(f),
            Layer::Func(l) => l.fmt(f),
            Layer::Custom(l) => f
                .debug_struct("Custom")
                .field("num_parameters", &l.num_parameters())
                .finish(),
        }
    }
}

macro_rules! impl_layer_from {
    ($($ty:ident),*) => {
        $(
            impl From<$ty> for Layer {
                fn from(l: $ty) -> Self {
                    Layer::$ty(l)
                }
            }

            impl From<$ty> for Node {
                fn from(l: $ty) -> Self {
                    Node::Leaf(Layer::$ty(l))
                }
            }
        )*
    };
}

impl_layer_from!(Linear, ReLU, Sigmoid, Tanh, Flatten, Func);

impl From<Rc<dyn Module>> for Layer {
    fn from(m: Rc<dyn Module>) -> Self {
        Layer::Custom(m)
    }
}

impl From<Layer> for Node {
    fn from(l: Layer) -> Self {
        Node::Leaf(l)
    }
}

/// Values flowing between nodes: one tensor or a tuple of flows.
#[derive(Debug, Clone)]
pub enum Flow {
    /// A single tensor
    One(Tensor),
    /// The outputs of a fork or parallel node
    Many(Vec<Flow>),
}

impl Flow {
    /// The tensor of a single-valued flow.
    pub fn into_tensor(self) -> NnResult<Tensor> {
        match self {
            Flow::One(t) => Ok(t),
            Flow::Many(items) => Err(NnError::Arity {
                expected: 1,
                found: items.len(),
            }),
        }
    }

    /// The components of a flow; a single tensor is a one-element tuple.
    pub fn into_items(self) -> Vec<Flow> {
        match self {
            Flow::One(t) => vec![Flow::One(t)],
            Flow::Many(items) => items,
        }
    }
}

impl From<Tensor> for Flow {
    fn from(t: Tensor) -> Self {
        Flow::One(t)
    }
}

/// Ordered named children of a composite node.
///
/// # Example
/// ```rust,no_run
/// use rampart::nn::{Node, ReLU, Table, Tanh};
///
/// let body = Node::Seq(Table::new().add("act1", ReLU).add("act2", Tanh));
/// assert_eq!(body.get_submodule("act2").unwrap().kind(), "leaf");
/// ```
#[derive(Clone, Default)]
pub struct Table {
    children: Vec<(String, Node)>,
}

impl Table {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a named child.
    pub fn add(mut self, name: impl Into<String>, node: impl Into<Node>) -> Self {
        self.push(name, node);
        self
    }

    /// Append a named child in place.
    pub fn push(&mut self, name: impl Into<String>, node: impl Into<Node>) {
        self.children.push((name.into(), node.into()));
    }

    /// Get number of children.
    pub fn len(&self) -> usize {
        self.children.len()
    }

    /// Check if empty.
    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }

    /// Child names in order.
    pub fn names(&self) -> Vec<String> {
        self.children.iter().map(|(n, _)| n.clone()).collect()
    }

    /// Child by name.
    pub fn get(&self, name: &str) -> Option<&Node> {
        self.children.iter().find(|(n, _)| n == name).map(|(_, m)| m)
    }

    /// Iterate over `(name, child)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Node)> {
        self.children.iter().map(|(n, m)| (n.as_str(), m))
    }

    fn position(&self, name: &str) -> NnResult<usize> {
        self.children
            .iter()
            .position(|(n, _)| n == name)
            .ok_or_else(|| NnError::NoSuchModule {
                name: name.to_string(),
                available: self.names(),
            })
    }

    fn slice(&self, range: impl std::slice::SliceIndex<[(String, Node)], Output = [(String, Node)]>) -> Table {
        Table {
            children: self.children[range].to_vec(),
        }
    }

    fn chain(mut self, other: Table) -> Table {
        self.children.extend(other.children);
        self
    }
}

impl<S: Into<String>, N: Into<Node>> FromIterator<(S, N)> for Table {
    fn from_iter<I: IntoIterator<Item = (S, N)>>(iter: I) -> Self {
        Table {
            children: iter.into_iter().map(|(s, n)| (s.into(), n.into())).collect(),
        }
    }
}

/// A node of the module tree.
///
/// `Seq` chains its children, `Fork` feeds one input to every child,
/// `Parallel` feeds the i-th input to the i-th child (a single child is
/// applied to every input), `Sum` adds its inputs and `Leaf` runs a layer.
///
/// # Example
/// ```rust,no_run
/// use rampart::nn::{Flow, Func, Node, ReLU, Table};
/// use rampart_autograd::Tensor;
///
/// // y = relu(x) + 2x
/// let residual = Node::Seq(
///     Table::new()
///         .add("fork", Node::Fork(
///             Table::new()
///                 .add("act", ReLU)
///                 .add("skip", Func::new("double", |x: &Tensor| x.mul_scalar(2.0))),
///         ))
///         .add("sum", Node::Sum),
/// );
/// let y = residual.try_forward(Flow::One(Tensor::from_slice(&[-1.0, 1.0]))).unwrap();
/// assert_eq!(y.into_tensor().unwrap().to_vec(), vec![-2.0, 3.0]);
/// ```
#[derive(Clone)]
pub enum Node {
    /// Children applied in order
    Seq(Table),
    /// Every child applied to the same input
    Fork(Table),
    /// Children applied to corresponding inputs
    Parallel(Table),
    /// Elementwise sum of the inputs
    Sum,
    /// A layer
    Leaf(Layer),
}

impl Node {
    /// Short name of the node kind.
    pub fn kind(&self) -> &'static str {
        match self {
            Node::Seq(_) => "seq",
            Node::Fork(_) => "fork",
            Node::Parallel(_) => "parallel",
            Node::Sum => "sum",
            Node::Leaf(_) => "leaf",
        }
    }

    /// Children of a composite node.
    pub fn table(&self) -> Option<&Table> {
        match self {
            Node::Seq(t) | Node::Fork(t) | Node::Parallel(t) => Some(t),
            Node::Sum | Node::Leaf(_) => None,
        }
    }

    fn table_mut(&mut self) -> Option<&mut Table> {
        match self {
            Node::Seq(t) | Node::Fork(t) | Node::Parallel(t) => Some(t),
            Node::Sum | Node::Leaf(_) => None,
        }
    }

    /// Run the node on a flow.
    pub fn try_forward(&self, input: Flow) -> NnResult<Flow> {
        match self {
            Node::Seq(table) => table
                .iter()
                .try_fold(input, |flow, (_, child)| child.try_forward(flow)),
            Node::Fork(table) => table
                .iter()
                .map(|(_, child)| child.try_forward(input.clone()))
                .collect::<NnResult<Vec<_>>>()
                .map(Flow::Many),
            Node::Parallel(table) => {
                let inputs = input.into_items();
                if table.len() == 1 {
                    let (_, child) = &table.children[0];
                    return inputs
                        .into_iter()
                        .map(|x| child.try_forward(x))
                        .collect::<NnResult<Vec<_>>>()
                        .map(Flow::Many);
                }
                if inputs.len() != table.len() {
                    return Err(NnError::Arity {
                        expected: table.len(),
                        found: inputs.len(),
                    });
                }
                table
                    .iter()
                    .zip(inputs)
                    .map(|((_, child), x)| child.try_forward(x))
                    .collect::<NnResult<Vec<_>>>()
                    .map(Flow::Many)
            }
            Node::Sum => {
                let mut terms = input
                    .into_items()
                    .into_iter()
                    .map(Flow::into_tensor)
                    .collect::<NnResult<Vec<_>>>()?
                    .into_iter();
                let first = terms.next().ok_or(NnError::Arity {
                    expected: 1,
                    found: 0,
                })?;
                terms.try_fold(first, |acc, t| {
                    if t.shape != acc.shape {
                        return Err(NnError::ShapeMismatch {
                            expected: acc.shape.clone(),
                            found: t.shape.clone(),
                        });
                    }
                    Ok(acc.add(&t))
                })
                .map(Flow::One)
            }
            Node::Leaf(layer) => Ok(Flow::One(layer.forward(&input.into_tensor()?))),
        }
    }

    /// Descendant at a dot-separated path; `""` is the node itself.
    pub fn get_submodule(&self, path: &str) -> NnResult<&Node> {
        let mut node = self;
        for name in components(path)? {
            node = match node.table() {
                Some(table) => {
                    let i = table.position(name)?;
                    &table.children[i].1
                }
                None => {
                    return Err(NnError::NoSuchModule {
                        name: name.to_string(),
                        available: vec![],
                    })
                }
            };
        }
        Ok(node)
    }

    /// Split a `Seq` before the child `name`; the child starts the right part.
    pub fn split(&self, name: &str) -> NnResult<(Node, Node)> {
        let Node::Seq(table) = self else {
            return Err(NnError::UnsupportedSplit(self.kind()));
        };
        let i = table.position(name)?;
        Ok((Node::Seq(table.slice(..i)), Node::Seq(table.slice(i..))))
    }

    /// Split after the descendant at `path`, recursing through nested `Seq`s.
    ///
    /// The addressed module ends the left part. An empty path leaves the whole
    /// node on the left and an empty `Seq` on the right.
    pub fn deep_split(&self, path: &str) -> NnResult<(Node, Node)> {
        let path = components(path)?;
        if path.is_empty() {
            return Ok((self.clone(), Node::Seq(Table::new())));
        }
        self.deep_split_at(&path)
    }

    fn deep_split_at(&self, path: &[&str]) -> NnResult<(Node, Node)> {
        let Node::Seq(table) = self else {
            return Err(NnError::UnsupportedSplit(self.kind()));
        };
        let (next, rest) = path.split_first().ok_or(NnError::EmptyPath)?;
        let i = table.position(next)?;
        if rest.is_empty() {
            return Ok((Node::Seq(table.slice(..=i)), Node::Seq(table.slice(i + 1..))));
        }
        let (mut left, mut right) = (table.slice(..=i), table.slice(i..));
        let (inner_left, inner_right) = table.children[i].1.deep_split_at(rest)?;
        left.children[i].1 = inner_left;
        right.children[0].1 = inner_right;
        Ok((Node::Seq(left), Node::Seq(right)))
    }

    /// Concatenate two `Seq`s.
    pub fn join(&self, other: &Node) -> NnResult<Node> {
        match (self, other) {
            (Node::Seq(a), Node::Seq(b)) => Ok(Node::Seq(a.clone().chain(b.clone()))),
            (Node::Seq(_), other) => Err(NnError::UnsupportedSplit(other.kind())),
            (this, _) => Err(NnError::UnsupportedSplit(this.kind())),
        }
    }

    /// Inverse of [`deep_split`](Self::deep_split): joins recursively while the
    /// last child of `self` and the first child of `other` share a name.
    pub fn deep_join(&self, other: &Node) -> NnResult<Node> {
        let (Node::Seq(a), Node::Seq(b)) = (self, other) else {
            return self.join(other);
        };
        let (Some((last_name, last)), Some((first_name, first))) =
            (a.children.last(), b.children.first())
        else {
            return self.join(other);
        };
        if last_name != first_name {
            return self.join(other);
        }
        let merged = last.deep_join(first)?;
        let mut left = a.slice(..a.len() - 1);
        left.push(last_name.clone(), merged);
        Ok(Node::Seq(left.chain(b.slice(1..))))
    }

    /// Every leaf layer in depth-first order.
    pub fn leaves(&self) -> Vec<&Layer> {
        match self {
            Node::Leaf(layer) => vec![layer],
            Node::Sum => vec![],
            Node::Seq(t) | Node::Fork(t) | Node::Parallel(t) => {
                t.children.iter().flat_map(|(_, c)| c.leaves()).collect()
            }
        }
    }
}

fn components(path: &str) -> NnResult<Vec<&str>> {
    if path.is_empty() {
        return Ok(vec![]);
    }
    let parts: Vec<&str> = path.split('.').collect();
    if parts.iter().any(|p| p.is_empty()) {
        return Err(NnError::EmptyPath);
    }
    Ok(parts)
}

impl Module for Node {
    /// # Panics
    ///
    /// Panics if the node does not map one tensor to one tensor; use
    /// [`Node::try_forward`] for tuple-valued nodes.
    fn forward(&self, x: &Tensor) -> Tensor {
        match self.try_forward(Flow::One(x.clone())).and_then(Flow::into_tensor) {
            Ok(y) => y,
            Err(e) => panic!("{} node cannot map a tensor to a tensor: {}", self.kind(), e),
        }
    }

    fn parameters(&self) -> Vec<Tensor> {
        self.leaves().into_iter().flat_map(|l| l.parameters()).collect()
    }

    fn train(&mut self) {
        if let Some(table) = self.table_mut() {
            for (_, child) in &mut table.children {
                child.train();
            }
        }
    }

    fn eval(&mut self) {
        if let Some(table) = self.table_mut() {
            for (_, child) in &mut table.children {
                child.eval();
            }
        }
    }
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Node::Leaf(layer) => std::fmt::Debug::fmt(layer, f),
            Node::Sum => f.write_str("Sum"),
            Node::Seq(t) | Node::Fork(t) | Node::Parallel(t) => {
                write!(f, "{}", self.kind())?;
                f.debug_map()
                    .entries(t.children.iter().map(|(name, child)| (name, child)))
                    .finish()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scale(k: f32) -> Func {
        Func::new(format!("x{}", k), move |x: &Tensor| x.mul_scalar(k))
    }

    fn chain() -> Node {
        Node::Seq(
            Table::new()
                .add("a", scale(2.0))
                .add(
                    "b",
                    Node::Seq(Table::new().add("b1", scale(3.0)).add("b2", scale(5.0))),
                )
                .add("c", scale(7.0)),
        )
    }

    fn run(node: &Node, x: f32) -> f32 {
        node.forward(&Tensor::from_slice(&[x])).item()
    }

    #[test]
    fn test_seq_forward() {
        assert_eq!(run(&chain(), 1.0), 210.0);
    }

    #[test]
    fn test_get_submodule() {
        let root = chain();
        assert_eq!(root.get_submodule("").unwrap().kind(), "seq");
        assert_eq!(run(root.get_submodule("b.b2").unwrap(), 1.0), 5.0);
        match root.get_submodule("b.zz") {
            Err(NnError::NoSuchModule { name, available }) => {
                assert_eq!(name, "zz");
                assert_eq!(available, vec!["b1", "b2"]);
            }
            other => panic!("unexpected {:?}", other.map(|n| n.kind())),
        }
        assert_eq!(root.get_submodule("a..b").unwrap_err(), NnError::EmptyPath);
    }

    #[test]
    fn test_split_puts_named_child_on_the_right() {
        let (left, right) = chain().split("b").unwrap();
        assert_eq!(left.table().unwrap().names(), vec!["a"]);
        assert_eq!(right.table().unwrap().names(), vec!["b", "c"]);
        assert_eq!(run(&right, run(&left, 1.0)), 210.0);
    }

    #[test]
    fn test_deep_split_and_deep_join_round_trip() {
        let root = chain();
        let (left, right) = root.deep_split("b.b1").unwrap();
        assert_eq!(run(&left, 1.0), 6.0);
        assert_eq!(run(&right, 6.0), 210.0);
        assert_eq!(
            left.get_submodule("b").unwrap().table().unwrap().names(),
            vec!["b1"]
        );
        assert_eq!(
            right.get_submodule("b").unwrap().table().unwrap().names(),
            vec!["b2"]
        );

        let joined = left.deep_join(&right).unwrap();
        assert_eq!(joined.table().unwrap().names(), vec!["a", "b", "c"]);
        assert_eq!(
            joined.get_submodule("b").unwrap().table().unwrap().names(),
            vec!["b1", "b2"]
        );
        assert_eq!(run(&joined, 1.0), 210.0);
    }

    #[test]
    fn test_deep_split_empty_path() {
        let (left, right) = chain().deep_split("").unwrap();
        assert_eq!(run(&left, 1.0), 210.0);
        assert!(right.table().unwrap().is_empty());
    }

    #[test]
    fn test_split_unsupported_for_fork() {
        let fork = Node::Fork(Table::new().add("a", ReLU));
        assert_eq!(fork.split("a").unwrap_err(), NnError::UnsupportedSplit("fork"));
        let leaf = Node::from(ReLU);
        assert_eq!(
            chain().join(&leaf).unwrap_err(),
            NnError::UnsupportedSplit("leaf")
        );
    }

    #[test]
    fn test_fork_parallel_sum() {
        let node = Node::Seq(
            Table::new()
                .add("fork", Node::Fork(Table::new().add("p", scale(2.0)).add("q", scale(3.0))))
                .add("par", Node::Parallel(Table::new().add("p", scale(10.0)).add("q", scale(1.0))))
                .add("sum", Node::Sum),
        );
        assert_eq!(run(&node, 1.0), 23.0);

        let shared = Node::Parallel(Table::new().add("only", scale(2.0)));
        let out = shared
            .try_forward(Flow::Many(vec![
                Flow::One(Tensor::from_slice(&[1.0])),
                Flow::One(Tensor::from_slice(&[4.0])),
            ]))
            .unwrap();
        assert_eq!(out.into_items().len(), 2);
    }

    #[test]
    fn test_parallel_arity_and_sum_shape_errors() {
        let par = Node::Parallel(Table::new().add("p", ReLU).add("q", ReLU));
        let err = par.try_forward(Flow::One(Tensor::ones(&[1]))).unwrap_err();
        assert_eq!(err, NnError::Arity { expected: 2, found: 1 });

        let sum = Node::Sum.try_forward(Flow::Many(vec![
            Flow::One(Tensor::ones(&[1])),
            Flow::One(Tensor::ones(&[2])),
        ]));
        assert!(matches!(sum, Err(NnError::ShapeMismatch { .. })));
    }

    #[test]
    fn test_parameters_walk_leaves() {
        use rand::SeedableRng;
        let mut rng = rand_chacha::ChaCha8Rng::seed_from_u64(0);
        let node = Node::Seq(
            Table::new()
                .add("fc1", Linear::new(3, 4, &mut rng))
                .add("act", ReLU)
                .add("fc2", Linear::new(4, 2, &mut rng)),
        );
        assert_eq!(node.num_parameters(), 3 * 4 + 4 + 4 * 2 + 2);
        assert_eq!(node.parameters().len(), 4);
    }
}

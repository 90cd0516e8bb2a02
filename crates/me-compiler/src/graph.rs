//! SSA computation graph recorded by the tracer.
//!
//! Nodes are stored in definition order, so every operand refers to an
//! earlier node. The tracer emits the high-level vocabulary of
//! [`Ops`](me_tensor::Ops); the decomposition pass rewrites it into the
//! primitive subset the dialect lowerings understand.

use std::collections::HashSet;
use std::fmt;

use me_tensor::{DType, Ops, Shape, Tensor, TensorError};

/// Index of a node within its graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub usize);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "%{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReduceKind {
    Sum,
    Max,
}

#[derive(Debug, Clone)]
pub enum Op {
    /// Function argument `index`.
    Parameter { index: usize },
    Constant(Tensor),

    // Recorded by the tracer.
    Embedding,
    SliceRows { len: usize },
    Add,
    Mul,
    Scale(f32),
    MatMul,
    Transpose { perm: Vec<usize> },
    Reshape,
    Softmax,
    LayerNorm { eps: f32 },
    Gelu,

    // Introduced by decomposition.
    /// A constant filled with one value, in the node's shape.
    Splat(f32),
    /// Operand dim `i` maps to result dim `dims[i]`; the rest are expanded.
    Broadcast { dims: Vec<usize> },
    /// Reduces away `axis`.
    Reduce { kind: ReduceKind, axis: usize },
    Sub,
    Div,
    Exp,
    Rsqrt,
    Erf,
    /// `[..b, m, k] x [..b, k, n] -> [..b, m, n]` with equal batch dims.
    Dot,
}

impl Op {
    pub fn name(&self) -> &'static str {
        match self {
            Op::Parameter { .. } => "parameter",
            Op::Constant(_) => "constant",
            Op::Embedding => "embedding",
            Op::SliceRows { .. } => "slice_rows",
            Op::Add => "add",
            Op::Mul => "mul",
            Op::Scale(_) => "scale",
            Op::MatMul => "matmul",
            Op::Transpose { .. } => "transpose",
            Op::Reshape => "reshape",
            Op::Softmax => "softmax",
            Op::LayerNorm { .. } => "layer_norm",
            Op::Gelu => "gelu",
            Op::Splat(_) => "splat",
            Op::Broadcast { .. } => "broadcast",
            Op::Reduce { .. } => "reduce",
            Op::Sub => "sub",
            Op::Div => "div",
            Op::Exp => "exp",
            Op::Rsqrt => "rsqrt",
            Op::Erf => "erf",
            Op::Dot => "dot",
        }
    }

    /// True for ops that only exist before decomposition.
    pub fn is_composite(&self) -> bool {
        matches!(
            self,
            Op::Scale(_) | Op::MatMul | Op::Softmax | Op::LayerNorm { .. } | Op::Gelu
        )
    }

    fn attrs(&self) -> Option<String> {
        match self {
            Op::Parameter { index } => Some(format!("index = {index}")),
            Op::SliceRows { len } => Some(format!("len = {len}")),
            Op::Scale(s) => Some(format!("factor = {s:?}")),
            Op::Transpose { perm } => Some(format!("perm = {perm:?}")),
            Op::LayerNorm { eps } => Some(format!("eps = {eps:e}")),
            Op::Splat(v) => Some(format!("value = {v:?}")),
            Op::Broadcast { dims } => Some(format!("dims = {dims:?}")),
            Op::Reduce { kind, axis } => Some(format!("kind = {kind:?}, axis = {axis}")),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Node {
    pub id: NodeId,
    pub op: Op,
    pub operands: Vec<NodeId>,
    pub shape: Shape,
    pub dtype: DType,
}

#[derive(Debug, Clone)]
pub struct Graph {
    name: String,
    nodes: Vec<Node>,
    parameters: Vec<NodeId>,
    outputs: Vec<NodeId>,
}

impl Graph {
    pub fn new(name: impl Into<String>) -> Self {
        Graph {
            name: name.into(),
            nodes: Vec::new(),
            parameters: Vec::new(),
            outputs: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn add_parameter(&mut self, shape: Shape, dtype: DType) -> NodeId {
        let index = self.parameters.len();
        let id = self.push(Op::Parameter { index }, Vec::new(), shape, dtype);
        self.parameters.push(id);
        id
    }

    /// Append a node. Operands must already be defined.
    pub fn push(&mut self, op: Op, operands: Vec<NodeId>, shape: Shape, dtype: DType) -> NodeId {
        let id = NodeId(self.nodes.len());
        debug_assert!(operands.iter().all(|o| o.0 < id.0));
        self.nodes.push(Node {
            id,
            op,
            operands,
            shape,
            dtype,
        });
        id
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.0]
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn parameters(&self) -> &[NodeId] {
        &self.parameters
    }

    pub fn outputs(&self) -> &[NodeId] {
        &self.outputs
    }

    pub fn set_outputs(&mut self, outputs: Vec<NodeId>) {
        self.outputs = outputs;
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Number of nodes per op name, sorted by name.
    pub fn op_histogram(&self) -> Vec<(&'static str, usize)> {
        let mut counts: Vec<(&'static str, usize)> = Vec::new();
        for node in &self.nodes {
            match counts.iter_mut().find(|(name, _)| *name == node.op.name()) {
                Some((_, n)) => *n += 1,
                None => counts.push((node.op.name(), 1)),
            }
        }
        counts.sort();
        counts
    }

    /// Drop nodes that no output depends on. Parameters are always kept so
    /// the function signature does not change.
    pub fn prune(&self) -> Graph {
        let mut live: HashSet<NodeId> = self.parameters.iter().copied().collect();
        let mut worklist: Vec<NodeId> = self.outputs.clone();
        while let Some(id) = worklist.pop() {
            if live.insert(id) {
                worklist.extend(self.node(id).operands.iter().copied());
            }
        }

        let mut remap = vec![None; self.nodes.len()];
        let mut out = Graph::new(self.name.clone());
        for node in self.nodes.iter().filter(|n| live.contains(&n.id)) {
            let new_id = match node.op {
                Op::Parameter { .. } => out.add_parameter(node.shape.clone(), node.dtype),
                _ => {
                    let operands = node
                        .operands
                        .iter()
                        .map(|o| remap[o.0].expect("operands precede their users"))
                        .collect();
                    out.push(node.op.clone(), operands, node.shape.clone(), node.dtype)
                }
            };
            remap[node.id.0] = Some(new_id);
        }
        out.outputs = self
            .outputs
            .iter()
            .map(|o| remap[o.0].expect("outputs are live"))
            .collect();
        out
    }

    /// Re-execute a traced graph through `ops`.
    ///
    /// Only the recorded vocabulary can be replayed; decomposed graphs
    /// contain primitives that [`Ops`] has no counterpart for.
    pub fn replay<O: Ops>(
        &self,
        ops: &mut O,
        inputs: &[O::Value],
    ) -> me_tensor::Result<Vec<O::Value>> {
        if inputs.len() != self.parameters.len() {
            return Err(TensorError::Other(format!(
                "graph takes {} inputs, got {}",
                self.parameters.len(),
                inputs.len()
            )));
        }

        let mut values: Vec<O::Value> = Vec::with_capacity(self.nodes.len());
        for node in &self.nodes {
            let arg = |i: usize| &values[node.operands[i].0];
            let value = match &node.op {
                Op::Parameter { index } => inputs[*index].clone(),
                Op::Constant(t) => ops.constant(t)?,
                Op::Embedding => ops.embedding(arg(0), arg(1))?,
                Op::SliceRows { len } => ops.slice_rows(arg(0), *len)?,
                Op::Add => ops.add(arg(0), arg(1))?,
                Op::Mul => ops.mul(arg(0), arg(1))?,
                Op::Scale(s) => ops.scale(arg(0), *s)?,
                Op::MatMul => ops.matmul(arg(0), arg(1))?,
                Op::Transpose { perm } => ops.transpose(arg(0), perm)?,
                Op::Reshape => ops.reshape(arg(0), node.shape.dims())?,
                Op::Softmax => ops.softmax(arg(0))?,
                Op::LayerNorm { eps } => ops.layer_norm(arg(0), arg(1), arg(2), *eps)?,
                Op::Gelu => ops.gelu(arg(0))?,
                other => {
                    return Err(TensorError::Unsupported {
                        op: other.name().to_string(),
                    })
                }
            };
            values.push(value);
        }
        Ok(self.outputs.iter().map(|o| values[o.0].clone()).collect())
    }
}

fn tensor_type(shape: &Shape, dtype: DType) -> String {
    if shape.ndim() == 0 {
        format!("tensor<{dtype}>")
    } else {
        format!("tensor<{}x{}>", shape.mlir_dims(), dtype)
    }
}

impl fmt::Display for Graph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let params: Vec<String> = self
            .parameters
            .iter()
            .map(|&p| {
                let n = self.node(p);
                format!("{}: {}", p, tensor_type(&n.shape, n.dtype))
            })
            .collect();
        let results: Vec<String> = self
            .outputs
            .iter()
            .map(|&o| {
                let n = self.node(o);
                tensor_type(&n.shape, n.dtype)
            })
            .collect();
        writeln!(
            f,
            "graph @{}({}) -> ({}) {{",
            self.name,
            params.join(", "),
            results.join(", ")
        )?;
        for node in &self.nodes {
            if matches!(node.op, Op::Parameter { .. }) {
                continue;
            }
            write!(f, "  {} = {}", node.id, node.op.name())?;
            let operands: Vec<String> = node.operands.iter().map(|o| o.to_string()).collect();
            if !operands.is_empty() {
                write!(f, " {}", operands.join(", "))?;
            }
            if let Some(attrs) = node.op.attrs() {
                write!(f, " {{{attrs}}}")?;
            }
            writeln!(f, " : {}", tensor_type(&node.shape, node.dtype))?;
        }
        let outputs: Vec<String> = self.outputs.iter().map(|o| o.to_string()).collect();
        writeln!(f, "  return {}", outputs.join(", "))?;
        write!(f, "}}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use me_tensor::{CpuBackend, Eager};

    fn small_graph() -> (Graph, NodeId) {
        let mut g = Graph::new("small");
        let x = g.add_parameter(Shape::new(vec![2, 3]), DType::F32);
        let w = g.push(
            Op::Constant(Tensor::ones(Shape::new(vec![3]))),
            vec![],
            Shape::new(vec![3]),
            DType::F32,
        );
        let unused = g.push(Op::Exp, vec![x], Shape::new(vec![2, 3]), DType::F32);
        let y = g.push(Op::Add, vec![x, w], Shape::new(vec![2, 3]), DType::F32);
        g.set_outputs(vec![y]);
        (g, unused)
    }

    #[test]
    fn test_display_raw() {
        let (g, _) = small_graph();
        let text = g.to_string();
        assert!(text.starts_with("graph @small(%0: tensor<2x3xf32>) -> (tensor<2x3xf32>) {"));
        assert!(text.contains("  %1 = constant : tensor<3xf32>"));
        assert!(text.contains("  %3 = add %0, %1 : tensor<2x3xf32>"));
        assert!(text.trim_end().ends_with("return %3\n}"));
    }

    #[test]
    fn test_prune_drops_dead_nodes() {
        let (g, unused) = small_graph();
        let pruned = g.prune();
        assert_eq!(pruned.len(), 3);
        assert!(pruned.nodes().iter().all(|n| n.op.name() != "exp"));
        assert_eq!(pruned.outputs(), &[NodeId(2)]);
        assert_eq!(pruned.node(NodeId(2)).operands, vec![NodeId(0), NodeId(1)]);
        assert_eq!(g.node(unused).op.name(), "exp");
    }

    #[test]
    fn test_replay_recorded_ops() {
        let mut g = small_graph().0.prune();
        let s = g.push(Op::Scale(2.0), vec![NodeId(2)], Shape::new(vec![2, 3]), DType::F32);
        g.set_outputs(vec![s]);

        let backend = CpuBackend::new();
        let x = Tensor::new(vec![0.0, 1.0, 2.0, 3.0, 4.0, 5.0], Shape::new(vec![2, 3]));
        let out = g.replay(&mut Eager::new(&backend), &[x]).unwrap();
        assert_eq!(out[0].data_f32().unwrap(), &[2.0, 4.0, 6.0, 8.0, 10.0, 12.0]);
    }

    #[test]
    fn test_replay_rejects_primitives() {
        let (g, _) = small_graph();
        let backend = CpuBackend::new();
        let x = Tensor::zeros(Shape::new(vec![2, 3]));
        assert!(matches!(
            g.replay(&mut Eager::new(&backend), &[x]),
            Err(TensorError::Unsupported { .. })
        ));
    }

    #[test]
    fn test_histogram() {
        let (g, _) = small_graph();
        assert_eq!(
            g.op_histogram(),
            vec![("add", 1), ("constant", 1), ("exp", 1), ("parameter", 1)]
        );
    }
}

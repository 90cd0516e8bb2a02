//! Rewrites composite ops into the primitive subset of [`Op`].
//!
//! After this pass every elementwise op sees operands of identical shape,
//! every matrix product is a [`Op::Dot`] over equal-rank operands, and
//! softmax, layer norm, GELU and scaling are spelled out in reductions,
//! broadcasts and elementwise math.

use std::collections::HashMap;

use me_tensor::{DType, Shape};

use crate::graph::{Graph, NodeId, Op, ReduceKind};

struct Rewriter {
    out: Graph,
    splats: HashMap<(u32, Vec<usize>), NodeId>,
}

impl Rewriter {
    fn shape(&self, id: NodeId) -> Shape {
        self.out.node(id).shape.clone()
    }

    fn dtype(&self, id: NodeId) -> DType {
        self.out.node(id).dtype
    }

    fn splat(&mut self, value: f32, shape: &Shape) -> NodeId {
        let key = (value.to_bits(), shape.dims().to_vec());
        if let Some(&id) = self.splats.get(&key) {
            return id;
        }
        let id = self
            .out
            .push(Op::Splat(value), Vec::new(), shape.clone(), DType::F32);
        self.splats.insert(key, id);
        id
    }

    /// Same-shape elementwise op.
    fn elementwise(&mut self, op: Op, a: NodeId, b: NodeId) -> NodeId {
        let shape = self.shape(a);
        let dtype = self.dtype(a);
        self.out.push(op, vec![a, b], shape, dtype)
    }

    fn unary(&mut self, op: Op, x: NodeId) -> NodeId {
        let shape = self.shape(x);
        let dtype = self.dtype(x);
        self.out.push(op, vec![x], shape, dtype)
    }

    /// Numpy-style broadcast of `x` up to `target`, aligning trailing dims.
    fn broadcast_to(&mut self, x: NodeId, target: &Shape) -> NodeId {
        let shape = self.shape(x);
        if &shape == target {
            return x;
        }
        let offset = target.ndim() - shape.ndim();
        let dims = (offset..target.ndim()).collect();
        self.broadcast_in_dim(x, target, dims)
    }

    fn broadcast_in_dim(&mut self, x: NodeId, target: &Shape, dims: Vec<usize>) -> NodeId {
        let dtype = self.dtype(x);
        self.out
            .push(Op::Broadcast { dims }, vec![x], target.clone(), dtype)
    }

    /// Reduce the last axis away.
    fn reduce_last(&mut self, kind: ReduceKind, x: NodeId) -> NodeId {
        let shape = self.shape(x);
        let axis = shape.ndim() - 1;
        let reduced = Shape::from_slice(shape.leading(1));
        let dtype = self.dtype(x);
        self.out
            .push(Op::Reduce { kind, axis }, vec![x], reduced, dtype)
    }

    /// Broadcast a last-axis reduction result back over `like`.
    fn expand_last(&mut self, reduced: NodeId, like: &Shape) -> NodeId {
        let dims = (0..like.ndim() - 1).collect();
        self.broadcast_in_dim(reduced, like, dims)
    }

    fn reshape(&mut self, x: NodeId, dims: &[usize]) -> NodeId {
        let dtype = self.dtype(x);
        self.out
            .push(Op::Reshape, vec![x], Shape::from_slice(dims), dtype)
    }

    fn softmax(&mut self, x: NodeId) -> NodeId {
        let shape = self.shape(x);
        let max = self.reduce_last(ReduceKind::Max, x);
        let max = self.expand_last(max, &shape);
        let shifted = self.elementwise(Op::Sub, x, max);
        let e = self.unary(Op::Exp, shifted);
        let sum = self.reduce_last(ReduceKind::Sum, e);
        let sum = self.expand_last(sum, &shape);
        self.elementwise(Op::Div, e, sum)
    }

    fn layer_norm(&mut self, x: NodeId, gamma: NodeId, beta: NodeId, eps: f32) -> NodeId {
        let shape = self.shape(x);
        let hidden = shape.dim(shape.ndim() - 1);
        let reduced = Shape::from_slice(shape.leading(1));
        let count = self.splat(hidden as f32, &reduced);

        let sum = self.reduce_last(ReduceKind::Sum, x);
        let mean = self.elementwise(Op::Div, sum, count);
        let mean = self.expand_last(mean, &shape);
        let centered = self.elementwise(Op::Sub, x, mean);

        let squared = self.elementwise(Op::Mul, centered, centered);
        let sq_sum = self.reduce_last(ReduceKind::Sum, squared);
        let var = self.elementwise(Op::Div, sq_sum, count);
        let eps = self.splat(eps, &reduced);
        let var = self.elementwise(Op::Add, var, eps);
        let inv_std = self.unary(Op::Rsqrt, var);
        let inv_std = self.expand_last(inv_std, &shape);
        let normed = self.elementwise(Op::Mul, centered, inv_std);

        let gamma = self.broadcast_to(gamma, &shape);
        let scaled = self.elementwise(Op::Mul, normed, gamma);
        let beta = self.broadcast_to(beta, &shape);
        self.elementwise(Op::Add, scaled, beta)
    }

    /// `0.5 * x * (1 + erf(x / sqrt(2)))`
    fn gelu(&mut self, x: NodeId) -> NodeId {
        let shape = self.shape(x);
        let inv_sqrt2 = self.splat(std::f32::consts::FRAC_1_SQRT_2, &shape);
        let scaled = self.elementwise(Op::Mul, x, inv_sqrt2);
        let erf = self.unary(Op::Erf, scaled);
        let one = self.splat(1.0, &shape);
        let cdf = self.elementwise(Op::Add, erf, one);
        let half = self.splat(0.5, &shape);
        let half_x = self.elementwise(Op::Mul, x, half);
        self.elementwise(Op::Mul, half_x, cdf)
    }

    fn matmul(&mut self, a: NodeId, b: NodeId, out_shape: &Shape) -> NodeId {
        let sa = self.shape(a);
        let sb = self.shape(b);
        let dtype = self.dtype(a);
        if sb.ndim() == 2 && sa.ndim() != 2 {
            // Fold every leading dim of `a` into the rows of one 2-D product.
            let k = sa.dim(sa.ndim() - 1);
            let rows = sa.numel() / k;
            let a2 = self.reshape(a, &[rows, k]);
            let n = sb.dim(1);
            let dot = self
                .out
                .push(Op::Dot, vec![a2, b], Shape::new(vec![rows, n]), dtype);
            self.reshape(dot, out_shape.dims())
        } else {
            self.out.push(Op::Dot, vec![a, b], out_shape.clone(), dtype)
        }
    }

    fn binary(&mut self, op: Op, a: NodeId, b: NodeId, out_shape: &Shape) -> NodeId {
        let a = self.broadcast_to(a, out_shape);
        let b = self.broadcast_to(b, out_shape);
        self.elementwise(op, a, b)
    }
}

/// Decompose `graph` into primitives, dropping anything left unused.
pub fn decompose(graph: &Graph) -> Graph {
    let mut rw = Rewriter {
        out: Graph::new(graph.name()),
        splats: HashMap::new(),
    };
    let mut remap: Vec<NodeId> = Vec::with_capacity(graph.len());

    for node in graph.nodes() {
        let arg = |i: usize| remap[node.operands[i].0];
        let new_id = match &node.op {
            Op::Parameter { .. } => rw.out.add_parameter(node.shape.clone(), node.dtype),
            Op::Add => rw.binary(Op::Add, arg(0), arg(1), &node.shape),
            Op::Mul => rw.binary(Op::Mul, arg(0), arg(1), &node.shape),
            Op::Scale(s) => {
                let factor = rw.splat(*s, &node.shape);
                rw.elementwise(Op::Mul, arg(0), factor)
            }
            Op::MatMul => rw.matmul(arg(0), arg(1), &node.shape),
            Op::Softmax => rw.softmax(arg(0)),
            Op::LayerNorm { eps } => rw.layer_norm(arg(0), arg(1), arg(2), *eps),
            Op::Gelu => rw.gelu(arg(0)),
            other => {
                let operands = node.operands.iter().map(|o| remap[o.0]).collect();
                rw.out
                    .push(other.clone(), operands, node.shape.clone(), node.dtype)
            }
        };
        remap.push(new_id);
    }

    rw.out
        .set_outputs(graph.outputs().iter().map(|o| remap[o.0]).collect());
    let decomposed = rw.out.prune();
    tracing::debug!(
        "decomposed {} nodes into {} primitives",
        graph.len(),
        decomposed.len()
    );
    decomposed
}

use std::collections::HashMap;

use me_tensor::ops::infer;
use me_tensor::{DType, Ops, Result, Shape, Tensor, TensorError, TensorLike};

use crate::graph::{Graph, NodeId, Op};

/// A value flowing through a trace: a graph node plus its static type.
#[derive(Debug, Clone, PartialEq)]
pub struct Traced {
    id: NodeId,
    shape: Shape,
    dtype: DType,
}

impl Traced {
    pub fn id(&self) -> NodeId {
        self.id
    }
}

impl TensorLike for Traced {
    fn shape(&self) -> &Shape {
        &self.shape
    }

    fn dtype(&self) -> DType {
        self.dtype
    }
}

/// [`Ops`] implementation that records every op into a [`Graph`] instead
/// of computing it.
///
/// Shapes are checked with the same rules eager execution uses, so a model
/// that traces also runs, and vice versa.
pub struct Tracer {
    graph: Graph,
    /// Constants seen so far, keyed by storage identity and shape.
    constants: HashMap<(usize, Vec<usize>), NodeId>,
}

impl Tracer {
    pub fn new(name: impl Into<String>) -> Self {
        Tracer {
            graph: Graph::new(name),
            constants: HashMap::new(),
        }
    }

    /// Declare a function argument typed after `example`.
    pub fn parameter(&mut self, example: &Tensor) -> Traced {
        let shape = example.shape().clone();
        let dtype = example.dtype();
        let id = self.graph.add_parameter(shape.clone(), dtype);
        Traced { id, shape, dtype }
    }

    /// Close the trace with `outputs` as the graph results.
    pub fn finish(mut self, outputs: &[Traced]) -> Graph {
        self.graph.set_outputs(outputs.iter().map(|o| o.id).collect());
        self.graph
    }

    fn emit(&mut self, op: Op, operands: &[&Traced], shape: Shape, dtype: DType) -> Traced {
        let ids = operands.iter().map(|o| o.id).collect();
        let id = self.graph.push(op, ids, shape.clone(), dtype);
        Traced { id, shape, dtype }
    }
}

impl Ops for Tracer {
    type Value = Traced;

    fn constant(&mut self, tensor: &Tensor) -> Result<Traced> {
        let key = (tensor.ptr_id(), tensor.shape().dims().to_vec());
        if let Some(&id) = self.constants.get(&key) {
            return Ok(Traced {
                id,
                shape: tensor.shape().clone(),
                dtype: tensor.dtype(),
            });
        }
        let id = self.graph.push(
            Op::Constant(tensor.clone()),
            Vec::new(),
            tensor.shape().clone(),
            tensor.dtype(),
        );
        self.constants.insert(key, id);
        Ok(Traced {
            id,
            shape: tensor.shape().clone(),
            dtype: tensor.dtype(),
        })
    }

    fn embedding(&mut self, table: &Traced, ids: &Traced) -> Result<Traced> {
        let shape = infer::embedding(table, ids)?;
        Ok(self.emit(Op::Embedding, &[table, ids], shape, table.dtype))
    }

    fn slice_rows(&mut self, x: &Traced, len: usize) -> Result<Traced> {
        let shape = infer::slice_rows(x, len)?;
        Ok(self.emit(Op::SliceRows { len }, &[x], shape, x.dtype))
    }

    fn add(&mut self, a: &Traced, b: &Traced) -> Result<Traced> {
        let shape = infer::binary(a, b)?;
        Ok(self.emit(Op::Add, &[a, b], shape, a.dtype))
    }

    fn mul(&mut self, a: &Traced, b: &Traced) -> Result<Traced> {
        let shape = infer::binary(a, b)?;
        Ok(self.emit(Op::Mul, &[a, b], shape, a.dtype))
    }

    fn scale(&mut self, x: &Traced, s: f32) -> Result<Traced> {
        let shape = infer::unary_float(x)?;
        Ok(self.emit(Op::Scale(s), &[x], shape, x.dtype))
    }

    fn matmul(&mut self, a: &Traced, b: &Traced) -> Result<Traced> {
        let shape = infer::matmul(a, b)?;
        Ok(self.emit(Op::MatMul, &[a, b], shape, a.dtype))
    }

    fn transpose(&mut self, x: &Traced, perm: &[usize]) -> Result<Traced> {
        let shape = infer::transpose(x, perm)?;
        let op = Op::Transpose {
            perm: perm.to_vec(),
        };
        Ok(self.emit(op, &[x], shape, x.dtype))
    }

    fn reshape(&mut self, x: &Traced, dims: &[usize]) -> Result<Traced> {
        let shape = infer::reshape(x, dims)?;
        Ok(self.emit(Op::Reshape, &[x], shape, x.dtype))
    }

    fn softmax(&mut self, x: &Traced) -> Result<Traced> {
        let shape = infer::last_axis(x)?;
        Ok(self.emit(Op::Softmax, &[x], shape, x.dtype))
    }

    fn layer_norm(&mut self, x: &Traced, gamma: &Traced, beta: &Traced, eps: f32) -> Result<Traced> {
        let shape = infer::layer_norm(x, gamma, beta)?;
        Ok(self.emit(Op::LayerNorm { eps }, &[x, gamma, beta], shape, x.dtype))
    }

    fn gelu(&mut self, x: &Traced) -> Result<Traced> {
        let shape = infer::unary_float(x)?;
        Ok(self.emit(Op::Gelu, &[x], shape, x.dtype))
    }

    /// Random masks cannot be captured in a static graph; put the model in
    /// inference mode before tracing.
    fn dropout(&mut self, x: &Traced, p: f32) -> Result<Traced> {
        infer::dropout(x, p)?;
        Err(TensorError::Unsupported {
            op: "dropout".to_string(),
        })
    }
}

//! The op vocabulary models are written against.
//!
//! A model implements its computation once, generically over [`Ops`]. Run
//! it with [`Eager`](crate::Eager) and every op computes on the CPU; run it
//! with a tracer and every op records a graph node instead. Both sides share
//! the shape rules in [`infer`], so a traced graph always carries the shapes
//! eager execution would produce.

use crate::dtype::DType;
use crate::error::Result;
use crate::shape::Shape;
use crate::tensor::Tensor;

/// Anything that has a static shape and element type.
pub trait TensorLike {
    fn shape(&self) -> &Shape;
    fn dtype(&self) -> DType;
}

impl TensorLike for Tensor {
    fn shape(&self) -> &Shape {
        Tensor::shape(self)
    }

    fn dtype(&self) -> DType {
        Tensor::dtype(self)
    }
}

/// Tensor operations available to a model's forward pass.
///
/// Binary ops follow numpy broadcasting. Reductions (softmax, layer norm)
/// always work over the last axis.
pub trait Ops {
    type Value: TensorLike + Clone;

    /// Brings a concrete tensor (typically a weight) into the computation.
    fn constant(&mut self, tensor: &Tensor) -> Result<Self::Value>;

    /// Row lookup: `table` is [rows, dim], `ids` any integer shape; the result
    /// is `ids.shape ++ [dim]`.
    fn embedding(&mut self, table: &Self::Value, ids: &Self::Value) -> Result<Self::Value>;

    /// First `len` entries along axis 0.
    fn slice_rows(&mut self, x: &Self::Value, len: usize) -> Result<Self::Value>;

    fn add(&mut self, a: &Self::Value, b: &Self::Value) -> Result<Self::Value>;

    fn mul(&mut self, a: &Self::Value, b: &Self::Value) -> Result<Self::Value>;

    /// Multiplication by a scalar.
    fn scale(&mut self, x: &Self::Value, s: f32) -> Result<Self::Value>;

    /// Either batched `[..., m, k] @ [..., k, n]` with identical batch
    /// dimensions, or `[..., k] @ [k, n]` against a 2-D right-hand side.
    fn matmul(&mut self, a: &Self::Value, b: &Self::Value) -> Result<Self::Value>;

    fn transpose(&mut self, x: &Self::Value, perm: &[usize]) -> Result<Self::Value>;

    fn reshape(&mut self, x: &Self::Value, dims: &[usize]) -> Result<Self::Value>;

    fn softmax(&mut self, x: &Self::Value) -> Result<Self::Value>;

    fn layer_norm(
        &mut self,
        x: &Self::Value,
        gamma: &Self::Value,
        beta: &Self::Value,
        eps: f32,
    ) -> Result<Self::Value>;

    /// Exact (erf-based) GELU.
    fn gelu(&mut self, x: &Self::Value) -> Result<Self::Value>;

    /// Zeroes each element with probability `p` and rescales the survivors.
    fn dropout(&mut self, x: &Self::Value, p: f32) -> Result<Self::Value>;

    /// `x @ weight^T + bias`, with `weight` stored as [out, in].
    fn linear(
        &mut self,
        x: &Self::Value,
        weight: &Self::Value,
        bias: &Self::Value,
    ) -> Result<Self::Value> {
        let weight_t = self.transpose(weight, &[1, 0])?;
        let y = self.matmul(x, &weight_t)?;
        self.add(&y, bias)
    }
}

/// A callable with exactly one input and exactly one output.
///
/// This is the calling convention a graph compiler can trace: the single
/// return value is enforced by the signature rather than checked at runtime.
pub trait Module {
    /// Name used for the traced function and module attributes.
    fn name(&self) -> &str;

    fn forward<O: Ops>(&self, ops: &mut O, input: &O::Value) -> Result<O::Value>;
}

/// Output shape rules shared by every [`Ops`] implementation.
pub mod infer {
    use super::*;
    use crate::error::TensorError;

    fn expect_dtype(got: DType, expected: DType) -> Result<()> {
        if got != expected {
            return Err(TensorError::DTypeMismatch {
                expected: expected.to_string(),
                got: got.to_string(),
            });
        }
        Ok(())
    }

    fn expect_float(got: DType) -> Result<()> {
        if !got.is_float() {
            return Err(TensorError::DTypeMismatch {
                expected: "floating point".to_string(),
                got: got.to_string(),
            });
        }
        Ok(())
    }

    pub fn embedding(table: &impl TensorLike, ids: &impl TensorLike) -> Result<Shape> {
        expect_float(table.dtype())?;
        expect_dtype(ids.dtype(), DType::I64)?;
        if table.shape().ndim() != 2 {
            return Err(TensorError::Other(format!(
                "embedding table must be 2-D, got {}",
                table.shape()
            )));
        }
        let mut dims = ids.shape().dims().to_vec();
        dims.push(table.shape().dim(1));
        Ok(Shape::new(dims))
    }

    pub fn slice_rows(x: &impl TensorLike, len: usize) -> Result<Shape> {
        let shape = x.shape();
        if shape.ndim() == 0 {
            return Err(TensorError::InvalidAxis { axis: 0, ndim: 0 });
        }
        if len > shape.dim(0) {
            return Err(TensorError::IndexOutOfRange {
                index: len as i64,
                size: shape.dim(0),
            });
        }
        let mut dims = shape.dims().to_vec();
        dims[0] = len;
        Ok(Shape::new(dims))
    }

    pub fn binary(a: &impl TensorLike, b: &impl TensorLike) -> Result<Shape> {
        expect_float(a.dtype())?;
        expect_dtype(b.dtype(), a.dtype())?;
        Shape::broadcast_shape(a.shape(), b.shape())
    }

    pub fn unary_float(x: &impl TensorLike) -> Result<Shape> {
        expect_float(x.dtype())?;
        Ok(x.shape().clone())
    }

    pub fn last_axis(x: &impl TensorLike) -> Result<Shape> {
        expect_float(x.dtype())?;
        if x.shape().ndim() == 0 {
            return Err(TensorError::InvalidAxis { axis: 0, ndim: 0 });
        }
        Ok(x.shape().clone())
    }

    pub fn matmul(a: &impl TensorLike, b: &impl TensorLike) -> Result<Shape> {
        expect_float(a.dtype())?;
        expect_dtype(b.dtype(), a.dtype())?;
        let (sa, sb) = (a.shape(), b.shape());
        if sa.ndim() < 1 || sb.ndim() < 2 {
            return Err(TensorError::Other(format!(
                "matmul needs a rank >= 1 lhs and rank >= 2 rhs, got {} and {}",
                sa, sb
            )));
        }
        let k = sa.dim(sa.ndim() - 1);
        let k2 = sb.dim(sb.ndim() - 2);
        let n = sb.dim(sb.ndim() - 1);
        let m = if sa.ndim() >= 2 { sa.dim(sa.ndim() - 2) } else { 1 };
        if k != k2 {
            return Err(TensorError::MatmulMismatch { m, k, k2, n });
        }

        if sb.ndim() == 2 {
            let mut dims = sa.leading(1).to_vec();
            dims.push(n);
            return Ok(Shape::new(dims));
        }

        if sa.ndim() != sb.ndim() || sa.leading(2) != sb.leading(2) {
            return Err(TensorError::ShapeMismatch {
                expected: sa.leading(2).to_vec(),
                got: sb.leading(2).to_vec(),
            });
        }
        let mut dims = sa.leading(2).to_vec();
        dims.push(m);
        dims.push(n);
        Ok(Shape::new(dims))
    }

    pub fn transpose(x: &impl TensorLike, perm: &[usize]) -> Result<Shape> {
        x.shape().permute(perm)
    }

    pub fn reshape(x: &impl TensorLike, dims: &[usize]) -> Result<Shape> {
        let target = Shape::from_slice(dims);
        if target.numel() != x.shape().numel() {
            return Err(TensorError::ShapeMismatch {
                expected: x.shape().dims().to_vec(),
                got: dims.to_vec(),
            });
        }
        Ok(target)
    }

    pub fn layer_norm(
        x: &impl TensorLike,
        gamma: &impl TensorLike,
        beta: &impl TensorLike,
    ) -> Result<Shape> {
        let shape = last_axis(x)?;
        let hidden = shape.dim(shape.ndim() - 1);
        for param in [gamma.shape(), beta.shape()] {
            if param.dims() != [hidden] {
                return Err(TensorError::ShapeMismatch {
                    expected: vec![hidden],
                    got: param.dims().to_vec(),
                });
            }
        }
        Ok(shape)
    }

    pub fn dropout(x: &impl TensorLike, p: f32) -> Result<Shape> {
        if !(0.0..1.0).contains(&p) {
            return Err(TensorError::Other(format!(
                "dropout probability must be in [0, 1), got {p}"
            )));
        }
        unary_float(x)
    }
}

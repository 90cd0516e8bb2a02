use rand::Rng;

use crate::backend::ComputeBackend;
use crate::error::{Result, TensorError};
use crate::ops::{infer, Ops};
use crate::shape::Shape;
use crate::tensor::Tensor;

/// [`Ops`] implementation that computes every op immediately.
///
/// Shape bookkeeping happens here; the arithmetic is delegated to a
/// [`ComputeBackend`].
#[derive(Debug)]
pub struct Eager<'b> {
    backend: &'b dyn ComputeBackend,
}

impl<'b> Eager<'b> {
    pub fn new(backend: &'b dyn ComputeBackend) -> Self {
        Eager { backend }
    }

    pub fn backend(&self) -> &dyn ComputeBackend {
        self.backend
    }

    fn broadcast_binary(
        &self,
        a: &Tensor,
        b: &Tensor,
        same_shape: impl Fn(&dyn ComputeBackend, &[f32], &[f32]) -> Result<Vec<f32>>,
        op: impl Fn(f32, f32) -> f32,
    ) -> Result<Tensor> {
        let out_shape = infer::binary(a, b)?;
        if a.shape() == b.shape() {
            let data = same_shape(self.backend, a.data_f32()?, b.data_f32()?)?;
            return Ok(Tensor::new(data, out_shape));
        }

        let (da, db) = (a.data_f32()?, b.data_f32()?);
        let sa = a.shape().broadcast_strides(&out_shape);
        let sb = b.shape().broadcast_strides(&out_shape);
        let data = for_each_index(&out_shape, |index| {
            let ia: usize = index.iter().zip(&sa).map(|(i, s)| i * s).sum();
            let ib: usize = index.iter().zip(&sb).map(|(i, s)| i * s).sum();
            op(da[ia], db[ib])
        });
        Ok(Tensor::new(data, out_shape))
    }
}

/// Visits every multi-index of `shape` in row-major order.
fn for_each_index<T>(shape: &Shape, mut f: impl FnMut(&[usize]) -> T) -> Vec<T> {
    let n = shape.numel();
    let dims = shape.dims();
    let mut out = Vec::with_capacity(n);
    let mut index = vec![0usize; dims.len()];
    for _ in 0..n {
        out.push(f(&index));
        for axis in (0..dims.len()).rev() {
            index[axis] += 1;
            if index[axis] < dims[axis] {
                break;
            }
            index[axis] = 0;
        }
    }
    out
}

impl<'b> Ops for Eager<'b> {
    type Value = Tensor;

    fn constant(&mut self, tensor: &Tensor) -> Result<Tensor> {
        Ok(tensor.clone())
    }

    fn embedding(&mut self, table: &Tensor, ids: &Tensor) -> Result<Tensor> {
        let out_shape = infer::embedding(table, ids)?;
        let rows = table.shape().dim(0);
        let dim = table.shape().dim(1);
        let data = table.data_f32()?;

        let mut out = Vec::with_capacity(out_shape.numel());
        for &id in ids.data_i64()? {
            if id < 0 || id as usize >= rows {
                return Err(TensorError::IndexOutOfRange {
                    index: id,
                    size: rows,
                });
            }
            let start = id as usize * dim;
            out.extend_from_slice(&data[start..start + dim]);
        }
        Ok(Tensor::new(out, out_shape))
    }

    fn slice_rows(&mut self, x: &Tensor, len: usize) -> Result<Tensor> {
        let out_shape = infer::slice_rows(x, len)?;
        let data = x.data_f32()?[..out_shape.numel()].to_vec();
        Ok(Tensor::new(data, out_shape))
    }

    fn add(&mut self, a: &Tensor, b: &Tensor) -> Result<Tensor> {
        self.broadcast_binary(a, b, |be, x, y| be.add(x, y), |x, y| x + y)
    }

    fn mul(&mut self, a: &Tensor, b: &Tensor) -> Result<Tensor> {
        self.broadcast_binary(a, b, |be, x, y| be.mul(x, y), |x, y| x * y)
    }

    fn scale(&mut self, x: &Tensor, s: f32) -> Result<Tensor> {
        let shape = infer::unary_float(x)?;
        Ok(Tensor::new(self.backend.scale(x.data_f32()?, s)?, shape))
    }

    fn matmul(&mut self, a: &Tensor, b: &Tensor) -> Result<Tensor> {
        let out_shape = infer::matmul(a, b)?;
        let (sa, sb) = (a.shape(), b.shape());
        let k = sa.dim(sa.ndim() - 1);
        let n = sb.dim(sb.ndim() - 1);

        let data = if sb.ndim() == 2 {
            // Fold every leading dimension of `a` into the row count.
            let m = sa.numel() / k.max(1);
            self.backend.matmul(a.data_f32()?, b.data_f32()?, 1, m, k, n)?
        } else {
            let m = sa.dim(sa.ndim() - 2);
            let batch = sa.leading(2).iter().product();
            self.backend
                .matmul(a.data_f32()?, b.data_f32()?, batch, m, k, n)?
        };
        Ok(Tensor::new(data, out_shape))
    }

    fn transpose(&mut self, x: &Tensor, perm: &[usize]) -> Result<Tensor> {
        let out_shape = infer::transpose(x, perm)?;
        let src = x.data_f32()?;
        let in_strides = x.shape().strides();
        let strides: Vec<usize> = perm.iter().map(|&p| in_strides[p]).collect();
        let data = for_each_index(&out_shape, |index| {
            let offset: usize = index.iter().zip(&strides).map(|(i, s)| i * s).sum();
            src[offset]
        });
        Ok(Tensor::new(data, out_shape))
    }

    fn reshape(&mut self, x: &Tensor, dims: &[usize]) -> Result<Tensor> {
        x.reshape(infer::reshape(x, dims)?)
    }

    fn softmax(&mut self, x: &Tensor) -> Result<Tensor> {
        let shape = infer::last_axis(x)?;
        let n = shape.dim(shape.ndim() - 1);
        Ok(Tensor::new(self.backend.softmax(x.data_f32()?, n)?, shape))
    }

    fn layer_norm(&mut self, x: &Tensor, gamma: &Tensor, beta: &Tensor, eps: f32) -> Result<Tensor> {
        let shape = infer::layer_norm(x, gamma, beta)?;
        let hidden = shape.dim(shape.ndim() - 1);
        let data = self.backend.layer_norm(
            x.data_f32()?,
            gamma.data_f32()?,
            beta.data_f32()?,
            eps,
            hidden,
        )?;
        Ok(Tensor::new(data, shape))
    }

    fn gelu(&mut self, x: &Tensor) -> Result<Tensor> {
        let shape = infer::unary_float(x)?;
        Ok(Tensor::new(self.backend.gelu(x.data_f32()?)?, shape))
    }

    fn dropout(&mut self, x: &Tensor, p: f32) -> Result<Tensor> {
        let shape = infer::dropout(x, p)?;
        if p == 0.0 {
            return Ok(x.clone());
        }
        let keep = 1.0 / (1.0 - p);
        let mut rng = rand::thread_rng();
        let data = x
            .data_f32()?
            .iter()
            .map(|&v| if rng.gen::<f32>() < p { 0.0 } else { v * keep })
            .collect();
        Ok(Tensor::new(data, shape))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cpu::CpuBackend;
    use approx::assert_abs_diff_eq;

    fn t(data: Vec<f32>, dims: &[usize]) -> Tensor {
        Tensor::new(data, Shape::from_slice(dims))
    }

    #[test]
    fn test_broadcast_add_bias() {
        let backend = CpuBackend::new();
        let mut ops = Eager::new(&backend);
        let x = t(vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0], &[2, 3]);
        let bias = t(vec![10.0, 20.0, 30.0], &[3]);
        let y = ops.add(&x, &bias).unwrap();
        assert_eq!(y.data_f32().unwrap(), &[11.0, 22.0, 33.0, 14.0, 25.0, 36.0]);
    }

    #[test]
    fn test_broadcast_mul_column() {
        let backend = CpuBackend::new();
        let mut ops = Eager::new(&backend);
        let x = t(vec![1.0, 2.0, 3.0, 4.0], &[2, 2]);
        let col = t(vec![2.0, 3.0], &[2, 1]);
        let y = ops.mul(&x, &col).unwrap();
        assert_eq!(y.data_f32().unwrap(), &[2.0, 4.0, 9.0, 12.0]);
    }

    #[test]
    fn test_embedding_lookup() {
        let backend = CpuBackend::new();
        let mut ops = Eager::new(&backend);
        let table = t(vec![0.0, 0.5, 1.0, 1.5, 2.0, 2.5], &[3, 2]);
        let ids = Tensor::from_i64(vec![2, 0], Shape::new(vec![1, 2])).unwrap();
        let y = ops.embedding(&table, &ids).unwrap();
        assert_eq!(y.shape().dims(), &[1, 2, 2]);
        assert_eq!(y.data_f32().unwrap(), &[2.0, 2.5, 0.0, 0.5]);
    }

    #[test]
    fn test_embedding_out_of_range() {
        let backend = CpuBackend::new();
        let mut ops = Eager::new(&backend);
        let table = t(vec![0.0; 6], &[3, 2]);
        let ids = Tensor::from_i64(vec![3], Shape::new(vec![1, 1])).unwrap();
        let err = ops.embedding(&table, &ids).unwrap_err();
        assert!(matches!(err, TensorError::IndexOutOfRange { index: 3, size: 3 }));
    }

    #[test]
    fn test_transpose_4d() {
        let backend = CpuBackend::new();
        let mut ops = Eager::new(&backend);
        let x = t((0..24).map(|v| v as f32).collect(), &[1, 2, 3, 4]);
        let y = ops.transpose(&x, &[0, 2, 1, 3]).unwrap();
        assert_eq!(y.shape().dims(), &[1, 3, 2, 4]);
        // y[0, 1, 1, 2] == x[0, 1, 1, 2] == 1*12 + 1*4 + 2
        assert_eq!(y.data_f32().unwrap()[4 * 2 + 4 + 2], 18.0);
    }

    #[test]
    fn test_linear_matches_manual() {
        let backend = CpuBackend::new();
        let mut ops = Eager::new(&backend);
        let x = t(vec![1.0, 2.0], &[1, 1, 2]);
        // weight [out=3, in=2]
        let w = t(vec![1.0, 0.0, 0.0, 1.0, 1.0, 1.0], &[3, 2]);
        let b = t(vec![0.5, 0.5, 0.5], &[3]);
        let y = ops.linear(&x, &w, &b).unwrap();
        assert_eq!(y.shape().dims(), &[1, 1, 3]);
        assert_eq!(y.data_f32().unwrap(), &[1.5, 2.5, 3.5]);
    }

    #[test]
    fn test_batched_matmul() {
        let backend = CpuBackend::new();
        let mut ops = Eager::new(&backend);
        let a = t(vec![1.0, 2.0, 3.0, 4.0], &[2, 1, 1, 2]);
        let b = t(vec![1.0, 1.0, 2.0, 2.0], &[2, 1, 2, 1]);
        let y = ops.matmul(&a, &b).unwrap();
        assert_eq!(y.shape().dims(), &[2, 1, 1, 1]);
        assert_eq!(y.data_f32().unwrap(), &[3.0, 14.0]);
    }

    #[test]
    fn test_softmax_last_axis() {
        let backend = CpuBackend::new();
        let mut ops = Eager::new(&backend);
        let x = t(vec![0.0, 0.0, 1.0, 1.0], &[2, 2]);
        let y = ops.softmax(&x).unwrap();
        for v in y.data_f32().unwrap() {
            assert_abs_diff_eq!(*v, 0.5, epsilon = 1e-6);
        }
    }

    #[test]
    fn test_dropout_zero_is_identity() {
        let backend = CpuBackend::new();
        let mut ops = Eager::new(&backend);
        let x = t(vec![1.0, 2.0, 3.0], &[3]);
        let y = ops.dropout(&x, 0.0).unwrap();
        assert_eq!(y.ptr_id(), x.ptr_id());
    }

    #[test]
    fn test_dropout_rescales_survivors() {
        let backend = CpuBackend::new();
        let mut ops = Eager::new(&backend);
        let x = Tensor::ones(Shape::new(vec![1000]));
        let y = ops.dropout(&x, 0.5).unwrap();
        for v in y.data_f32().unwrap() {
            assert!(*v == 0.0 || (*v - 2.0).abs() < 1e-6);
        }
    }

    #[test]
    fn test_slice_rows_prefix() {
        let backend = CpuBackend::new();
        let mut ops = Eager::new(&backend);
        let x = t(vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0], &[3, 2]);
        let y = ops.slice_rows(&x, 2).unwrap();
        assert_eq!(y.data_f32().unwrap(), &[1.0, 2.0, 3.0, 4.0]);
    }
}

use crate::backend::ComputeBackend;
use crate::error::{Result, TensorError};

/// Pure-Rust CPU compute backend.
///
/// Implements all operations with straightforward loops optimized for
/// correctness rather than peak performance. Serves as the reference
/// against which traced graphs are checked.
#[derive(Debug, Clone)]
pub struct CpuBackend;

impl CpuBackend {
    pub fn new() -> Self {
        CpuBackend
    }
}

impl Default for CpuBackend {
    fn default() -> Self {
        Self::new()
    }
}

/// Error function, Abramowitz & Stegun 7.1.26 evaluated in f64
/// (absolute error below 1.5e-7).
pub fn erf(x: f32) -> f32 {
    let x = x as f64;
    let sign = if x < 0.0 { -1.0 } else { 1.0 };
    let x = x.abs();
    let t = 1.0 / (1.0 + 0.327_591_1 * x);
    let poly = t
        * (0.254_829_592
            + t * (-0.284_496_736 + t * (1.421_413_741 + t * (-1.453_152_027 + t * 1.061_405_429))));
    (sign * (1.0 - poly * (-x * x).exp())) as f32
}

impl ComputeBackend for CpuBackend {
    fn name(&self) -> &str {
        "cpu"
    }

    fn matmul(
        &self,
        a: &[f32],
        b: &[f32],
        batch: usize,
        m: usize,
        k: usize,
        n: usize,
    ) -> Result<Vec<f32>> {
        if a.len() != batch * m * k {
            return Err(TensorError::Other(format!(
                "matmul: a.len()={} but expected batch*m*k={}",
                a.len(),
                batch * m * k
            )));
        }
        if b.len() != batch * k * n {
            return Err(TensorError::Other(format!(
                "matmul: b.len()={} but expected batch*k*n={}",
                b.len(),
                batch * k * n
            )));
        }

        let mut c = vec![0.0f32; batch * m * n];
        for bi in 0..batch {
            let a = &a[bi * m * k..(bi + 1) * m * k];
            let b = &b[bi * k * n..(bi + 1) * k * n];
            let c = &mut c[bi * m * n..(bi + 1) * m * n];
            // i-p-j order keeps the inner loop on contiguous rows of b and c.
            for i in 0..m {
                for p in 0..k {
                    let av = a[i * k + p];
                    if av == 0.0 {
                        continue;
                    }
                    let b_row = &b[p * n..(p + 1) * n];
                    let c_row = &mut c[i * n..(i + 1) * n];
                    for (cv, bv) in c_row.iter_mut().zip(b_row) {
                        *cv += av * bv;
                    }
                }
            }
        }
        Ok(c)
    }

    fn add(&self, a: &[f32], b: &[f32]) -> Result<Vec<f32>> {
        if a.len() != b.len() {
            return Err(TensorError::ShapeMismatch {
                expected: vec![a.len()],
                got: vec![b.len()],
            });
        }
        Ok(a.iter().zip(b.iter()).map(|(x, y)| x + y).collect())
    }

    fn mul(&self, a: &[f32], b: &[f32]) -> Result<Vec<f32>> {
        if a.len() != b.len() {
            return Err(TensorError::ShapeMismatch {
                expected: vec![a.len()],
                got: vec![b.len()],
            });
        }
        Ok(a.iter().zip(b.iter()).map(|(x, y)| x * y).collect())
    }

    fn scale(&self, a: &[f32], s: f32) -> Result<Vec<f32>> {
        Ok(a.iter().map(|x| x * s).collect())
    }

    fn layer_norm(
        &self,
        x: &[f32],
        gamma: &[f32],
        beta: &[f32],
        eps: f32,
        hidden_size: usize,
    ) -> Result<Vec<f32>> {
        if gamma.len() != hidden_size || beta.len() != hidden_size {
            return Err(TensorError::Other(format!(
                "layer_norm: gamma.len()={} beta.len()={} but hidden_size={}",
                gamma.len(),
                beta.len(),
                hidden_size
            )));
        }
        if hidden_size == 0 || x.len() % hidden_size != 0 {
            return Err(TensorError::Other(format!(
                "layer_norm: x.len()={} is not a multiple of hidden_size={}",
                x.len(),
                hidden_size
            )));
        }

        let mut result = vec![0.0f32; x.len()];
        for (row_in, row_out) in x
            .chunks_exact(hidden_size)
            .zip(result.chunks_exact_mut(hidden_size))
        {
            let mean = row_in.iter().sum::<f32>() / hidden_size as f32;
            let var = row_in.iter().map(|v| (v - mean) * (v - mean)).sum::<f32>()
                / hidden_size as f32;
            let inv_std = 1.0 / (var + eps).sqrt();
            for i in 0..hidden_size {
                row_out[i] = (row_in[i] - mean) * inv_std * gamma[i] + beta[i];
            }
        }

        Ok(result)
    }

    fn softmax(&self, x: &[f32], n: usize) -> Result<Vec<f32>> {
        if n == 0 {
            return Err(TensorError::Other("softmax: n must be > 0".to_string()));
        }
        if x.len() % n != 0 {
            return Err(TensorError::Other(format!(
                "softmax: x.len()={} is not a multiple of n={}",
                x.len(),
                n
            )));
        }

        let mut result = vec![0.0f32; x.len()];
        for (chunk, out) in x.chunks_exact(n).zip(result.chunks_exact_mut(n)) {
            // Find max for numerical stability
            let max_val = chunk.iter().copied().fold(f32::NEG_INFINITY, f32::max);

            let mut sum = 0.0f32;
            for (o, &v) in out.iter_mut().zip(chunk) {
                let e = (v - max_val).exp();
                *o = e;
                sum += e;
            }
            for o in out.iter_mut() {
                *o /= sum;
            }
        }

        Ok(result)
    }

    fn gelu(&self, x: &[f32]) -> Result<Vec<f32>> {
        Ok(x
            .iter()
            .map(|&v| 0.5 * v * (1.0 + erf(v * std::f32::consts::FRAC_1_SQRT_2)))
            .collect())
    }
}

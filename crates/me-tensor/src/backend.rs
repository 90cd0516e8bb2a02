use std::fmt::Debug;

use crate::error::Result;

/// Trait for pluggable compute backends.
///
/// All operations work on contiguous row-major f32 slices and return owned
/// vectors. Shape bookkeeping lives one level up, in [`crate::Eager`].
pub trait ComputeBackend: Send + Sync + Debug {
    /// Returns the name of this backend (e.g., "cpu").
    fn name(&self) -> &str;

    /// Batched matrix multiplication: C[b] = A[b] @ B[b].
    ///
    /// - `a`: `batch` matrices of shape [m, k]
    /// - `b`: `batch` matrices of shape [k, n]
    /// - Returns: `batch` matrices of shape [m, n]
    fn matmul(
        &self,
        a: &[f32],
        b: &[f32],
        batch: usize,
        m: usize,
        k: usize,
        n: usize,
    ) -> Result<Vec<f32>>;

    /// Element-wise addition: result[i] = a[i] + b[i].
    fn add(&self, a: &[f32], b: &[f32]) -> Result<Vec<f32>>;

    /// Element-wise multiplication: result[i] = a[i] * b[i].
    fn mul(&self, a: &[f32], b: &[f32]) -> Result<Vec<f32>>;

    /// Scalar multiplication: result[i] = a[i] * s.
    fn scale(&self, a: &[f32], s: f32) -> Result<Vec<f32>>;

    /// Layer normalization over rows of `hidden_size` elements.
    ///
    /// For each row:
    ///   mean = mean(x), var = mean((x - mean)^2)
    ///   result[i] = (x[i] - mean) / sqrt(var + eps) * gamma[i] + beta[i]
    fn layer_norm(
        &self,
        x: &[f32],
        gamma: &[f32],
        beta: &[f32],
        eps: f32,
        hidden_size: usize,
    ) -> Result<Vec<f32>>;

    /// Softmax over chunks of `n` elements.
    ///
    /// For each chunk: result[i] = exp(x[i] - max(x)) / sum(exp(x[j] - max(x)))
    fn softmax(&self, x: &[f32], n: usize) -> Result<Vec<f32>>;

    /// Exact GELU: result[i] = 0.5 * x * (1 + erf(x / sqrt(2))).
    fn gelu(&self, x: &[f32]) -> Result<Vec<f32>>;
}

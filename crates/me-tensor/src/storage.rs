use crate::dtype::DType;
use crate::error::{Result, TensorError};

/// CPU-side tensor storage.
///
/// Half-precision checkpoints are widened to F32 at load time, so only the
/// compute types are represented here.
#[derive(Debug, Clone, PartialEq)]
pub enum CpuStorage {
    /// 32-bit floating point storage.
    F32(Vec<f32>),
    /// 64-bit integer storage (token ids).
    I64(Vec<i64>),
}

impl CpuStorage {
    /// Number of elements in this storage.
    pub fn len(&self) -> usize {
        match self {
            CpuStorage::F32(v) => v.len(),
            CpuStorage::I64(v) => v.len(),
        }
    }

    /// Returns true if the storage contains no elements.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the data as an f32 slice.
    ///
    /// # Errors
    /// Returns an error if the storage is not F32.
    pub fn as_f32_slice(&self) -> Result<&[f32]> {
        match self {
            CpuStorage::F32(v) => Ok(v.as_slice()),
            other => Err(TensorError::DTypeMismatch {
                expected: DType::F32.to_string(),
                got: other.dtype().to_string(),
            }),
        }
    }

    /// Returns the data as an i64 slice.
    ///
    /// # Errors
    /// Returns an error if the storage is not I64.
    pub fn as_i64_slice(&self) -> Result<&[i64]> {
        match self {
            CpuStorage::I64(v) => Ok(v.as_slice()),
            other => Err(TensorError::DTypeMismatch {
                expected: DType::I64.to_string(),
                got: other.dtype().to_string(),
            }),
        }
    }

    /// Returns the dtype of this storage.
    pub fn dtype(&self) -> DType {
        match self {
            CpuStorage::F32(_) => DType::F32,
            CpuStorage::I64(_) => DType::I64,
        }
    }

    /// Raw little-endian bytes of the elements, as they appear in a
    /// hex-encoded dense attribute.
    pub fn to_le_bytes(&self) -> Vec<u8> {
        match self {
            CpuStorage::F32(v) => v.iter().flat_map(|x| x.to_le_bytes()).collect(),
            CpuStorage::I64(v) => v.iter().flat_map(|x| x.to_le_bytes()).collect(),
        }
    }
}

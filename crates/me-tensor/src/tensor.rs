use std::sync::Arc;

use crate::dtype::DType;
use crate::error::{Result, TensorError};
use crate::shape::Shape;
use crate::storage::CpuStorage;

/// A tensor backed by shared CPU storage.
///
/// Holds contiguous, row-major data with an associated shape. Storage is
/// reference counted: clones and reshapes share the same buffer, which is
/// what lets a traced graph hold model weights without copying them.
#[derive(Debug, Clone)]
pub struct Tensor {
    storage: Arc<CpuStorage>,
    shape: Shape,
}

impl Tensor {
    /// Create a new f32 tensor from data and a shape.
    ///
    /// # Panics
    /// Panics if `data.len() != shape.numel()`.
    pub fn new(data: Vec<f32>, shape: Shape) -> Self {
        assert_eq!(
            data.len(),
            shape.numel(),
            "data length {} does not match shape {:?} (numel={})",
            data.len(),
            shape,
            shape.numel()
        );
        Tensor {
            storage: Arc::new(CpuStorage::F32(data)),
            shape,
        }
    }

    /// Create an i64 tensor, checking the element count against the shape.
    pub fn from_i64(data: Vec<i64>, shape: Shape) -> Result<Self> {
        if data.len() != shape.numel() {
            return Err(TensorError::ShapeMismatch {
                expected: shape.dims().to_vec(),
                got: vec![data.len()],
            });
        }
        Ok(Tensor {
            storage: Arc::new(CpuStorage::I64(data)),
            shape,
        })
    }

    /// Create a zero-filled f32 tensor with the given shape.
    pub fn zeros(shape: Shape) -> Self {
        let n = shape.numel();
        Tensor::new(vec![0.0; n], shape)
    }

    /// Create an f32 tensor filled with ones with the given shape.
    pub fn ones(shape: Shape) -> Self {
        let n = shape.numel();
        Tensor::new(vec![1.0; n], shape)
    }

    /// Returns a reference to the tensor's shape.
    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    /// Returns the tensor's data type.
    pub fn dtype(&self) -> DType {
        self.storage.dtype()
    }

    /// Returns the underlying data as an f32 slice.
    pub fn data_f32(&self) -> Result<&[f32]> {
        self.storage.as_f32_slice()
    }

    /// Returns the underlying data as an i64 slice.
    pub fn data_i64(&self) -> Result<&[i64]> {
        self.storage.as_i64_slice()
    }

    /// Identity of the shared buffer. Two tensors with the same `ptr_id`
    /// hold the same elements.
    pub fn ptr_id(&self) -> usize {
        Arc::as_ptr(&self.storage) as usize
    }

    /// Reshape the tensor, returning a new tensor with the same data but
    /// a different shape.
    ///
    /// The total number of elements must remain the same.
    pub fn reshape(&self, new_shape: Shape) -> Result<Tensor> {
        if self.shape.numel() != new_shape.numel() {
            return Err(TensorError::ShapeMismatch {
                expected: self.shape.dims().to_vec(),
                got: new_shape.dims().to_vec(),
            });
        }
        Ok(Tensor {
            storage: Arc::clone(&self.storage),
            shape: new_shape,
        })
    }

    /// Returns the underlying storage reference.
    pub fn storage(&self) -> &CpuStorage {
        &self.storage
    }
}

impl PartialEq for Tensor {
    fn eq(&self, other: &Self) -> bool {
        self.shape == other.shape && (self.ptr_id() == other.ptr_id() || self.storage == other.storage)
    }
}

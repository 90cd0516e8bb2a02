use crate::error::{Result, TensorError};
use std::fmt;

/// A tensor shape, wrapping a vector of dimension sizes.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Shape {
    dims: Vec<usize>,
}

impl Shape {
    /// Create a new shape from a vector of dimensions.
    pub fn new(dims: Vec<usize>) -> Self {
        Shape { dims }
    }

    /// Create a shape from a slice of dimensions.
    pub fn from_slice(dims: &[usize]) -> Self {
        Shape {
            dims: dims.to_vec(),
        }
    }

    /// Number of dimensions (rank).
    pub fn ndim(&self) -> usize {
        self.dims.len()
    }

    /// Total number of elements (product of all dimension sizes).
    pub fn numel(&self) -> usize {
        self.dims.iter().product()
    }

    /// Returns the size of dimension `i`.
    ///
    /// # Panics
    /// Panics if `i >= ndim()`.
    pub fn dim(&self, i: usize) -> usize {
        self.dims[i]
    }

    /// Returns a reference to the underlying dimension sizes.
    pub fn dims(&self) -> &[usize] {
        &self.dims
    }

    /// Computes row-major contiguous strides for this shape.
    ///
    /// For a shape [d0, d1, d2], the strides are [d1*d2, d2, 1].
    pub fn strides(&self) -> Vec<usize> {
        if self.dims.is_empty() {
            return vec![];
        }
        let mut strides = vec![0usize; self.dims.len()];
        strides[self.dims.len() - 1] = 1;
        for i in (0..self.dims.len() - 1).rev() {
            strides[i] = strides[i + 1] * self.dims[i + 1];
        }
        strides
    }

    /// Dimensions joined with `x`, the way MLIR spells a ranked tensor shape.
    ///
    /// A rank-0 shape yields an empty string.
    pub fn mlir_dims(&self) -> String {
        self.dims
            .iter()
            .map(|d| d.to_string())
            .collect::<Vec<_>>()
            .join("x")
    }

    /// Shape with the last `n` dimensions removed.
    pub fn leading(&self, n: usize) -> &[usize] {
        &self.dims[..self.dims.len().saturating_sub(n)]
    }

    /// Applies a permutation, so that output dim `i` is input dim `perm[i]`.
    pub fn permute(&self, perm: &[usize]) -> Result<Shape> {
        if perm.len() != self.ndim() {
            return Err(TensorError::Other(format!(
                "permutation {:?} does not match rank {}",
                perm,
                self.ndim()
            )));
        }
        let mut seen = vec![false; perm.len()];
        let mut dims = Vec::with_capacity(perm.len());
        for &p in perm {
            if p >= self.ndim() || seen[p] {
                return Err(TensorError::InvalidAxis {
                    axis: p,
                    ndim: self.ndim(),
                });
            }
            seen[p] = true;
            dims.push(self.dims[p]);
        }
        Ok(Shape::new(dims))
    }

    /// Strides for reading this shape as if it were broadcast to `target`.
    ///
    /// Leading dimensions missing from `self` and size-1 dimensions that
    /// expand get a stride of 0. The caller must have checked that the
    /// shapes broadcast.
    pub fn broadcast_strides(&self, target: &Shape) -> Vec<usize> {
        let own = self.strides();
        let offset = target.ndim() - self.ndim();
        (0..target.ndim())
            .map(|i| {
                if i < offset {
                    0
                } else {
                    let d = self.dims[i - offset];
                    if d == 1 && target.dims[i] != 1 {
                        0
                    } else {
                        own[i - offset]
                    }
                }
            })
            .collect()
    }

    /// Compute the broadcast shape of `a` and `b` using numpy-style broadcasting rules.
    ///
    /// Rules:
    /// 1. If the shapes have different numbers of dimensions, the shorter shape is
    ///    padded with ones on the left.
    /// 2. For each dimension, sizes must either be equal, or one of them must be 1.
    ///    The output dimension is the maximum of the two.
    pub fn broadcast_shape(a: &Shape, b: &Shape) -> Result<Shape> {
        let max_ndim = a.ndim().max(b.ndim());
        let mut result = Vec::with_capacity(max_ndim);

        for i in 0..max_ndim {
            // Index from the right: dim at position (ndim - 1 - i) from the right
            let da = if i < a.ndim() {
                a.dims[a.ndim() - 1 - i]
            } else {
                1
            };
            let db = if i < b.ndim() {
                b.dims[b.ndim() - 1 - i]
            } else {
                1
            };

            if da == db {
                result.push(da);
            } else if da == 1 {
                result.push(db);
            } else if db == 1 {
                result.push(da);
            } else {
                return Err(TensorError::BroadcastError {
                    a: a.dims.clone(),
                    b: b.dims.clone(),
                });
            }
        }

        result.reverse();
        Ok(Shape::new(result))
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (i, d) in self.dims.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", d)?;
        }
        write!(f, "]")
    }
}

impl From<Vec<usize>> for Shape {
    fn from(dims: Vec<usize>) -> Self {
        Shape::new(dims)
    }
}

impl From<&[usize]> for Shape {
    fn from(dims: &[usize]) -> Self {
        Shape::from_slice(dims)
    }
}

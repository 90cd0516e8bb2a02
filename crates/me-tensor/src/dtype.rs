use std::fmt;

/// Element types a tensor can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DType {
    /// 32-bit floating point.
    F32,
    /// 64-bit signed integer, used for token ids.
    I64,
}

impl DType {
    /// Returns true for the floating point types.
    pub fn is_float(&self) -> bool {
        matches!(self, DType::F32)
    }

    /// Element type spelling used inside MLIR tensor types (`tensor<2x3xf32>`).
    pub fn mlir_name(&self) -> &'static str {
        match self {
            DType::F32 => "f32",
            DType::I64 => "i64",
        }
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.mlir_name())
    }
}

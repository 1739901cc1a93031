//! Sample data types carried by a batch buffer.

use serde::{Deserialize, Serialize};

/// The data type of the samples a `BatchBuffer` carries. Declared per buffer
/// at init time and immutable thereafter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DType {
    /// 32-bit IEEE-754 floating point.
    F32,
    /// 32-bit signed integer.
    I32,
    /// 32-bit unsigned integer.
    U32,
    /// Dtype has not been resolved yet (used only before property
    /// propagation settles it; never a valid buffer dtype).
    Undefined,
}

impl DType {
    /// Returns the width, in bytes, of one sample of this dtype.
    #[must_use]
    pub fn sample_width(self) -> usize {
        match self {
            DType::F32 | DType::I32 | DType::U32 => 4,
            DType::Undefined => 0,
        }
    }
}

impl std::fmt::Display for DType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            DType::F32 => "float32",
            DType::I32 => "int32",
            DType::U32 => "uint32",
            DType::Undefined => "undefined",
        };
        f.write_str(s)
    }
}

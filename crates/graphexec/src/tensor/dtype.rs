//! Enumerates the scalar element types the engine executes against.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Logical dtype identifier shared between tensors and graph signatures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DType {
    /// 32-bit floating point following IEEE-754 semantics.
    F32,
    /// 32-bit signed integer, primarily for indices and sizes.
    I32,
    /// Boolean values, used by predicates and control flow.
    Bool,
}

impl DType {
    /// Returns the number of bytes required per scalar element.
    pub fn size_in_bytes(self) -> usize {
        match self {
            DType::F32 | DType::I32 => 4,
            DType::Bool => 1,
        }
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DType::F32 => write!(f, "float32"),
            DType::I32 => write!(f, "int32"),
            DType::Bool => write!(f, "bool"),
        }
    }
}

//! Tensor shapes with an unknown-dimension wildcard.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Dimension list where `-1` marks a dimension of unknown size.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Shape(Vec<i64>);

impl Shape {
    pub fn new(dims: impl Into<Vec<i64>>) -> Self {
        Shape(dims.into())
    }

    /// The scalar shape.
    pub fn scalar() -> Self {
        Shape(Vec::new())
    }

    pub fn dims(&self) -> &[i64] {
        &self.0
    }

    pub fn rank(&self) -> usize {
        self.0.len()
    }

    /// Total element count; unknown dimensions contribute zero elements.
    pub fn num_elements(&self) -> usize {
        self.0.iter().map(|d| (*d).max(0) as usize).product()
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (i, d) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ",")?;
            }
            write!(f, "{d}")?;
        }
        write!(f, "]")
    }
}

impl From<Vec<i64>> for Shape {
    fn from(dims: Vec<i64>) -> Self {
        Shape(dims)
    }
}

/// Shape equality that lets a `-1` entry on either side match anything.
/// Ranks must still agree.
pub fn shapes_equal_allow_undefined_size(a: &[i64], b: &[i64]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter()
        .zip(b.iter())
        .all(|(x, y)| *x == -1 || *y == -1 || x == y)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wildcard_matches_any_size() {
        assert!(shapes_equal_allow_undefined_size(&[-1, 3], &[2, 3]));
        assert!(shapes_equal_allow_undefined_size(&[2, 3], &[2, -1]));
        assert!(!shapes_equal_allow_undefined_size(&[2, 4], &[2, 3]));
        assert!(!shapes_equal_allow_undefined_size(&[2, 3], &[2, 3, 1]));
    }

    #[test]
    fn num_elements_ignores_unknown_dims() {
        assert_eq!(Shape::new(vec![2, 3]).num_elements(), 6);
        assert_eq!(Shape::new(vec![-1, 3]).num_elements(), 0);
        assert_eq!(Shape::scalar().num_elements(), 1);
    }
}

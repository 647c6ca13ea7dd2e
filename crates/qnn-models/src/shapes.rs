//! Tensor shapes

use crate::error::{QnnModelError, Result};

/// Tensor shape (dimensions, outermost first)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Shape {
    /// Dimensions, e.g. `[channels, height, width]` or `[outputs, inputs]`
    pub dims: Vec<usize>,
}

impl Shape {
    /// Create new shape
    pub const fn new(dims: Vec<usize>) -> Self {
        Self { dims }
    }

    /// 1-D shape
    pub fn vector(len: usize) -> Self {
        Self::new(vec![len])
    }

    /// 3-D volume `(channels, height, width)`
    pub fn volume(channels: usize, height: usize, width: usize) -> Self {
        Self::new(vec![channels, height, width])
    }

    /// Get total number of elements
    #[must_use]
    pub fn total_elements(&self) -> usize {
        self.dims.iter().product()
    }

    /// Interpret as `(channels, height, width)`.
    ///
    /// # Errors
    ///
    /// Returns a config error if the shape is not rank 3.
    pub fn as_volume(&self) -> Result<(usize, usize, usize)> {
        match self.dims.as_slice() {
            &[c, h, w] => Ok((c, h, w)),
            _ => Err(QnnModelError::config(format!(
                "expected a (C, H, W) volume, got {self}"
            ))),
        }
    }
}

impl std::fmt::Display for Shape {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[")?;
        for (i, dim) in self.dims.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{dim}")?;
        }
        write!(f, "]")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shape_total_elements() {
        let shape = Shape::new(vec![32, 16, 3, 3]);
        assert_eq!(shape.total_elements(), 4608);
    }

    #[test]
    fn test_shape_display() {
        let shape = Shape::volume(1, 28, 28);
        assert_eq!(format!("{shape}"), "[1, 28, 28]");
    }

    #[test]
    fn test_as_volume() {
        assert_eq!(Shape::volume(4, 26, 26).as_volume().unwrap(), (4, 26, 26));
        assert!(Shape::vector(10).as_volume().is_err());
    }
}

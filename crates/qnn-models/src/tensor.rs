//! Fixed-shape integer tensors.
//!
//! Weights are `Tensor<i8>`, biases `Tensor<i32>`. Activations travel
//! between layers as `Tensor<i32>` so that un-clamped hidden outputs keep
//! their full register value. Storage is row-major; dimensions never change
//! after construction and there is no mutable access.

use crate::error::{QnnModelError, Result};
use crate::shapes::Shape;
use std::sync::Arc;

/// Immutable row-major tensor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tensor<T> {
    shape: Shape,
    data: Arc<[T]>,
}

impl<T: Copy> Tensor<T> {
    /// Create a tensor, checking that `data` fills `shape`.
    ///
    /// # Errors
    ///
    /// Returns `ShapeMismatch` if the element count differs.
    pub fn new(shape: Shape, data: impl Into<Arc<[T]>>) -> Result<Self> {
        let data = data.into();
        if data.len() != shape.total_elements() {
            return Err(QnnModelError::shape_mismatch(
                format!("tensor {shape}"),
                shape.total_elements(),
                data.len(),
            ));
        }
        Ok(Self { shape, data })
    }

    /// 1-D tensor over `data`
    pub fn from_vec(data: Vec<T>) -> Self {
        let shape = Shape::vector(data.len());
        Self {
            shape,
            data: data.into(),
        }
    }

    /// Tensor shape
    pub const fn shape(&self) -> &Shape {
        &self.shape
    }

    /// Flat row-major elements
    pub fn data(&self) -> &[T] {
        &self.data
    }

    /// Element count
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// True if the tensor has no elements
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Row `index` of a rank-2 tensor (or the `index`-th outermost slab).
    pub fn row(&self, index: usize) -> &[T] {
        let stride = self.shape.dims.iter().skip(1).product::<usize>();
        &self.data[index * stride..(index + 1) * stride]
    }
}

//! Dense float32 tensors

use crate::error::{ModelError, Result};

/// Row-major float32 tensor
#[derive(Debug, Clone, PartialEq)]
pub struct Tensor {
    shape: Vec<usize>,
    data: Vec<f32>,
}

impl Tensor {
    /// Create a tensor, checking the element count against the shape
    pub fn new(shape: Vec<usize>, data: Vec<f32>) -> Result<Self> {
        let numel: usize = shape.iter().product();
        if numel != data.len() {
            return Err(ModelError::InvalidShape {
                expected: shape,
                got: vec![data.len()],
            });
        }
        Ok(Self { shape, data })
    }

    /// Tensor filled with `value`
    pub fn full(shape: Vec<usize>, value: f32) -> Self {
        let numel = shape.iter().product();
        Self {
            shape,
            data: vec![value; numel],
        }
    }

    /// Tensor whose elements are drawn from `f` in row-major order
    pub fn from_fn(shape: Vec<usize>, mut f: impl FnMut() -> f32) -> Self {
        let numel = shape.iter().product();
        let data = (0..numel).map(|_| f()).collect();
        Self { shape, data }
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn data(&self) -> &[f32] {
        &self.data
    }

    /// Number of elements
    pub fn numel(&self) -> usize {
        self.data.len()
    }

    /// Consume the tensor, returning its flat buffer
    pub fn into_data(self) -> Vec<f32> {
        self.data
    }

    /// Exact element-wise equality, shapes included.
    ///
    /// No tolerance: nearly equal tensors are different tensors. NaN never
    /// compares equal, `0.0` and `-0.0` do.
    pub fn is_identical(&self, other: &Tensor) -> bool {
        self.shape == other.shape && self.data == other.data
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shape_mismatch() {
        let result = Tensor::new(vec![2, 3], vec![0.0; 5]);
        assert!(matches!(result, Err(ModelError::InvalidShape { .. })));
    }

    #[test]
    fn test_identical_is_exact() {
        let a = Tensor::new(vec![2], vec![1.0, 2.0]).unwrap();
        let b = Tensor::new(vec![2], vec![1.0, 2.0]).unwrap();
        let near = Tensor::new(vec![2], vec![1.0, 2.0 + f32::EPSILON * 2.0]).unwrap();
        let reshaped = Tensor::new(vec![1, 2], vec![1.0, 2.0]).unwrap();

        assert!(a.is_identical(&b));
        assert!(!a.is_identical(&near));
        assert!(!a.is_identical(&reshaped));
    }

    #[test]
    fn test_nan_never_identical() {
        let a = Tensor::new(vec![1], vec![f32::NAN]).unwrap();
        assert!(!a.is_identical(&a.clone()));
    }
}

//! Quantization error types

use thiserror::Error;

#[derive(Debug, Error)]
pub enum QuantError {
    #[error("Invalid group size {group_size} for {len} elements")]
    InvalidGroupSize { len: usize, group_size: usize },

    #[error("Non-finite value {value} at index {index}")]
    NonFinite { index: usize, value: f32 },

    #[error("Shape {shape:?} does not match {len} elements")]
    ShapeMismatch { shape: Vec<usize>, len: usize },
}

pub type Result<T> = std::result::Result<T, QuantError>;

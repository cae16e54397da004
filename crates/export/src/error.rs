//! Export error types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExportError {
    #[error("Format version {0} is deprecated; use version 1 or 2")]
    DeprecatedFormat(i32),

    #[error("Unknown format version {0}")]
    UnknownVersion(i32),

    #[error("Tensor {tensor} has shape {got:?}, expected {expected:?}")]
    ShapeMismatch {
        tensor: String,
        expected: Vec<usize>,
        got: Vec<usize>,
    },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Format error: {0}")]
    Format(#[from] lmpack_format::FormatError),

    #[error("Quantization error: {0}")]
    Quant(#[from] lmpack_quant::QuantError),

    #[error("Model error: {0}")]
    Model(#[from] lmpack_model::ModelError),

    #[error("Failed to publish container: {0}")]
    Persist(#[from] tempfile::PersistError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ExportError>;

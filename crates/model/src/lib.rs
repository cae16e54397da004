//! lmpack model sources
//!
//! Supplies named float32 tensors and the architecture configuration to the
//! exporter: in-memory [`ModelWeights`], or weights loaded from safetensors
//! checkpoints by [`SafetensorsLoader`].

mod config;
mod error;
mod loader;
mod source;
mod tensor;
mod weights;

pub use config::ModelConfig;
pub use error::{ModelError, Result};
pub use loader::{SafetensorsLoader, TensorNaming};
pub use source::TensorSource;
pub use tensor::Tensor;
pub use weights::{LayerWeights, ModelWeights};

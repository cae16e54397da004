//! Tensor source abstraction

use lmpack_format::WeightKind;

use crate::config::ModelConfig;
use crate::error::Result;
use crate::tensor::Tensor;

/// Anything that can hand the exporter a model's configuration and weights.
///
/// Tensors are borrowed; the exporter never mutates them.
pub trait TensorSource {
    /// Declared model configuration
    fn config(&self) -> &ModelConfig;

    /// The tensor of `kind`, for per-layer kinds at `layer`
    fn weight(&self, kind: WeightKind, layer: Option<usize>) -> Result<&Tensor>;
}

//! In-memory model weights

use lmpack_format::WeightKind;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::config::ModelConfig;
use crate::error::{ModelError, Result};
use crate::source::TensorSource;
use crate::tensor::Tensor;

/// Weights for a single transformer layer
#[derive(Debug, Clone)]
pub struct LayerWeights {
    /// RMSNorm before attention: [dim]
    pub attention_norm: Tensor,
    /// RMSNorm before the feed-forward block: [dim]
    pub ffn_norm: Tensor,
    /// Query projection: [n_heads * head_dim, dim]
    pub wq: Tensor,
    /// Key projection: [n_kv_heads * head_dim, dim]
    pub wk: Tensor,
    /// Value projection: [n_kv_heads * head_dim, dim]
    pub wv: Tensor,
    /// Output projection: [dim, n_heads * head_dim]
    pub wo: Tensor,
    /// Gate projection: [hidden_dim, dim]
    pub w1: Tensor,
    /// Down projection: [dim, hidden_dim]
    pub w2: Tensor,
    /// Up projection: [hidden_dim, dim]
    pub w3: Tensor,
}

/// Complete model weights
#[derive(Debug, Clone)]
pub struct ModelWeights {
    /// Model configuration
    pub config: ModelConfig,
    /// Token embedding table: [vocab_size, dim]
    pub tok_embeddings: Tensor,
    /// All transformer layers
    pub layers: Vec<LayerWeights>,
    /// Final RMSNorm: [dim]
    pub norm: Tensor,
    /// Classifier: [vocab_size, dim], may equal `tok_embeddings`
    pub output: Tensor,
}

impl ModelWeights {
    /// Random weights for tests and demos.
    ///
    /// The classifier is a copy of the embedding when the config ties them.
    /// The configuration is not validated here; a degenerate one (no heads)
    /// yields empty attention matrices that the exporter later rejects.
    pub fn random(config: ModelConfig, hidden_dim: usize, seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let dim = config.dim;
        let q_dim = config.n_heads * config.head_dim();
        let kv_dim = config.kv_dim();

        let layers = (0..config.n_layers)
            .map(|_| LayerWeights {
                attention_norm: random_norm(&mut rng, dim),
                ffn_norm: random_norm(&mut rng, dim),
                wq: random_linear(&mut rng, q_dim, dim),
                wk: random_linear(&mut rng, kv_dim, dim),
                wv: random_linear(&mut rng, kv_dim, dim),
                wo: random_linear(&mut rng, dim, q_dim),
                w1: random_linear(&mut rng, hidden_dim, dim),
                w2: random_linear(&mut rng, dim, hidden_dim),
                w3: random_linear(&mut rng, hidden_dim, dim),
            })
            .collect();

        let tok_embeddings = random_linear(&mut rng, config.vocab_size, dim);
        let output = if config.tie_word_embeddings {
            tok_embeddings.clone()
        } else {
            random_linear(&mut rng, config.vocab_size, dim)
        };

        Self {
            tok_embeddings,
            layers,
            norm: random_norm(&mut rng, dim),
            output,
            config,
        }
    }

    /// Get number of layers
    pub fn num_layers(&self) -> usize {
        self.layers.len()
    }

    fn layer(&self, kind: WeightKind, layer: Option<usize>) -> Result<&LayerWeights> {
        layer
            .and_then(|idx| self.layers.get(idx))
            .ok_or_else(|| ModelError::MissingTensor(missing_name(kind, layer)))
    }
}

impl TensorSource for ModelWeights {
    fn config(&self) -> &ModelConfig {
        &self.config
    }

    fn weight(&self, kind: WeightKind, layer: Option<usize>) -> Result<&Tensor> {
        match kind {
            WeightKind::FinalNorm => Ok(&self.norm),
            WeightKind::TokenEmbedding => Ok(&self.tok_embeddings),
            WeightKind::Output => Ok(&self.output),
            WeightKind::AttentionNorm => Ok(&self.layer(kind, layer)?.attention_norm),
            WeightKind::FfnNorm => Ok(&self.layer(kind, layer)?.ffn_norm),
            WeightKind::Wq => Ok(&self.layer(kind, layer)?.wq),
            WeightKind::Wk => Ok(&self.layer(kind, layer)?.wk),
            WeightKind::Wv => Ok(&self.layer(kind, layer)?.wv),
            WeightKind::Wo => Ok(&self.layer(kind, layer)?.wo),
            WeightKind::W1 => Ok(&self.layer(kind, layer)?.w1),
            WeightKind::W2 => Ok(&self.layer(kind, layer)?.w2),
            WeightKind::W3 => Ok(&self.layer(kind, layer)?.w3),
        }
    }
}

fn missing_name(kind: WeightKind, layer: Option<usize>) -> String {
    match layer {
        Some(idx) => format!("layers.{}.{}", idx, kind.name()),
        None => format!("{} (no layer index)", kind.name()),
    }
}

/// Norm gains scattered around one
fn random_norm(rng: &mut StdRng, dim: usize) -> Tensor {
    Tensor::from_fn(vec![dim], || 1.0 + rng.gen_range(-0.1f32..0.1))
}

/// Kaiming-like uniform init for a [rows, cols] matrix
fn random_linear(rng: &mut StdRng, rows: usize, cols: usize) -> Tensor {
    let bound = (2.0 / cols.max(1) as f32).sqrt();
    Tensor::from_fn(vec![rows, cols], || rng.gen_range(-bound..bound))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(tied: bool) -> ModelConfig {
        ModelConfig {
            dim: 8,
            n_layers: 2,
            n_heads: 2,
            n_kv_heads: Some(1),
            vocab_size: 10,
            max_seq_len: 4,
            tie_word_embeddings: tied,
        }
    }

    #[test]
    fn test_random_shapes() {
        let weights = ModelWeights::random(config(false), 16, 7);

        assert_eq!(weights.num_layers(), 2);
        assert_eq!(weights.tok_embeddings.shape(), &[10, 8]);
        assert_eq!(weights.layers[0].wk.shape(), &[4, 8]);
        assert_eq!(weights.layers[1].w2.shape(), &[8, 16]);
        assert!(!weights.tok_embeddings.is_identical(&weights.output));
    }

    #[test]
    fn test_random_is_seeded() {
        let a = ModelWeights::random(config(false), 16, 42);
        let b = ModelWeights::random(config(false), 16, 42);
        assert!(a.layers[1].w3.is_identical(&b.layers[1].w3));
    }

    #[test]
    fn test_tied_embeddings() {
        let weights = ModelWeights::random(config(true), 16, 7);
        assert!(weights.tok_embeddings.is_identical(&weights.output));
    }

    #[test]
    fn test_source_lookup() {
        let weights = ModelWeights::random(config(false), 16, 7);

        let w3 = weights.weight(WeightKind::W3, Some(1)).unwrap();
        assert!(w3.is_identical(&weights.layers[1].w3));

        assert!(matches!(
            weights.weight(WeightKind::Wq, Some(5)),
            Err(ModelError::MissingTensor(_))
        ));
        assert!(matches!(
            weights.weight(WeightKind::Wq, None),
            Err(ModelError::MissingTensor(_))
        ));
    }

    #[test]
    fn test_random_with_zero_heads() {
        let config = ModelConfig {
            n_heads: 0,
            n_kv_heads: None,
            ..config(false)
        };
        let weights = ModelWeights::random(config, 16, 7);
        assert_eq!(weights.layers[0].wq.shape(), &[0, 8]);
        assert_eq!(weights.layers[0].wk.numel(), 0);
        assert!(weights.config.validate().is_err());
    }
}

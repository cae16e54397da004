//! Model configuration

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{ModelError, Result};

/// Declared architecture of a Llama-style model.
///
/// Reads both llama2.c-style keys (`dim`, `n_layers`, ...) and HuggingFace
/// `config.json` keys through aliases. The feed-forward width is not part
/// of the configuration; exporters derive it from the weights.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Hidden size (embedding dimension)
    #[serde(alias = "hidden_size")]
    pub dim: usize,

    /// Number of transformer layers
    #[serde(alias = "num_hidden_layers")]
    pub n_layers: usize,

    /// Number of attention heads
    #[serde(alias = "num_attention_heads")]
    pub n_heads: usize,

    /// Number of key-value heads (GQA); defaults to `n_heads`
    #[serde(default, alias = "num_key_value_heads")]
    pub n_kv_heads: Option<usize>,

    /// Vocabulary size
    pub vocab_size: usize,

    /// Maximum sequence length
    #[serde(default = "default_max_seq_len", alias = "max_position_embeddings")]
    pub max_seq_len: usize,

    /// Whether the classifier reuses the token embedding
    #[serde(default)]
    pub tie_word_embeddings: bool,
}

fn default_max_seq_len() -> usize { 2048 }

impl ModelConfig {
    /// Load config from a JSON file
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// Number of key-value heads, falling back to `n_heads`
    pub fn kv_heads(&self) -> usize {
        self.n_kv_heads.unwrap_or(self.n_heads)
    }

    /// Head dimension, zero when there are no heads
    pub fn head_dim(&self) -> usize {
        self.dim.checked_div(self.n_heads).unwrap_or(0)
    }

    /// Width of the key/value projections
    pub fn kv_dim(&self) -> usize {
        self.kv_heads().saturating_mul(self.head_dim())
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.n_heads == 0 || self.kv_heads() == 0 {
            return Err(ModelError::Config("head counts must be non-zero".to_string()));
        }
        if self.dim % self.n_heads != 0 {
            return Err(ModelError::Config(format!(
                "dim ({}) must be divisible by n_heads ({})",
                self.dim, self.n_heads
            )));
        }
        if self.n_heads % self.kv_heads() != 0 {
            return Err(ModelError::Config(format!(
                "n_heads ({}) must be divisible by n_kv_heads ({})",
                self.n_heads,
                self.kv_heads()
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_llama2c_keys() {
        let json = r#"{"dim": 288, "n_layers": 6, "n_heads": 6, "vocab_size": 32000, "max_seq_len": 256}"#;
        let config: ModelConfig = serde_json::from_str(json).unwrap();

        assert_eq!(config.dim, 288);
        assert_eq!(config.kv_heads(), 6);
        assert_eq!(config.head_dim(), 48);
        assert!(!config.tie_word_embeddings);
        config.validate().unwrap();
    }

    #[test]
    fn test_huggingface_keys() {
        let json = r#"{
            "architectures": ["LlamaForCausalLM"],
            "hidden_size": 2048,
            "intermediate_size": 5632,
            "num_attention_heads": 32,
            "num_hidden_layers": 22,
            "num_key_value_heads": 4,
            "vocab_size": 32000,
            "max_position_embeddings": 2048,
            "rms_norm_eps": 1e-05,
            "tie_word_embeddings": false
        }"#;
        let config: ModelConfig = serde_json::from_str(json).unwrap();

        assert_eq!(config.dim, 2048);
        assert_eq!(config.n_layers, 22);
        assert_eq!(config.kv_heads(), 4);
        assert_eq!(config.kv_dim(), 256);
        config.validate().unwrap();
    }

    #[test]
    fn test_default_max_seq_len() {
        let json = r#"{"dim": 8, "n_layers": 1, "n_heads": 2, "vocab_size": 10}"#;
        let config: ModelConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.max_seq_len, 2048);
    }

    #[test]
    fn test_validate_rejects_uneven_heads() {
        let config = ModelConfig {
            dim: 10,
            n_layers: 1,
            n_heads: 3,
            n_kv_heads: None,
            vocab_size: 4,
            max_seq_len: 4,
            tie_word_embeddings: false,
        };
        assert!(matches!(config.validate(), Err(ModelError::Config(_))));

        let config = ModelConfig {
            dim: 12,
            n_heads: 3,
            n_kv_heads: Some(2),
            ..config
        };
        assert!(matches!(config.validate(), Err(ModelError::Config(_))));
    }

    #[test]
    fn test_zero_heads_does_not_divide() {
        let config = ModelConfig {
            dim: 8,
            n_layers: 1,
            n_heads: 0,
            n_kv_heads: None,
            vocab_size: 4,
            max_seq_len: 4,
            tie_word_embeddings: false,
        };
        assert_eq!(config.head_dim(), 0);
        assert_eq!(config.kv_dim(), 0);
        assert!(matches!(config.validate(), Err(ModelError::Config(_))));
    }
}

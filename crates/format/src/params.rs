//! Architecture hyperparameters stored in the container header

use crate::constants::PARAM_COUNT;
use crate::error::{FormatError, Result};

/// The seven hyperparameters the runtime needs to size every tensor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Hyperparams {
    /// Model width (embedding dimension)
    pub dim: usize,
    /// Feed-forward expansion width
    pub hidden_dim: usize,
    /// Number of transformer layers
    pub n_layers: usize,
    /// Number of query heads
    pub n_heads: usize,
    /// Number of key/value heads (GQA)
    pub n_kv_heads: usize,
    /// Vocabulary size
    pub vocab_size: usize,
    /// Maximum sequence length
    pub max_seq_len: usize,
}

/// Header field names, in on-disk order
pub const FIELD_NAMES: [&str; PARAM_COUNT] = [
    "dim",
    "hidden_dim",
    "n_layers",
    "n_heads",
    "n_kv_heads",
    "vocab_size",
    "max_seq_len",
];

impl Hyperparams {
    /// Fields in on-disk order
    pub fn fields(&self) -> [usize; PARAM_COUNT] {
        [
            self.dim,
            self.hidden_dim,
            self.n_layers,
            self.n_heads,
            self.n_kv_heads,
            self.vocab_size,
            self.max_seq_len,
        ]
    }

    /// Build from fields in on-disk order
    pub fn from_fields(fields: [usize; PARAM_COUNT]) -> Self {
        let [dim, hidden_dim, n_layers, n_heads, n_kv_heads, vocab_size, max_seq_len] = fields;
        Self {
            dim,
            hidden_dim,
            n_layers,
            n_heads,
            n_kv_heads,
            vocab_size,
            max_seq_len,
        }
    }

    /// Fields converted to the i32 values written to disk
    pub fn to_i32_fields(&self) -> Result<[i32; PARAM_COUNT]> {
        let mut out = [0i32; PARAM_COUNT];
        for (i, value) in self.fields().into_iter().enumerate() {
            out[i] = i32::try_from(value).map_err(|_| FormatError::FieldOutOfRange {
                field: FIELD_NAMES[i],
                value,
            })?;
        }
        Ok(out)
    }

    /// Per-head dimension
    pub fn head_size(&self) -> usize {
        if self.n_heads == 0 {
            0
        } else {
            self.dim / self.n_heads
        }
    }

    /// Width of the key/value projections
    pub fn kv_dim(&self) -> usize {
        self.n_kv_heads.saturating_mul(self.head_size())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tiny() -> Hyperparams {
        Hyperparams {
            dim: 8,
            hidden_dim: 16,
            n_layers: 1,
            n_heads: 2,
            n_kv_heads: 1,
            vocab_size: 10,
            max_seq_len: 4,
        }
    }

    #[test]
    fn test_field_order() {
        assert_eq!(tiny().fields(), [8, 16, 1, 2, 1, 10, 4]);
        assert_eq!(Hyperparams::from_fields(tiny().fields()), tiny());
    }

    #[test]
    fn test_gqa_dims() {
        let p = tiny();
        assert_eq!(p.head_size(), 4);
        assert_eq!(p.kv_dim(), 4);
    }

    #[test]
    fn test_field_out_of_range() {
        let mut p = tiny();
        p.vocab_size = i32::MAX as usize + 1;
        match p.to_i32_fields() {
            Err(FormatError::FieldOutOfRange { field, .. }) => assert_eq!(field, "vocab_size"),
            other => panic!("expected FieldOutOfRange, got {:?}", other),
        }
    }
}

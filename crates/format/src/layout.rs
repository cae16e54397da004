//! Canonical weight ordering
//!
//! The order of tensor records after the header is a format contract the
//! runtime depends on. It lives here as static tables, one per version,
//! so it can be audited and versioned independently of the code that walks
//! model weights. Per-layer kinds expand across every layer, in layer order,
//! before the next kind starts.

use crate::constants::FormatVersion;
use crate::error::{FormatError, Result};
use crate::params::Hyperparams;

/// A class of weight tensor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WeightKind {
    /// RMSNorm before attention (per layer)
    AttentionNorm,
    /// RMSNorm before the feed-forward block (per layer)
    FfnNorm,
    /// RMSNorm after the last layer
    FinalNorm,
    /// Token embedding table
    TokenEmbedding,
    /// Query projection (per layer)
    Wq,
    /// Key projection (per layer)
    Wk,
    /// Value projection (per layer)
    Wv,
    /// Attention output projection (per layer)
    Wo,
    /// Feed-forward gate projection (per layer)
    W1,
    /// Feed-forward down projection (per layer)
    W2,
    /// Feed-forward up projection (per layer)
    W3,
    /// Classifier (output projection)
    Output,
}

impl WeightKind {
    /// Whether one tensor of this kind exists per transformer layer
    pub fn is_per_layer(self) -> bool {
        !matches!(
            self,
            WeightKind::FinalNorm | WeightKind::TokenEmbedding | WeightKind::Output
        )
    }

    /// Row-major shape implied by the hyperparameters
    pub fn shape(self, p: &Hyperparams) -> Vec<usize> {
        let q_dim = p.n_heads.saturating_mul(p.head_size());
        match self {
            WeightKind::AttentionNorm | WeightKind::FfnNorm | WeightKind::FinalNorm => {
                vec![p.dim]
            }
            WeightKind::TokenEmbedding | WeightKind::Output => vec![p.vocab_size, p.dim],
            WeightKind::Wq => vec![q_dim, p.dim],
            WeightKind::Wk | WeightKind::Wv => vec![p.kv_dim(), p.dim],
            WeightKind::Wo => vec![p.dim, q_dim],
            WeightKind::W1 | WeightKind::W3 => vec![p.hidden_dim, p.dim],
            WeightKind::W2 => vec![p.dim, p.hidden_dim],
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            WeightKind::AttentionNorm => "attention_norm",
            WeightKind::FfnNorm => "ffn_norm",
            WeightKind::FinalNorm => "norm",
            WeightKind::TokenEmbedding => "tok_embeddings",
            WeightKind::Wq => "wq",
            WeightKind::Wk => "wk",
            WeightKind::Wv => "wv",
            WeightKind::Wo => "wo",
            WeightKind::W1 => "w1",
            WeightKind::W2 => "w2",
            WeightKind::W3 => "w3",
            WeightKind::Output => "output",
        }
    }
}

/// On-disk encoding of one tensor record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Encoding {
    /// Little-endian float32 values
    F32,
    /// Q8_0: int8 values followed by one float32 scale per group
    Q8,
}

/// A concrete tensor position: kind plus layer index for per-layer kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WeightSlot {
    pub kind: WeightKind,
    pub layer: Option<usize>,
}

impl WeightSlot {
    pub fn global(kind: WeightKind) -> Self {
        Self { kind, layer: None }
    }

    pub fn layer(kind: WeightKind, layer: usize) -> Self {
        Self {
            kind,
            layer: Some(layer),
        }
    }
}

impl std::fmt::Display for WeightSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.layer {
            Some(layer) => write!(f, "layers.{}.{}", layer, self.kind.name()),
            None => write!(f, "{}", self.kind.name()),
        }
    }
}

/// One entry of the serialized tensor list
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WeightRecord {
    pub slot: WeightSlot,
    pub encoding: Encoding,
    pub shape: Vec<usize>,
}

impl WeightRecord {
    /// Number of elements, `None` if it overflows `usize`
    pub fn numel(&self) -> Option<usize> {
        checked_numel(&self.shape)
    }

    /// Serialized size in bytes; `group_size` is only consulted for Q8 records
    pub fn byte_len(&self, group_size: usize) -> Option<usize> {
        encoded_len(self.encoding, &self.shape, group_size)
    }
}

/// Version 1 ordering: everything in float32
const FLOAT32_ORDER: &[(WeightKind, Encoding)] = &[
    (WeightKind::AttentionNorm, Encoding::F32),
    (WeightKind::FfnNorm, Encoding::F32),
    (WeightKind::FinalNorm, Encoding::F32),
    (WeightKind::TokenEmbedding, Encoding::F32),
    (WeightKind::Wq, Encoding::F32),
    (WeightKind::Wk, Encoding::F32),
    (WeightKind::Wv, Encoding::F32),
    (WeightKind::Wo, Encoding::F32),
    (WeightKind::W1, Encoding::F32),
    (WeightKind::W2, Encoding::F32),
    (WeightKind::W3, Encoding::F32),
    (WeightKind::Output, Encoding::F32),
];

/// Version 2 ordering: norms stay float32 and lead, matrices follow quantized
const Q8_ORDER: &[(WeightKind, Encoding)] = &[
    (WeightKind::AttentionNorm, Encoding::F32),
    (WeightKind::FfnNorm, Encoding::F32),
    (WeightKind::FinalNorm, Encoding::F32),
    (WeightKind::TokenEmbedding, Encoding::Q8),
    (WeightKind::Wq, Encoding::Q8),
    (WeightKind::Wk, Encoding::Q8),
    (WeightKind::Wv, Encoding::Q8),
    (WeightKind::Wo, Encoding::Q8),
    (WeightKind::W1, Encoding::Q8),
    (WeightKind::W2, Encoding::Q8),
    (WeightKind::W3, Encoding::Q8),
    (WeightKind::Output, Encoding::Q8),
];

/// The ordering table for a version
pub fn order_table(version: FormatVersion) -> &'static [(WeightKind, Encoding)] {
    match version {
        FormatVersion::Float32 => FLOAT32_ORDER,
        FormatVersion::Q8 => Q8_ORDER,
    }
}

/// Expand the ordering table into concrete records.
///
/// The output projection is dropped when the classifier is shared with the
/// token embedding.
pub fn weight_order(
    version: FormatVersion,
    params: &Hyperparams,
    shared_classifier: bool,
) -> Vec<WeightRecord> {
    let mut records = Vec::new();
    for &(kind, encoding) in order_table(version) {
        if kind == WeightKind::Output && shared_classifier {
            continue;
        }
        let shape = kind.shape(params);
        if kind.is_per_layer() {
            records.extend((0..params.n_layers).map(|layer| WeightRecord {
                slot: WeightSlot::layer(kind, layer),
                encoding,
                shape: shape.clone(),
            }));
        } else {
            records.push(WeightRecord {
                slot: WeightSlot::global(kind),
                encoding,
                shape,
            });
        }
    }
    records
}

/// Total payload bytes following the header.
///
/// Walks the ordering table without materializing records, so a header
/// with absurd dimensions costs nothing to size. Fails with `SizeOverflow`
/// when the total does not fit in `usize`.
pub fn payload_len(
    version: FormatVersion,
    params: &Hyperparams,
    shared_classifier: bool,
    group_size: usize,
) -> Result<usize> {
    let mut total = 0usize;
    for &(kind, encoding) in order_table(version) {
        if kind == WeightKind::Output && shared_classifier {
            continue;
        }
        let count = if kind.is_per_layer() { params.n_layers } else { 1 };
        total = encoded_len(encoding, &kind.shape(params), group_size)
            .and_then(|len| len.checked_mul(count))
            .and_then(|len| total.checked_add(len))
            .ok_or(FormatError::SizeOverflow)?;
    }
    Ok(total)
}

fn checked_numel(shape: &[usize]) -> Option<usize> {
    shape.iter().try_fold(1usize, |acc, &dim| acc.checked_mul(dim))
}

fn encoded_len(encoding: Encoding, shape: &[usize], group_size: usize) -> Option<usize> {
    let numel = checked_numel(shape)?;
    match encoding {
        Encoding::F32 => numel.checked_mul(4),
        Encoding::Q8 => {
            let groups = if group_size == 0 { 0 } else { numel / group_size };
            groups.checked_mul(4)?.checked_add(numel)
        }
    }
}

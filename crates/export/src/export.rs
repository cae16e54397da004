//! Export orchestration

use std::io::{BufWriter, Write};
use std::path::Path;

use lmpack_format::layout::{self, Encoding, WeightKind, WeightRecord};
use lmpack_format::{
    ContainerWriter, FormatError, FormatVersion, Header, Hyperparams, DEFAULT_GROUP_SIZE,
    HEADER_LEN,
};
use lmpack_model::TensorSource;
use lmpack_quant::{fit_group_size, quantize_q8_0, QuantError};
use tempfile::NamedTempFile;

use crate::error::{ExportError, Result};

/// What to produce
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExportOptions {
    /// Raw container version number
    pub version: i32,
    /// Preferred Q8_0 group size, reduced to divide `dim` (version 2 only)
    pub group_size: usize,
}

impl Default for ExportOptions {
    fn default() -> Self {
        Self::float32()
    }
}

impl ExportOptions {
    /// Full-fidelity float32 export
    pub fn float32() -> Self {
        Self {
            version: FormatVersion::Float32.to_i32(),
            group_size: DEFAULT_GROUP_SIZE,
        }
    }

    /// Q8_0 export with a preferred group size
    pub fn q8(group_size: usize) -> Self {
        Self {
            version: FormatVersion::Q8.to_i32(),
            group_size,
        }
    }
}

/// Outcome of one export
#[derive(Debug, Clone, PartialEq)]
pub struct ExportSummary {
    pub version: FormatVersion,
    pub params: Hyperparams,
    pub shared_classifier: bool,
    /// Q8_0 group size actually used
    pub group_size: Option<usize>,
    /// Tensor records written after the header
    pub tensor_count: usize,
    /// Total container size
    pub bytes_written: u64,
    /// Worst reconstruction error over all quantized tensors
    pub max_quant_error: Option<f32>,
}

/// Map a raw version number to a writable format, before any I/O
pub fn resolve_version(version: i32) -> Result<FormatVersion> {
    FormatVersion::from_i32(version).map_err(|e| match e {
        FormatError::DeprecatedVersion(v) => ExportError::DeprecatedFormat(v),
        FormatError::UnknownVersion(v) => ExportError::UnknownVersion(v),
        other => ExportError::Format(other),
    })
}

/// Header hyperparameters of a source.
///
/// `hidden_dim` is not declared by the configuration; it is the row count
/// of the first layer's `w3`.
pub fn derive_hyperparams<S: TensorSource + ?Sized>(source: &S) -> Result<Hyperparams> {
    let config = source.config();
    config.validate()?;

    let w3 = source.weight(WeightKind::W3, Some(0))?;
    let hidden_dim = match w3.shape() {
        [rows, _] => *rows,
        other => {
            return Err(ExportError::ShapeMismatch {
                tensor: "layers.0.w3".to_string(),
                expected: vec![0, config.dim],
                got: other.to_vec(),
            })
        }
    };

    Ok(Hyperparams {
        dim: config.dim,
        hidden_dim,
        n_layers: config.n_layers,
        n_heads: config.n_heads,
        n_kv_heads: config.kv_heads(),
        vocab_size: config.vocab_size,
        max_seq_len: config.max_seq_len,
    })
}

/// Whether the classifier is exactly the token embedding.
///
/// Exact element-wise equality: a nearly equal pair is not shared.
pub fn is_shared_classifier<S: TensorSource + ?Sized>(source: &S) -> Result<bool> {
    let embedding = source.weight(WeightKind::TokenEmbedding, None)?;
    let output = source.weight(WeightKind::Output, None)?;
    Ok(embedding.is_identical(output))
}

/// Everything known before the first byte is written
#[derive(Debug, Clone)]
pub struct ExportPlan {
    pub header: Header,
    pub records: Vec<WeightRecord>,
    total_len: usize,
}

impl ExportPlan {
    /// Resolve version, header and record list, checking every tensor shape
    pub fn new<S: TensorSource + ?Sized>(source: &S, options: &ExportOptions) -> Result<Self> {
        let version = resolve_version(options.version)?;
        let params = derive_hyperparams(source)?;
        let shared_classifier = is_shared_classifier(source)?;

        let header = match version {
            FormatVersion::Float32 => Header::float32(params, shared_classifier),
            FormatVersion::Q8 => {
                if options.group_size == 0 {
                    return Err(QuantError::InvalidGroupSize {
                        len: params.dim,
                        group_size: 0,
                    }
                    .into());
                }
                let group_size = fit_group_size(params.dim, options.group_size);
                if group_size != options.group_size {
                    tracing::info!(
                        requested = options.group_size,
                        group_size,
                        dim = params.dim,
                        "reduced group size to divide dim"
                    );
                }
                Header::q8(params, shared_classifier, group_size)
            }
        };

        let records = layout::weight_order(version, &params, shared_classifier);
        for record in &records {
            let tensor = source.weight(record.slot.kind, record.slot.layer)?;
            if tensor.shape() != record.shape.as_slice() {
                return Err(ExportError::ShapeMismatch {
                    tensor: record.slot.to_string(),
                    expected: record.shape.clone(),
                    got: tensor.shape().to_vec(),
                });
            }
        }

        let payload_len = layout::payload_len(
            header.version,
            &header.params,
            header.shared_classifier,
            header.group_size.unwrap_or(0),
        )?;
        let total_len = payload_len
            .checked_add(HEADER_LEN)
            .ok_or(FormatError::SizeOverflow)?;

        Ok(Self {
            header,
            records,
            total_len,
        })
    }

    /// Expected container size in bytes
    pub fn total_len(&self) -> usize {
        self.total_len
    }

    /// Stream the container into `output`
    fn write<S, W>(&self, source: &S, output: W) -> Result<(W, ExportSummary)>
    where
        S: TensorSource + ?Sized,
        W: Write,
    {
        let mut writer = ContainerWriter::new(output);
        writer.write_header(&self.header)?;

        let mut max_quant_error: Option<f32> = None;
        for record in &self.records {
            let tensor = source.weight(record.slot.kind, record.slot.layer)?;
            match record.encoding {
                Encoding::F32 => {
                    tracing::debug!(tensor = %record.slot, numel = tensor.numel(), "writing f32");
                    writer.write_tensor_f32(tensor.data())?;
                }
                Encoding::Q8 => {
                    let group_size = self.header.group_size.unwrap_or(0);
                    let quantized = quantize_q8_0(tensor.data(), tensor.shape(), group_size)?;
                    tracing::debug!(
                        tensor = %record.slot,
                        max_error = quantized.max_error,
                        "quantized Q8_0"
                    );
                    max_quant_error = Some(
                        max_quant_error.map_or(quantized.max_error, |m| m.max(quantized.max_error)),
                    );
                    writer.write_quantized(&quantized.values, &quantized.scales)?;
                }
            }
        }

        let (output, bytes_written) = writer.finish()?;
        debug_assert_eq!(bytes_written as usize, self.total_len());

        if let Some(max_error) = max_quant_error {
            tracing::info!(max_error, "max quantization error over all tensors");
        }

        let summary = ExportSummary {
            version: self.header.version,
            params: self.header.params,
            shared_classifier: self.header.shared_classifier,
            group_size: self.header.group_size,
            tensor_count: self.records.len(),
            bytes_written,
            max_quant_error,
        };
        Ok((output, summary))
    }
}

/// Export into any writer; nothing is written if planning fails
pub fn export_to_writer<S, W>(source: &S, output: W, options: &ExportOptions) -> Result<(W, ExportSummary)>
where
    S: TensorSource + ?Sized,
    W: Write,
{
    let plan = ExportPlan::new(source, options)?;
    plan.write(source, output)
}

/// Export to `path`.
///
/// The container is written to a temporary file next to `path` and renamed
/// over it only after every byte has been flushed and synced. On failure
/// the temporary file is removed and `path` is left untouched.
pub fn export<S, P>(source: &S, path: P, options: &ExportOptions) -> Result<ExportSummary>
where
    S: TensorSource + ?Sized,
    P: AsRef<Path>,
{
    let path = path.as_ref();
    let plan = ExportPlan::new(source, options)?;

    tracing::info!(
        path = %path.display(),
        version = %plan.header.version,
        shared_classifier = plan.header.shared_classifier,
        tensors = plan.records.len(),
        bytes = plan.total_len(),
        "exporting"
    );

    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let tmp = NamedTempFile::new_in(dir)?;

    let (buffered, summary) = plan.write(source, BufWriter::new(tmp))?;
    let tmp = buffered.into_inner().map_err(|e| e.into_error())?;
    tmp.as_file().sync_all()?;
    tmp.persist(path)?;

    tracing::info!(path = %path.display(), bytes = summary.bytes_written, "wrote container");
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use lmpack_model::{ModelConfig, ModelWeights};

    fn config(tied: bool) -> ModelConfig {
        ModelConfig {
            dim: 8,
            n_layers: 1,
            n_heads: 2,
            n_kv_heads: Some(2),
            vocab_size: 10,
            max_seq_len: 4,
            tie_word_embeddings: tied,
        }
    }

    #[test]
    fn test_resolve_version() {
        assert_eq!(resolve_version(1).unwrap(), FormatVersion::Float32);
        assert_eq!(resolve_version(2).unwrap(), FormatVersion::Q8);
        assert!(matches!(resolve_version(0), Err(ExportError::DeprecatedFormat(0))));
        assert!(matches!(resolve_version(99), Err(ExportError::UnknownVersion(99))));
    }

    #[test]
    fn test_hidden_dim_from_w3() {
        let weights = ModelWeights::random(config(false), 24, 1);
        let params = derive_hyperparams(&weights).unwrap();
        assert_eq!(params.hidden_dim, 24);
        assert_eq!(params.n_kv_heads, 2);
        assert_eq!(params.max_seq_len, 4);
    }

    #[test]
    fn test_shared_classifier_detection() {
        let tied = ModelWeights::random(config(true), 16, 1);
        assert!(is_shared_classifier(&tied).unwrap());

        let untied = ModelWeights::random(config(false), 16, 1);
        assert!(!is_shared_classifier(&untied).unwrap());
    }

    #[test]
    fn test_plan_rejects_wrong_shape() {
        let mut weights = ModelWeights::random(config(false), 16, 1);
        weights.layers[0].wo = lmpack_model::Tensor::full(vec![8, 4], 0.0);

        match ExportPlan::new(&weights, &ExportOptions::float32()) {
            Err(ExportError::ShapeMismatch { tensor, .. }) => assert_eq!(tensor, "layers.0.wo"),
            other => panic!("expected ShapeMismatch, got {:?}", other.map(|p| p.header)),
        }
    }

    #[test]
    fn test_plan_fits_group_size() {
        let weights = ModelWeights::random(config(false), 16, 1);
        let plan = ExportPlan::new(&weights, &ExportOptions::q8(64)).unwrap();
        assert_eq!(plan.header.group_size, Some(8));
    }

    #[test]
    fn test_plan_rejects_zero_group_size() {
        let weights = ModelWeights::random(config(false), 16, 1);
        assert!(matches!(
            ExportPlan::new(&weights, &ExportOptions::q8(0)),
            Err(ExportError::Quant(QuantError::InvalidGroupSize { group_size: 0, .. }))
        ));
    }

    #[test]
    fn test_non_finite_weight_fails_q8_only() {
        let mut weights = ModelWeights::random(config(false), 16, 1);
        let mut data = weights.layers[0].wv.data().to_vec();
        data[3] = f32::NAN;
        weights.layers[0].wv = lmpack_model::Tensor::new(vec![8, 8], data).unwrap();

        assert!(matches!(
            export_to_writer(&weights, Vec::new(), &ExportOptions::q8(8)),
            Err(ExportError::Quant(QuantError::NonFinite { index: 3, .. }))
        ));
        // float32 export copies the bits untouched
        assert!(export_to_writer(&weights, Vec::new(), &ExportOptions::float32()).is_ok());
    }

    #[test]
    fn test_writer_export_matches_plan_len() {
        let weights = ModelWeights::random(config(false), 16, 1);
        for options in [ExportOptions::float32(), ExportOptions::q8(4)] {
            let plan = ExportPlan::new(&weights, &options).unwrap();
            let (buf, summary) = export_to_writer(&weights, Vec::new(), &options).unwrap();
            assert_eq!(buf.len(), plan.total_len());
            assert_eq!(summary.bytes_written as usize, buf.len());
        }
    }
}

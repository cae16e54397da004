//! Safetensors model weight loading

use std::path::{Path, PathBuf};
use std::str::FromStr;

use half::{bf16, f16};
use lmpack_format::WeightKind;
use memmap2::Mmap;
use safetensors::SafeTensors;

use crate::config::ModelConfig;
use crate::error::{ModelError, Result};
use crate::tensor::Tensor;
use crate::weights::{LayerWeights, ModelWeights};

/// Tensor naming scheme of a checkpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TensorNaming {
    /// Meta / llama2.c names (`layers.0.attention.wq.weight`)
    #[default]
    Meta,
    /// HuggingFace transformers names (`model.layers.0.self_attn.q_proj.weight`)
    HuggingFace,
}

impl FromStr for TensorNaming {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "meta" | "llama2c" => Ok(TensorNaming::Meta),
            "hf" | "huggingface" => Ok(TensorNaming::HuggingFace),
            other => Err(ModelError::Config(format!("unknown tensor naming: {}", other))),
        }
    }
}

impl TensorNaming {
    /// Checkpoint tensor name for a weight
    pub fn tensor_name(self, kind: WeightKind, layer: usize) -> String {
        match self {
            TensorNaming::Meta => match kind {
                WeightKind::AttentionNorm => format!("layers.{layer}.attention_norm.weight"),
                WeightKind::FfnNorm => format!("layers.{layer}.ffn_norm.weight"),
                WeightKind::FinalNorm => "norm.weight".to_string(),
                WeightKind::TokenEmbedding => "tok_embeddings.weight".to_string(),
                WeightKind::Wq => format!("layers.{layer}.attention.wq.weight"),
                WeightKind::Wk => format!("layers.{layer}.attention.wk.weight"),
                WeightKind::Wv => format!("layers.{layer}.attention.wv.weight"),
                WeightKind::Wo => format!("layers.{layer}.attention.wo.weight"),
                WeightKind::W1 => format!("layers.{layer}.feed_forward.w1.weight"),
                WeightKind::W2 => format!("layers.{layer}.feed_forward.w2.weight"),
                WeightKind::W3 => format!("layers.{layer}.feed_forward.w3.weight"),
                WeightKind::Output => "output.weight".to_string(),
            },
            TensorNaming::HuggingFace => {
                let prefix = format!("model.layers.{layer}");
                match kind {
                    WeightKind::AttentionNorm => format!("{prefix}.input_layernorm.weight"),
                    WeightKind::FfnNorm => format!("{prefix}.post_attention_layernorm.weight"),
                    WeightKind::FinalNorm => "model.norm.weight".to_string(),
                    WeightKind::TokenEmbedding => "model.embed_tokens.weight".to_string(),
                    WeightKind::Wq => format!("{prefix}.self_attn.q_proj.weight"),
                    WeightKind::Wk => format!("{prefix}.self_attn.k_proj.weight"),
                    WeightKind::Wv => format!("{prefix}.self_attn.v_proj.weight"),
                    WeightKind::Wo => format!("{prefix}.self_attn.o_proj.weight"),
                    WeightKind::W1 => format!("{prefix}.mlp.gate_proj.weight"),
                    WeightKind::W2 => format!("{prefix}.mlp.down_proj.weight"),
                    WeightKind::W3 => format!("{prefix}.mlp.up_proj.weight"),
                    WeightKind::Output => "lm_head.weight".to_string(),
                }
            }
        }
    }
}

/// Loads model weights from memory-mapped safetensors files
pub struct SafetensorsLoader {
    /// Model configuration
    config: ModelConfig,
    /// Tensor naming scheme
    naming: TensorNaming,
    /// Memory-mapped files, sorted by file name
    mmaps: Vec<(String, Mmap)>,
}

impl SafetensorsLoader {
    /// Open a directory containing `config.json` and one or more `*.safetensors` files
    pub fn from_directory<P: AsRef<Path>>(dir: P, naming: TensorNaming) -> Result<Self> {
        let dir = dir.as_ref();
        if !dir.is_dir() {
            return Err(ModelError::ModelNotFound(dir.display().to_string()));
        }

        let config = ModelConfig::from_json_file(dir.join("config.json"))?;
        config.validate()?;

        let files = list_safetensor_files(dir)?;
        if files.is_empty() {
            return Err(ModelError::ModelNotFound(format!(
                "no .safetensors files in {}",
                dir.display()
            )));
        }

        let mut mmaps = Vec::with_capacity(files.len());
        for path in files {
            let file = std::fs::File::open(&path)?;
            let mmap = unsafe { Mmap::map(&file)? };
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default();
            tracing::debug!(file = %name, bytes = mmap.len(), "mapped safetensors file");
            mmaps.push((name, mmap));
        }

        Ok(Self {
            config,
            naming,
            mmaps,
        })
    }

    /// Model configuration
    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    /// Get tensor names across all files
    pub fn tensor_names(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        for (filename, mmap) in &self.mmaps {
            let tensors = SafeTensors::deserialize(mmap)
                .map_err(|e| ModelError::Safetensors(format!("{}: {}", filename, e)))?;
            names.extend(tensors.names().into_iter().map(String::from));
        }
        names.sort();
        Ok(names)
    }

    /// Load a tensor as f32 values, searching every mapped file
    fn load_tensor(&self, name: &str) -> Result<Option<Tensor>> {
        for (filename, mmap) in &self.mmaps {
            let tensors = SafeTensors::deserialize(mmap)
                .map_err(|e| ModelError::Safetensors(format!("{}: {}", filename, e)))?;

            let Ok(view) = tensors.tensor(name) else {
                continue;
            };

            let data = view.data();
            let values: Vec<f32> = match view.dtype() {
                safetensors::Dtype::F32 => data
                    .chunks_exact(4)
                    .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
                    .collect(),
                safetensors::Dtype::BF16 => data
                    .chunks_exact(2)
                    .map(|b| bf16::from_le_bytes([b[0], b[1]]).to_f32())
                    .collect(),
                safetensors::Dtype::F16 => data
                    .chunks_exact(2)
                    .map(|b| f16::from_le_bytes([b[0], b[1]]).to_f32())
                    .collect(),
                dtype => {
                    return Err(ModelError::InvalidDtype {
                        expected: "f32, bf16, or f16".to_string(),
                        got: format!("{:?}", dtype),
                    });
                }
            };

            return Tensor::new(view.shape().to_vec(), values).map(Some);
        }
        Ok(None)
    }

    fn require_tensor(&self, kind: WeightKind, layer: usize) -> Result<Tensor> {
        let name = self.naming.tensor_name(kind, layer);
        self.load_tensor(&name)?
            .ok_or(ModelError::MissingTensor(name))
    }

    /// Load a single transformer layer
    fn load_layer(&self, layer: usize) -> Result<LayerWeights> {
        let mut wq = self.require_tensor(WeightKind::Wq, layer)?;
        let mut wk = self.require_tensor(WeightKind::Wk, layer)?;

        // HF checkpoints split each head's rotary pairs into halves; the
        // runtime expects them interleaved.
        if self.naming == TensorNaming::HuggingFace {
            wq = unpermute_rotary(&wq, self.config.n_heads)?;
            wk = unpermute_rotary(&wk, self.config.kv_heads())?;
        }

        Ok(LayerWeights {
            attention_norm: self.require_tensor(WeightKind::AttentionNorm, layer)?,
            ffn_norm: self.require_tensor(WeightKind::FfnNorm, layer)?,
            wq,
            wk,
            wv: self.require_tensor(WeightKind::Wv, layer)?,
            wo: self.require_tensor(WeightKind::Wo, layer)?,
            w1: self.require_tensor(WeightKind::W1, layer)?,
            w2: self.require_tensor(WeightKind::W2, layer)?,
            w3: self.require_tensor(WeightKind::W3, layer)?,
        })
    }

    /// Load full model weights
    pub fn load_model_weights(&self) -> Result<ModelWeights> {
        let num_layers = self.config.n_layers;

        tracing::info!(naming = ?self.naming, "loading embeddings");
        let tok_embeddings = self.require_tensor(WeightKind::TokenEmbedding, 0)?;

        let output_name = self.naming.tensor_name(WeightKind::Output, 0);
        let output = match self.load_tensor(&output_name)? {
            Some(output) => output,
            None if self.config.tie_word_embeddings => {
                tracing::info!("classifier tied to token embeddings");
                tok_embeddings.clone()
            }
            None => return Err(ModelError::MissingTensor(output_name)),
        };

        let norm = self.require_tensor(WeightKind::FinalNorm, 0)?;

        tracing::info!(layers = num_layers, "loading transformer layers");
        let mut layers = Vec::with_capacity(num_layers);
        for i in 0..num_layers {
            tracing::debug!(layer = i, "loading layer");
            layers.push(self.load_layer(i)?);
        }

        Ok(ModelWeights {
            config: self.config.clone(),
            tok_embeddings,
            layers,
            norm,
            output,
        })
    }

    /// Total mapped size in bytes
    pub fn total_size_bytes(&self) -> usize {
        self.mmaps.iter().map(|(_, m)| m.len()).sum()
    }
}

/// List safetensor files in a directory, sorted by path
fn list_safetensor_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.extension().map_or(false, |ext| ext == "safetensors") {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// Undo the HuggingFace rotary permutation of a [rows, cols] projection.
///
/// Within each head, HF row `j * half + i` becomes row `2 * i + j`.
fn unpermute_rotary(tensor: &Tensor, n_heads: usize) -> Result<Tensor> {
    let shape = tensor.shape();
    if shape.len() != 2 || n_heads == 0 || shape[0] % (2 * n_heads) != 0 {
        return Err(ModelError::InvalidShape {
            expected: vec![2 * n_heads, shape.get(1).copied().unwrap_or(0)],
            got: shape.to_vec(),
        });
    }
    let (rows, cols) = (shape[0], shape[1]);
    let head_rows = rows / n_heads;
    let half = head_rows / 2;
    let src = tensor.data();

    let mut out = vec![0f32; src.len()];
    for h in 0..n_heads {
        for i in 0..half {
            for j in 0..2 {
                let dst_row = h * head_rows + 2 * i + j;
                let src_row = h * head_rows + j * half + i;
                out[dst_row * cols..(dst_row + 1) * cols]
                    .copy_from_slice(&src[src_row * cols..(src_row + 1) * cols]);
            }
        }
    }
    Tensor::new(shape.to_vec(), out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use safetensors::tensor::TensorView;
    use safetensors::Dtype;
    use std::collections::HashMap;

    #[test]
    fn test_naming_parse() {
        assert_eq!("hf".parse::<TensorNaming>().unwrap(), TensorNaming::HuggingFace);
        assert_eq!("Meta".parse::<TensorNaming>().unwrap(), TensorNaming::Meta);
        assert!("gguf".parse::<TensorNaming>().is_err());
    }

    #[test]
    fn test_tensor_names() {
        assert_eq!(
            TensorNaming::Meta.tensor_name(WeightKind::W2, 3),
            "layers.3.feed_forward.w2.weight"
        );
        assert_eq!(
            TensorNaming::HuggingFace.tensor_name(WeightKind::W1, 0),
            "model.layers.0.mlp.gate_proj.weight"
        );
        assert_eq!(
            TensorNaming::HuggingFace.tensor_name(WeightKind::Output, 0),
            "lm_head.weight"
        );
    }

    #[test]
    fn test_unpermute_rotary() {
        // One head of 4 rows: HF order [r0, r1, r2, r3] holds pairs (r0, r2) and (r1, r3)
        let t = Tensor::new(vec![4, 1], vec![0.0, 1.0, 2.0, 3.0]).unwrap();
        let out = unpermute_rotary(&t, 1).unwrap();
        assert_eq!(out.data(), &[0.0, 2.0, 1.0, 3.0]);

        let two_heads = Tensor::new(vec![4, 2], (0..8).map(|v| v as f32).collect()).unwrap();
        let out = unpermute_rotary(&two_heads, 2).unwrap();
        assert_eq!(out.data(), two_heads.data());
    }

    #[test]
    fn test_unpermute_rejects_odd_rows() {
        let t = Tensor::new(vec![3, 1], vec![0.0; 3]).unwrap();
        assert!(matches!(
            unpermute_rotary(&t, 1),
            Err(ModelError::InvalidShape { .. })
        ));
    }

    fn f32_bytes(values: &[f32]) -> Vec<u8> {
        values.iter().flat_map(|v| v.to_le_bytes()).collect()
    }

    /// Write a one-layer HF checkpoint with dim 4, one head, hidden 2, vocab 3
    fn write_hf_checkpoint(dir: &Path, with_lm_head: bool) {
        let config = r#"{"hidden_size": 4, "num_hidden_layers": 1, "num_attention_heads": 1,
            "vocab_size": 3, "max_position_embeddings": 8, "tie_word_embeddings": true}"#;
        std::fs::write(dir.join("config.json"), config).unwrap();

        let naming = TensorNaming::HuggingFace;
        let mut tensors: Vec<(String, Vec<usize>, Vec<u8>)> = Vec::new();
        let mut push = |name: String, shape: Vec<usize>| {
            let numel: usize = shape.iter().product();
            let values: Vec<f32> = (0..numel).map(|i| i as f32).collect();
            tensors.push((name, shape, f32_bytes(&values)));
        };
        push(naming.tensor_name(WeightKind::TokenEmbedding, 0), vec![3, 4]);
        push(naming.tensor_name(WeightKind::FinalNorm, 0), vec![4]);
        push(naming.tensor_name(WeightKind::AttentionNorm, 0), vec![4]);
        push(naming.tensor_name(WeightKind::FfnNorm, 0), vec![4]);
        for kind in [WeightKind::Wq, WeightKind::Wk, WeightKind::Wv, WeightKind::Wo] {
            push(naming.tensor_name(kind, 0), vec![4, 4]);
        }
        push(naming.tensor_name(WeightKind::W1, 0), vec![2, 4]);
        push(naming.tensor_name(WeightKind::W2, 0), vec![4, 2]);
        push(naming.tensor_name(WeightKind::W3, 0), vec![2, 4]);
        if with_lm_head {
            push(naming.tensor_name(WeightKind::Output, 0), vec![3, 4]);
        }

        let views: HashMap<String, TensorView<'_>> = tensors
            .iter()
            .map(|(name, shape, bytes)| {
                let view = TensorView::new(Dtype::F32, shape.clone(), bytes).unwrap();
                (name.clone(), view)
            })
            .collect();
        let bytes = safetensors::serialize(views, &None).unwrap();
        std::fs::write(dir.join("model.safetensors"), bytes).unwrap();
    }

    #[test]
    fn test_load_hf_checkpoint_with_tied_classifier() {
        let dir = tempfile::tempdir().unwrap();
        write_hf_checkpoint(dir.path(), false);

        let loader = SafetensorsLoader::from_directory(dir.path(), TensorNaming::HuggingFace).unwrap();
        assert_eq!(loader.config().dim, 4);
        assert_eq!(loader.tensor_names().unwrap().len(), 11);

        let weights = loader.load_model_weights().unwrap();
        assert_eq!(weights.num_layers(), 1);
        assert!(weights.output.is_identical(&weights.tok_embeddings));
        assert_eq!(weights.layers[0].w3.shape(), &[2, 4]);

        // Rows 1 and 2 swap places for a single 4-row head
        let wq = weights.layers[0].wq.data();
        assert_eq!(&wq[0..4], &[0.0, 1.0, 2.0, 3.0]);
        assert_eq!(&wq[4..8], &[8.0, 9.0, 10.0, 11.0]);
        assert_eq!(&wq[8..12], &[4.0, 5.0, 6.0, 7.0]);
        // V is not permuted
        assert_eq!(&weights.layers[0].wv.data()[4..8], &[4.0, 5.0, 6.0, 7.0]);
    }

    #[test]
    fn test_load_with_explicit_lm_head() {
        let dir = tempfile::tempdir().unwrap();
        write_hf_checkpoint(dir.path(), true);

        let loader = SafetensorsLoader::from_directory(dir.path(), TensorNaming::HuggingFace).unwrap();
        let weights = loader.load_model_weights().unwrap();
        assert_eq!(weights.output.shape(), &[3, 4]);
        assert!(loader.total_size_bytes() > 0);
    }

    #[test]
    fn test_wrong_naming_reports_missing_tensor() {
        let dir = tempfile::tempdir().unwrap();
        write_hf_checkpoint(dir.path(), true);

        let loader = SafetensorsLoader::from_directory(dir.path(), TensorNaming::Meta).unwrap();
        assert!(matches!(
            loader.load_model_weights(),
            Err(ModelError::MissingTensor(name)) if name == "tok_embeddings.weight"
        ));
    }

    #[test]
    fn test_missing_directory() {
        let result = SafetensorsLoader::from_directory("/nonexistent/lmpack-model", TensorNaming::Meta);
        assert!(matches!(result, Err(ModelError::ModelNotFound(_))));
    }
}

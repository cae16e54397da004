//! lmpack command-line tool
//!
//! Exports a safetensors checkpoint into the lmpack binary container and
//! inspects existing containers.
//!
//! # Usage
//!
//! ```bash
//! # Float32 export
//! lmpack export --model-dir ./tinyllama --output model.bin
//!
//! # Q8_0 export of a HuggingFace-named checkpoint
//! lmpack export -m ./tinyllama -o model-q8.bin --version 2 --naming hf
//!
//! # Print the header and tensor table of a container
//! lmpack inspect model.bin
//! ```

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use console::style;
use lmpack_export::{export, ExportConfig};
use lmpack_format::{read_container, Container, TensorData};
use lmpack_model::SafetensorsLoader;

#[derive(Parser)]
#[command(name = "lmpack")]
#[command(version)]
#[command(about = "Export transformer weights into a flat binary container")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Export a checkpoint directory to a container file
    Export {
        /// Directory holding config.json and *.safetensors
        #[arg(short, long)]
        model_dir: PathBuf,

        /// Destination container file
        #[arg(short, long)]
        output: PathBuf,

        /// Container version (1 = float32, 2 = Q8_0)
        #[arg(long)]
        version: Option<i32>,

        /// Preferred Q8_0 group size
        #[arg(long)]
        group_size: Option<usize>,

        /// Tensor naming of the checkpoint (meta or hf)
        #[arg(long)]
        naming: Option<String>,

        /// TOML file with export defaults
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// Print the header and tensor table of a container
    Inspect {
        /// Container file
        file: PathBuf,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "lmpack=info".into()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Export {
            model_dir,
            output,
            version,
            group_size,
            naming,
            config,
        } => {
            let config = resolve_config(config.as_deref(), version, group_size, naming)?;
            run_export(&model_dir, &output, &config)?;
        }
        Commands::Inspect { file } => {
            run_inspect(&file)?;
        }
    }

    Ok(())
}

/// Defaults, then the config file, then `LMPACK_*`, then flags
fn resolve_config(
    path: Option<&Path>,
    version: Option<i32>,
    group_size: Option<usize>,
    naming: Option<String>,
) -> Result<ExportConfig> {
    let mut config = match path {
        Some(path) => ExportConfig::from_file(path)
            .with_context(|| format!("reading config {}", path.display()))?,
        None => ExportConfig::default(),
    }
    .with_env();

    if let Some(version) = version {
        config.version = version;
    }
    if let Some(group_size) = group_size {
        config.group_size = group_size;
    }
    if let Some(naming) = naming {
        config.naming = naming;
    }
    Ok(config)
}

fn run_export(model_dir: &Path, output: &Path, config: &ExportConfig) -> Result<()> {
    let naming = config.naming()?;
    let loader = SafetensorsLoader::from_directory(model_dir, naming)
        .with_context(|| format!("opening checkpoint {}", model_dir.display()))?;
    tracing::info!(
        mapped_bytes = loader.total_size_bytes(),
        layers = loader.config().n_layers,
        "checkpoint mapped"
    );

    let weights = loader.load_model_weights()?;
    let summary = export(&weights, output, &config.options())
        .with_context(|| format!("exporting to {}", output.display()))?;

    println!(
        "{} wrote {} ({} bytes, version {}, {} tensors)",
        style("[OK]").green().bold(),
        output.display(),
        summary.bytes_written,
        summary.version,
        summary.tensor_count,
    );
    if summary.shared_classifier {
        println!("  classifier shared with token embeddings");
    }
    if let (Some(group_size), Some(max_error)) = (summary.group_size, summary.max_quant_error) {
        println!("  Q8_0 group size {}, max error {:.6}", group_size, max_error);
    }
    Ok(())
}

fn run_inspect(file: &Path) -> Result<()> {
    let bytes = std::fs::read(file).with_context(|| format!("reading {}", file.display()))?;
    let container = read_container(&bytes)
        .with_context(|| format!("decoding {}", file.display()))?;

    print_container(&container, bytes.len());
    Ok(())
}

fn print_container(container: &Container, file_len: usize) {
    let header = &container.header;
    let p = &header.params;

    println!("Container:");
    println!("  Version:      {}", header.version);
    println!("  Size:         {} bytes", file_len);
    println!("  Dim:          {}", p.dim);
    println!("  Hidden Dim:   {}", p.hidden_dim);
    println!("  Layers:       {}", p.n_layers);
    println!("  Heads:        {}", p.n_heads);
    println!("  KV Heads:     {}", p.n_kv_heads);
    println!("  Vocab Size:   {}", p.vocab_size);
    println!("  Max Seq Len:  {}", p.max_seq_len);
    println!(
        "  Shared Cls:   {}",
        if header.shared_classifier { "Yes" } else { "No" }
    );
    if let Some(group_size) = header.group_size {
        println!("  Group Size:   {}", group_size);
    }

    println!("\n{:<20} {:<6} {:<14} {:>12}", "Tensor", "Enc", "Shape", "Max |x|");
    for tensor in &container.tensors {
        let values = tensor.data.to_f32();
        let max_abs = values.iter().fold(0.0f32, |m, v| m.max(v.abs()));
        let encoding = match tensor.data {
            TensorData::F32(_) => "f32",
            TensorData::Q8 { .. } => "q8_0",
        };
        println!(
            "{:<20} {:<6} {:<14} {:>12.6}",
            tensor.record.slot.to_string(),
            encoding,
            format!("{:?}", tensor.record.shape),
            max_abs
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses_export() {
        let cli = Cli::try_parse_from([
            "lmpack", "export", "-m", "ckpt", "-o", "out.bin", "--version", "2",
        ])
        .unwrap();
        match cli.command {
            Commands::Export {
                model_dir,
                version,
                group_size,
                ..
            } => {
                assert_eq!(model_dir, PathBuf::from("ckpt"));
                assert_eq!(version, Some(2));
                assert_eq!(group_size, None);
            }
            Commands::Inspect { .. } => panic!("expected export"),
        }
    }

    #[test]
    fn test_flags_override_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("export.toml");
        std::fs::write(&path, "version = 2\ngroup_size = 32\nnaming = \"hf\"\n").unwrap();

        let config = resolve_config(Some(path.as_path()), None, Some(16), None).unwrap();
        assert_eq!(config.group_size, 16);
        assert_eq!(config.naming, "hf");
    }
}

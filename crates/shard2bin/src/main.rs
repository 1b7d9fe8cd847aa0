//! Checkpoint shards to flat binary converter
//!
//! # Usage
//!
//! ```bash
//! # Quantize a two-shard checkpoint to Q40
//! shard2bin ./llama-2-13b q40
//!
//! # Half precision, explicit output path
//! shard2bin ./llama-2-7b float16 --output /models/llama-2-7b-f16.bin
//!
//! # Per-chunk progress
//! RUST_LOG=shard2bin=debug shard2bin ./llama-2-7b float32
//! ```
//!
//! The model directory must contain `params.json` and one or more
//! `consolidated.<N>.safetensors` shards. A `<output>.meta.json` sidecar
//! describing the run is written next to the output file.

use anyhow::{Context, Result};
use clap::Parser;
use serde_json::json;
use shard2bin::{ConversionReport, EncodingMode, convert_dir};
use std::fs;
use std::path::{Path, PathBuf};

/// Convert consolidated checkpoint shards into a single inference binary
#[derive(Parser, Debug)]
#[command(name = "shard2bin")]
#[command(about = "Convert tensor-parallel checkpoint shards into a flat F32/F16/Q40 binary")]
#[command(version)]
struct Args {
    /// Directory holding params.json and consolidated.<N>.safetensors shards
    model_dir: PathBuf,

    /// Target encoding for weight matrices: float32, float16 or q40
    #[arg(value_parser = parse_encoding)]
    encoding: EncodingMode,

    /// Output path (defaults to dllama_<model>_<encoding>2.bin in the current directory)
    #[arg(short, long)]
    output: Option<PathBuf>,
}

fn parse_encoding(s: &str) -> std::result::Result<EncodingMode, String> {
    s.parse::<EncodingMode>().map_err(|e| e.to_string())
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let output = match args.output {
        Some(path) => path,
        None => default_output(&args.model_dir, args.encoding)?,
    };

    tracing::info!("Model: {}", args.model_dir.display());
    tracing::info!("Target encoding: {}", args.encoding);
    tracing::info!("Output: {}", output.display());

    let report = convert_dir(&args.model_dir, &output, args.encoding)
        .with_context(|| format!("converting {}", args.model_dir.display()))?;

    write_sidecar_metadata(&output, &args.model_dir, &report)?;

    if report.is_complete() {
        tracing::info!("Conversion complete: {} tensors", report.summary.completed);
    } else {
        tracing::warn!(
            "Conversion finished with gaps: {} incomplete, {} missing, {} unmerged",
            report.summary.incomplete.len(),
            report.summary.missing.len(),
            report.unmerged.len()
        );
    }
    tracing::info!("  Output: {} ({} bytes planned)", output.display(), report.file_size);

    Ok(())
}

/// `dllama_<last path segment>_<encoding>2.bin`; the `2` marks the current
/// file format revision.
fn default_output(model_dir: &Path, encoding: EncodingMode) -> Result<PathBuf> {
    let name = model_dir
        .components()
        .next_back()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .filter(|n| !n.is_empty() && n != "." && n != "..")
        .with_context(|| format!("cannot derive a model name from {}", model_dir.display()))?;
    Ok(PathBuf::from(format!("dllama_{name}_{encoding}2.bin")))
}

fn write_sidecar_metadata(
    output: &Path,
    model_dir: &Path,
    report: &ConversionReport,
) -> Result<()> {
    let metadata = json!({
        "source": model_dir.display().to_string(),
        "report": report,
        "conversion_tool": "shard2bin",
        "conversion_version": env!("CARGO_PKG_VERSION"),
    });

    let mut meta_path = output.as_os_str().to_owned();
    meta_path.push(".meta.json");
    let meta_path = PathBuf::from(meta_path);

    let text = serde_json::to_string_pretty(&metadata).context("Failed to serialize metadata")?;
    fs::write(&meta_path, text)
        .with_context(|| format!("Failed to write metadata file: {}", meta_path.display()))?;
    tracing::debug!("Wrote sidecar metadata: {}", meta_path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_output_uses_last_segment() {
        let out = default_output(Path::new("/models/llama-2-7b"), EncodingMode::Q40).unwrap();
        assert_eq!(out, PathBuf::from("dllama_llama-2-7b_q402.bin"));

        let out = default_output(Path::new("models/tiny/"), EncodingMode::F16).unwrap();
        assert_eq!(out, PathBuf::from("dllama_tiny_float162.bin"));
    }

    #[test]
    fn default_output_rejects_dot() {
        assert!(default_output(Path::new("."), EncodingMode::F32).is_err());
    }

    #[test]
    fn args_parse_encoding() {
        let args = Args::try_parse_from(["shard2bin", "dir", "q40"]).unwrap();
        assert_eq!(args.encoding, EncodingMode::Q40);
        assert!(args.output.is_none());

        assert!(Args::try_parse_from(["shard2bin", "dir", "int8"]).is_err());
        assert!(Args::try_parse_from(["shard2bin", "dir"]).is_err());
    }
}

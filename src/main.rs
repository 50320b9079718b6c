//! CLI for ggufize: convert, inspect.

use anyhow::Result;
use clap::{Parser, Subcommand};
use ggufize::gguf::GgufValue;
use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;
use std::time::Instant;
use tracing::info;

#[derive(Parser)]
#[command(name = "ggufize")]
#[command(about = "Convert Hugging Face checkpoints to GGUF")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Convert a checkpoint directory to a GGUF file
    Convert {
        /// Directory holding config.json, tokenizer files and tensors
        dir: PathBuf,
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Show the metadata and tensor table of a GGUF file
    Inspect {
        #[arg(long)]
        model: PathBuf,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive("info".parse()?),
        )
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Convert { dir, output } => run_convert(&dir, &output)?,
        Commands::Inspect { model } => run_inspect(&model)?,
    }
    Ok(())
}

fn run_convert(dir: &std::path::Path, output: &std::path::Path) -> Result<()> {
    info!("Converting {:?} -> {:?}...", dir, output);
    let t0 = Instant::now();
    let mut out = File::create(output)?;
    ggufize::convert(dir, &mut out)?;
    info!("Done in {:?}", t0.elapsed());
    Ok(())
}

fn run_inspect(model: &std::path::Path) -> Result<()> {
    let mut r = BufReader::new(File::open(model)?);
    let gguf = ggufize::decode(&mut r)?;

    println!("version: {}", gguf.version);
    println!("metadata ({} keys):", gguf.kv.len());
    for (key, value) in &gguf.kv {
        println!("  {} = {}", key, format_value(value));
    }
    println!("tensors: {}", gguf.tensors.len());
    for t in &gguf.tensors {
        println!("  {} kind={} shape={:?} offset={}", t.name, t.kind, t.shape, t.offset);
    }
    Ok(())
}

fn format_value(value: &GgufValue) -> String {
    match value {
        GgufValue::Uint8(v) => v.to_string(),
        GgufValue::Int8(v) => v.to_string(),
        GgufValue::Uint16(v) => v.to_string(),
        GgufValue::Int16(v) => v.to_string(),
        GgufValue::Uint32(v) => v.to_string(),
        GgufValue::Int32(v) => v.to_string(),
        GgufValue::Float32(v) => v.to_string(),
        GgufValue::Bool(v) => v.to_string(),
        GgufValue::String(s) => format!("{s:?}"),
        GgufValue::Uint64(v) => v.to_string(),
        GgufValue::Int64(v) => v.to_string(),
        GgufValue::Float64(v) => v.to_string(),
        GgufValue::Array(a) => format!("[{} items]", a.len()),
    }
}

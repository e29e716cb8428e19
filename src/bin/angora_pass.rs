//! Command-line driver: read a module, run the pass, write it back.

use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::PathBuf;
use std::process;

use anyhow::{Context, Result};
use clap::Parser;

use angora_pass::config::{Config, Mode};
use angora_pass::ids::assign_instruction_ids;
use angora_pass::instrument_module;
use angora_pass::ir::Module;

#[derive(Parser)]
#[command(name = "angora-pass", version, about = "Instrument a module for directed fuzzing")]
struct Args {
    /// Module to instrument, as JSON.
    input: PathBuf,

    /// Where to write the instrumented module.
    #[arg(short, long)]
    output: PathBuf,

    /// Collect full traces for constraint solving instead of fast coverage.
    #[arg(long, conflicts_with = "dfsan")]
    track: bool,

    /// Taint-tracking-only build: declare the ABI, instrument nothing.
    #[arg(long)]
    dfsan: bool,

    /// File listing native ABI functions and how the pass treats them.
    #[arg(long = "angora-dfsan-abilist", value_name = "FILE")]
    abilist: Vec<PathBuf>,

    /// File listing functions and instructions to exploit.
    #[arg(long = "angora-exploitation-list", value_name = "FILE")]
    exploitation_list: Vec<PathBuf>,

    /// Path to write the comparison CFG to (track mode).
    #[arg(long = "cfg-out", value_name = "FILE")]
    cfg_out: Option<PathBuf>,

    /// Run the id-assignment pass first, xor-masking ids with this base.
    #[arg(long = "base-id", value_name = "MASK")]
    base_id: Option<u32>,
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    if let Err(err) = run() {
        eprintln!("angora-pass: {err:#}");
        process::exit(1);
    }
}

fn run() -> Result<()> {
    let args = Args::parse();
    let mode = if args.track {
        Mode::Track
    } else if args.dfsan {
        Mode::Dfsan
    } else {
        Mode::Fast
    };

    let mut config = Config::from_env(mode)?;
    config.abilist_files = args.abilist;
    config.exploitation_files = args.exploitation_list;
    config.cfg_out = args.cfg_out;

    let input = File::open(&args.input)
        .with_context(|| format!("failed to open {}", args.input.display()))?;
    let mut module: Module = serde_json::from_reader(BufReader::new(input))
        .with_context(|| format!("failed to parse {}", args.input.display()))?;

    if let Some(base_id) = args.base_id {
        assign_instruction_ids(&mut module, base_id);
    }

    let summary = instrument_module(&mut module, &config)?;
    log::info!(
        "{}: {} comparisons, {} sockets, {} cut edges",
        module.name,
        summary.comparisons,
        summary.sockets,
        summary.cut_edges
    );

    let output = File::create(&args.output)
        .with_context(|| format!("failed to create {}", args.output.display()))?;
    serde_json::to_writer(BufWriter::new(output), &module)
        .with_context(|| format!("failed to write {}", args.output.display()))?;
    Ok(())
}

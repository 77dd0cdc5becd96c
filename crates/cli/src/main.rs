mod cmd;
mod output;

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use crate::cmd::{BuildArgs, CacheCommand};
use crate::output::OutputFormat;

/// kiln - build orchestration backend
#[derive(Parser)]
#[command(name = "kiln")]
#[command(author, version, about, long_about = None)]
struct Cli {
  /// Enable verbose output
  #[arg(short, long, global = true)]
  verbose: bool,

  #[command(subcommand)]
  command: Commands,
}

#[derive(Subcommand)]
enum Commands {
  /// Build targets of a project file
  Build {
    /// Path to the project file
    project: PathBuf,

    /// Target to build (repeatable; defaults to the project's default targets)
    #[arg(short = 't', long = "target", value_name = "TARGET")]
    targets: Vec<String>,

    /// Global property (repeatable)
    #[arg(short = 'p', long = "property", value_name = "KEY=VALUE")]
    properties: Vec<String>,

    /// Maximum number of requests building at once
    #[arg(short = 'j', long)]
    max_workers: Option<usize>,

    /// Keep building other targets after a target fails
    #[arg(long)]
    continue_on_failure: bool,

    /// Only build the requested project; references must come from input caches
    #[arg(long)]
    isolate: bool,

    /// Results cache to import before building (repeatable)
    #[arg(long = "input-cache", value_name = "FILE")]
    input_caches: Vec<PathBuf>,

    /// Write the build's results cache here
    #[arg(long, value_name = "FILE")]
    output_cache: Option<PathBuf>,

    /// Cancel the build after this long (e.g., "30s", "5m")
    #[arg(long, value_parser = humantime::parse_duration)]
    timeout: Option<Duration>,

    /// Output format
    #[arg(short = 'o', long, value_enum, default_value = "text")]
    output: OutputFormat,
  },

  /// Inspect results cache files
  Cache {
    #[command(subcommand)]
    command: CacheCommand,
  },
}

fn main() -> Result<()> {
  let cli = Cli::parse();

  let filter = if cli.verbose {
    EnvFilter::new("kiln_lib=debug,kiln=debug")
  } else {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("off"))
  };
  tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_writer(std::io::stderr)
    .without_time()
    .init();

  match cli.command {
    Commands::Build {
      project,
      targets,
      properties,
      max_workers,
      continue_on_failure,
      isolate,
      input_caches,
      output_cache,
      timeout,
      output,
    } => cmd::cmd_build(BuildArgs {
      project,
      targets,
      properties,
      max_workers,
      continue_on_failure,
      isolate,
      input_caches,
      output_cache,
      timeout,
      output,
      verbose: cli.verbose,
    }),
    Commands::Cache { command } => cmd::cmd_cache(command),
  }
}

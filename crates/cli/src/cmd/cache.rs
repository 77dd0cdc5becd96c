use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Subcommand;
use kiln_lib::cache::{CacheFile, read_cache_file};
use kiln_lib::target::TargetResultCode;
use owo_colors::{OwoColorize, Stream};
use tracing::debug;

use crate::output::{OutputFormat, plural, print_info, print_json, print_stat};

#[derive(Subcommand, Debug)]
pub enum CacheCommand {
  /// Show the configurations and target results stored in a results cache file
  Show {
    /// Results cache file
    file: PathBuf,

    /// List every target result
    #[arg(short, long)]
    verbose: bool,

    /// Output format
    #[arg(short = 'o', long, value_enum, default_value = "text")]
    output: OutputFormat,
  },
}

pub fn cmd_cache(command: CacheCommand) -> Result<()> {
  match command {
    CacheCommand::Show { file, verbose, output } => cmd_show(&file, verbose, output),
  }
}

fn cmd_show(path: &Path, verbose: bool, output: OutputFormat) -> Result<()> {
  let file = read_cache_file(path).with_context(|| format!("Failed to read results cache {}", path.display()))?;
  debug!(path = %path.display(), run_id = %file.run_id, "loaded results cache");

  if output.is_json() {
    return print_json(&file);
  }
  print_summary(&file, verbose);
  Ok(())
}

fn print_summary(file: &CacheFile, verbose: bool) {
  print_info(&format!("Results cache {}", file.run_id));
  print_stat("Version", &file.version.to_string());
  print_stat("Configurations", &file.configurations.len().to_string());

  for config in &file.configurations {
    println!();
    println!(
      "{} {}",
      format!("[{}]", config.id).if_supports_color(Stream::Stdout, |s| s.dimmed()),
      config.project_path.display()
    );
    print_stat("Tools version", &config.tools_version);
    for (name, value) in &config.global_properties {
      print_stat(name, value);
    }

    let Some(results) = file.results.iter().find(|r| r.configuration_id == config.id) else {
      print_stat("Targets", "none");
      continue;
    };
    let failed = results
      .targets
      .values()
      .filter(|r| r.code == TargetResultCode::Failure)
      .count();
    print_stat(
      "Targets",
      &format!("{} ({} failed)", plural(results.targets.len(), "target"), failed),
    );
    if !results.default_targets.is_empty() {
      print_stat("Default targets", &results.default_targets.join(";"));
    }
    if verbose {
      for (name, result) in &results.targets {
        println!(
          "    {} {:?} ({})",
          name,
          result.code,
          plural(result.items.len(), "item")
        );
      }
    }
  }
}

use crate::config::Config;
use crate::converter::Converter;
use crate::types::{Compression, DEFAULT_CRF, MAX_CRF, Preset};
use anyhow::Result;
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use std::io;
use std::path::PathBuf;
use std::process::ExitCode;
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// Convert MPEG transport streams (.ts) to MP4 using ffmpeg
#[derive(Parser, Debug, Clone)]
#[command(name = "convert")]
#[command(author, version = env!("CARGO_PKG_VERSION"), about, long_about = None)]
#[command(arg_required_else_help = true)]
pub struct Args {
  #[command(subcommand)]
  pub command: Option<Commands>,

  /// Input .ts file or directory containing .ts files
  #[arg(value_name = "INPUT")]
  pub input: Option<PathBuf>,

  /// Output file, or directory to place it in (single-file input only)
  #[arg(short, long, value_name = "PATH")]
  pub output: Option<PathBuf>,

  /// Descend into subdirectories (directory input only)
  #[arg(short, long)]
  pub recursive: bool,

  /// x264 encoding preset
  #[arg(long, default_value = "medium", value_name = "PRESET")]
  pub preset: Preset,

  /// Constant rate factor, lower is better quality
  #[arg(
    long,
    default_value_t = DEFAULT_CRF,
    value_parser = clap::value_parser!(u8).range(0..=MAX_CRF as i64),
    value_name = "CRF"
  )]
  pub crf: u8,

  /// Shrink the output: light (720p), medium (480p) or high (360p)
  #[arg(long, value_name = "LEVEL", conflicts_with = "target_size")]
  pub compress: Option<Compression>,

  /// Aim for an output of about this many MB by encoding at an average bitrate
  #[arg(long, value_name = "MB")]
  pub target_size: Option<f64>,

  /// ffmpeg program to run, looked up on PATH
  #[arg(long, env = "TS_CONVERT_FFMPEG", default_value = "ffmpeg", value_name = "PROGRAM")]
  pub ffmpeg: PathBuf,

  /// ffprobe program used to read durations for --target-size
  #[arg(long, env = "TS_CONVERT_FFPROBE", default_value = "ffprobe", value_name = "PROGRAM")]
  pub ffprobe: PathBuf,

  /// Skip files whose output already exists instead of overwriting them
  #[arg(short = 'n', long)]
  pub no_clobber: bool,

  /// Delete source files once processed (failed ones too, unless --keep-failed)
  #[arg(long)]
  pub delete_original: bool,

  /// With --delete-original, keep the sources of failed conversions
  #[arg(long, requires = "delete_original")]
  pub keep_failed: bool,

  /// Number of parallel conversions (0 = one per CPU core)
  #[arg(short, long, default_value_t = 1, value_name = "N")]
  pub workers: usize,

  /// Enable verbose output with ffmpeg logs
  #[arg(short, long)]
  pub verbose: bool,

  /// Dry run - list the ffmpeg commands without running them
  #[arg(long)]
  pub dry_run: bool,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
  /// Generate shell completion scripts
  Completion {
    #[arg(value_enum)]
    shell: Shell,
  },
}

/// Parses arguments and runs the appropriate application logic.
pub async fn handle_cli() -> Result<ExitCode> {
  let args = Args::parse();

  if let Some(Commands::Completion { shell }) = args.command {
    let mut cmd = Args::command();
    let name = cmd.get_name().to_string();
    clap_complete::generate(shell, &mut cmd, name, &mut io::stdout());
    return Ok(ExitCode::SUCCESS);
  }

  if args.input.is_none() {
    Args::command().print_help()?;
    return Ok(ExitCode::SUCCESS);
  }

  let config = Config::from_args(args)?;
  let shutdown = CancellationToken::new();
  listen_for_interrupt(shutdown.clone());

  let converter = Converter::new(config).with_shutdown(shutdown);
  let summary = converter.run().await?;
  summary.print_summary();

  Ok(summary.exit_code())
}

fn listen_for_interrupt(shutdown: CancellationToken) {
  tokio::spawn(async move {
    if tokio::signal::ctrl_c().await.is_ok() {
      warn!("Received interrupt, stopping conversions");
      shutdown.cancel();
    }
  });
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn command_is_well_formed() {
    Args::command().debug_assert();
  }

  #[test]
  fn completion_subcommand() {
    let args = Args::try_parse_from(["convert", "completion", "bash"]).unwrap();
    assert!(matches!(
      args.command,
      Some(Commands::Completion { shell: Shell::Bash })
    ));
  }

  #[test]
  fn invalid_preset_is_rejected() {
    assert!(Args::try_parse_from(["convert", "a.ts", "--preset", "warp"]).is_err());
  }

  #[test]
  fn crf_range_is_enforced_by_parser() {
    assert!(Args::try_parse_from(["convert", "a.ts", "--crf", "51"]).is_ok());
    let err = Args::try_parse_from(["convert", "a.ts", "--crf", "52"]).unwrap_err();
    assert_eq!(err.kind(), clap::error::ErrorKind::ValueValidation);
  }

  #[test]
  fn compress_and_target_size_conflict() {
    let err = Args::try_parse_from(["convert", "a.ts", "--compress", "high", "--target-size", "50"])
      .unwrap_err();
    assert_eq!(err.kind(), clap::error::ErrorKind::ArgumentConflict);

    let args = Args::try_parse_from(["convert", "a.ts", "--compress", "high"]).unwrap();
    assert_eq!(args.compress, Some(Compression::High));
  }

  #[test]
  fn keep_failed_requires_delete_original() {
    let err = Args::try_parse_from(["convert", "a.ts", "--keep-failed"]).unwrap_err();
    assert_eq!(err.kind(), clap::error::ErrorKind::MissingRequiredArgument);

    let args =
      Args::try_parse_from(["convert", "a.ts", "--delete-original", "--keep-failed"]).unwrap();
    assert!(args.keep_failed);
  }
}

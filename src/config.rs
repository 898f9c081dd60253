use crate::cli::Args;
use crate::error::ConvertError;
use crate::types::Encoding;
use anyhow::{Context, Result};
use colored::Colorize;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct Config {
  pub input: PathBuf,
  pub output: Option<PathBuf>,
  pub recursive: bool,
  pub encoding: Encoding,
  pub ffmpeg: PathBuf,
  pub ffprobe: PathBuf,
  pub verbose: bool,
  pub no_clobber: bool,
  pub delete_original: bool,
  pub keep_failed: bool,
  pub workers: usize,
  pub dry_run: bool,
}

impl Config {
  pub fn from_args(args: Args) -> Result<Self> {
    let input = args
      .input
      .context("Input path is required for the main application logic.")?;

    let workers = match args.workers {
      0 => num_cpus::get(),
      n => n,
    };

    let config = Self {
      input,
      output: args.output,
      recursive: args.recursive,
      encoding: Encoding {
        preset: args.preset,
        crf: args.crf,
        compression: args.compress,
        target_size_mb: args.target_size,
      },
      ffmpeg: args.ffmpeg,
      ffprobe: args.ffprobe,
      verbose: args.verbose,
      no_clobber: args.no_clobber,
      delete_original: args.delete_original,
      keep_failed: args.keep_failed,
      workers: workers.max(1),
      dry_run: args.dry_run,
    };

    config.validate()?;
    Ok(config)
  }

  fn validate(&self) -> Result<()> {
    if let Some(size) = self
      .encoding
      .target_size_mb
      .filter(|size| !(size.is_finite() && *size > 0.0))
    {
      anyhow::bail!("Invalid target size {size} MB. It must be greater than 0");
    }

    if self.ffmpeg.as_os_str().is_empty() {
      anyhow::bail!("The ffmpeg program name must not be empty");
    }

    if self.encoding.target_size_mb.is_some() && self.ffprobe.as_os_str().is_empty() {
      anyhow::bail!("The ffprobe program name must not be empty");
    }

    Ok(())
  }

  /// Locates the transcoder on the search path, or at the given path when it
  /// contains a separator.
  pub fn locate_tool(&self) -> Result<PathBuf, ConvertError> {
    Self::locate(&self.ffmpeg)
  }

  /// Locates ffprobe, which only `--target-size` needs.
  pub fn locate_probe(&self) -> Result<Option<PathBuf>, ConvertError> {
    if self.encoding.target_size_mb.is_none() {
      return Ok(None);
    }
    Self::locate(&self.ffprobe).map(Some)
  }

  fn locate(program: &Path) -> Result<PathBuf, ConvertError> {
    which::which(program).map_err(|_| ConvertError::ToolNotFound(program.display().to_string()))
  }

  pub fn print_header(&self) {
    println!("{}", "========================================".cyan());
    println!("{}", "  TS → MP4 Converter".cyan().bold());
    println!("{}", "========================================".cyan());

    println!(
      "{} {} | {} {} | {} {}",
      "Preset:".yellow(),
      self.encoding.preset,
      "CRF:".yellow(),
      self.encoding.crf,
      "Workers:".yellow(),
      self.workers
    );

    if let Some(compression) = self.encoding.compression {
      println!("{} {}", "Compression:".yellow(), compression);
    }

    if let Some(size) = self.encoding.target_size_mb {
      println!("{} {size} MB", "Target size:".yellow());
    }

    println!("{} {}", "Input:".yellow(), self.input.display());

    if let Some(ref output) = self.output {
      println!("{} {}", "Output:".yellow(), output.display());
    }

    if self.recursive {
      println!("{}", "Recursive scan enabled".yellow());
    }

    if self.dry_run {
      println!(
        "{}",
        "🔍 DRY RUN MODE - No files will be converted"
          .yellow()
          .bold()
      );
    }

    if self.no_clobber {
      println!("{}", "Existing outputs will be skipped".yellow());
    }

    if self.delete_original && self.keep_failed {
      println!(
        "{}",
        "⚠️  Source files will be deleted after successful conversion".yellow()
      );
    } else if self.delete_original {
      println!(
        "{}",
        "⚠️  Source files will be deleted after processing, including failed ones".yellow()
      );
    }

    println!("{}", "----------------------------------------".cyan());
  }
}

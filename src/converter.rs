use crate::config::Config;
use crate::error::ConvertError;
use crate::ffmpeg::FFmpeg;
use crate::file_scanner::FileScanner;
use crate::stats::{RunSummary, format_megabytes};
use crate::types::{ConversionJob, ConversionResult, TargetBitrate, display_name};
use colored::Colorize;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::fs;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

pub struct Converter {
  config: Config,
  shutdown: CancellationToken,
}

impl Converter {
  pub fn new(config: Config) -> Self {
    Self {
      config,
      shutdown: CancellationToken::new(),
    }
  }

  /// Stops the run when `shutdown` is cancelled.
  #[must_use]
  pub fn with_shutdown(mut self, shutdown: CancellationToken) -> Self {
    self.shutdown = shutdown;
    self
  }

  pub async fn run(&self) -> Result<RunSummary, ConvertError> {
    self.config.print_header();
    let started = Instant::now();

    let jobs = FileScanner::resolve(
      &self.config.input,
      self.config.output.as_deref(),
      self.config.recursive,
    )
    .await?;

    if jobs.is_empty() {
      println!("{}", "⚠️  Warning: No .ts files found".yellow());
      return Ok(RunSummary::default());
    }

    let (tool, probe) = if self.config.dry_run {
      (self.config.ffmpeg.clone(), None)
    } else {
      (self.config.locate_tool()?, self.config.locate_probe()?)
    };
    debug!("Using ffmpeg at {}", tool.display());
    if let Some(ref probe) = probe {
      debug!("Using ffprobe at {}", probe.display());
    }

    let tool = Arc::new(tool);
    let probe = Arc::new(probe);
    let halt = self.shutdown.child_token();
    let semaphore = Arc::new(Semaphore::new(self.config.workers));

    println!(
      "{} {} {} {} {}",
      "🚀 Converting".magenta(),
      jobs.len(),
      "file(s) with".magenta(),
      self.config.workers,
      "worker(s)...".magenta()
    );
    println!();

    let mut tasks = Vec::with_capacity(jobs.len());

    for job in jobs {
      let permit = tokio::select! {
        permit = semaphore.clone().acquire_owned() => permit,
        () = halt.cancelled() => break,
      };

      let Ok(permit) = permit else {
        break;
      };

      if halt.is_cancelled() {
        break;
      }

      let config = self.config.clone();
      let tool = Arc::clone(&tool);
      let probe = Arc::clone(&probe);
      let halt = halt.clone();

      tasks.push(tokio::spawn(async move {
        let result = Self::process_job(job, &tool, probe.as_deref(), &config, &halt).await;
        if matches!(&result, Err(e) if e.is_fatal()) {
          halt.cancel();
        }
        drop(permit);
        result
      }));
    }

    let mut results = Vec::with_capacity(tasks.len());
    let mut fatal: Option<ConvertError> = None;

    for task in tasks {
      match task.await {
        Ok(Ok(result)) => results.push(result),
        Ok(Err(e)) => {
          // Other jobs see the tool error as an interruption.
          if fatal
            .as_ref()
            .is_none_or(|f| matches!(f, ConvertError::Interrupted))
          {
            fatal = Some(e);
          }
        }
        Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
        Err(e) => error!("Conversion task failed: {e}"),
      }
    }

    if let Some(e) = fatal {
      return Err(e);
    }

    if self.shutdown.is_cancelled() {
      return Err(ConvertError::Interrupted);
    }

    Ok(RunSummary::new(results, started.elapsed()))
  }

  /// Converts one job. Only fatal errors are returned as `Err`; every other
  /// failure becomes a failed result.
  async fn process_job(
    job: ConversionJob,
    tool: &Path,
    probe: Option<&Path>,
    config: &Config,
    halt: &CancellationToken,
  ) -> Result<ConversionResult, ConvertError> {
    let name = job.name();

    if config.no_clobber && fs::try_exists(&job.output).await.unwrap_or(false) {
      println!(
        "{} {} {}",
        "✓ Skipped:".green(),
        name,
        "(output exists)".dimmed()
      );
      return Ok(ConversionResult::skipped(job));
    }

    if config.dry_run {
      let args = FFmpeg::build_args(&job.input, &job.output, config, None);
      println!(
        "{} {}",
        "🔍 Would run:".cyan(),
        FFmpeg::command_line(tool, &args)
      );
      if config.encoding.target_size_mb.is_some() {
        println!(
          "{}",
          "   (bitrate is derived from the input's duration when converting)".dimmed()
        );
      }
      return Ok(ConversionResult::succeeded(job, None, None, Duration::ZERO));
    }

    println!("{} {}", "→ Converting:".cyan(), name);
    let started = Instant::now();
    let input_bytes = fs::metadata(&job.input).await.ok().map(|m| m.len());

    let converted = async {
      if let Some(parent) = job.output.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
          .await
          .map_err(|e| ConvertError::io(parent, e))?;
      }

      let bitrate = match (probe, config.encoding.target_size_mb) {
        (Some(probe), Some(target_mb)) => {
          let duration = FFmpeg::probe_duration(probe, &job.input).await?;
          let bitrate = TargetBitrate::for_size(target_mb, duration);
          debug!(
            "{}: {duration:.1}s, video {} b/s, audio {} b/s",
            name, bitrate.video, bitrate.audio
          );
          Some(bitrate)
        }
        _ => None,
      };

      FFmpeg::convert(tool, &job, config, bitrate, halt).await
    }
    .await;

    let mut result = match converted {
      Ok(()) => {
        let output_bytes = fs::metadata(&job.output).await.ok().map(|m| m.len());
        let result = ConversionResult::succeeded(job, input_bytes, output_bytes, started.elapsed());

        println!(
          "{} {} → {} {}",
          "✓ Converted:".green(),
          name,
          display_name(&result.job.output),
          format!("({})", size_report(&result)).dimmed()
        );
        result
      }
      Err(e) if e.is_fatal() => return Err(e),
      Err(e) => {
        debug!("Failed to convert {}: {e}", job.input.display());
        println!("{} {}", "✗ Failed:".red(), name);
        eprintln!("{} {}: {}", "✗ Error:".red(), name, e);

        let mut diagnostic = e.to_string();
        if let Some(tail) = e.diagnostic() {
          eprintln!("{}", tail.dimmed());
          diagnostic.push('\n');
          diagnostic.push_str(tail);
        }

        ConversionResult::failed(job, diagnostic, started.elapsed())
      }
    };

    if config.delete_original && (result.is_success() || !config.keep_failed) {
      result.source_deleted = Self::delete_original(&result.job.input).await;
    }

    Ok(result)
  }

  async fn delete_original(input: &Path) -> bool {
    match fs::remove_file(input).await {
      Ok(()) => {
        debug!("Deleted source file: {}", input.display());
        true
      }
      Err(e) => {
        warn!("Could not delete source file {}: {e}", input.display());
        false
      }
    }
  }
}

fn format_size(bytes: Option<u64>) -> String {
  match bytes {
    Some(bytes) => format_megabytes(bytes as f64),
    None => "unknown size".to_string(),
  }
}

/// Original and output size, space saved, ratio and time for one result.
fn size_report(result: &ConversionResult) -> String {
  let mut parts = vec![format!(
    "{} → {}",
    format_size(result.input_bytes),
    format_size(result.output_bytes)
  )];

  if let Some(saved) = result.bytes_saved() {
    parts.push(format!("saved {}", format_megabytes(saved as f64)));
  }
  if let Some(ratio) = result.compression_ratio() {
    parts.push(format!("{ratio:.2}x"));
  }
  parts.push(format!("{:.1?}", result.elapsed));

  parts.join(", ")
}

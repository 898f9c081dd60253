use crate::config::Config;
use crate::error::ConvertError;
use crate::types::{ConversionJob, FFProbeOutput, TargetBitrate};
use std::collections::VecDeque;
use std::ffi::OsString;
use std::io;
use std::path::Path;
use std::process::Stdio;
use tokio::fs;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{ChildStderr, Command};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

/// Number of trailing stderr lines kept for a failed conversion.
pub const DIAGNOSTIC_TAIL_LINES: usize = 20;

pub struct FFmpeg;

impl FFmpeg {
  /// Reads the duration of `input` in seconds.
  pub async fn probe_duration(ffprobe: &Path, input: &Path) -> Result<f64, ConvertError> {
    debug!("Probing duration of {}", input.display());

    let output = match Command::new(ffprobe)
      .args(["-v", "quiet", "-print_format", "json", "-show_format"])
      .arg(input)
      .stdin(Stdio::null())
      .kill_on_drop(true)
      .output()
      .await
    {
      Ok(output) => output,
      Err(e) if e.kind() == io::ErrorKind::NotFound => {
        return Err(ConvertError::ToolNotFound(ffprobe.display().to_string()));
      }
      Err(e) => return Err(ConvertError::io(ffprobe, e)),
    };

    let failed = |reason: String| ConvertError::ProbeFailed {
      input: input.to_path_buf(),
      reason,
    };

    if !output.status.success() {
      return Err(failed(format!("ffprobe exited with {}", output.status)));
    }

    let probe: FFProbeOutput = serde_json::from_slice(&output.stdout)
      .map_err(|e| failed(format!("unreadable ffprobe output: {e}")))?;

    probe
      .format
      .duration
      .as_deref()
      .and_then(|d| d.trim().parse::<f64>().ok())
      .filter(|d| d.is_finite() && *d > 0.0)
      .ok_or_else(|| failed("no duration reported".into()))
  }

  /// Command-line arguments converting `input` into `destination`.
  ///
  /// With a target size the average bitrate replaces CRF. `bitrate` is `None`
  /// when the duration is not known yet, as in a dry run.
  pub fn build_args(
    input: &Path,
    destination: &Path,
    config: &Config,
    bitrate: Option<TargetBitrate>,
  ) -> Vec<OsString> {
    let encoding = &config.encoding;
    let loglevel = if config.verbose { "info" } else { "error" };

    let mut args: Vec<OsString> = ["-hide_banner", "-nostdin", "-loglevel", loglevel, "-y", "-i"]
      .into_iter()
      .map(OsString::from)
      .collect();
    args.push(input.as_os_str().to_owned());
    args.extend(
      ["-c:v", "libx264", "-c:a", "aac", "-preset", encoding.preset.as_str()]
        .into_iter()
        .map(OsString::from),
    );

    match (bitrate, encoding.target_size_mb) {
      (Some(bitrate), _) => args.extend(bitrate.args().map(OsString::from)),
      (None, None) => {
        args.push("-crf".into());
        args.push(encoding.crf.to_string().into());
      }
      (None, Some(_)) => {}
    }

    if let Some(compression) = encoding.compression {
      args.extend(compression.args().iter().copied().map(OsString::from));
    }

    // The destination is a staging file without an .mp4 extension.
    args.extend(["-f", "mp4"].map(OsString::from));
    args.push(destination.as_os_str().to_owned());
    args
  }

  /// Printable form of the command line, for dry runs and debug logs.
  pub fn command_line(tool: &Path, args: &[OsString]) -> String {
    std::iter::once(tool.as_os_str())
      .chain(args.iter().map(OsString::as_os_str))
      .map(|arg| {
        let arg = arg.to_string_lossy();
        if arg.contains(char::is_whitespace) {
          format!("'{arg}'")
        } else {
          arg.into_owned()
        }
      })
      .collect::<Vec<_>>()
      .join(" ")
  }

  /// Runs `tool` on one job and waits for it to exit.
  ///
  /// ffmpeg writes to the job's staging file, which replaces the output only
  /// after a successful exit. On failure or when `shutdown` fires the child is
  /// killed and the staging file removed; an existing output is left alone.
  pub async fn convert(
    tool: &Path,
    job: &ConversionJob,
    config: &Config,
    bitrate: Option<TargetBitrate>,
    shutdown: &CancellationToken,
  ) -> Result<(), ConvertError> {
    let staging = job.staging_path();
    let args = Self::build_args(&job.input, &staging, config, bitrate);
    debug!("Running: {}", Self::command_line(tool, &args));

    let mut child = match Command::new(tool)
      .args(&args)
      .stdin(Stdio::null())
      .stdout(Stdio::null())
      .stderr(Stdio::piped())
      .kill_on_drop(true)
      .spawn()
    {
      Ok(child) => child,
      Err(e) if e.kind() == io::ErrorKind::NotFound => {
        return Err(ConvertError::ToolNotFound(tool.display().to_string()));
      }
      Err(e) => return Err(ConvertError::io(tool, e)),
    };

    let reader = child
      .stderr
      .take()
      .map(|stderr| tokio::spawn(Self::collect_stderr(stderr, config.verbose)));

    let status = tokio::select! {
      status = child.wait() => Some(status),
      () = shutdown.cancelled() => None,
    };

    let Some(status) = status else {
      warn!("Interrupted, stopping ffmpeg for {}", job.name());
      if let Err(e) = child.kill().await {
        warn!("Failed to kill ffmpeg: {e}");
      }
      if let Some(reader) = reader {
        reader.abort();
      }
      Self::remove_partial(&staging).await;
      return Err(ConvertError::Interrupted);
    };

    let tail = match reader {
      Some(reader) => reader.await.unwrap_or_default(),
      None => Tail::default(),
    };

    let status = match status {
      Ok(status) => status,
      Err(e) => {
        Self::remove_partial(&staging).await;
        return Err(ConvertError::io(&job.input, e));
      }
    };

    if !status.success() {
      Self::remove_partial(&staging).await;
      return Err(ConvertError::ConversionFailed {
        input: job.input.clone(),
        status,
        diagnostic: tail.into_string(),
      });
    }

    if let Err(e) = fs::rename(&staging, &job.output).await {
      Self::remove_partial(&staging).await;
      return Err(ConvertError::io(&job.output, e));
    }

    Ok(())
  }

  async fn collect_stderr(stderr: ChildStderr, verbose: bool) -> Tail {
    let mut tail = Tail::new(DIAGNOSTIC_TAIL_LINES);
    let mut segments = BufReader::new(stderr).split(b'\n');

    loop {
      match segments.next_segment().await {
        Ok(Some(segment)) => {
          let text = String::from_utf8_lossy(&segment);
          // Progress updates are separated by carriage returns.
          for line in text.split('\r').filter(|l| !l.trim().is_empty()) {
            if verbose {
              eprintln!("{line}");
            }
            tail.push(line);
          }
        }
        Ok(None) => break,
        Err(e) => {
          trace!("Stopped reading ffmpeg stderr: {e}");
          break;
        }
      }
    }

    tail
  }

  async fn remove_partial(staging: &Path) {
    match fs::remove_file(staging).await {
      Ok(()) => debug!("Removed partial output: {}", staging.display()),
      Err(e) if e.kind() == io::ErrorKind::NotFound => {}
      Err(e) => warn!("Failed to remove partial output {}: {e}", staging.display()),
    }
  }
}

/// Bounded buffer of the most recent lines of output.
#[derive(Debug, Default)]
pub struct Tail {
  lines: VecDeque<String>,
  capacity: usize,
}

impl Tail {
  pub fn new(capacity: usize) -> Self {
    Self {
      lines: VecDeque::with_capacity(capacity),
      capacity,
    }
  }

  pub fn push(&mut self, line: &str) {
    if self.capacity == 0 {
      return;
    }
    if self.lines.len() == self.capacity {
      self.lines.pop_front();
    }
    self.lines.push_back(line.trim_end().to_string());
  }

  pub fn into_string(self) -> String {
    Vec::from(self.lines).join("\n")
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cli::Args;
  use clap::Parser;

  fn config(extra: &[&str]) -> Config {
    let mut argv = vec!["convert", "in.ts"];
    argv.extend_from_slice(extra);
    Config::from_args(Args::try_parse_from(argv).unwrap()).unwrap()
  }

  fn strings(args: &[OsString]) -> Vec<String> {
    args.iter().map(|a| a.to_string_lossy().into_owned()).collect()
  }

  fn arguments(config: &Config, bitrate: Option<TargetBitrate>) -> Vec<String> {
    strings(&FFmpeg::build_args(
      Path::new("rec/show.ts"),
      Path::new("rec/.show.mp4.partial"),
      config,
      bitrate,
    ))
  }

  #[test]
  fn default_arguments() {
    assert_eq!(
      arguments(&config(&[]), None),
      [
        "-hide_banner",
        "-nostdin",
        "-loglevel",
        "error",
        "-y",
        "-i",
        "rec/show.ts",
        "-c:v",
        "libx264",
        "-c:a",
        "aac",
        "-preset",
        "medium",
        "-crf",
        "23",
        "-f",
        "mp4",
        "rec/.show.mp4.partial",
      ]
    );
  }

  #[test]
  fn overridden_arguments() {
    let args = arguments(
      &config(&["--crf", "18", "--preset", "slow", "--no-clobber", "--verbose"]),
      None,
    );

    assert!(args.windows(2).any(|w| w == ["-crf", "18"]));
    assert!(args.windows(2).any(|w| w == ["-preset", "slow"]));
    assert!(args.windows(2).any(|w| w == ["-loglevel", "info"]));
    // No-clobber is checked before ffmpeg runs; the staging file is always ours.
    assert!(args.contains(&"-y".to_string()));
    assert!(!args.contains(&"-n".to_string()));
  }

  #[test]
  fn compression_adds_scaling_and_caps() {
    let args = arguments(&config(&["--compress", "medium"]), None);

    assert!(args.windows(2).any(|w| w == ["-vf", "scale=-2:480"]));
    assert!(args.windows(2).any(|w| w == ["-maxrate", "1500k"]));
    assert!(args.windows(2).any(|w| w == ["-b:a", "96k"]));
    assert!(args.windows(2).any(|w| w == ["-crf", "23"]));
    assert_eq!(args[args.len() - 3..], ["-f", "mp4", "rec/.show.mp4.partial"]);
  }

  #[test]
  fn target_size_replaces_crf_with_bitrate() {
    let config = config(&["--target-size", "100"]);
    let bitrate = TargetBitrate::for_size(100.0, 100.0);

    let args = arguments(&config, Some(bitrate));
    assert!(!args.contains(&"-crf".to_string()));
    assert!(args.windows(2).any(|w| w == ["-b:v".to_string(), bitrate.video.to_string()]));

    // Dry runs do not know the duration yet.
    let args = arguments(&config, None);
    assert!(!args.contains(&"-crf".to_string()));
    assert!(!args.contains(&"-b:v".to_string()));
  }

  #[test]
  fn command_line_quotes_whitespace() {
    let args = FFmpeg::build_args(
      Path::new("my show.ts"),
      Path::new("my show.mp4"),
      &config(&[]),
      None,
    );
    let line = FFmpeg::command_line(Path::new("ffmpeg"), &args);

    assert!(line.starts_with("ffmpeg -hide_banner"));
    assert!(line.contains("-i 'my show.ts'"));
    assert!(line.ends_with("-f mp4 'my show.mp4'"));
  }

  #[test]
  fn tail_keeps_last_lines() {
    let mut tail = Tail::new(3);
    for i in 0..10 {
      tail.push(&format!("line {i}\r\n"));
    }

    assert_eq!(tail.into_string(), "line 7\nline 8\nline 9");
  }

  #[tokio::test]
  async fn missing_tool_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let job = ConversionJob::new(dir.path().join("a.ts"), dir.path().join("a.mp4"));
    let tool = dir.path().join("no-such-ffmpeg");

    let err = FFmpeg::convert(&tool, &job, &config(&[]), None, &CancellationToken::new())
      .await
      .unwrap_err();

    assert!(matches!(err, ConvertError::ToolNotFound(_)));

    let err = FFmpeg::probe_duration(&tool, &job.input).await.unwrap_err();
    assert!(matches!(err, ConvertError::ToolNotFound(_)));
  }

  #[cfg(unix)]
  mod unix {
    use super::*;
    use std::os::unix::fs::PermissionsExt;
    use std::path::PathBuf;

    fn script(dir: &Path, body: &str) -> PathBuf {
      let path = dir.join("fake-ffmpeg");
      std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
      std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
      path
    }

    #[tokio::test]
    async fn success_replaces_output_through_staging_file() {
      let dir = tempfile::tempdir().unwrap();
      let tool = script(dir.path(), r#"for last; do :; done; printf mp4 > "$last""#);
      let job = ConversionJob::new(dir.path().join("a.ts"), dir.path().join("a.mp4"));
      std::fs::write(&job.output, b"stale").unwrap();

      FFmpeg::convert(&tool, &job, &config(&[]), None, &CancellationToken::new())
        .await
        .unwrap();

      assert_eq!(std::fs::read(&job.output).unwrap(), b"mp4");
      assert!(!job.staging_path().exists());
    }

    #[tokio::test]
    async fn failure_captures_stderr_tail_and_removes_staging_file() {
      let dir = tempfile::tempdir().unwrap();
      let tool = script(
        dir.path(),
        r#"for last; do :; done; printf partial > "$last"
i=0
while [ $i -lt 30 ]; do echo "noise $i" >&2; i=$((i+1)); done
echo "Invalid data found when processing input" >&2
exit 1"#,
      );
      let job = ConversionJob::new(dir.path().join("a.ts"), dir.path().join("a.mp4"));

      let err = FFmpeg::convert(&tool, &job, &config(&[]), None, &CancellationToken::new())
        .await
        .unwrap_err();

      let diagnostic = err.diagnostic().unwrap();
      assert_eq!(diagnostic.lines().count(), DIAGNOSTIC_TAIL_LINES);
      assert!(diagnostic.ends_with("Invalid data found when processing input"));
      assert!(!diagnostic.contains("noise 10\n"));
      assert!(matches!(err, ConvertError::ConversionFailed { .. }));
      assert!(!job.output.exists());
      assert!(!job.staging_path().exists());
    }

    #[tokio::test]
    async fn early_failure_keeps_existing_output() {
      let dir = tempfile::tempdir().unwrap();
      let tool = script(dir.path(), "echo 'No such file or directory' >&2; exit 1");
      let job = ConversionJob::new(dir.path().join("show.ts"), dir.path().join("show.mp4"));
      std::fs::write(&job.output, b"good old mp4").unwrap();

      let err = FFmpeg::convert(&tool, &job, &config(&[]), None, &CancellationToken::new())
        .await
        .unwrap_err();

      assert!(matches!(err, ConvertError::ConversionFailed { .. }));
      assert_eq!(std::fs::read(&job.output).unwrap(), b"good old mp4");
    }

    #[tokio::test]
    async fn cancellation_kills_child_and_removes_staging_file() {
      let dir = tempfile::tempdir().unwrap();
      let tool = script(dir.path(), r#"for last; do :; done; printf partial > "$last"; exec sleep 30"#);
      let job = ConversionJob::new(dir.path().join("a.ts"), dir.path().join("a.mp4"));
      let shutdown = CancellationToken::new();

      let trigger = shutdown.clone();
      let staging = job.staging_path();
      tokio::spawn(async move {
        while !staging.exists() {
          tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        trigger.cancel();
      });

      let started = std::time::Instant::now();
      let err = FFmpeg::convert(&tool, &job, &config(&[]), None, &shutdown)
        .await
        .unwrap_err();

      assert!(matches!(err, ConvertError::Interrupted));
      assert!(started.elapsed() < std::time::Duration::from_secs(20));
      assert!(!job.output.exists());
      assert!(!job.staging_path().exists());
    }

    #[tokio::test]
    async fn duration_is_read_from_json() {
      let dir = tempfile::tempdir().unwrap();
      let tool = script(dir.path(), r#"echo '{"format": {"duration": "125.480000"}}'"#);

      let duration = FFmpeg::probe_duration(&tool, Path::new("a.ts")).await.unwrap();

      assert!((duration - 125.48).abs() < 1e-9);
    }

    #[tokio::test]
    async fn missing_duration_fails_the_job() {
      let dir = tempfile::tempdir().unwrap();
      let tool = script(dir.path(), r#"echo '{"format": {}}'"#);

      let err = FFmpeg::probe_duration(&tool, Path::new("a.ts")).await.unwrap_err();

      assert!(matches!(err, ConvertError::ProbeFailed { .. }));
      assert_eq!(err.exit_code(), 1);
    }
  }
}

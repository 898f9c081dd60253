use serde::Deserialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_CRF: u8 = 23;
pub const MAX_CRF: u8 = 51;

/// x264 encoding presets, fastest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Preset {
  Ultrafast,
  Superfast,
  Veryfast,
  Faster,
  Fast,
  #[default]
  Medium,
  Slow,
  Slower,
  Veryslow,
}

impl Preset {
  pub const fn as_str(self) -> &'static str {
    match self {
      Self::Ultrafast => "ultrafast",
      Self::Superfast => "superfast",
      Self::Veryfast => "veryfast",
      Self::Faster => "faster",
      Self::Fast => "fast",
      Self::Medium => "medium",
      Self::Slow => "slow",
      Self::Slower => "slower",
      Self::Veryslow => "veryslow",
    }
  }
}

impl std::str::FromStr for Preset {
  type Err = anyhow::Error;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.to_lowercase().as_str() {
      "ultrafast" => Ok(Self::Ultrafast),
      "superfast" => Ok(Self::Superfast),
      "veryfast" => Ok(Self::Veryfast),
      "faster" => Ok(Self::Faster),
      "fast" => Ok(Self::Fast),
      "medium" => Ok(Self::Medium),
      "slow" => Ok(Self::Slow),
      "slower" => Ok(Self::Slower),
      "veryslow" => Ok(Self::Veryslow),
      _ => Err(anyhow::anyhow!(
        "Invalid preset '{s}'. Use one of: ultrafast, superfast, veryfast, faster, fast, medium, slow, slower, veryslow"
      )),
    }
  }
}

impl fmt::Display for Preset {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// Size presets: downscale, cap the bitrate and downmix audio to stereo.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
  /// 720p
  Light,
  /// 480p
  Medium,
  /// 360p
  High,
}

impl Compression {
  /// Arguments appended after the codec options.
  pub const fn args(self) -> &'static [&'static str] {
    match self {
      Self::Light => &[
        "-vf", "scale=-2:720", "-maxrate", "2000k", "-bufsize", "2000k", "-ac", "2", "-ar",
        "44100", "-b:a", "128k",
      ],
      Self::Medium => &[
        "-vf", "scale=-2:480", "-maxrate", "1500k", "-bufsize", "1500k", "-ac", "2", "-ar",
        "44100", "-b:a", "96k",
      ],
      Self::High => &[
        "-vf", "scale=-2:360", "-maxrate", "700k", "-bufsize", "700k", "-ac", "2", "-ar", "44100",
        "-b:a", "64k",
      ],
    }
  }
}

impl std::str::FromStr for Compression {
  type Err = anyhow::Error;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.to_lowercase().as_str() {
      "light" => Ok(Self::Light),
      "medium" => Ok(Self::Medium),
      "high" => Ok(Self::High),
      _ => Err(anyhow::anyhow!(
        "Invalid compression '{s}'. Use 'light', 'medium' or 'high'"
      )),
    }
  }
}

impl fmt::Display for Compression {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match *self {
      Self::Light => write!(f, "light (720p)"),
      Self::Medium => write!(f, "medium (480p)"),
      Self::High => write!(f, "high (360p)"),
    }
  }
}

/// Quality parameters passed to the H.264 encoder.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Encoding {
  pub preset: Preset,
  pub crf: u8,
  pub compression: Option<Compression>,
  /// Target output size in MB. Replaces CRF with an average bitrate.
  pub target_size_mb: Option<f64>,
}

impl Default for Encoding {
  fn default() -> Self {
    Self {
      preset: Preset::Medium,
      crf: DEFAULT_CRF,
      compression: None,
      target_size_mb: None,
    }
  }
}

pub const TARGET_AUDIO_BITRATE: u64 = 128_000;
pub const MIN_VIDEO_BITRATE: u64 = 500_000;

/// Bitrates (bits per second) that make a stream of known duration land
/// near a target size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TargetBitrate {
  pub video: u64,
  pub audio: u64,
}

impl TargetBitrate {
  pub fn for_size(target_mb: f64, duration_secs: f64) -> Self {
    let total_bits = target_mb * 8.0 * 1024.0 * 1024.0;
    let bitrate = (total_bits / duration_secs) as u64;

    Self {
      video: bitrate
        .saturating_sub(TARGET_AUDIO_BITRATE)
        .max(MIN_VIDEO_BITRATE),
      audio: TARGET_AUDIO_BITRATE,
    }
  }

  pub fn args(self) -> [String; 8] {
    [
      "-b:v".into(),
      self.video.to_string(),
      "-maxrate".into(),
      (self.video * 3 / 2).to_string(),
      "-bufsize".into(),
      (self.video * 2).to_string(),
      "-b:a".into(),
      self.audio.to_string(),
    ]
  }
}

#[derive(Debug, Deserialize)]
pub struct Format {
  pub duration: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct FFProbeOutput {
  pub format: Format,
}

/// One input file and the MP4 it converts into.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversionJob {
  pub input: PathBuf,
  pub output: PathBuf,
}

impl ConversionJob {
  pub fn new(input: impl Into<PathBuf>, output: impl Into<PathBuf>) -> Self {
    Self {
      input: input.into(),
      output: output.into(),
    }
  }

  /// File name of the input for progress lines.
  pub fn name(&self) -> String {
    display_name(&self.input)
  }

  /// Hidden sibling of the output that ffmpeg writes to. It is renamed over
  /// the output only once ffmpeg succeeds.
  pub fn staging_path(&self) -> PathBuf {
    self
      .output
      .with_file_name(format!(".{}.partial", display_name(&self.output)))
  }
}

pub(crate) fn display_name(path: &Path) -> String {
  path
    .file_name()
    .map_or_else(|| path.display().to_string(), |n| n.to_string_lossy().into_owned())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
  Succeeded,
  Failed,
  /// The output already existed and overwriting was disabled.
  Skipped,
}

#[derive(Debug, Clone)]
pub struct ConversionResult {
  pub job: ConversionJob,
  pub outcome: Outcome,
  /// Failure message followed by the tail of the transcoder's stderr.
  pub diagnostic: Option<String>,
  pub input_bytes: Option<u64>,
  pub output_bytes: Option<u64>,
  pub source_deleted: bool,
  pub elapsed: Duration,
}

impl ConversionResult {
  pub const fn succeeded(
    job: ConversionJob,
    input_bytes: Option<u64>,
    output_bytes: Option<u64>,
    elapsed: Duration,
  ) -> Self {
    Self {
      job,
      outcome: Outcome::Succeeded,
      diagnostic: None,
      input_bytes,
      output_bytes,
      source_deleted: false,
      elapsed,
    }
  }

  pub const fn failed(job: ConversionJob, diagnostic: String, elapsed: Duration) -> Self {
    Self {
      job,
      outcome: Outcome::Failed,
      diagnostic: Some(diagnostic),
      input_bytes: None,
      output_bytes: None,
      source_deleted: false,
      elapsed,
    }
  }

  pub const fn skipped(job: ConversionJob) -> Self {
    Self {
      job,
      outcome: Outcome::Skipped,
      diagnostic: None,
      input_bytes: None,
      output_bytes: None,
      source_deleted: false,
      elapsed: Duration::ZERO,
    }
  }

  pub fn is_success(&self) -> bool {
    self.outcome == Outcome::Succeeded
  }

  /// Input size divided by output size.
  pub fn compression_ratio(&self) -> Option<f64> {
    match (self.input_bytes, self.output_bytes) {
      (Some(input), Some(output)) if output > 0 => Some(input as f64 / output as f64),
      _ => None,
    }
  }

  /// Bytes saved by replacing the input with the output.
  pub fn bytes_saved(&self) -> Option<i64> {
    let input = i64::try_from(self.input_bytes?).ok()?;
    let output = i64::try_from(self.output_bytes?).ok()?;
    Some(input - output)
  }
}

use std::io;
use std::path::PathBuf;
use std::process::ExitStatus;
use thiserror::Error;

/// Errors raised while resolving inputs and running conversions.
#[derive(Debug, Error)]
pub enum ConvertError {
  /// The input is neither a `.ts` file nor a directory.
  #[error("{} is not a .ts file or a directory", .0.display())]
  InvalidInputKind(PathBuf),

  /// Options that cannot be combined with the given input.
  #[error("incompatible options: {0}")]
  IncompatibleOptions(String),

  /// Two inputs would be converted into the same output file.
  #[error(
    "{} and {} would both be written to {}",
    .first.display(),
    .second.display(),
    .output.display()
  )]
  DuplicateOutput {
    output: PathBuf,
    first: PathBuf,
    second: PathBuf,
  },

  #[error("path not found: {}", .0.display())]
  PathNotFound(PathBuf),

  /// The transcoder could not be located on the search path.
  #[error("{0} is not installed or not on PATH. Please install ffmpeg.")]
  ToolNotFound(String),

  #[error("ffmpeg exited with {status} while converting {}", .input.display())]
  ConversionFailed {
    input: PathBuf,
    status: ExitStatus,
    diagnostic: String,
  },

  /// The input's duration could not be read for `--target-size`.
  #[error("could not probe {}: {reason}", .input.display())]
  ProbeFailed { input: PathBuf, reason: String },

  #[error("{}: {source}", .path.display())]
  Io {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("interrupted")]
  Interrupted,
}

impl ConvertError {
  pub fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
    Self::Io {
      path: path.into(),
      source,
    }
  }

  /// Fatal errors abort the whole run instead of failing a single job.
  pub const fn is_fatal(&self) -> bool {
    matches!(self, Self::ToolNotFound(_) | Self::Interrupted)
  }

  pub const fn is_usage(&self) -> bool {
    matches!(
      self,
      Self::InvalidInputKind(_)
        | Self::IncompatibleOptions(_)
        | Self::DuplicateOutput { .. }
        | Self::PathNotFound(_)
    )
  }

  /// Captured transcoder output attached to a failed conversion.
  pub fn diagnostic(&self) -> Option<&str> {
    match self {
      Self::ConversionFailed { diagnostic, .. } if !diagnostic.is_empty() => Some(diagnostic),
      _ => None,
    }
  }

  pub const fn exit_code(&self) -> u8 {
    match self {
      Self::InvalidInputKind(_)
      | Self::IncompatibleOptions(_)
      | Self::DuplicateOutput { .. }
      | Self::PathNotFound(_) => 2,
      Self::ToolNotFound(_) => 127,
      Self::Interrupted => 130,
      Self::ConversionFailed { .. } | Self::ProbeFailed { .. } | Self::Io { .. } => 1,
    }
  }
}

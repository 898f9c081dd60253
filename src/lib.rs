//! Convert MPEG transport streams (`.ts`) to MP4 by running ffmpeg.
//!
//! The crate only resolves inputs and drives the external `ffmpeg` binary;
//! all media work happens inside ffmpeg.

pub mod cli;
pub mod config;
pub mod converter;
pub mod error;
pub mod ffmpeg;
pub mod file_scanner;
pub mod stats;
pub mod types;

pub use config::Config;
pub use converter::Converter;
pub use error::ConvertError;
pub use stats::RunSummary;
pub use types::{
  Compression, ConversionJob, ConversionResult, Encoding, Outcome, Preset, TargetBitrate,
};

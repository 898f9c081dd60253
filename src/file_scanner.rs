use crate::error::ConvertError;
use crate::types::ConversionJob;
use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info};

const INPUT_EXTENSION: &str = "ts";
const OUTPUT_EXTENSION: &str = "mp4";

pub struct FileScanner;

impl FileScanner {
  /// Resolves the input root into the jobs to run.
  ///
  /// A file root yields one job whose output is `output` or the input with a
  /// `.mp4` extension. A directory root yields a job per `.ts` file found,
  /// each written alongside its input.
  pub async fn resolve(
    root: &Path,
    output: Option<&Path>,
    recursive: bool,
  ) -> Result<Vec<ConversionJob>, ConvertError> {
    let metadata = match fs::metadata(root).await {
      Ok(metadata) => metadata,
      Err(e) if e.kind() == io::ErrorKind::NotFound => {
        return Err(ConvertError::PathNotFound(root.to_path_buf()));
      }
      Err(e) => return Err(ConvertError::io(root, e)),
    };

    if metadata.is_file() {
      if recursive {
        return Err(ConvertError::IncompatibleOptions(
          "--recursive requires a directory input".into(),
        ));
      }

      if !Self::is_transport_stream(root) {
        return Err(ConvertError::InvalidInputKind(root.to_path_buf()));
      }

      let output = match output {
        Some(out) if fs::metadata(out).await.is_ok_and(|m| m.is_dir()) => {
          out.join(Self::derive_output(root).file_name().unwrap_or_default())
        }
        Some(out) => out.to_path_buf(),
        None => Self::derive_output(root),
      };

      if Self::same_file(root, &output).await {
        return Err(ConvertError::IncompatibleOptions(format!(
          "--output {} is the input file",
          output.display()
        )));
      }

      return Ok(vec![ConversionJob::new(root, output)]);
    }

    if !metadata.is_dir() {
      return Err(ConvertError::InvalidInputKind(root.to_path_buf()));
    }

    if output.is_some() {
      return Err(ConvertError::IncompatibleOptions(
        "--output cannot be used with a directory input".into(),
      ));
    }

    let jobs: Vec<ConversionJob> = Self::scan(root, recursive)
      .await?
      .into_iter()
      .map(|input| {
        let output = Self::derive_output(&input);
        ConversionJob::new(input, output)
      })
      .collect();

    Self::check_duplicate_outputs(&jobs)?;
    Ok(jobs)
  }

  /// `a.ts` and `a.TS` both derive `a.mp4` on case-sensitive filesystems.
  fn check_duplicate_outputs(jobs: &[ConversionJob]) -> Result<(), ConvertError> {
    let mut seen: HashMap<&Path, &Path> = HashMap::with_capacity(jobs.len());

    for job in jobs {
      if let Some(first) = seen.insert(&job.output, &job.input) {
        return Err(ConvertError::DuplicateOutput {
          output: job.output.clone(),
          first: first.to_path_buf(),
          second: job.input.clone(),
        });
      }
    }

    Ok(())
  }

  /// Whether `output` already exists and is the same file as `input`.
  async fn same_file(input: &Path, output: &Path) -> bool {
    match (fs::canonicalize(input).await, fs::canonicalize(output).await) {
      (Ok(input), Ok(output)) => input == output,
      _ => false,
    }
  }

  /// Lists `.ts` files under `path`, sorted by path.
  pub async fn scan(path: &Path, recursive: bool) -> Result<Vec<PathBuf>, ConvertError> {
    info!("Scanning for .ts files in: {}", path.display());

    let mut files = Vec::new();
    let mut stack = vec![path.to_path_buf()];

    while let Some(dir) = stack.pop() {
      let mut entries = fs::read_dir(&dir)
        .await
        .map_err(|e| ConvertError::io(&dir, e))?;

      while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| ConvertError::io(&dir, e))?
      {
        let path = entry.path();
        let file_type = entry
          .file_type()
          .await
          .map_err(|e| ConvertError::io(&path, e))?;

        // Symlinked directories are never descended into.
        let is_file = if file_type.is_symlink() {
          fs::metadata(&path).await.is_ok_and(|m| m.is_file())
        } else {
          file_type.is_file()
        };

        if is_file {
          if Self::is_transport_stream(&path) {
            debug!("Found transport stream: {}", path.display());
            files.push(path);
          }
        } else if recursive && file_type.is_dir() {
          stack.push(path);
        }
      }
    }

    files.sort();
    info!("Found {} .ts file(s)", files.len());
    Ok(files)
  }

  /// The input path with its extension replaced by `.mp4`.
  pub fn derive_output(input: &Path) -> PathBuf {
    input.with_extension(OUTPUT_EXTENSION)
  }

  fn is_transport_stream(path: &Path) -> bool {
    path
      .extension()
      .and_then(|ext| ext.to_str())
      .is_some_and(|ext| ext.eq_ignore_ascii_case(INPUT_EXTENSION))
  }
}

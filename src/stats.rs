use crate::types::{ConversionResult, Outcome};
use colored::Colorize;
use std::process::ExitCode;
use std::time::Duration;

/// Results of a run, in the order the jobs were resolved.
#[derive(Debug, Clone, Default)]
pub struct RunSummary {
  pub results: Vec<ConversionResult>,
  pub elapsed: Duration,
}

impl RunSummary {
  pub const fn new(results: Vec<ConversionResult>, elapsed: Duration) -> Self {
    Self { results, elapsed }
  }

  pub fn total(&self) -> usize {
    self.results.len()
  }

  pub fn succeeded(&self) -> usize {
    self.count(Outcome::Succeeded)
  }

  pub fn failed(&self) -> usize {
    self.count(Outcome::Failed)
  }

  pub fn skipped(&self) -> usize {
    self.count(Outcome::Skipped)
  }

  fn count(&self, outcome: Outcome) -> usize {
    self.results.iter().filter(|r| r.outcome == outcome).count()
  }

  /// Sources removed by `--delete-original`.
  pub fn deleted(&self) -> usize {
    self.results.iter().filter(|r| r.source_deleted).count()
  }

  /// Bytes freed by replacing deleted sources with their outputs.
  pub fn space_saved_bytes(&self) -> i64 {
    self
      .results
      .iter()
      .filter(|r| r.source_deleted && r.is_success())
      .filter_map(ConversionResult::bytes_saved)
      .sum()
  }

  /// Mean input/output size ratio over successful conversions.
  pub fn average_compression(&self) -> Option<f64> {
    let ratios: Vec<f64> = self
      .results
      .iter()
      .filter_map(ConversionResult::compression_ratio)
      .collect();

    if ratios.is_empty() {
      None
    } else {
      Some(ratios.iter().sum::<f64>() / ratios.len() as f64)
    }
  }

  pub fn failures(&self) -> impl Iterator<Item = &ConversionResult> {
    self.results.iter().filter(|r| r.outcome == Outcome::Failed)
  }

  pub fn is_success(&self) -> bool {
    self.failed() == 0
  }

  pub fn exit_code(&self) -> ExitCode {
    if self.is_success() {
      ExitCode::SUCCESS
    } else {
      ExitCode::FAILURE
    }
  }

  pub fn print_summary(&self) {
    println!("\n{}", "========================================".cyan());
    println!("{} {:.1?}", "✓ Completed in".green().bold(), self.elapsed);
    println!(
      "{} {} | {} {} | {} {} | {} {}",
      "Total:".cyan(),
      self.total(),
      "Success:".green(),
      self.succeeded(),
      "Skipped:".yellow(),
      self.skipped(),
      "Failed:".red(),
      self.failed()
    );

    if let Some(ratio) = self.average_compression() {
      println!("{} {ratio:.2}x", "Average compression:".cyan());
    }

    if self.total() > 0 {
      println!(
        "{} {:.1?}",
        "Average time per file:".cyan(),
        self.elapsed.div_f64(self.total() as f64)
      );
    }

    for result in self.failures() {
      println!("  {} {}", "✗".red(), result.job.input.display());
    }

    if self.deleted() > 0 {
      println!("{}", "----------------------------------------".cyan());
      println!("{}", "Cleanup".yellow().bold());
      println!("{} {}", "Files deleted:".yellow(), self.deleted());
      println!(
        "{} {}",
        "Total space saved:".yellow(),
        format_megabytes(self.space_saved_bytes() as f64)
      );
    }

    println!("{}", "========================================".cyan());
  }
}

pub fn format_megabytes(bytes: f64) -> String {
  format!("{:.2} MB", bytes / (1024.0 * 1024.0))
}

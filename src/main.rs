use colored::Colorize;
use std::process::ExitCode;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};
use ts_convertor::{ConvertError, cli};

#[tokio::main]
async fn main() -> ExitCode {
  // Initialize logging
  tracing_subscriber::registry()
    .with(fmt::layer().with_writer(std::io::stderr))
    .with(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
    .init();

  match cli::handle_cli().await {
    Ok(code) => code,
    Err(e) => {
      eprintln!("{} {e:#}", "✗ Error:".red());
      let code = e.downcast_ref::<ConvertError>().map_or(1, ConvertError::exit_code);
      ExitCode::from(code)
    }
  }
}

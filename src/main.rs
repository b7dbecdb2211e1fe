//! # Berglas
//!
//! Command-line tool for creating, reading and sharing secrets stored in
//! Cloud Storage (encrypted with Cloud KMS) or Secret Manager.
//!
//! See [`cli`] for the available commands.

use berglas::observability::{init_logging, register_metrics};
use berglas::LoggingConfig;
use clap::Parser;
use std::process::ExitCode;
use tracing::{debug, warn};

mod cli;

#[tokio::main]
async fn main() -> ExitCode {
    // Configure rustls crypto provider FIRST, before any other operations
    // Required for rustls 0.23+ when no default provider is set via features
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

    let cli = cli::Cli::parse();

    let mut logging = LoggingConfig::from_env();
    if let Some(level) = cli.log_level {
        logging.level = level;
    }
    if let Some(format) = cli.log_format {
        logging.format = format;
    }
    if let Err(e) = init_logging(&logging) {
        eprintln!("warning: {e:#}");
    }

    if let Err(e) = register_metrics() {
        warn!("Failed to register metrics: {e:#}");
    }

    match cli::run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            debug!(error = ?e, kind = e.kind().as_str(), "command failed");
            eprintln!("{e}");
            ExitCode::from(u8::try_from(cli::exit_code(&e)).unwrap_or(1))
        }
    }
}

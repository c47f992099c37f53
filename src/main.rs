//! Forgeroot CLI - build orchestrator for mobile and embedded Linux distributions
//!
//! Entry point for the forgeroot command-line application.

use clap::Parser;

use forgeroot::cli::output::display_error;
use forgeroot::cli::Cli;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let output = cli.output();

    // RUST_LOG wins over the verbosity flags
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(output.log_directive()));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let code = match cli.run().await {
        Ok(code) => code,
        Err(e) => {
            display_error(&e);
            1
        }
    };
    std::process::exit(code);
}

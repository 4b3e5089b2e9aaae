//! Tracklister command-line entry point.

use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use tracklister::cli;

fn main() -> ExitCode {
    let args = cli::Cli::parse();

    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            if !cli::already_reported(&e) {
                eprintln!("Error: {e:?}");
            }
            ExitCode::FAILURE
        }
    }
}

fn run(args: &cli::Cli) -> anyhow::Result<()> {
    // Logs go to stderr so `identify --json` output stays clean
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env().add_directive("tracklister=info".parse()?))
        .init();

    cli::run_command(args)
}

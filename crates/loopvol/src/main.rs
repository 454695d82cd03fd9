//! Loopvol CLI entry point.

use clap::Parser;
use color_eyre::eyre::Result;
use loopvol_common::VolumeError;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use loopvol::cli::Cli;

/// Exit code for rejected input, matching clap's usage errors.
const USAGE_EXIT_CODE: i32 = 2;

fn main() -> Result<()> {
    // Initialize error handling
    color_eyre::install()?;

    // Parse CLI arguments
    let cli = Cli::parse();

    // Initialize tracing
    let level = if cli.debug { "loopvol=debug" } else { "loopvol=info" };
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
        .with(EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(level))?)
        .init();

    // Execute command
    match cli.execute() {
        Err(report)
            if report
                .downcast_ref::<VolumeError>()
                .is_some_and(VolumeError::is_validation) =>
        {
            eprintln!("Error: {report:?}");
            std::process::exit(USAGE_EXIT_CODE);
        }
        result => result,
    }
}

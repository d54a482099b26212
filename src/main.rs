//! html5-cf - List HTML5 applications and destinations of a Cloud Foundry space
//!
//! Reads the target, org and space selected with the cf CLI and queries the
//! html5-apps-repo and destination services of that space.

use std::io;
use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use html5_cf::cli::Cli;
use html5_cf::commands;
use html5_cf::config::Settings;

/// Initialize the tracing subscriber for logging.
///
/// Log level is controlled by:
/// 1. `--debug` flag or `CF_TRACE=true` sets level to TRACE
/// 2. `RUST_LOG` environment variable (if set)
/// 3. Default is WARN
fn init_tracing(trace: bool) {
    let filter = if trace {
        EnvFilter::new("html5_cf=trace")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("html5_cf=warn"))
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).with_writer(io::stderr))
        .with(filter)
        .init();
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let settings = match Settings::from_env() {
        Ok(settings) => settings,
        Err(e) => {
            init_tracing(cli.debug);
            eprintln!("FAILED\n{}", e);
            return ExitCode::FAILURE;
        }
    };
    init_tracing(cli.debug || settings.trace);

    tracing::debug!("html5-cf starting with args: {:?}", cli);

    match commands::run(&cli, settings, io::stdout().lock()).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("FAILED\n{}", e);
            ExitCode::FAILURE
        }
    }
}

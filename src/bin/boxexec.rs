//! Binary entry point: initializes logging, parses the CLI surface, and
//! runs one supervised sandbox invocation.
//!
//! Logging-init pattern grounded on
//! `examples/warjiang-boxlite/boxlite-cli/src/main.rs`.

use std::process;

use clap::Parser;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use boxexec::Cli;

fn main() {
    let env_filter = EnvFilter::try_from_env("BOXEXEC_LOG")
        .or_else(|_| EnvFilter::try_new("info"))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    let result = cli.into_request().and_then(|req| boxexec::run(&req));

    match result {
        Ok(report) => {
            tracing::info!(?report, "run complete");
            process::exit(0);
        }
        Err(error) => {
            eprintln!("boxexec: {error}");
            process::exit(1);
        }
    }
}

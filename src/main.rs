//! Upsilon Shell - line-delimited JSON-RPC shell for NumWorks calculators.
//!
//! Reads one JSON request per line on stdin and writes one JSON response per
//! line on stdout. Diagnostics go to stderr. The binary drives the virtual
//! calculator bench configured through `UPSILON_VIRTUAL_*` variables.

use std::io::{self, IsTerminal};
use std::process::ExitCode;

use anyhow::{Context, Result};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use upsilon_shell::config::ShellConfig;
use upsilon_shell::driver::VirtualBench;
use upsilon_shell::shell::{Connection, Shell, ShellExit};

const DEFAULT_LOG_FILTER: &str = "upsilon_shell=info";

fn init_logging() {
    let filter = std::env::var("UPSILON_LOG")
        .or_else(|_| std::env::var("RUST_LOG"))
        .unwrap_or_else(|_| DEFAULT_LOG_FILTER.into());

    // stdout carries the protocol, so logs must never go there.
    tracing_subscriber::registry()
        .with(EnvFilter::try_new(&filter).unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER)))
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(io::stderr)
                .with_ansi(io::stderr().is_terminal()),
        )
        .init();
}

fn run(config: ShellConfig) -> Result<ShellExit> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to build tokio runtime")?;

    let bench = VirtualBench::new(config.virtual_device.clone());
    let connection = Connection::new(move || bench.calculator(), config.detect_policy());
    let mut shell = Shell::new(connection, &config);

    let result = runtime.block_on(shell.run(tokio::io::stdin(), tokio::io::stdout()));

    // tokio's stdin reader sits on a blocking thread that would otherwise
    // keep the runtime alive until the next byte arrives.
    runtime.shutdown_background();

    result.context("Shell stream failed")
}

fn main() -> ExitCode {
    init_logging();
    info!("Starting Upsilon shell v{}", env!("CARGO_PKG_VERSION"));

    let config = match ShellConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("Configuration error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    match run(config) {
        Ok(exit) => {
            info!(?exit, "shell stopped");
            // Exit at once; a pending blocking stdin read must not hold the process.
            std::process::exit(0)
        }
        Err(e) => {
            error!("Shell error: {:#}", e);
            std::process::exit(1)
        }
    }
}

pub mod cli;
pub mod commands;
pub mod core;

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use crate::cli::CliArgs;
use crate::core::config::LauncherConfig;
use crate::core::events::{ChannelSink, FanoutSink, TracingSink};
use crate::core::state::AppState;

const DEFAULT_FILTER: &str = "info,hellas_launcher_lib=debug";

/// Install the global subscriber. `RUST_LOG` wins over `verbose`.
pub fn init_tracing(verbose: u8) {
    let fallback = match verbose {
        0 => DEFAULT_FILTER,
        1 => "debug",
        _ => "trace",
    };
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback)),
        )
        .with_writer(std::io::stderr)
        .try_init();
}

pub fn run() -> ExitCode {
    let args = CliArgs::parse();
    init_tracing(args.verbose);

    tracing::info!("Hellas launcher starting...");

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(e) => {
            tracing::error!("Cannot start async runtime: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let result = runtime.block_on(async {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        let sink = FanoutSink::new()
            .with(Arc::new(TracingSink))
            .with(Arc::new(ChannelSink::new(tx)));
        let reporter = tokio::spawn(cli::report_progress(rx));

        let config = LauncherConfig::from_env();
        let state = Arc::new(AppState::new(config, Arc::new(sink)).await?);
        let result = args.command.run(state).await;
        reporter.abort();
        result
    });

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!("{} ({})", err, err.kind());
            eprintln!("{}: {}", err.kind(), err);
            ExitCode::FAILURE
        }
    }
}

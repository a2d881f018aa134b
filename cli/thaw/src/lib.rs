#![doc = include_str!("../README.md")]
//! `thaw` analyzes AWS Lambda invocation performance from CloudWatch platform reports
//! and benchmarks memory configurations against a live function.

pub mod analysis;
pub mod aws_setup;
pub mod benchmark;
pub mod cli;
pub mod cloudwatch;
pub mod commands;
pub mod compare;
pub mod config;
pub mod console;
pub mod lambda;
pub mod parser;
pub mod progress;
pub mod rates;
pub mod report;
pub mod sample;
pub mod stats;
pub mod types;
pub mod utils;

use anyhow::Result;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use aws_setup::setup_aws_clients;
pub use cli::{CliArgs, Commands};
use config::{load_and_resolve_config, ProfileConfig};

/// Installs the log subscriber. `RUST_LOG` wins when set; otherwise `-v` raises this
/// crate's level from WARN up to TRACE. Logs go to stderr.
pub fn init_logging(verbose: u8) {
    let filter = if std::env::var_os(EnvFilter::DEFAULT_ENV).is_some() {
        EnvFilter::from_default_env()
    } else {
        let log_level = match verbose {
            0 => LevelFilter::WARN,
            1 => LevelFilter::INFO,
            2 => LevelFilter::DEBUG,
            _ => LevelFilter::TRACE,
        };
        EnvFilter::builder()
            .with_default_directive(LevelFilter::WARN.into())
            .parse_lossy(format!("{}={}", env!("CARGO_PKG_NAME"), log_level))
    };
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();
}

/// Resolves configuration, sets up AWS clients and runs the selected command.
pub async fn run_thaw(args: CliArgs) -> Result<()> {
    let cli_layer = ProfileConfig::from_cli_args(&args);
    let config = load_and_resolve_config(
        args.config_path.as_deref(),
        args.config_profile.as_deref(),
        &cli_layer,
    )?;
    tracing::debug!(?config, "Resolved configuration");

    let clients =
        setup_aws_clients(config.aws_region.as_deref(), config.aws_profile.as_deref()).await;

    match &args.command {
        Commands::Analyze(analyze) => {
            commands::analyze(analyze, &config, clients, args.json).await
        }
        Commands::Compare(compare) => {
            commands::compare(compare, &config, clients, args.json).await
        }
        Commands::Benchmark(benchmark) => {
            commands::benchmark(benchmark, &config, clients, args.json).await
        }
    }
}

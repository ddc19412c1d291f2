//! ferrostat Binary Entry Point
//!
//! Checks or replays the statements declared in a configuration file.
//! Core functionality is provided by the `ferrostat` library crate.

use std::time::Duration;

use clap::{Parser, Subcommand};
use ferrostat::{
    config::{AppConfig, parse_duration},
    replay::replay,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// ferrostat - Storage statement tool
#[derive(Parser, Debug)]
#[command(name = "ferrostat", version, about, long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(
        short,
        long,
        default_value = "configs/config.yaml",
        env = "FERROSTAT_CONFIG"
    )]
    config: String,

    /// Treat the backing storage as reached through a proxy (overrides config file)
    #[arg(long, env = "FERROSTAT_BACKING_STORAGE_IN_PROXY")]
    backing_storage_in_proxy: Option<bool>,

    /// Drain timeout for both workers on shutdown (overrides config file)
    #[arg(long, env = "FERROSTAT_DRAIN_TIMEOUT", value_parser = parse_duration)]
    drain_timeout: Option<Duration>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Compile every configured statement and report failures
    Check,
    /// Run the configured statements through a queued in-memory storage
    Replay,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,ferrostat=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    tracing::info!("Loading configuration from: {}", cli.config);
    let mut config = AppConfig::load(&cli.config)?;

    // Apply CLI/env overrides (CLI > ENV > config file)
    if let Some(proxied) = cli.backing_storage_in_proxy {
        config.storage.backing_storage_in_proxy = proxied;
    }
    if let Some(timeout) = cli.drain_timeout {
        config.storage.queue_drain_timeout = timeout;
        config.storage.file_drain_timeout = timeout;
    }
    config.validate()?;

    tracing::info!(
        "Storage: {} (proxied: {}), {} categories, {} statements",
        config.storage.name,
        config.storage.backing_storage_in_proxy,
        config.categories.len(),
        config.statements.len(),
    );

    match cli.command {
        Command::Check => check(&config),
        Command::Replay => {
            let summary = replay(&config, &mut std::io::stdout().lock())?;
            tracing::info!(
                "Replayed {} writes and {} queries ({} rows)",
                summary.writes,
                summary.queries,
                summary.rows
            );
            Ok(())
        }
    }
}

/// Print one line per statement; fail if any statement does not compile.
fn check(config: &AppConfig) -> Result<(), Box<dyn std::error::Error>> {
    let mut failed = 0;
    for (statement, result) in config.statements.iter().zip(config.check()) {
        match result {
            Ok(compiled) => {
                let signature: Vec<&str> = compiled.signature().iter().map(|t| t.as_ref()).collect();
                println!(
                    "ok    {:<11} {} [{}]",
                    compiled.kind().to_string(),
                    statement.descriptor,
                    signature.join(", ")
                );
            }
            Err(e) => {
                failed += 1;
                println!("FAIL  {}: {}", statement.descriptor, e);
            }
        }
    }

    if failed > 0 {
        return Err(format!("{failed} of {} statements failed", config.statements.len()).into());
    }
    tracing::info!("All {} statements compiled", config.statements.len());
    Ok(())
}

//! madroned: the coordination server daemon.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use madrone::config::{
    Config, DEFAULT_KEEPALIVE_INTERVAL_MS, DEFAULT_LEASE_INTERVAL_MS, DEFAULT_PORT,
};
use madrone::server;

#[derive(Debug, Parser)]
#[command(name = "madroned", about = "Coordination service for the Madrone storage platform")]
struct Cli {
    /// Base directory hosting the namespace.
    #[arg(long, env = "MADRONE_DIR")]
    base_dir: PathBuf,

    /// UDP listen port.
    #[arg(long, env = "MADRONE_PORT", default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Session lease duration in milliseconds.
    #[arg(long, env = "MADRONE_LEASE_INTERVAL_MS", default_value_t = DEFAULT_LEASE_INTERVAL_MS)]
    lease_interval_ms: u64,

    /// Keep-alive (and expiry sweep) period in milliseconds.
    #[arg(
        long,
        env = "MADRONE_KEEPALIVE_INTERVAL_MS",
        default_value_t = DEFAULT_KEEPALIVE_INTERVAL_MS
    )]
    keepalive_interval_ms: u64,

    /// Log at debug level by default.
    #[arg(long, env = "MADRONE_VERBOSE")]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = Config {
        base_dir: cli.base_dir,
        port: cli.port,
        lease_interval: Duration::from_millis(cli.lease_interval_ms),
        keepalive_interval: Duration::from_millis(cli.keepalive_interval_ms),
        verbose: cli.verbose,
    };
    config.validate().context("invalid configuration")?;

    server::serve(config).await
}

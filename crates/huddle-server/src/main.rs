//! # Huddle Server
//!
//! Chat room server that keeps a live participant count per room and
//! broadcasts join, leave and message events to room subscribers.
//!
//! ## Usage
//!
//! ```bash
//! # Run with default settings
//! huddle
//!
//! # Run with a specific config file
//! huddle --config /path/to/huddle.toml
//!
//! # Print the effective configuration and exit
//! huddle --print-config
//!
//! # Override settings from the environment
//! HUDDLE_PORT=8080 HUDDLE_HOST=0.0.0.0 HUDDLE_DELIVERY__TIMEOUT_MS=2000 huddle
//! ```

mod config;
mod handlers;
mod metrics;
mod session;

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Huddle chat room server.
#[derive(Debug, Parser)]
#[command(name = "huddle", version, about)]
struct Args {
    /// Config file to load instead of searching the default locations
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Print the effective configuration as TOML and exit
    #[arg(long)]
    print_config: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "huddle=debug,huddle_core=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    // Load configuration
    let config = match &args.config {
        Some(path) => config::Config::load_from(Some(path))?,
        None => config::Config::load()?,
    };

    if args.print_config {
        print!("{}", config.to_toml()?);
        return Ok(());
    }

    tracing::info!("Starting Huddle server on {}:{}", config.host, config.port);

    // Initialize metrics
    metrics::init_metrics();

    // Start the server
    handlers::run_server(config).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_args() {
        let args =
            Args::try_parse_from(["huddle", "--config", "/tmp/huddle.toml", "--print-config"])
                .unwrap();
        assert_eq!(args.config, Some(PathBuf::from("/tmp/huddle.toml")));
        assert!(args.print_config);

        let args = Args::try_parse_from(["huddle", "-c", "local.toml"]).unwrap();
        assert_eq!(args.config, Some(PathBuf::from("local.toml")));

        let args = Args::try_parse_from(["huddle"]).unwrap();
        assert!(args.config.is_none());
        assert!(!args.print_config);
    }

    #[test]
    fn test_parse_args_errors() {
        assert!(Args::try_parse_from(["huddle", "--config"]).is_err());
        assert!(Args::try_parse_from(["huddle", "--verbose"]).is_err());
    }

    #[test]
    fn test_cli_definition() {
        use clap::CommandFactory;
        Args::command().debug_assert();
    }
}

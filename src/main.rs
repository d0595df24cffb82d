mod commands;
mod utils;

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::Result;
use calbridge_core::CalendarBackend;
use calbridge_core::config::BridgeConfig;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "calbridge")]
#[command(about = "Keep calendars hosted in different domains converged on the same events")]
struct Cli {
    /// Path to config.toml (defaults to ~/.config/calbridge/config.toml)
    #[arg(long, global = true)]
    config: Option<String>,

    /// Log every sync decision
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Sync every calendar once
    Sync {
        /// Only operate on this calendar (by name)
        #[arg(short, long)]
        calendar: Option<String>,
    },
    /// Sync repeatedly, sleeping poll_time between cycles
    Watch {
        /// Only operate on this calendar (by name)
        #[arg(short, long)]
        calendar: Option<String>,
    },
    /// Connect every replica and report access, without syncing
    Check {
        /// Only operate on this calendar (by name)
        #[arg(short, long)]
        calendar: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let path = BridgeConfig::resolve_path(cli.config.as_deref())?;
    let config = BridgeConfig::load(&path)?;

    match cli.command {
        Commands::Sync { calendar } => {
            let names = resolve_calendars(&config, calendar.as_deref())?;
            commands::sync::run(&config, &names).await
        }
        Commands::Watch { calendar } => {
            let names = resolve_calendars(&config, calendar.as_deref())?;
            commands::watch::run(&config, &names).await
        }
        Commands::Check { calendar } => {
            let names = resolve_calendars(&config, calendar.as_deref())?;
            commands::check::run(&config, &names).await
        }
    }
}

fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(filter)
        .init();
}

fn resolve_calendars(config: &BridgeConfig, calendar_filter: Option<&str>) -> Result<Vec<String>> {
    match calendar_filter {
        Some(name) if config.calendars.contains_key(name) => Ok(vec![name.to_string()]),
        Some(name) => {
            let available: Vec<_> = config.calendars.keys().cloned().collect();
            anyhow::bail!(
                "Calendar '{}' not found. Available: {}",
                name,
                available.join(", ")
            );
        }
        None => Ok(config.calendars.keys().cloned().collect()),
    }
}

/// One backend per configured domain, shared by every replica in that domain.
fn domain_backends(config: &BridgeConfig) -> BTreeMap<String, Arc<dyn CalendarBackend>> {
    config
        .domains
        .iter()
        .map(|(name, remote)| (name.clone(), remote.backend()))
        .collect()
}

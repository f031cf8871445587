// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! # AEGIS Host Agent CLI
//!
//! The `aegis-host` binary keeps the node agents of this machine and their
//! firewall tables converged to the desired state.
//!
//! ## Commands
//!
//! - `aegis-host run` - Run the agent until SIGINT/SIGTERM
//! - `aegis-host config show|validate|generate` - Configuration management
//! - `aegis-host acl render <hostname>` - Print the filter tables a host would get

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use aegis_host_core::domain::config::HostAgentConfig;

mod commands;

use commands::{AclCommand, ConfigCommand};

/// AEGIS Host Agent - Converge node agents and firewall rules
#[derive(Parser)]
#[command(name = "aegis-host")]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Path to configuration file (overrides discovery)
    #[arg(
        short,
        long,
        global = true,
        env = "AEGIS_HOST_CONFIG_PATH",
        value_name = "FILE"
    )]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error); defaults to the configured level
    #[arg(long, global = true, env = "AEGIS_HOST_LOG_LEVEL")]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the host agent in the foreground
    #[command(name = "run")]
    Run,

    /// Configuration management
    #[command(name = "config")]
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },

    /// Inspect firewall rules rendered from the desired state
    #[command(name = "acl")]
    Acl {
        #[command(subcommand)]
        command: AclCommand,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Logging settings come from the config file unless overridden on the command line.
    // Commands load the full configuration once the subscriber is installed.
    let logging = HostAgentConfig::logging_settings(cli.config.as_deref());
    let level = cli.log_level.as_deref().unwrap_or(&logging.level);
    init_logging(level, &logging.format)?;

    match cli.command {
        Commands::Run => commands::run::execute(cli.config).await,
        Commands::Config { command } => commands::config::handle_command(command, cli.config).await,
        Commands::Acl { command } => commands::acl::handle_command(command, cli.config).await,
    }
}

/// Initialize tracing subscriber for logging
fn init_logging(level: &str, format: &str) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(level))
        .context("Failed to create log filter")?;

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false);

    if format == "json" {
        builder.json().init();
    } else {
        builder.compact().init();
    }

    Ok(())
}

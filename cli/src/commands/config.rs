// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Configuration management commands
//!
//! Commands: show, validate, generate

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::Colorize;
use std::path::PathBuf;

use aegis_host_core::domain::config::HostAgentConfig;

#[derive(Subcommand)]
pub enum ConfigCommand {
    /// Show current configuration
    Show {
        /// Show config file paths checked
        #[arg(long)]
        paths: bool,
    },

    /// Validate configuration file
    Validate {
        /// Path to config file (default: discover)
        #[arg(value_name = "FILE")]
        file: Option<PathBuf>,
    },

    /// Generate a configuration file holding every default
    Generate {
        /// Output path
        #[arg(short, long, default_value = "./aegis-host.yaml")]
        output: PathBuf,
    },
}

pub async fn handle_command(
    command: ConfigCommand,
    config_override: Option<PathBuf>,
) -> Result<()> {
    match command {
        ConfigCommand::Show { paths } => show(config_override, paths).await,
        ConfigCommand::Validate { file } => validate(file.or(config_override)).await,
        ConfigCommand::Generate { output } => generate(output).await,
    }
}

async fn show(config_override: Option<PathBuf>, show_paths: bool) -> Result<()> {
    let config = HostAgentConfig::load_or_default(config_override.clone())
        .context("Failed to load configuration")?;

    if show_paths {
        println!("{}", "Configuration discovery paths:".bold());
        if let Some(path) = &config_override {
            println!("  1. --config flag: {}", path.display());
        } else {
            println!("  1. --config flag: {}", "(not set)".dimmed());
        }
        println!(
            "  2. AEGIS_HOST_CONFIG_PATH: {}",
            std::env::var("AEGIS_HOST_CONFIG_PATH")
                .unwrap_or_else(|_| "(not set)".to_string())
                .dimmed()
        );
        println!("  3. ./aegis-host.yaml");
        println!("  4. ~/.aegis/host.yaml");
        println!("  5. /etc/aegis/host.yaml");
        println!();
    }

    println!("{}", "Current configuration:".bold());
    println!();
    println!("  Node: {}", config.metadata.name);
    println!();

    let spec = &config.spec;
    println!("{}", "Desired State:".bold());
    println!("  Path: {}", spec.desired_state.path.display());
    println!("  Refresh interval: {:?}", spec.desired_state.refresh_interval);
    println!();

    println!("{}", "Fleet:".bold());
    println!("  Freeze timeout: {:?}", spec.fleet.freeze_timeout);
    println!("  Freeze warning after: {:?}", spec.fleet.freeze_warn_after);
    println!("  Node agent tick: {:?}", spec.fleet.tick_interval);
    println!(
        "  Metrics: first after {:?}, then every {:?}",
        spec.fleet.metrics_initial_delay, spec.fleet.metrics_interval
    );
    println!();

    println!("{}", "Firewall:".bold());
    println!(
        "  Network namespace: {}",
        spec.firewall.netns_template.as_deref().unwrap_or("(host)")
    );
    println!("  Command timeout: {:?}", spec.firewall.command_timeout);
    println!();

    println!("{}", "Observability:".bold());
    println!(
        "  Logging: {} ({})",
        spec.observability.logging.level, spec.observability.logging.format
    );
    if spec.observability.metrics.enabled {
        println!("  Metrics: {}", spec.observability.metrics.listen_address);
    } else {
        println!("  Metrics: {}", "disabled".dimmed());
    }

    Ok(())
}

async fn validate(config_path: Option<PathBuf>) -> Result<()> {
    println!("Validating configuration...");

    let config = HostAgentConfig::load_or_default(config_path)
        .context("Failed to load configuration")?;

    config
        .validate()
        .context("Configuration validation failed")?;

    println!("{}", "✓ Configuration is valid".green());

    Ok(())
}

async fn generate(output: PathBuf) -> Result<()> {
    let sample = HostAgentConfig::default()
        .to_yaml_string()
        .context("Failed to render default configuration")?;

    std::fs::write(&output, sample)
        .with_context(|| format!("Failed to write config to {:?}", output))?;

    println!(
        "{}",
        format!("✓ Configuration generated: {}", output.display()).green()
    );

    Ok(())
}

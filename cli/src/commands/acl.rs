// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! ACL inspection commands

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::Colorize;
use std::path::PathBuf;

use aegis_host_core::domain::config::HostAgentConfig;
use aegis_host_core::domain::host::{Hostname, IpVersion};
use aegis_host_core::domain::node_repository::{DesiredState, NodeRepository};
use aegis_host_core::domain::rule_table::{render_table, FILTER_TABLE};
use aegis_host_core::infrastructure::FileNodeRepository;

#[derive(Subcommand)]
pub enum AclCommand {
    /// Print the filter table a host converges to, in iptables-restore format
    Render {
        /// Host as listed in the desired state
        hostname: String,

        /// Only render this IP version (v4 or v6)
        #[arg(long, value_name = "VERSION")]
        ip_version: Option<IpVersion>,

        /// Desired state file (default: from configuration)
        #[arg(long, value_name = "FILE")]
        desired_state: Option<PathBuf>,
    },
}

pub async fn handle_command(command: AclCommand, config_override: Option<PathBuf>) -> Result<()> {
    match command {
        AclCommand::Render {
            hostname,
            ip_version,
            desired_state,
        } => {
            let path = match desired_state {
                Some(path) => path,
                None => {
                    HostAgentConfig::load_or_default(config_override)
                        .context("Failed to load configuration")?
                        .spec
                        .desired_state
                        .path
                }
            };
            let state = FileNodeRepository::new(&path)
                .desired_state()
                .await
                .context("Failed to read desired state")?;
            print!("{}", render(&state, &Hostname::new(hostname), ip_version)?);
            Ok(())
        }
    }
}

fn render(state: &DesiredState, hostname: &Hostname, ip_version: Option<IpVersion>) -> Result<String> {
    let host = state
        .host(hostname)
        .with_context(|| format!("Host '{}' is not in the desired state", hostname))?;

    let versions = match ip_version {
        Some(version) => vec![version],
        None => IpVersion::ALL.to_vec(),
    };

    let mut out = String::new();
    for version in versions {
        out.push_str(&format!("{}\n", format!("# {} ({})", hostname, version.iptables_cmd()).dimmed()));
        out.push_str(&render_table(FILTER_TABLE, &host.acl.wanted_rules(version)));
    }
    Ok(out)
}

// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Foreground agent: wires the infrastructure to the fleet orchestrator and
//! runs until a shutdown signal arrives.

use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use aegis_host_core::application::acl_maintainer::AclMaintainer;
use aegis_host_core::application::node_admin::{NodeAdmin, NodeAdminConfig};
use aegis_host_core::application::node_agent::AclNodeAgentFactory;
use aegis_host_core::application::state_updater::NodeAdminStateUpdater;
use aegis_host_core::domain::config::{HostAgentConfig, MetricsConfig};
use aegis_host_core::infrastructure::{
    DnsAddressResolver, FileNodeRepository, IptablesRuleTable, ProcessCommandExecutor,
};

pub async fn execute(config_path: Option<PathBuf>) -> Result<()> {
    let config = HostAgentConfig::load_or_default(config_path)
        .context("Failed to load configuration")?;
    config.validate().context("Configuration validation failed")?;

    info!(
        node = %config.metadata.name,
        desired_state = %config.spec.desired_state.path.display(),
        "Starting AEGIS host agent"
    );

    install_metrics_exporter(&config.spec.observability.metrics)?;

    let spec = &config.spec;
    let executor = Arc::new(ProcessCommandExecutor::from_config(&spec.firewall));
    let rule_table = Arc::new(IptablesRuleTable::new(executor));
    let maintainer = Arc::new(AclMaintainer::new(rule_table, Arc::new(DnsAddressResolver::new())));
    let factory = Arc::new(AclNodeAgentFactory::new(maintainer, spec.fleet.tick_interval));

    let node_admin = Arc::new(NodeAdmin::new(factory, NodeAdminConfig::from(&spec.fleet)));
    node_admin.start();

    let repository = Arc::new(FileNodeRepository::new(&spec.desired_state.path));
    let updater = Arc::new(NodeAdminStateUpdater::new(
        node_admin.clone(),
        repository,
        spec.desired_state.refresh_interval,
        spec.fleet.freeze_warn_after,
    ));

    let shutdown = CancellationToken::new();
    let updater_handle = updater.start(shutdown.clone());

    shutdown_signal().await;
    info!("Shutdown signal received, stopping host agent");

    shutdown.cancel();
    if let Err(e) = updater_handle.await {
        warn!(error = %e, "State updater terminated abnormally");
    }
    node_admin.stop().await;

    info!("Host agent stopped");
    Ok(())
}

fn install_metrics_exporter(metrics: &MetricsConfig) -> Result<()> {
    if !metrics.enabled {
        info!("Metrics export disabled");
        return Ok(());
    }

    let addr: SocketAddr = metrics
        .listen_address
        .parse()
        .with_context(|| format!("Invalid metrics listen address '{}'", metrics.listen_address))?;

    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .context("Failed to install Prometheus exporter")?;

    info!(listen_address = %addr, "Prometheus metrics exporter listening");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

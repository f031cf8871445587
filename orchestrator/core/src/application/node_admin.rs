// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Node Admin
//!
//! Fleet orchestrator for every host managed by this agent. It keeps exactly one
//! worker per desired host, fans freeze requests and suspensions out to the
//! workers, and periodically aggregates their health into process metrics.
//!
//! ## Freeze model
//!
//! The orchestrator starts frozen. A freeze is only confirmed (`is_frozen`)
//! once every worker has acknowledged it within the per-worker timeout.
//! Unfreezing takes effect immediately, whatever the workers answer.
//!
//! ## Metrics
//!
//! | Metric | Type | Labels |
//! |--------|------|--------|
//! | `aegis_host_nodes_image_loading` | gauge | `role` |
//! | `aegis_host_nodes_unhandled_exceptions_total` | counter | `role` |

use async_trait::async_trait;
use dashmap::DashMap;
use futures::future::join_all;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::domain::config::FleetConfig;
use crate::domain::host::{HostSpec, Hostname};
use crate::domain::node_agent::{NodeAgent, NodeAgentContext, NodeAgentError, NodeAgentScheduler};

const IMAGE_LOADING_METRIC: &str = "aegis_host_nodes_image_loading";
const UNHANDLED_EXCEPTIONS_METRIC: &str = "aegis_host_nodes_unhandled_exceptions_total";
const METRICS_ROLE: &str = "docker";
const SHUTDOWN_POLL_INTERVAL: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub struct NodeAdminConfig {
    /// How long each worker gets to acknowledge a freeze change.
    pub freeze_timeout: Duration,
    pub metrics_initial_delay: Duration,
    pub metrics_interval: Duration,
}

impl Default for NodeAdminConfig {
    fn default() -> Self {
        Self {
            freeze_timeout: Duration::from_secs(5),
            metrics_initial_delay: Duration::from_secs(10),
            metrics_interval: Duration::from_secs(55),
        }
    }
}

impl From<&FleetConfig> for NodeAdminConfig {
    fn from(fleet: &FleetConfig) -> Self {
        Self {
            freeze_timeout: fleet.freeze_timeout,
            metrics_initial_delay: fleet.metrics_initial_delay,
            metrics_interval: fleet.metrics_interval,
        }
    }
}

/// A worker's lifecycle half and scheduling half, handled as one unit.
pub struct NodeAgentWithScheduler {
    hostname: Hostname,
    agent: Arc<dyn NodeAgent>,
    scheduler: Arc<dyn NodeAgentScheduler>,
}

impl NodeAgentWithScheduler {
    pub fn new(
        hostname: Hostname,
        agent: Arc<dyn NodeAgent>,
        scheduler: Arc<dyn NodeAgentScheduler>,
    ) -> Self {
        Self {
            hostname,
            agent,
            scheduler,
        }
    }

    pub fn hostname(&self) -> &Hostname {
        &self.hostname
    }
}

#[async_trait]
impl NodeAgent for NodeAgentWithScheduler {
    async fn start(&self) -> Result<(), NodeAgentError> {
        self.agent.start().await
    }

    async fn stop(&self) -> Result<(), NodeAgentError> {
        self.agent.stop().await
    }

    async fn suspend(&self) -> Result<(), NodeAgentError> {
        self.agent.suspend().await
    }

    async fn stop_services(&self) -> Result<(), NodeAgentError> {
        self.agent.stop_services().await
    }

    async fn update_metrics_snapshot(&self) -> Result<(), NodeAgentError> {
        self.agent.update_metrics_snapshot().await
    }

    fn is_downloading_image(&self) -> bool {
        self.agent.is_downloading_image()
    }

    fn drain_unhandled_exception_count(&self) -> u32 {
        self.agent.drain_unhandled_exception_count()
    }
}

#[async_trait]
impl NodeAgentScheduler for NodeAgentWithScheduler {
    fn schedule_tick_with(&self, context: NodeAgentContext) {
        self.scheduler.schedule_tick_with(context)
    }

    async fn set_frozen(&self, frozen: bool, timeout: Duration) -> bool {
        self.scheduler.set_frozen(frozen, timeout).await
    }
}

pub trait NodeAgentWithSchedulerFactory: Send + Sync {
    fn create(&self, context: NodeAgentContext) -> NodeAgentWithScheduler;
}

/// Hosts started and stopped by one [`NodeAdmin::refresh`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RefreshSummary {
    pub started: Vec<Hostname>,
    pub stopped: Vec<Hostname>,
    pub failed: Vec<Hostname>,
}

/// Result of one metrics aggregation pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NodeAgentMetricsSample {
    pub images_loading: usize,
    pub unhandled_exceptions: u64,
    pub snapshot_failures: usize,
}

struct FreezeState {
    want_frozen: bool,
    is_frozen: bool,
    freeze_started_at: Option<Instant>,
}

type AgentMap = DashMap<Hostname, Arc<NodeAgentWithScheduler>>;

pub struct NodeAdmin {
    factory: Arc<dyn NodeAgentWithSchedulerFactory>,
    config: NodeAdminConfig,
    agents: Arc<AgentMap>,
    freeze: Mutex<FreezeState>,
    refresh_lock: tokio::sync::Mutex<()>,
    shutdown_token: CancellationToken,
    metrics_task: Mutex<Option<JoinHandle<()>>>,
}

impl NodeAdmin {
    pub fn new(factory: Arc<dyn NodeAgentWithSchedulerFactory>, config: NodeAdminConfig) -> Self {
        Self {
            factory,
            config,
            agents: Arc::new(DashMap::new()),
            freeze: Mutex::new(FreezeState {
                want_frozen: true,
                is_frozen: true,
                freeze_started_at: Some(Instant::now()),
            }),
            refresh_lock: tokio::sync::Mutex::new(()),
            shutdown_token: CancellationToken::new(),
            metrics_task: Mutex::new(None),
        }
    }

    /// Make the managed set equal to the hostnames in `desired`: stop workers
    /// for hosts no longer listed, start workers for new ones, then hand every
    /// worker its latest context. Duplicate hostnames resolve to the last entry.
    pub async fn refresh(&self, desired: Vec<HostSpec>) -> RefreshSummary {
        let _guard = self.refresh_lock.lock().await;
        let mut summary = RefreshSummary::default();

        let mut contexts: HashMap<Hostname, NodeAgentContext> = HashMap::new();
        for spec in desired {
            contexts.insert(spec.hostname.clone(), NodeAgentContext::new(spec));
        }

        let current: HashSet<Hostname> = self.agents.iter().map(|e| e.key().clone()).collect();

        let mut removed: Vec<&Hostname> =
            current.iter().filter(|h| !contexts.contains_key(*h)).collect();
        removed.sort();
        for hostname in removed {
            let Some((_, agent)) = self.agents.remove(hostname) else {
                continue;
            };
            info!(hostname = %hostname, "Stopping node agent for host no longer wanted");
            if let Err(e) = agent.stop().await {
                warn!(hostname = %hostname, error = %e, "Failed to stop node agent cleanly");
            }
            summary.stopped.push(hostname.clone());
        }

        let mut added: Vec<&NodeAgentContext> = contexts
            .iter()
            .filter(|(h, _)| !current.contains(*h))
            .map(|(_, c)| c)
            .collect();
        added.sort_by(|a, b| a.hostname().cmp(b.hostname()));
        for context in added {
            let hostname = context.hostname().clone();
            let agent = Arc::new(self.factory.create(context.clone()));
            match agent.start().await {
                Ok(()) => {
                    info!(hostname = %hostname, "Started node agent");
                    self.agents.insert(hostname.clone(), agent);
                    summary.started.push(hostname);
                }
                Err(e) => {
                    warn!(hostname = %hostname, error = %e, "Failed to start node agent, retrying on next refresh");
                    summary.failed.push(hostname);
                }
            }
        }

        for (hostname, context) in contexts {
            if let Some(agent) = self.agents.get(&hostname).map(|e| e.value().clone()) {
                agent.schedule_tick_with(context);
            }
        }

        summary
    }

    /// Ask every worker to freeze or unfreeze. Returns whether all of them
    /// confirmed within the freeze timeout.
    pub async fn set_frozen(&self, frozen: bool) -> bool {
        {
            let mut state = self.freeze.lock();
            if state.want_frozen != frozen {
                state.want_frozen = frozen;
                state.freeze_started_at = frozen.then(Instant::now);
                info!(frozen, "Freeze state change requested");
            }
            if !frozen {
                state.is_frozen = false;
            }
        }

        let agents = self.snapshot();
        let timeout = self.config.freeze_timeout;
        let results = join_all(agents.iter().map(|agent| async move {
            let converged = agent.set_frozen(frozen, timeout).await;
            if !converged {
                debug!(hostname = %agent.hostname(), frozen, "Node agent has not converged to wanted freeze state yet");
            }
            converged
        }))
        .await;

        let not_converged = results.iter().filter(|c| !**c).count();
        if not_converged > 0 {
            info!(
                not_converged,
                total = results.len(),
                frozen,
                "Not all node agents converged to wanted freeze state"
            );
            return false;
        }

        if frozen {
            let mut state = self.freeze.lock();
            // An unfreeze may have raced this confirmation
            if state.want_frozen {
                state.is_frozen = true;
            }
        }
        true
    }

    pub fn is_frozen(&self) -> bool {
        self.freeze.lock().is_frozen
    }

    /// Time since the current freeze was requested, zero when not wanting to be frozen.
    pub fn frozen_duration(&self) -> Duration {
        self.freeze
            .lock()
            .freeze_started_at
            .map(|started| started.elapsed())
            .unwrap_or(Duration::ZERO)
    }

    /// Suspend and stop services on the given hosts. Unknown hostnames are
    /// ignored; a failure on one host does not stop the others. Services of a
    /// host whose suspend failed are left running.
    pub async fn stop_hosts(&self, hostnames: &[Hostname]) {
        let agents: Vec<Arc<NodeAgentWithScheduler>> = hostnames
            .iter()
            .filter_map(|h| self.agents.get(h).map(|e| e.value().clone()))
            .collect();

        join_all(agents.iter().map(|agent| async move {
            if let Err(e) = agent.suspend().await {
                warn!(hostname = %agent.hostname(), error = %e, "Failed to suspend node");
                return;
            }
            if let Err(e) = agent.stop_services().await {
                warn!(hostname = %agent.hostname(), error = %e, "Failed to stop services on node");
            }
        }))
        .await;
    }

    pub fn managed_hostnames(&self) -> Vec<Hostname> {
        let mut hostnames: Vec<Hostname> = self.agents.iter().map(|e| e.key().clone()).collect();
        hostnames.sort();
        hostnames
    }

    /// Run one metrics aggregation pass now.
    pub async fn update_node_agent_metrics(&self) -> NodeAgentMetricsSample {
        update_node_agent_metrics(&self.agents).await
    }

    /// Start the periodic metrics task.
    pub fn start(&self) {
        let mut task = self.metrics_task.lock();
        if task.is_some() {
            warn!("Node admin already started");
            return;
        }

        let agents = self.agents.clone();
        let token = self.shutdown_token.clone();
        let initial_delay = self.config.metrics_initial_delay;
        let interval = self.config.metrics_interval;

        info!(
            initial_delay_secs = initial_delay.as_secs(),
            interval_secs = interval.as_secs(),
            "Starting node agent metrics scheduler"
        );

        *task = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + initial_delay, interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                // A tick that fell due during a slow pass must not outrun shutdown
                tokio::select! {
                    biased;
                    _ = token.cancelled() => {
                        info!("Node agent metrics scheduler shutting down");
                        break;
                    }
                    _ = ticker.tick() => {
                        update_node_agent_metrics(&agents).await;
                    }
                }
            }
        }));
    }

    /// Stop the metrics task and every worker. Blocks until the metrics task
    /// has exited, however long an in-flight pass takes.
    pub async fn stop(&self) {
        self.shutdown_token.cancel();

        let agents = self.snapshot();
        join_all(agents.iter().map(|agent| async move {
            if let Err(e) = agent.stop().await {
                warn!(hostname = %agent.hostname(), error = %e, "Failed to stop node agent");
            }
        }))
        .await;

        let handle = self.metrics_task.lock().take();
        if let Some(mut handle) = handle {
            loop {
                match tokio::time::timeout(SHUTDOWN_POLL_INTERVAL, &mut handle).await {
                    Ok(Ok(())) => break,
                    Ok(Err(e)) => {
                        warn!(error = %e, "Metrics scheduler terminated abnormally");
                        break;
                    }
                    Err(_) => info!("Waiting for node agent metrics scheduler to shut down"),
                }
            }
        }

        info!("Node admin stopped");
    }

    fn snapshot(&self) -> Vec<Arc<NodeAgentWithScheduler>> {
        snapshot(&self.agents)
    }
}

fn snapshot(agents: &AgentMap) -> Vec<Arc<NodeAgentWithScheduler>> {
    agents.iter().map(|e| e.value().clone()).collect()
}

async fn update_node_agent_metrics(agents: &AgentMap) -> NodeAgentMetricsSample {
    let agents = snapshot(agents);
    let mut sample = NodeAgentMetricsSample::default();

    for agent in &agents {
        if agent.is_downloading_image() {
            sample.images_loading += 1;
        }
        sample.unhandled_exceptions += u64::from(agent.drain_unhandled_exception_count());
    }

    metrics::gauge!(IMAGE_LOADING_METRIC, "role" => METRICS_ROLE).set(sample.images_loading as f64);
    metrics::counter!(UNHANDLED_EXCEPTIONS_METRIC, "role" => METRICS_ROLE)
        .increment(sample.unhandled_exceptions);

    for agent in &agents {
        if let Err(e) = agent.update_metrics_snapshot().await {
            sample.snapshot_failures += 1;
            warn!(hostname = %agent.hostname(), error = %e, "Failed to update node agent metrics");
        }
    }

    debug!(
        images_loading = sample.images_loading,
        unhandled_exceptions = sample.unhandled_exceptions,
        "Updated node agent metrics"
    );
    sample
}

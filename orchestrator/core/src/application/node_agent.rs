// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # ACL Node Agent
//!
//! A concrete per-host worker. Its loop asks the [`NodeAgentContextManager`] for
//! the next tick and, while unfrozen, converges the host's firewall through the
//! [`AclMaintainer`]. Container runtime concerns (images, process supervision)
//! are out of scope for this agent, so it never reports an image download.
//!
//! ## Freeze handshake
//!
//! `set_frozen` only records what is wanted and wakes the loop. The loop
//! acknowledges the wanted state between ticks, so a tick in flight always
//! completes before a freeze is confirmed.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn, Instrument};

use crate::application::acl_maintainer::AclMaintainer;
use crate::application::node_admin::{NodeAgentWithScheduler, NodeAgentWithSchedulerFactory};
use crate::domain::host::Hostname;
use crate::domain::node_agent::{NodeAgent, NodeAgentContext, NodeAgentError, NodeAgentScheduler};

/// What the agent loop should do next.
#[derive(Debug, Clone, PartialEq)]
pub enum Tick {
    Run(NodeAgentContext),
    Frozen,
    Stop,
}

struct SchedulerState {
    current: NodeAgentContext,
    pending: Option<NodeAgentContext>,
    want_frozen: bool,
    closed: bool,
}

/// Scheduler side of a node agent: holds the context to converge to and
/// mediates freeze requests.
pub struct NodeAgentContextManager {
    state: Mutex<SchedulerState>,
    wake: Notify,
    is_frozen: watch::Sender<bool>,
}

impl NodeAgentContextManager {
    pub fn new(context: NodeAgentContext) -> Self {
        let (is_frozen, _) = watch::channel(false);
        Self {
            state: Mutex::new(SchedulerState {
                current: context.clone(),
                pending: Some(context),
                want_frozen: false,
                closed: false,
            }),
            wake: Notify::new(),
            is_frozen,
        }
    }

    /// Wait for the next tick. Returns early when woken by a new context, a
    /// freeze change or [`close`](Self::close), otherwise after `interval`.
    pub async fn next_tick(&self, interval: Duration) -> Tick {
        let needs_attention = {
            let state = self.state.lock();
            state.closed || state.pending.is_some() || state.want_frozen != *self.is_frozen.borrow()
        };
        if !needs_attention {
            let _ = tokio::time::timeout(interval, self.wake.notified()).await;
        }

        let mut state = self.state.lock();
        if state.closed {
            return Tick::Stop;
        }

        let want_frozen = state.want_frozen;
        self.is_frozen.send_if_modified(|frozen| {
            let modified = *frozen != want_frozen;
            *frozen = want_frozen;
            modified
        });

        if let Some(context) = state.pending.take() {
            state.current = context;
        }

        if want_frozen {
            Tick::Frozen
        } else {
            Tick::Run(state.current.clone())
        }
    }

    pub fn is_frozen(&self) -> bool {
        *self.is_frozen.borrow()
    }

    /// Make every further [`next_tick`](Self::next_tick) return [`Tick::Stop`].
    pub fn close(&self) {
        self.state.lock().closed = true;
        self.wake.notify_one();
    }
}

#[async_trait]
impl NodeAgentScheduler for NodeAgentContextManager {
    fn schedule_tick_with(&self, context: NodeAgentContext) {
        let mut state = self.state.lock();
        if state.pending.is_none() && state.current == context {
            return;
        }
        state.pending = Some(context);
        drop(state);
        self.wake.notify_one();
    }

    async fn set_frozen(&self, frozen: bool, timeout: Duration) -> bool {
        let mut is_frozen = self.is_frozen.subscribe();
        {
            let mut state = self.state.lock();
            if state.want_frozen != frozen {
                state.want_frozen = frozen;
                self.wake.notify_one();
            }
        }

        let converged = matches!(
            tokio::time::timeout(timeout, is_frozen.wait_for(|f| *f == frozen)).await,
            Ok(Ok(_))
        );
        converged
    }
}

#[derive(Default)]
struct AgentStats {
    unhandled_exceptions: AtomicU32,
    ticks: AtomicU64,
    last_changed_tables: AtomicUsize,
    suspended: AtomicBool,
    services_stopped: AtomicBool,
}

pub struct AclNodeAgent {
    hostname: Hostname,
    scheduler: Arc<NodeAgentContextManager>,
    maintainer: Arc<AclMaintainer>,
    tick_interval: Duration,
    stats: Arc<AgentStats>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl AclNodeAgent {
    pub fn new(
        hostname: Hostname,
        scheduler: Arc<NodeAgentContextManager>,
        maintainer: Arc<AclMaintainer>,
        tick_interval: Duration,
    ) -> Self {
        Self {
            hostname,
            scheduler,
            maintainer,
            tick_interval,
            stats: Arc::new(AgentStats::default()),
            task: Mutex::new(None),
        }
    }

    pub fn ticks(&self) -> u64 {
        self.stats.ticks.load(Ordering::Relaxed)
    }

    pub fn is_suspended(&self) -> bool {
        self.stats.suspended.load(Ordering::Relaxed)
    }
}

async fn run_loop(
    scheduler: Arc<NodeAgentContextManager>,
    maintainer: Arc<AclMaintainer>,
    stats: Arc<AgentStats>,
    tick_interval: Duration,
) {
    loop {
        let context = match scheduler.next_tick(tick_interval).await {
            Tick::Stop => break,
            Tick::Frozen => {
                debug!("Frozen, skipping tick");
                continue;
            }
            Tick::Run(context) => context,
        };

        if stats.suspended.swap(false, Ordering::Relaxed) {
            info!("Resuming node");
            stats.services_stopped.store(false, Ordering::Relaxed);
        }

        // Run in its own task so a panic is counted instead of killing the loop
        let tick_maintainer = maintainer.clone();
        let hostname = context.hostname().clone();
        let result = tokio::spawn(async move { tick_maintainer.converge(&context).await }).await;

        stats.ticks.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("aegis_host_node_ticks_total", "hostname" => hostname.to_string())
            .increment(1);

        match result {
            Ok(report) => {
                stats
                    .last_changed_tables
                    .store(report.changed_tables(), Ordering::Relaxed);
                if !report.all_succeeded() {
                    debug!("Tick finished with table failures, retrying next tick");
                }
            }
            Err(e) => {
                stats.unhandled_exceptions.fetch_add(1, Ordering::Relaxed);
                error!(error = %e, "Unhandled failure in node agent tick");
            }
        }
    }

    info!("Node agent loop stopped");
}

#[async_trait]
impl NodeAgent for AclNodeAgent {
    async fn start(&self) -> Result<(), NodeAgentError> {
        let mut task = self.task.lock();
        if task.is_some() {
            return Err(NodeAgentError::AlreadyStarted(self.hostname.clone()));
        }

        info!(hostname = %self.hostname, "Starting node agent");
        let span = tracing::info_span!("node_agent", hostname = %self.hostname);
        *task = Some(tokio::spawn(
            run_loop(
                self.scheduler.clone(),
                self.maintainer.clone(),
                self.stats.clone(),
                self.tick_interval,
            )
            .instrument(span),
        ));
        Ok(())
    }

    async fn stop(&self) -> Result<(), NodeAgentError> {
        self.scheduler.close();
        let handle = self.task.lock().take();
        let Some(handle) = handle else {
            return Ok(());
        };

        info!(hostname = %self.hostname, "Stopping node agent");
        handle.await.map_err(|e| NodeAgentError::LifecycleFailed {
            hostname: self.hostname.clone(),
            action: "stop",
            reason: e.to_string(),
        })
    }

    async fn suspend(&self) -> Result<(), NodeAgentError> {
        if self.task.lock().is_none() {
            return Err(NodeAgentError::NotRunning(self.hostname.clone()));
        }
        if !self.stats.suspended.swap(true, Ordering::Relaxed) {
            info!(hostname = %self.hostname, "Suspending node");
        }
        Ok(())
    }

    async fn stop_services(&self) -> Result<(), NodeAgentError> {
        if self.task.lock().is_none() {
            return Err(NodeAgentError::NotRunning(self.hostname.clone()));
        }
        if !self.stats.services_stopped.swap(true, Ordering::Relaxed) {
            // Firewall rules stay in place; they are what keeps the host reachable.
            info!(hostname = %self.hostname, "Stopping services");
        }
        Ok(())
    }

    async fn update_metrics_snapshot(&self) -> Result<(), NodeAgentError> {
        let hostname = self.hostname.to_string();
        metrics::gauge!("aegis_host_node_last_changed_tables", "hostname" => hostname.clone())
            .set(self.stats.last_changed_tables.load(Ordering::Relaxed) as f64);
        metrics::gauge!("aegis_host_node_suspended", "hostname" => hostname.clone())
            .set(if self.is_suspended() { 1.0 } else { 0.0 });
        metrics::gauge!("aegis_host_node_frozen", "hostname" => hostname)
            .set(if self.scheduler.is_frozen() { 1.0 } else { 0.0 });
        Ok(())
    }

    fn is_downloading_image(&self) -> bool {
        false
    }

    fn drain_unhandled_exception_count(&self) -> u32 {
        self.stats.unhandled_exceptions.swap(0, Ordering::Relaxed)
    }
}

impl Drop for AclNodeAgent {
    fn drop(&mut self) {
        if let Some(handle) = self.task.get_mut().take() {
            warn!(hostname = %self.hostname, "Node agent dropped without stop, aborting loop");
            handle.abort();
        }
    }
}

/// Creates an [`AclNodeAgent`] and its scheduler for every new host.
pub struct AclNodeAgentFactory {
    maintainer: Arc<AclMaintainer>,
    tick_interval: Duration,
}

impl AclNodeAgentFactory {
    pub fn new(maintainer: Arc<AclMaintainer>, tick_interval: Duration) -> Self {
        Self {
            maintainer,
            tick_interval,
        }
    }
}

impl NodeAgentWithSchedulerFactory for AclNodeAgentFactory {
    fn create(&self, context: NodeAgentContext) -> NodeAgentWithScheduler {
        let hostname = context.hostname().clone();
        let scheduler = Arc::new(NodeAgentContextManager::new(context));
        let agent = Arc::new(AclNodeAgent::new(
            hostname.clone(),
            scheduler.clone(),
            self.maintainer.clone(),
            self.tick_interval,
        ));
        NodeAgentWithScheduler::new(hostname, agent, scheduler)
    }
}

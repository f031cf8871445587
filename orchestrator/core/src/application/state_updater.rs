// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Node Admin State Updater
//!
//! Periodically pulls the desired state and drives [`NodeAdmin`] towards it.
//! Modeled on the background services of the orchestrator: one tokio task, an
//! interval, and a [`CancellationToken`] for shutdown.

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::application::node_admin::NodeAdmin;
use crate::domain::node_repository::{NodeAdminState, NodeRepository};

pub struct NodeAdminStateUpdater {
    node_admin: Arc<NodeAdmin>,
    node_repository: Arc<dyn NodeRepository>,
    refresh_interval: Duration,
    freeze_warn_after: Duration,
    current_state: Mutex<NodeAdminState>,
}

impl NodeAdminStateUpdater {
    pub fn new(
        node_admin: Arc<NodeAdmin>,
        node_repository: Arc<dyn NodeRepository>,
        refresh_interval: Duration,
        freeze_warn_after: Duration,
    ) -> Self {
        // NodeAdmin starts out frozen
        Self {
            node_admin,
            node_repository,
            refresh_interval,
            freeze_warn_after,
            current_state: Mutex::new(NodeAdminState::SuspendedNodeAdmin),
        }
    }

    pub fn current_state(&self) -> NodeAdminState {
        *self.current_state.lock()
    }

    /// One convergence attempt. Returns the state the fleet is in afterwards.
    pub async fn run_once(&self) -> NodeAdminState {
        let desired = match self.node_repository.desired_state().await {
            Ok(desired) => desired,
            Err(e) => {
                warn!(error = %e, "Failed to fetch desired state, keeping current fleet");
                return self.current_state();
            }
        };

        let wanted = desired.wanted_state;
        let reached = match wanted {
            NodeAdminState::Resumed => {
                if !self.node_admin.set_frozen(false).await {
                    debug!("Some node agents have not unfrozen yet");
                }
                let summary = self.node_admin.refresh(desired.hosts).await;
                if !summary.started.is_empty() || !summary.stopped.is_empty() {
                    info!(
                        started = summary.started.len(),
                        stopped = summary.stopped.len(),
                        failed = summary.failed.len(),
                        "Refreshed managed hosts"
                    );
                }
                NodeAdminState::Resumed
            }
            NodeAdminState::SuspendedNodeAdmin | NodeAdminState::Suspended => {
                if !self.node_admin.set_frozen(true).await {
                    let frozen_for = self.node_admin.frozen_duration();
                    if frozen_for > self.freeze_warn_after {
                        warn!(
                            frozen_for = ?frozen_for,
                            "Node admin has been trying to freeze for too long"
                        );
                    }
                    // Still converging; the fleet is not frozen yet
                    return self.record(NodeAdminState::Resumed, wanted);
                }

                if wanted == NodeAdminState::Suspended {
                    let hostnames = self.node_admin.managed_hostnames();
                    self.node_admin.stop_hosts(&hostnames).await;
                }
                wanted
            }
        };

        self.record(reached, wanted)
    }

    fn record(&self, reached: NodeAdminState, wanted: NodeAdminState) -> NodeAdminState {
        let mut current = self.current_state.lock();
        if *current != reached {
            info!(from = ?*current, to = ?reached, wanted = ?wanted, "Node admin state changed");
            *current = reached;
        }
        reached
    }

    /// Spawn the periodic loop. The first attempt runs immediately.
    pub fn start(self: Arc<Self>, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!(
                interval_secs = self.refresh_interval.as_secs(),
                "Starting node admin state updater"
            );
            let mut ticker = tokio::time::interval(self.refresh_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    biased;
                    _ = shutdown.cancelled() => {
                        info!("Node admin state updater shutting down");
                        break;
                    }
                    _ = ticker.tick() => {
                        self.run_once().await;
                    }
                }
            }
        })
    }
}

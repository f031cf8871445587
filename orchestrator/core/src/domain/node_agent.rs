// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Node Agent Contract
//!
//! A node agent is the per-host worker that converges one host towards its
//! [`HostSpec`]. The fleet orchestrator only ever talks to it through two
//! narrow capabilities:
//!
//! - [`NodeAgent`] - lifecycle and health (start, stop, suspend, metrics).
//! - [`NodeAgentScheduler`] - what to converge to next, and freeze handshakes.
//!
//! Both are implemented separately and composed by
//! `application::node_admin::NodeAgentWithScheduler`.

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

use crate::domain::acl::Acl;
use crate::domain::host::{HostSpec, Hostname};

/// Everything a node agent needs to know for one tick.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeAgentContext {
    spec: HostSpec,
}

impl NodeAgentContext {
    pub fn new(spec: HostSpec) -> Self {
        Self { spec }
    }

    pub fn hostname(&self) -> &Hostname {
        &self.spec.hostname
    }

    pub fn acl(&self) -> &Acl {
        &self.spec.acl
    }

    pub fn spec(&self) -> &HostSpec {
        &self.spec
    }
}

#[derive(Debug, Error)]
pub enum NodeAgentError {
    #[error("Node agent for {0} is already started")]
    AlreadyStarted(Hostname),
    #[error("Node agent for {0} is not running")]
    NotRunning(Hostname),
    #[error("Node agent for {hostname} failed to {action}: {reason}")]
    LifecycleFailed {
        hostname: Hostname,
        action: &'static str,
        reason: String,
    },
}

#[async_trait]
pub trait NodeAgent: Send + Sync {
    async fn start(&self) -> Result<(), NodeAgentError>;

    /// Stop converging and release resources. Blocks until the agent loop exits.
    async fn stop(&self) -> Result<(), NodeAgentError>;

    /// Prepare the host for a disruptive operation, e.g. a host reboot.
    async fn suspend(&self) -> Result<(), NodeAgentError>;

    /// Stop the services running on the host. May take a minute or more.
    async fn stop_services(&self) -> Result<(), NodeAgentError>;

    async fn update_metrics_snapshot(&self) -> Result<(), NodeAgentError>;

    fn is_downloading_image(&self) -> bool;

    /// Number of unhandled tick failures since the last call, resetting it to zero.
    fn drain_unhandled_exception_count(&self) -> u32;
}

#[async_trait]
pub trait NodeAgentScheduler: Send + Sync {
    /// Make `context` the target of the next tick.
    fn schedule_tick_with(&self, context: NodeAgentContext);

    /// Ask the agent to enter or leave the frozen state. Returns whether the
    /// agent confirmed `frozen` within `timeout`.
    async fn set_frozen(&self, frozen: bool, timeout: Duration) -> bool;
}

// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod rule_reconciler;
pub mod acl_maintainer;
pub mod node_admin;
pub mod node_agent;
pub mod state_updater;

pub use acl_maintainer::{AclConvergeReport, AclMaintainer};
pub use node_admin::{NodeAdmin, NodeAdminConfig, NodeAgentWithScheduler, NodeAgentWithSchedulerFactory};
pub use node_agent::{AclNodeAgent, AclNodeAgentFactory, NodeAgentContextManager};
pub use state_updater::NodeAdminStateUpdater;

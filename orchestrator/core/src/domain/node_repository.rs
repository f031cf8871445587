// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Desired State Source
//!
//! The node repository tells the agent which hosts it should manage, with what
//! configuration, and whether the fleet should currently be running, frozen or
//! fully suspended.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use thiserror::Error;

use crate::domain::host::{HostSpec, Hostname};

/// Fleet-wide state requested from the outside.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeAdminState {
    /// Workers converge normally.
    #[default]
    Resumed,
    /// Workers hold off disruptive actions.
    SuspendedNodeAdmin,
    /// Frozen, and every host's services are stopped.
    Suspended,
}

impl NodeAdminState {
    pub fn wants_frozen(&self) -> bool {
        !matches!(self, NodeAdminState::Resumed)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DesiredState {
    #[serde(default)]
    pub wanted_state: NodeAdminState,

    #[serde(default)]
    pub hosts: Vec<HostSpec>,
}

impl DesiredState {
    pub fn from_yaml_str(yaml: &str) -> Result<Self, NodeRepositoryError> {
        let state: Self = serde_yaml::from_str(yaml)
            .map_err(|e| NodeRepositoryError::Malformed(e.to_string()))?;
        state.validate()?;
        Ok(state)
    }

    pub fn validate(&self) -> Result<(), NodeRepositoryError> {
        let mut seen = HashSet::new();
        for host in &self.hosts {
            if host.hostname.as_str().is_empty() {
                return Err(NodeRepositoryError::Malformed(
                    "hostname cannot be empty".to_string(),
                ));
            }
            if !seen.insert(&host.hostname) {
                return Err(NodeRepositoryError::Malformed(format!(
                    "hostname '{}' is listed more than once",
                    host.hostname
                )));
            }
        }
        Ok(())
    }

    pub fn host(&self, hostname: &Hostname) -> Option<&HostSpec> {
        self.hosts.iter().find(|h| &h.hostname == hostname)
    }
}

#[derive(Debug, Error)]
pub enum NodeRepositoryError {
    #[error("Desired state unavailable: {0}")]
    Unavailable(String),
    #[error("Malformed desired state: {0}")]
    Malformed(String),
}

#[async_trait]
pub trait NodeRepository: Send + Sync {
    async fn desired_state(&self) -> Result<DesiredState, NodeRepositoryError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_desired_state() {
        let yaml = r#"
wanted_state: suspended_node_admin
hosts:
  - hostname: host1
    acl:
      trusted_ports: [22, 4443]
  - hostname: host2
"#;
        let state = DesiredState::from_yaml_str(yaml).unwrap();
        assert_eq!(state.wanted_state, NodeAdminState::SuspendedNodeAdmin);
        assert!(state.wanted_state.wants_frozen());
        assert_eq!(state.hosts.len(), 2);
        assert!(state.host(&Hostname::new("host2")).unwrap().acl.trusted_ports.is_empty());
    }

    #[test]
    fn test_defaults_to_resumed_and_empty() {
        let state = DesiredState::from_yaml_str("{}").unwrap();
        assert_eq!(state.wanted_state, NodeAdminState::Resumed);
        assert!(!state.wanted_state.wants_frozen());
        assert!(state.hosts.is_empty());
    }

    #[test]
    fn test_duplicate_hostnames_rejected() {
        let yaml = "hosts:\n  - hostname: a\n  - hostname: a\n";
        assert!(matches!(
            DesiredState::from_yaml_str(yaml),
            Err(NodeRepositoryError::Malformed(_))
        ));
    }
}

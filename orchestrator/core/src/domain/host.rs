// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Host Descriptors
//!
//! Value objects describing a machine the agent manages:
//!
//! - [`Hostname`] - unique key of a managed host.
//! - [`IpVersion`] - network protocol version, owns the iptables command names.
//! - [`HostSpec`] - desired configuration for one host, supplied per refresh cycle.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::net::IpAddr;

use crate::domain::acl::Acl;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Hostname(String);

impl Hostname {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Hostname {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Hostname {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IpVersion {
    V4,
    V6,
}

impl IpVersion {
    /// Both versions in the order the maintainer walks them.
    pub const ALL: [IpVersion; 2] = [IpVersion::V4, IpVersion::V6];

    pub fn of(address: &IpAddr) -> Self {
        match address {
            IpAddr::V4(_) => IpVersion::V4,
            IpAddr::V6(_) => IpVersion::V6,
        }
    }

    pub fn matches(&self, address: &IpAddr) -> bool {
        Self::of(address) == *self
    }

    pub fn iptables_cmd(&self) -> &'static str {
        match self {
            IpVersion::V4 => "iptables",
            IpVersion::V6 => "ip6tables",
        }
    }

    pub fn iptables_restore(&self) -> &'static str {
        match self {
            IpVersion::V4 => "iptables-restore",
            IpVersion::V6 => "ip6tables-restore",
        }
    }

    /// Prefix length suffix that scopes a rule to exactly one host.
    pub fn single_host_cidr(&self) -> &'static str {
        match self {
            IpVersion::V4 => "/32",
            IpVersion::V6 => "/128",
        }
    }

    pub fn icmp_protocol(&self) -> &'static str {
        match self {
            IpVersion::V4 => "icmp",
            IpVersion::V6 => "ipv6-icmp",
        }
    }

    pub fn icmp_port_unreachable(&self) -> &'static str {
        match self {
            IpVersion::V4 => "icmp-port-unreachable",
            IpVersion::V6 => "icmp6-port-unreachable",
        }
    }
}

impl fmt::Display for IpVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IpVersion::V4 => f.write_str("v4"),
            IpVersion::V6 => f.write_str("v6"),
        }
    }
}

impl std::str::FromStr for IpVersion {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "v4" | "ipv4" | "4" => Ok(IpVersion::V4),
            "v6" | "ipv6" | "6" => Ok(IpVersion::V6),
            other => Err(format!("Unknown IP version '{}'. Expected v4 or v6", other)),
        }
    }
}

/// Desired configuration of one managed host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostSpec {
    pub hostname: Hostname,

    /// Firewall allow rules for the host
    #[serde(default)]
    pub acl: Acl,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
}

impl HostSpec {
    pub fn new(hostname: impl Into<Hostname>, acl: Acl) -> Self {
        Self {
            hostname: hostname.into(),
            acl,
            labels: BTreeMap::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ip_version_commands() {
        assert_eq!(IpVersion::V4.iptables_cmd(), "iptables");
        assert_eq!(IpVersion::V6.iptables_restore(), "ip6tables-restore");
        assert_eq!(IpVersion::V4.single_host_cidr(), "/32");
        assert_eq!(IpVersion::V6.single_host_cidr(), "/128");
    }

    #[test]
    fn test_ip_version_of_address() {
        let v4: IpAddr = "10.0.0.1".parse().unwrap();
        let v6: IpAddr = "2001:db8::1".parse().unwrap();
        assert_eq!(IpVersion::of(&v4), IpVersion::V4);
        assert!(IpVersion::V6.matches(&v6));
        assert!(!IpVersion::V6.matches(&v4));
    }

    #[test]
    fn test_ip_version_parse() {
        assert_eq!("ipv6".parse::<IpVersion>().unwrap(), IpVersion::V6);
        assert_eq!("V4".parse::<IpVersion>().unwrap(), IpVersion::V4);
        assert!("v5".parse::<IpVersion>().is_err());
    }

    #[test]
    fn test_host_spec_yaml() {
        let yaml = r#"
hostname: host1.example.com
acl:
  trusted_ports: [22]
  trusted_nodes: ["10.0.0.2"]
"#;
        let spec: HostSpec = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(spec.hostname.as_str(), "host1.example.com");
        assert_eq!(spec.acl.trusted_ports, vec![22]);
        assert!(spec.labels.is_empty());
    }
}

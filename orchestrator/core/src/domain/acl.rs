// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Access Control Lists
//!
//! [`Acl`] is the firewall part of a host's desired configuration. It renders
//! into the exact, ordered list of `filter` table rules for one [`IpVersion`].
//!
//! Two edit policies converge live tables towards the desired rules:
//!
//! | Policy | Table | Ownership |
//! |--------|-------|-----------|
//! | [`FilterTableLineEditor`] | `filter` | the agent owns every rule |
//! | [`NatTableLineEditor`] | `nat` | the agent owns a single redirect rule |

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::net::IpAddr;

use crate::domain::host::IpVersion;
use crate::domain::line_edit::{LineEdit, LineEditor};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Acl {
    /// TCP ports open to everyone
    #[serde(default)]
    pub trusted_ports: Vec<u16>,

    /// Addresses allowed to reach the host on any port
    #[serde(default)]
    pub trusted_nodes: Vec<IpAddr>,

    /// Explicit `filter` rules, replacing the generated table for that version
    #[serde(default, skip_serializing_if = "AclRules::is_empty")]
    pub rules: AclRules,
}

/// Ordered rule-line text per IP version, in `iptables -S` form.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AclRules {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub v4: Option<Vec<String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub v6: Option<Vec<String>>,
}

impl AclRules {
    pub fn is_empty(&self) -> bool {
        self.v4.is_none() && self.v6.is_none()
    }

    pub fn get(&self, ip_version: IpVersion) -> Option<&Vec<String>> {
        match ip_version {
            IpVersion::V4 => self.v4.as_ref(),
            IpVersion::V6 => self.v6.as_ref(),
        }
    }
}

impl Acl {
    pub fn new(trusted_ports: Vec<u16>, trusted_nodes: Vec<IpAddr>) -> Self {
        Self {
            trusted_ports,
            trusted_nodes,
            rules: AclRules::default(),
        }
    }

    /// Use `rules` verbatim as the `filter` table for `ip_version`.
    pub fn with_rules(mut self, ip_version: IpVersion, rules: Vec<String>) -> Self {
        match ip_version {
            IpVersion::V4 => self.rules.v4 = Some(rules),
            IpVersion::V6 => self.rules.v6 = Some(rules),
        }
        self
    }

    /// The `filter` table wanted for `ip_version`: the explicit rule list when
    /// one is given, otherwise the one generated by [`to_rules`](Self::to_rules).
    /// An explicit empty list means an empty table.
    pub fn wanted_rules(&self, ip_version: IpVersion) -> Vec<String> {
        match self.rules.get(ip_version) {
            Some(rules) => rules.clone(),
            None => self.to_rules(ip_version),
        }
    }

    /// Render the complete `filter` table for `ip_version`, in apply order.
    pub fn to_rules(&self, ip_version: IpVersion) -> Vec<String> {
        let mut rules = vec![
            "-P INPUT ACCEPT".to_string(),
            "-P FORWARD ACCEPT".to_string(),
            "-P OUTPUT ACCEPT".to_string(),
            "-A INPUT -m state --state RELATED,ESTABLISHED -j ACCEPT".to_string(),
            "-A INPUT -i lo -j ACCEPT".to_string(),
            format!("-A INPUT -p {} -j ACCEPT", ip_version.icmp_protocol()),
        ];

        let mut ports = self.trusted_ports.clone();
        ports.sort_unstable();
        ports.dedup();
        if !ports.is_empty() {
            let ports = ports
                .iter()
                .map(|p| p.to_string())
                .collect::<Vec<_>>()
                .join(",");
            rules.push(format!("-A INPUT -p tcp -m multiport --dports {} -j ACCEPT", ports));
        }

        let mut nodes: Vec<&IpAddr> = self
            .trusted_nodes
            .iter()
            .filter(|addr| ip_version.matches(addr))
            .collect();
        nodes.sort();
        nodes.dedup();
        for addr in nodes {
            rules.push(format!(
                "-A INPUT -s {}{} -j ACCEPT",
                addr,
                ip_version.single_host_cidr()
            ));
        }

        rules.push(format!(
            "-A INPUT -j REJECT --reject-with {}",
            ip_version.icmp_port_unreachable()
        ));
        rules
    }
}

/// Outbound redirect keeping traffic to the host's own address off the bridge.
pub fn redirect_rule(address: &IpAddr) -> String {
    format!(
        "-A OUTPUT -d {}{} -j REDIRECT",
        address,
        IpVersion::of(address).single_host_cidr()
    )
}

/// Exact-replace policy: the table ends up holding exactly the wanted rules.
///
/// The diff is positional. Each current line consumes the next wanted rule, so a
/// reordering upstream shows up as replacements rather than moves.
#[derive(Debug, Clone)]
pub struct FilterTableLineEditor {
    wanted_rules: VecDeque<String>,
}

impl FilterTableLineEditor {
    pub fn new(wanted_rules: Vec<String>) -> Self {
        Self {
            wanted_rules: wanted_rules.into(),
        }
    }

    pub fn from_acl(acl: &Acl, ip_version: IpVersion) -> Self {
        Self::new(acl.wanted_rules(ip_version))
    }
}

impl LineEditor for FilterTableLineEditor {
    fn edit(&mut self, line: &str) -> LineEdit {
        // All wanted rules are placed, anything left over goes
        let Some(wanted) = self.wanted_rules.pop_front() else {
            return LineEdit::Remove;
        };

        if wanted == line {
            LineEdit::Keep
        } else {
            LineEdit::Replace(wanted)
        }
    }

    fn on_complete(&mut self) -> Vec<String> {
        self.wanted_rules.drain(..).collect()
    }
}

/// Append-only policy: never touches rules it does not own.
#[derive(Debug, Clone)]
pub struct NatTableLineEditor {
    redirect_rule: String,
    seen: bool,
}

impl NatTableLineEditor {
    pub fn new(redirect_rule: impl Into<String>) -> Self {
        Self {
            redirect_rule: redirect_rule.into(),
            seen: false,
        }
    }
}

impl LineEditor for NatTableLineEditor {
    fn edit(&mut self, line: &str) -> LineEdit {
        if line == self.redirect_rule {
            self.seen = true;
        }
        LineEdit::Keep
    }

    fn on_complete(&mut self) -> Vec<String> {
        if self.seen {
            Vec::new()
        } else {
            self.seen = true;
            vec![self.redirect_rule.clone()]
        }
    }
}

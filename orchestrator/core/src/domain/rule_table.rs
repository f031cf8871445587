// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Rule Tables
//!
//! Abstraction over the OS firewall: a named, ordered collection of rules for
//! one protocol version in one host's network namespace. The iptables-backed
//! implementation lives in `infrastructure::iptables`.

use async_trait::async_trait;
use std::fmt;
use thiserror::Error;

use crate::domain::host::{Hostname, IpVersion};

pub const FILTER_TABLE: &str = "filter";
pub const NAT_TABLE: &str = "nat";

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TableId {
    pub ip_version: IpVersion,
    pub name: String,
}

impl TableId {
    pub fn new(ip_version: IpVersion, name: impl Into<String>) -> Self {
        Self {
            ip_version,
            name: name.into(),
        }
    }

    pub fn filter(ip_version: IpVersion) -> Self {
        Self::new(ip_version, FILTER_TABLE)
    }

    pub fn nat(ip_version: IpVersion) -> Self {
        Self::new(ip_version, NAT_TABLE)
    }
}

impl fmt::Display for TableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.ip_version.iptables_cmd(), self.name)
    }
}

#[derive(Debug, Error)]
pub enum RuleTableError {
    #[error("Failed to list rules of {table} on {hostname}: {reason}")]
    ListFailed {
        hostname: Hostname,
        table: TableId,
        reason: String,
    },
    #[error("Failed to stage rules of {table}: {source}")]
    StagingFailed {
        table: TableId,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to replace {table} on {hostname}: {reason}")]
    ReplaceFailed {
        hostname: Hostname,
        table: TableId,
        reason: String,
    },
    #[error("Failed to flush {table} on {hostname}: {reason}")]
    FlushFailed {
        hostname: Hostname,
        table: TableId,
        reason: String,
    },
}

/// Frame rules the way `iptables-restore` expects a single table.
pub fn render_table(table_name: &str, rules: &[String]) -> String {
    format!("*{}\n{}\nCOMMIT\n", table_name, rules.join("\n"))
}

/// Split `iptables -S` output into trimmed rule lines.
pub fn parse_listing(output: &str) -> Vec<String> {
    output
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

#[async_trait]
pub trait RuleTable: Send + Sync {
    async fn list_rules(
        &self,
        hostname: &Hostname,
        table: &TableId,
    ) -> Result<Vec<String>, RuleTableError>;

    /// Atomically replace the whole table with `content` (see [`render_table`]).
    async fn replace_table(
        &self,
        hostname: &Hostname,
        table: &TableId,
        content: &str,
    ) -> Result<(), RuleTableError>;

    async fn flush_table(&self, hostname: &Hostname, table: &TableId) -> Result<(), RuleTableError>;
}

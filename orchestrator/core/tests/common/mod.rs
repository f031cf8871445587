// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! In-memory collaborators shared by the integration tests.

#![allow(dead_code)]

use aegis_host_core::domain::host::{Hostname, IpVersion};
use aegis_host_core::domain::network::AddressResolver;
use aegis_host_core::domain::rule_table::{parse_listing, RuleTable, RuleTableError, TableId};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::net::IpAddr;

/// Rule tables of any number of hosts, kept in memory.
#[derive(Default)]
pub struct MemoryRuleTable {
    tables: Mutex<HashMap<(Hostname, TableId), Vec<String>>>,
    replaces: Mutex<Vec<(Hostname, TableId)>>,
    flushes: Mutex<Vec<(Hostname, TableId)>>,
    failing_replace: Mutex<HashSet<TableId>>,
}

impl MemoryRuleTable {
    pub fn set(&self, hostname: &str, table: TableId, rules: &[&str]) {
        self.tables.lock().insert(
            (Hostname::new(hostname), table),
            rules.iter().map(|r| r.to_string()).collect(),
        );
    }

    pub fn rules(&self, hostname: &str, table: &TableId) -> Vec<String> {
        self.tables
            .lock()
            .get(&(Hostname::new(hostname), table.clone()))
            .cloned()
            .unwrap_or_default()
    }

    pub fn replace_count(&self) -> usize {
        self.replaces.lock().len()
    }

    pub fn flushes(&self) -> Vec<(Hostname, TableId)> {
        self.flushes.lock().clone()
    }

    pub fn fail_replace(&self, table: TableId) {
        self.failing_replace.lock().insert(table);
    }
}

#[async_trait]
impl RuleTable for MemoryRuleTable {
    async fn list_rules(
        &self,
        hostname: &Hostname,
        table: &TableId,
    ) -> Result<Vec<String>, RuleTableError> {
        Ok(self.rules(hostname.as_str(), table))
    }

    async fn replace_table(
        &self,
        hostname: &Hostname,
        table: &TableId,
        content: &str,
    ) -> Result<(), RuleTableError> {
        self.replaces.lock().push((hostname.clone(), table.clone()));
        if self.failing_replace.lock().contains(table) {
            return Err(RuleTableError::ReplaceFailed {
                hostname: hostname.clone(),
                table: table.clone(),
                reason: "iptables-restore: line 2 failed".to_string(),
            });
        }

        let header = format!("*{}", table.name);
        let rules = parse_listing(content)
            .into_iter()
            .filter(|line| *line != header && line != "COMMIT")
            .collect();
        self.tables
            .lock()
            .insert((hostname.clone(), table.clone()), rules);
        Ok(())
    }

    async fn flush_table(&self, hostname: &Hostname, table: &TableId) -> Result<(), RuleTableError> {
        self.flushes.lock().push((hostname.clone(), table.clone()));
        self.tables
            .lock()
            .insert((hostname.clone(), table.clone()), Vec::new());
        Ok(())
    }
}

/// Fixed hostname to address mapping.
#[derive(Default)]
pub struct StaticResolver {
    addresses: Mutex<HashMap<Hostname, Vec<IpAddr>>>,
}

impl StaticResolver {
    pub fn with(self, hostname: &str, address: &str) -> Self {
        self.addresses
            .lock()
            .entry(Hostname::new(hostname))
            .or_default()
            .push(address.parse().unwrap());
        self
    }
}

#[async_trait]
impl AddressResolver for StaticResolver {
    async fn resolve(&self, hostname: &Hostname, ip_version: IpVersion) -> Option<IpAddr> {
        self.addresses
            .lock()
            .get(hostname)
            .and_then(|addresses| addresses.iter().copied().find(|a| ip_version.matches(a)))
    }
}

// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # ACL Maintainer
//!
//! Keeps the iptables of one host in line with its [`Acl`](crate::domain::acl::Acl).
//!
//! - The `filter` table is owned entirely by the agent and synced with the ACL.
//!   If it cannot be configured it is flushed, rendering the firewall open rather
//!   than locking out all traffic.
//! - The `nat` table only gets the outbound redirect rule for the host's own
//!   address appended. A failure there is logged and left alone.
//!
//! Failures never leave [`AclMaintainer::converge`]; the next tick retries.

use std::sync::Arc;
use tracing::{debug, Instrument};

use crate::application::rule_reconciler::{reconcile, EditOutcome, FailurePolicy, HostTable};
use crate::domain::acl::{redirect_rule, FilterTableLineEditor, NatTableLineEditor};
use crate::domain::host::IpVersion;
use crate::domain::line_edit::LineEditor;
use crate::domain::network::AddressResolver;
use crate::domain::node_agent::NodeAgentContext;
use crate::domain::rule_table::{RuleTable, TableId};

/// Outcome of one maintenance pass, one entry per table touched.
#[derive(Debug, Clone, Default)]
pub struct AclConvergeReport {
    pub outcomes: Vec<EditOutcome>,
}

impl AclConvergeReport {
    pub fn all_succeeded(&self) -> bool {
        self.outcomes.iter().all(|o| o.success)
    }

    pub fn changed_tables(&self) -> usize {
        self.outcomes.iter().filter(|o| o.changed).count()
    }

    pub fn outcome(&self, table: &TableId) -> Option<&EditOutcome> {
        self.outcomes.iter().find(|o| &o.table == table)
    }
}

pub struct AclMaintainer {
    rule_table: Arc<dyn RuleTable>,
    address_resolver: Arc<dyn AddressResolver>,
}

impl AclMaintainer {
    pub fn new(rule_table: Arc<dyn RuleTable>, address_resolver: Arc<dyn AddressResolver>) -> Self {
        Self {
            rule_table,
            address_resolver,
        }
    }

    pub async fn converge(&self, context: &NodeAgentContext) -> AclConvergeReport {
        let span = tracing::info_span!("acl", hostname = %context.hostname());
        self.converge_tables(context).instrument(span).await
    }

    async fn converge_tables(&self, context: &NodeAgentContext) -> AclConvergeReport {
        let mut report = AclConvergeReport::default();

        for ip_version in IpVersion::ALL {
            let mut editor = FilterTableLineEditor::from_acl(context.acl(), ip_version);
            report.outcomes.push(
                self.edit(context, TableId::filter(ip_version), &mut editor, FailurePolicy::FlushOnError)
                    .await,
            );
        }

        for ip_version in IpVersion::ALL {
            let Some(address) = self
                .address_resolver
                .resolve(context.hostname(), ip_version)
                .await
            else {
                debug!(ip_version = %ip_version, "No address, skipping redirect rule");
                continue;
            };

            if !ip_version.matches(&address) {
                debug!(ip_version = %ip_version, address = %address, "Resolved address of other IP version, ignoring");
                continue;
            }

            // Packets destined for the node's own address must not be routed
            // via the bridge.
            let mut editor = NatTableLineEditor::new(redirect_rule(&address));
            report.outcomes.push(
                self.edit(context, TableId::nat(ip_version), &mut editor, FailurePolicy::LogOnError)
                    .await,
            );
        }

        report
    }

    async fn edit(
        &self,
        context: &NodeAgentContext,
        table: TableId,
        editor: &mut dyn LineEditor,
        on_failure: FailurePolicy,
    ) -> EditOutcome {
        let store = HostTable::new(self.rule_table.as_ref(), context.hostname(), &table);
        reconcile(&table, &store, editor, on_failure).await
    }
}

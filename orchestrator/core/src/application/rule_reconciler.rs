// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Rule-Set Reconciler
//!
//! Converges an ordered set of text lines to the state a [`LineEditor`] wants,
//! and persists the result in a single write.
//!
//! ## Flow
//!
//! 1. `list_lines()` reads the current sequence.
//! 2. Every line is fed to the editor, then `on_complete()` adds trailing lines.
//! 3. If nothing changed, nothing is written.
//! 4. Otherwise `apply_lines()` replaces the whole sequence atomically.
//!
//! On failure the caller-selected [`FailurePolicy`] decides whether the table is
//! flushed (fail open) or left as it is. Nothing is retried here; the next
//! maintenance pass is the retry.

use async_trait::async_trait;
use tracing::{debug, error, info, warn};

use crate::domain::host::Hostname;
use crate::domain::line_edit::{edit_lines, LineEditor};
use crate::domain::rule_table::{render_table, RuleTable, RuleTableError, TableId};

const RECONCILE_METRIC: &str = "aegis_host_rule_reconcile_total";

/// Storage of one ordered line sequence.
#[async_trait]
pub trait LineStore: Send + Sync {
    async fn list_lines(&self) -> Result<Vec<String>, RuleTableError>;

    /// Replace the full sequence. Must not leave a partially written table behind.
    async fn apply_lines(&self, lines: &[String]) -> Result<(), RuleTableError>;

    /// Clear the sequence entirely.
    async fn flush(&self) -> Result<(), RuleTableError>;
}

/// What to do with a table whose reconciliation failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailurePolicy {
    /// Flush the table so that it fails open.
    FlushOnError,
    /// Leave the table as it is and warn.
    LogOnError,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Remediation {
    Flushed,
    FlushFailed,
    LeftUntouched,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EditOutcome {
    pub table: TableId,
    pub success: bool,
    /// Whether a new table was written
    pub changed: bool,
    pub trail: Vec<String>,
    pub remediation: Option<Remediation>,
}

impl EditOutcome {
    fn unchanged(table: &TableId) -> Self {
        Self {
            table: table.clone(),
            success: true,
            changed: false,
            trail: Vec::new(),
            remediation: None,
        }
    }
}

pub async fn reconcile(
    table: &TableId,
    store: &dyn LineStore,
    editor: &mut dyn LineEditor,
    on_failure: FailurePolicy,
) -> EditOutcome {
    let current = match store.list_lines().await {
        Ok(lines) => lines,
        Err(e) => return fail(table, store, on_failure, Vec::new(), e).await,
    };

    let edited = edit_lines(&current, editor);
    if edited.lines == current {
        debug!(table = %table, "Table already converged");
        record(table, "unchanged");
        return EditOutcome::unchanged(table);
    }

    info!(
        table = %table,
        "Patching table:\n{}",
        edited.trail.join("\n")
    );

    match store.apply_lines(&edited.lines).await {
        Ok(()) => {
            record(table, "success");
            EditOutcome {
                table: table.clone(),
                success: true,
                changed: true,
                trail: edited.trail,
                remediation: None,
            }
        }
        Err(e) => fail(table, store, on_failure, edited.trail, e).await,
    }
}

async fn fail(
    table: &TableId,
    store: &dyn LineStore,
    on_failure: FailurePolicy,
    trail: Vec<String>,
    cause: RuleTableError,
) -> EditOutcome {
    record(table, "failure");

    let remediation = match on_failure {
        FailurePolicy::FlushOnError => {
            error!(table = %table, error = %cause, "Failed to sync table, attempting rollback");
            match store.flush().await {
                Ok(()) => Remediation::Flushed,
                Err(e) => {
                    error!(table = %table, error = %e, "Rollback of table failed, giving up");
                    Remediation::FlushFailed
                }
            }
        }
        FailurePolicy::LogOnError => {
            warn!(table = %table, error = %cause, "Unable to sync table");
            Remediation::LeftUntouched
        }
    };

    EditOutcome {
        table: table.clone(),
        success: false,
        changed: false,
        trail,
        remediation: Some(remediation),
    }
}

fn record(table: &TableId, result: &'static str) {
    metrics::counter!(
        RECONCILE_METRIC,
        "table" => table.name.clone(),
        "ip_version" => table.ip_version.to_string(),
        "result" => result
    )
    .increment(1);
}

/// [`LineStore`] view of one table of one host.
pub struct HostTable<'a> {
    rule_table: &'a dyn RuleTable,
    hostname: &'a Hostname,
    table: &'a TableId,
}

impl<'a> HostTable<'a> {
    pub fn new(rule_table: &'a dyn RuleTable, hostname: &'a Hostname, table: &'a TableId) -> Self {
        Self {
            rule_table,
            hostname,
            table,
        }
    }
}

#[async_trait]
impl LineStore for HostTable<'_> {
    async fn list_lines(&self) -> Result<Vec<String>, RuleTableError> {
        self.rule_table.list_rules(self.hostname, self.table).await
    }

    async fn apply_lines(&self, lines: &[String]) -> Result<(), RuleTableError> {
        let content = render_table(&self.table.name, lines);
        self.rule_table
            .replace_table(self.hostname, self.table, &content)
            .await
    }

    async fn flush(&self) -> Result<(), RuleTableError> {
        self.rule_table.flush_table(self.hostname, self.table).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::acl::{FilterTableLineEditor, NatTableLineEditor};
    use crate::domain::host::IpVersion;
    use parking_lot::Mutex;

    /// In-memory table that can be told to fail.
    #[derive(Default)]
    struct MemoryStore {
        lines: Mutex<Vec<String>>,
        fail_list: bool,
        fail_apply: bool,
        fail_flush: bool,
        applies: Mutex<u32>,
        flushes: Mutex<u32>,
    }

    impl MemoryStore {
        fn with_lines(lines: &[&str]) -> Self {
            Self {
                lines: Mutex::new(lines.iter().map(|s| s.to_string()).collect()),
                ..Default::default()
            }
        }

        fn lines(&self) -> Vec<String> {
            self.lines.lock().clone()
        }
    }

    fn err(table: &TableId, reason: &str) -> RuleTableError {
        RuleTableError::ReplaceFailed {
            hostname: Hostname::new("host1"),
            table: table.clone(),
            reason: reason.to_string(),
        }
    }

    #[async_trait]
    impl LineStore for MemoryStore {
        async fn list_lines(&self) -> Result<Vec<String>, RuleTableError> {
            if self.fail_list {
                return Err(err(&TableId::filter(IpVersion::V4), "list"));
            }
            Ok(self.lines())
        }

        async fn apply_lines(&self, lines: &[String]) -> Result<(), RuleTableError> {
            *self.applies.lock() += 1;
            if self.fail_apply {
                return Err(err(&TableId::filter(IpVersion::V4), "apply"));
            }
            *self.lines.lock() = lines.to_vec();
            Ok(())
        }

        async fn flush(&self) -> Result<(), RuleTableError> {
            *self.flushes.lock() += 1;
            if self.fail_flush {
                return Err(err(&TableId::filter(IpVersion::V4), "flush"));
            }
            self.lines.lock().clear();
            Ok(())
        }
    }

    fn lines(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_filter_scenario_replaces_and_appends() {
        let table = TableId::filter(IpVersion::V4);
        let store = MemoryStore::with_lines(&["-A INPUT -j DROP"]);
        let wanted = lines(&["-A INPUT -s 10.0.0.1 -j ACCEPT", "-A INPUT -j DROP"]);
        let mut editor = FilterTableLineEditor::new(wanted.clone());

        let outcome = reconcile(&table, &store, &mut editor, FailurePolicy::FlushOnError).await;

        assert!(outcome.success);
        assert!(outcome.changed);
        assert_eq!(store.lines(), wanted);
        assert_eq!(*store.applies.lock(), 1);
    }

    #[tokio::test]
    async fn test_converged_table_is_not_written() {
        let table = TableId::filter(IpVersion::V4);
        let wanted = lines(&["-P INPUT ACCEPT", "-A INPUT -i lo -j ACCEPT"]);
        let store = MemoryStore::with_lines(&["-P INPUT ACCEPT", "-A INPUT -i lo -j ACCEPT"]);

        let outcome = reconcile(
            &table,
            &store,
            &mut FilterTableLineEditor::new(wanted.clone()),
            FailurePolicy::FlushOnError,
        )
        .await;

        assert_eq!(outcome, EditOutcome::unchanged(&table));
        assert_eq!(*store.applies.lock(), 0);
        assert_eq!(store.lines(), wanted);
    }

    #[tokio::test]
    async fn test_nat_rule_present_skips_write() {
        let table = TableId::nat(IpVersion::V4);
        let store = MemoryStore::with_lines(&["-A OUTPUT -d 1.2.3.4/32 -j REDIRECT"]);

        let outcome = reconcile(
            &table,
            &store,
            &mut NatTableLineEditor::new("-A OUTPUT -d 1.2.3.4/32 -j REDIRECT"),
            FailurePolicy::LogOnError,
        )
        .await;

        assert!(outcome.success);
        assert!(!outcome.changed);
        assert_eq!(*store.applies.lock(), 0);
    }

    #[tokio::test]
    async fn test_flush_on_error_flushes_once() {
        let table = TableId::filter(IpVersion::V6);
        let store = MemoryStore {
            fail_apply: true,
            ..MemoryStore::with_lines(&["stale"])
        };

        let outcome = reconcile(
            &table,
            &store,
            &mut FilterTableLineEditor::new(lines(&["wanted"])),
            FailurePolicy::FlushOnError,
        )
        .await;

        assert!(!outcome.success);
        assert_eq!(outcome.remediation, Some(Remediation::Flushed));
        assert_eq!(outcome.trail, lines(&["-stale", "+wanted"]));
        assert_eq!(*store.flushes.lock(), 1);
        assert!(store.lines().is_empty());
    }

    #[tokio::test]
    async fn test_failed_flush_gives_up() {
        let table = TableId::filter(IpVersion::V4);
        let store = MemoryStore {
            fail_apply: true,
            fail_flush: true,
            ..MemoryStore::with_lines(&["stale"])
        };

        let outcome = reconcile(
            &table,
            &store,
            &mut FilterTableLineEditor::new(lines(&["wanted"])),
            FailurePolicy::FlushOnError,
        )
        .await;

        assert!(!outcome.success);
        assert_eq!(outcome.remediation, Some(Remediation::FlushFailed));
        assert_eq!(*store.flushes.lock(), 1);
        assert_eq!(store.lines(), lines(&["stale"]));
    }

    #[tokio::test]
    async fn test_log_on_error_never_flushes() {
        let table = TableId::nat(IpVersion::V4);
        let store = MemoryStore {
            fail_apply: true,
            ..MemoryStore::with_lines(&["-A POSTROUTING -j MASQUERADE"])
        };

        let outcome = reconcile(
            &table,
            &store,
            &mut NatTableLineEditor::new("-A OUTPUT -d 1.2.3.4/32 -j REDIRECT"),
            FailurePolicy::LogOnError,
        )
        .await;

        assert!(!outcome.success);
        assert_eq!(outcome.remediation, Some(Remediation::LeftUntouched));
        assert_eq!(*store.flushes.lock(), 0);
        assert_eq!(store.lines(), lines(&["-A POSTROUTING -j MASQUERADE"]));
    }

    #[tokio::test]
    async fn test_list_failure_is_remediated_without_apply() {
        let table = TableId::filter(IpVersion::V4);
        let store = MemoryStore {
            fail_list: true,
            ..Default::default()
        };

        let outcome = reconcile(
            &table,
            &store,
            &mut FilterTableLineEditor::new(lines(&["wanted"])),
            FailurePolicy::FlushOnError,
        )
        .await;

        assert!(!outcome.success);
        assert!(outcome.trail.is_empty());
        assert_eq!(*store.applies.lock(), 0);
        assert_eq!(outcome.remediation, Some(Remediation::Flushed));
    }
}

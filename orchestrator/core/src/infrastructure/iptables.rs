// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # iptables Rule Table
//!
//! [`RuleTable`] on top of the `iptables`/`ip6tables` command line tools.
//! Replacing a table stages the rendered text in a temporary file and feeds it
//! to `iptables-restore`, which swaps the table atomically. The staging file is
//! removed when the call returns, whatever the outcome.

use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::debug;

use crate::domain::host::Hostname;
use crate::domain::rule_table::{parse_listing, RuleTable, RuleTableError, TableId};
use crate::infrastructure::command::CommandExecutor;

const STAGING_FILE_PREFIX: &str = "iptables-restore";

pub struct IptablesRuleTable {
    executor: Arc<dyn CommandExecutor>,
    staging_dir: Option<PathBuf>,
}

impl IptablesRuleTable {
    pub fn new(executor: Arc<dyn CommandExecutor>) -> Self {
        Self {
            executor,
            staging_dir: None,
        }
    }

    /// Stage files under `dir` instead of the system temp directory.
    pub fn with_staging_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.staging_dir = Some(dir.into());
        self
    }

    fn stage(&self, table: &TableId, content: &str) -> std::io::Result<tempfile::NamedTempFile> {
        use std::io::Write;

        let suffix = format!(".{}", table.name);
        let mut builder = tempfile::Builder::new();
        builder.prefix(STAGING_FILE_PREFIX).suffix(&suffix);
        let mut file = match &self.staging_dir {
            Some(dir) => builder.tempfile_in(dir)?,
            None => builder.tempfile()?,
        };
        file.write_all(content.as_bytes())?;
        file.flush()?;
        Ok(file)
    }
}

#[async_trait]
impl RuleTable for IptablesRuleTable {
    async fn list_rules(
        &self,
        hostname: &Hostname,
        table: &TableId,
    ) -> Result<Vec<String>, RuleTableError> {
        let args = vec!["-S".to_string(), "-t".to_string(), table.name.clone()];
        let list_failed = |reason: String| RuleTableError::ListFailed {
            hostname: hostname.clone(),
            table: table.clone(),
            reason,
        };

        let result = self
            .executor
            .execute(hostname, table.ip_version.iptables_cmd(), &args)
            .await
            .map_err(|e| list_failed(e.to_string()))?;
        if !result.is_success() {
            return Err(list_failed(result.failure_summary()));
        }
        Ok(parse_listing(&result.stdout))
    }

    async fn replace_table(
        &self,
        hostname: &Hostname,
        table: &TableId,
        content: &str,
    ) -> Result<(), RuleTableError> {
        let staged = self
            .stage(table, content)
            .map_err(|source| RuleTableError::StagingFailed {
                table: table.clone(),
                source,
            })?;
        let path = staged.path().to_string_lossy().to_string();
        debug!(hostname = %hostname, table = %table, path = %path, "Restoring table from staging file");

        let replace_failed = |reason: String| RuleTableError::ReplaceFailed {
            hostname: hostname.clone(),
            table: table.clone(),
            reason,
        };
        let result = self
            .executor
            .execute(hostname, table.ip_version.iptables_restore(), &[path])
            .await
            .map_err(|e| replace_failed(e.to_string()))?;
        if !result.is_success() {
            return Err(replace_failed(result.failure_summary()));
        }
        Ok(())
    }

    async fn flush_table(&self, hostname: &Hostname, table: &TableId) -> Result<(), RuleTableError> {
        let args = vec!["-F".to_string(), "-t".to_string(), table.name.clone()];
        let flush_failed = |reason: String| RuleTableError::FlushFailed {
            hostname: hostname.clone(),
            table: table.clone(),
            reason,
        };

        let result = self
            .executor
            .execute(hostname, table.ip_version.iptables_cmd(), &args)
            .await
            .map_err(|e| flush_failed(e.to_string()))?;
        if !result.is_success() {
            return Err(flush_failed(result.failure_summary()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::host::IpVersion;
    use crate::domain::rule_table::render_table;
    use crate::infrastructure::command::{CommandError, ProcessResult};
    use std::path::Path;
    use tokio::sync::Mutex;

    /// Records every invocation; for restores it also captures the staged file.
    #[derive(Default)]
    struct RecordingExecutor {
        calls: Mutex<Vec<Vec<String>>>,
        staged: Mutex<Vec<(PathBuf, String)>>,
        stdout: String,
        exit_code: i32,
    }

    #[async_trait]
    impl CommandExecutor for RecordingExecutor {
        async fn execute(
            &self,
            _hostname: &Hostname,
            program: &str,
            args: &[String],
        ) -> Result<ProcessResult, CommandError> {
            let mut call = vec![program.to_string()];
            call.extend(args.iter().cloned());
            self.calls.lock().await.push(call);

            if program.ends_with("-restore") {
                let path = PathBuf::from(&args[0]);
                let content = std::fs::read_to_string(&path).unwrap();
                self.staged.lock().await.push((path, content));
            }

            Ok(ProcessResult {
                exit_code: self.exit_code,
                stdout: self.stdout.clone(),
                stderr: "iptables: error".to_string(),
            })
        }
    }

    fn host() -> Hostname {
        Hostname::new("host1")
    }

    #[tokio::test]
    async fn test_list_rules_parses_output() {
        let executor = Arc::new(RecordingExecutor {
            stdout: "-P INPUT ACCEPT\n\n-A INPUT -i lo -j ACCEPT\n".to_string(),
            ..Default::default()
        });
        let table = IptablesRuleTable::new(executor.clone());

        let rules = table
            .list_rules(&host(), &TableId::filter(IpVersion::V6))
            .await
            .unwrap();

        assert_eq!(rules, vec!["-P INPUT ACCEPT", "-A INPUT -i lo -j ACCEPT"]);
        assert_eq!(
            executor.calls.lock().await[0],
            vec!["ip6tables", "-S", "-t", "filter"]
        );
    }

    #[tokio::test]
    async fn test_replace_stages_and_removes_file() {
        let dir = tempfile::tempdir().unwrap();
        let executor = Arc::new(RecordingExecutor::default());
        let table = IptablesRuleTable::new(executor.clone()).with_staging_dir(dir.path());
        let content = render_table("nat", &["-A OUTPUT -d 10.0.0.5/32 -j REDIRECT".to_string()]);

        table
            .replace_table(&host(), &TableId::nat(IpVersion::V4), &content)
            .await
            .unwrap();

        let staged = executor.staged.lock().await;
        let (path, staged_content) = &staged[0];
        assert_eq!(staged_content, "*nat\n-A OUTPUT -d 10.0.0.5/32 -j REDIRECT\nCOMMIT\n");
        let file_name = path.file_name().unwrap().to_string_lossy();
        assert!(file_name.starts_with("iptables-restore"));
        assert!(file_name.ends_with(".nat"));
        assert!(!Path::new(path).exists());
        assert_eq!(executor.calls.lock().await[0][0], "iptables-restore");
    }

    #[tokio::test]
    async fn test_failed_replace_still_removes_file() {
        let dir = tempfile::tempdir().unwrap();
        let executor = Arc::new(RecordingExecutor {
            exit_code: 1,
            ..Default::default()
        });
        let table = IptablesRuleTable::new(executor.clone()).with_staging_dir(dir.path());

        let result = table
            .replace_table(&host(), &TableId::filter(IpVersion::V4), "*filter\n\nCOMMIT\n")
            .await;

        assert!(matches!(result, Err(RuleTableError::ReplaceFailed { .. })));
        assert!(!executor.staged.lock().await[0].0.exists());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_flush_failure_reported() {
        let executor = Arc::new(RecordingExecutor {
            exit_code: 4,
            ..Default::default()
        });
        let table = IptablesRuleTable::new(executor.clone());

        let err = table
            .flush_table(&host(), &TableId::filter(IpVersion::V4))
            .await
            .unwrap_err();

        assert!(err.to_string().contains("exit code 4"));
        assert_eq!(executor.calls.lock().await[0], vec!["iptables", "-F", "-t", "filter"]);
    }
}

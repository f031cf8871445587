// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Runs host commands, optionally inside the host's network namespace.

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

use crate::domain::config::FirewallConfig;
use crate::domain::host::Hostname;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessResult {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl ProcessResult {
    pub fn is_success(&self) -> bool {
        self.exit_code == 0
    }

    /// Short description for error reports.
    pub fn failure_summary(&self) -> String {
        let stderr = self.stderr.trim();
        if stderr.is_empty() {
            format!("exit code {}", self.exit_code)
        } else {
            format!("exit code {}: {}", self.exit_code, stderr)
        }
    }
}

#[derive(Debug, Error)]
pub enum CommandError {
    #[error("Failed to execute {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("{program} timed out after {timeout:?}")]
    TimedOut { program: String, timeout: Duration },
}

#[async_trait]
pub trait CommandExecutor: Send + Sync {
    async fn execute(
        &self,
        hostname: &Hostname,
        program: &str,
        args: &[String],
    ) -> Result<ProcessResult, CommandError>;
}

pub struct ProcessCommandExecutor {
    netns_template: Option<String>,
    timeout: Duration,
}

impl ProcessCommandExecutor {
    pub fn new(netns_template: Option<String>, timeout: Duration) -> Self {
        Self {
            netns_template,
            timeout,
        }
    }

    pub fn from_config(config: &FirewallConfig) -> Self {
        Self::new(config.netns_template.clone(), config.command_timeout)
    }

    /// Full argv for running `program` against `hostname`.
    pub fn command_line(&self, hostname: &Hostname, program: &str, args: &[String]) -> Vec<String> {
        let mut argv = Vec::with_capacity(args.len() + 5);
        if let Some(template) = &self.netns_template {
            argv.extend([
                "ip".to_string(),
                "netns".to_string(),
                "exec".to_string(),
                template.replace("{hostname}", hostname.as_str()),
            ]);
        }
        argv.push(program.to_string());
        argv.extend(args.iter().cloned());
        argv
    }
}

#[async_trait]
impl CommandExecutor for ProcessCommandExecutor {
    async fn execute(
        &self,
        hostname: &Hostname,
        program: &str,
        args: &[String],
    ) -> Result<ProcessResult, CommandError> {
        let argv = self.command_line(hostname, program, args);
        debug!(hostname = %hostname, command = %argv.join(" "), "Executing command");

        let mut cmd = tokio::process::Command::new(&argv[0]);
        cmd.args(&argv[1..]).kill_on_drop(true);

        match tokio::time::timeout(self.timeout, cmd.output()).await {
            Ok(Ok(output)) => Ok(ProcessResult {
                exit_code: output.status.code().unwrap_or(-1),
                stdout: String::from_utf8_lossy(&output.stdout).to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            }),
            Ok(Err(e)) => Err(CommandError::Spawn {
                program: program.to_string(),
                source: e,
            }),
            Err(_) => Err(CommandError::TimedOut {
                program: program.to_string(),
                timeout: self.timeout,
            }),
        }
    }
}

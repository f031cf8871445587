// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Host Agent Configuration
//
// Defines the configuration schema for the AEGIS host agent:
// - Kubernetes-style manifest format (apiVersion/kind/metadata/spec)
// - Desired state source
// - Fleet orchestration timings (refresh, freeze, metrics)
// - Firewall command execution
// - Observability settings

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const API_VERSION: &str = "100monkeys.ai/v1";
pub const KIND: &str = "HostAgentConfig";

/// Top-level host agent configuration manifest
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostAgentConfig {
    /// API version (must be "100monkeys.ai/v1")
    #[serde(rename = "apiVersion")]
    pub api_version: String,

    /// Resource kind (must be "HostAgentConfig")
    pub kind: String,

    pub metadata: ConfigMetadata,

    #[serde(default)]
    pub spec: HostAgentSpec,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigMetadata {
    /// Name of the machine this agent runs on
    pub name: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HostAgentSpec {
    #[serde(default)]
    pub desired_state: DesiredStateConfig,

    #[serde(default)]
    pub fleet: FleetConfig,

    #[serde(default)]
    pub firewall: FirewallConfig,

    #[serde(default)]
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DesiredStateConfig {
    /// YAML file listing the hosts to manage
    #[serde(default = "default_desired_state_path")]
    pub path: PathBuf,

    /// How often the desired state is fetched and applied
    #[serde(default = "default_refresh_interval", with = "humantime_serde")]
    pub refresh_interval: Duration,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FleetConfig {
    /// Time each node agent gets to confirm a freeze or unfreeze
    #[serde(default = "default_freeze_timeout", with = "humantime_serde")]
    pub freeze_timeout: Duration,

    /// A freeze converging for longer than this is reported as stuck
    #[serde(default = "default_freeze_warn_after", with = "humantime_serde")]
    pub freeze_warn_after: Duration,

    #[serde(default = "default_metrics_initial_delay", with = "humantime_serde")]
    pub metrics_initial_delay: Duration,

    #[serde(default = "default_metrics_interval", with = "humantime_serde")]
    pub metrics_interval: Duration,

    /// Interval between node agent ticks when nothing wakes it earlier
    #[serde(default = "default_tick_interval", with = "humantime_serde")]
    pub tick_interval: Duration,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FirewallConfig {
    /// Network namespace of a host's containers, `{hostname}` is substituted.
    /// When unset, commands run in the agent's own namespace.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub netns_template: Option<String>,

    #[serde(default = "default_command_timeout", with = "humantime_serde")]
    pub command_timeout: Duration,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub metrics: MetricsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (e.g., "info", "debug", "trace")
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format ("json" or "text")
    #[serde(default = "default_log_format")]
    pub format: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Prometheus scrape endpoint address
    #[serde(default = "default_metrics_listen")]
    pub listen_address: String,
}

fn default_true() -> bool {
    true
}

fn default_desired_state_path() -> PathBuf {
    PathBuf::from("/etc/aegis/desired-state.yaml")
}

fn default_refresh_interval() -> Duration {
    Duration::from_secs(30)
}

fn default_freeze_timeout() -> Duration {
    Duration::from_secs(5)
}

fn default_freeze_warn_after() -> Duration {
    Duration::from_secs(600)
}

fn default_metrics_initial_delay() -> Duration {
    Duration::from_secs(10)
}

fn default_metrics_interval() -> Duration {
    Duration::from_secs(55)
}

fn default_tick_interval() -> Duration {
    Duration::from_secs(60)
}

fn default_command_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

fn default_metrics_listen() -> String {
    "0.0.0.0:9095".to_string()
}

impl Default for DesiredStateConfig {
    fn default() -> Self {
        Self {
            path: default_desired_state_path(),
            refresh_interval: default_refresh_interval(),
        }
    }
}

impl Default for FleetConfig {
    fn default() -> Self {
        Self {
            freeze_timeout: default_freeze_timeout(),
            freeze_warn_after: default_freeze_warn_after(),
            metrics_initial_delay: default_metrics_initial_delay(),
            metrics_interval: default_metrics_interval(),
            tick_interval: default_tick_interval(),
        }
    }
}

impl Default for FirewallConfig {
    fn default() -> Self {
        Self {
            netns_template: None,
            command_timeout: default_command_timeout(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            listen_address: default_metrics_listen(),
        }
    }
}

impl Default for HostAgentConfig {
    fn default() -> Self {
        let name = hostname::get()
            .ok()
            .and_then(|h| h.into_string().ok())
            .unwrap_or_else(|| "aegis-host".to_string());

        Self {
            api_version: API_VERSION.to_string(),
            kind: KIND.to_string(),
            metadata: ConfigMetadata { name },
            spec: HostAgentSpec::default(),
        }
    }
}

impl HostAgentConfig {
    /// Load configuration from YAML file
    pub fn from_yaml_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&content)
    }

    pub fn from_yaml_str(yaml: &str) -> anyhow::Result<Self> {
        let config = serde_yaml::from_str(yaml)?;
        Ok(config)
    }

    pub fn to_yaml_string(&self) -> anyhow::Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Discover configuration file using precedence order
    /// 1. AEGIS_HOST_CONFIG_PATH environment variable
    /// 2. ./aegis-host.yaml (working directory)
    /// 3. ~/.aegis/host.yaml (user home)
    /// 4. /etc/aegis/host.yaml
    pub fn discover_config() -> Option<PathBuf> {
        if let Ok(path) = std::env::var("AEGIS_HOST_CONFIG_PATH") {
            let path = PathBuf::from(path);
            if path.exists() {
                return Some(path);
            }
        }

        let cwd = PathBuf::from("./aegis-host.yaml");
        if cwd.exists() {
            return Some(cwd);
        }

        if let Some(home) = dirs::home_dir() {
            let user_config = home.join(".aegis").join("host.yaml");
            if user_config.exists() {
                return Some(user_config);
            }
        }

        let system_config = PathBuf::from("/etc/aegis/host.yaml");
        if system_config.exists() {
            return Some(system_config);
        }

        None
    }

    /// Load configuration with discovery, fallback to default
    pub fn load_or_default(cli_path: Option<PathBuf>) -> anyhow::Result<Self> {
        // Explicit CLI path must exist and parse
        if let Some(path) = cli_path {
            tracing::info!("Loading configuration from explicit path: {:?}", path);
            let mut config = Self::from_yaml_file(&path)
                .map_err(|e| anyhow::anyhow!("Failed to load config at {:?}: {}", path, e))?;
            config.apply_env_overrides();
            return Ok(config);
        }

        let mut config = if let Some(config_path) = Self::discover_config() {
            tracing::info!("Loading configuration from discovered path: {:?}", config_path);
            Self::from_yaml_file(config_path)?
        } else {
            tracing::warn!("No configuration file found in standard locations. Using defaults.");
            Self::default()
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Logging section of the configuration `load_or_default` would pick,
    /// read without emitting any log events. Used to set up logging before
    /// the configuration is loaded for real. Falls back to defaults on any error.
    pub fn logging_settings(cli_path: Option<&Path>) -> LoggingConfig {
        let path = match cli_path {
            Some(path) => Some(path.to_path_buf()),
            None => Self::discover_config(),
        };
        path.and_then(|p| Self::from_yaml_file(p).ok())
            .map(|c| c.spec.observability.logging)
            .unwrap_or_default()
    }

    /// Apply environment variable overrides to configuration
    pub fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("AEGIS_HOST_DESIRED_STATE_PATH") {
            tracing::info!("Environment override: AEGIS_HOST_DESIRED_STATE_PATH={}", val);
            self.spec.desired_state.path = PathBuf::from(val);
        }

        if let Ok(val) = std::env::var("AEGIS_HOST_METRICS_ENABLED") {
            match val.to_lowercase().as_str() {
                "true" | "1" | "yes" | "on" => self.spec.observability.metrics.enabled = true,
                "false" | "0" | "no" | "off" => self.spec.observability.metrics.enabled = false,
                _ => {
                    tracing::warn!(
                        "Invalid value for AEGIS_HOST_METRICS_ENABLED: '{}'. Expected true/false. Ignoring.",
                        val
                    );
                }
            }
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.api_version != API_VERSION {
            anyhow::bail!(
                "Invalid apiVersion: '{}'. Must be '{}'",
                self.api_version,
                API_VERSION
            );
        }

        if self.kind != KIND {
            anyhow::bail!("Invalid kind: '{}'. Must be '{}'", self.kind, KIND);
        }

        if self.metadata.name.is_empty() {
            anyhow::bail!("metadata.name cannot be empty");
        }

        let fleet = &self.spec.fleet;
        for (name, value) in [
            ("desired_state.refresh_interval", self.spec.desired_state.refresh_interval),
            ("fleet.freeze_timeout", fleet.freeze_timeout),
            ("fleet.metrics_interval", fleet.metrics_interval),
            ("fleet.tick_interval", fleet.tick_interval),
            ("firewall.command_timeout", self.spec.firewall.command_timeout),
        ] {
            if value.is_zero() {
                anyhow::bail!("{} must be greater than zero", name);
            }
        }

        if let Some(template) = &self.spec.firewall.netns_template {
            if !template.contains("{hostname}") {
                anyhow::bail!(
                    "firewall.netns_template '{}' must contain the {{hostname}} placeholder",
                    template
                );
            }
        }

        match self.spec.observability.logging.format.as_str() {
            "json" | "text" => {}
            other => anyhow::bail!("Unknown log format '{}'. Expected json or text", other),
        }

        if self.spec.observability.metrics.enabled {
            self.spec
                .observability
                .metrics
                .listen_address
                .parse::<std::net::SocketAddr>()
                .map_err(|e| {
                    anyhow::anyhow!(
                        "Invalid metrics listen_address '{}': {}",
                        self.spec.observability.metrics.listen_address,
                        e
                    )
                })?;
        }

        Ok(())
    }
}

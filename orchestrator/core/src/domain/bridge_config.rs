// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Bridge Configuration Types
//
// Defines the configuration schema for the yorc-bridge daemon:
// - Kubernetes-style manifest format (apiVersion/kind/metadata/spec)
// - Remote orchestrator endpoint, TLS and timeouts
// - Poller, reconciliation and runtime tuning
// - Cursor persistence backend and observability settings

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

pub const API_VERSION: &str = "100monkeys.ai/v1";
pub const KIND: &str = "BridgeConfig";

/// Top-level Kubernetes-style bridge configuration manifest
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeConfigManifest {
    /// API version (must be "100monkeys.ai/v1")
    #[serde(rename = "apiVersion")]
    pub api_version: String,

    /// Resource kind (must be "BridgeConfig")
    pub kind: String,

    pub metadata: ManifestMetadata,

    pub spec: BridgeConfigSpec,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestMetadata {
    pub name: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub labels: Option<HashMap<String, String>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BridgeConfigSpec {
    pub orchestrator: OrchestratorEndpoint,

    #[serde(default)]
    pub polling: PollingConfig,

    #[serde(default)]
    pub reconciliation: ReconciliationConfig,

    #[serde(default)]
    pub event_bus: EventBusConfig,

    #[serde(default)]
    pub runtime: RuntimeConfig,

    #[serde(default)]
    pub persistence: PersistenceConfig,

    #[serde(default)]
    pub observability: ObservabilityConfig,
}

/// Remote provisioning engine connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorEndpoint {
    /// Keys the persisted poll cursors, stable across restarts
    pub id: String,

    /// Base URL of the control plane, e.g. "http://yorc:8800"
    pub url: String,

    /// PEM bundle trusted in addition to the system roots
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ca_certificate: Option<PathBuf>,

    #[serde(default)]
    pub insecure_skip_verify: bool,

    #[serde(default = "default_connect_timeout", with = "humantime_serde")]
    pub connect_timeout: Duration,

    #[serde(default = "default_request_timeout", with = "humantime_serde")]
    pub request_timeout: Duration,

    /// Server-side hold time sent as `wait=`; the client read timeout on
    /// long-poll requests is this plus a fixed margin
    #[serde(default = "default_long_poll_wait", with = "humantime_serde")]
    pub long_poll_wait: Duration,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollingConfig {
    #[serde(default = "default_true")]
    pub events: bool,

    #[serde(default = "default_true")]
    pub logs: bool,

    #[serde(default = "default_retry_backoff", with = "humantime_serde")]
    pub retry_backoff: Duration,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconciliationConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_reconciliation_interval", with = "humantime_serde")]
    pub interval: Duration,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventBusConfig {
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    #[serde(default = "default_worker_threads")]
    pub worker_threads: usize,

    #[serde(default = "default_shutdown_grace", with = "humantime_serde")]
    pub shutdown_grace: Duration,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PersistenceBackend {
    #[default]
    Memory,
    Postgres,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PersistenceConfig {
    #[serde(default)]
    pub backend: PersistenceBackend,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database_url: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Compact,
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default)]
    pub log_format: LogFormat,

    /// Prometheus scrape listener, disabled when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metrics_listen: Option<SocketAddr>,
}

fn default_true() -> bool {
    true
}

fn default_connect_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_long_poll_wait() -> Duration {
    Duration::from_secs(60)
}

fn default_retry_backoff() -> Duration {
    Duration::from_secs(5)
}

fn default_reconciliation_interval() -> Duration {
    Duration::from_secs(60)
}

fn default_channel_capacity() -> usize {
    1024
}

fn default_worker_threads() -> usize {
    4
}

fn default_shutdown_grace() -> Duration {
    Duration::from_secs(10)
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_hostname() -> String {
    hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "yorc-bridge".to_string())
}

impl Default for OrchestratorEndpoint {
    fn default() -> Self {
        Self {
            id: default_hostname(),
            url: "http://localhost:8800".to_string(),
            ca_certificate: None,
            insecure_skip_verify: false,
            connect_timeout: default_connect_timeout(),
            request_timeout: default_request_timeout(),
            long_poll_wait: default_long_poll_wait(),
        }
    }
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            events: true,
            logs: true,
            retry_backoff: default_retry_backoff(),
        }
    }
}

impl Default for ReconciliationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval: default_reconciliation_interval(),
        }
    }
}

impl Default for EventBusConfig {
    fn default() -> Self {
        Self {
            channel_capacity: default_channel_capacity(),
        }
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            worker_threads: default_worker_threads(),
            shutdown_grace: default_shutdown_grace(),
        }
    }
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: LogFormat::default(),
            metrics_listen: None,
        }
    }
}

impl Default for BridgeConfigManifest {
    fn default() -> Self {
        Self {
            api_version: API_VERSION.to_string(),
            kind: KIND.to_string(),
            metadata: ManifestMetadata {
                name: default_hostname(),
                version: Some("1.0.0".to_string()),
                labels: None,
            },
            spec: BridgeConfigSpec::default(),
        }
    }
}

#[derive(Debug, Clone, Error)]
pub enum ConfigError {
    #[error("Invalid apiVersion: '{0}'. Must be '100monkeys.ai/v1'")]
    ApiVersion(String),

    #[error("Invalid kind: '{0}'. Must be 'BridgeConfig'")]
    Kind(String),

    #[error("{0} cannot be empty")]
    Empty(&'static str),

    #[error("Invalid orchestrator URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("CA certificate {path:?} is not usable: {reason}")]
    CaCertificate { path: PathBuf, reason: String },

    #[error("{0} must be greater than zero")]
    Zero(&'static str),

    #[error("spec.persistence.database_url is required for the postgres backend")]
    MissingDatabaseUrl,
}

impl BridgeConfigManifest {
    /// Load configuration from YAML file
    pub fn from_yaml_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to YAML file
    pub fn to_yaml_file(&self, path: impl AsRef<Path>) -> anyhow::Result<()> {
        let yaml = serde_yaml::to_string(self)?;
        std::fs::write(path, yaml)?;
        Ok(())
    }

    pub fn from_yaml_str(yaml: &str) -> anyhow::Result<Self> {
        let config = serde_yaml::from_str(yaml)?;
        Ok(config)
    }

    /// Discover configuration file using precedence order
    /// 1. YORC_BRIDGE_CONFIG_PATH environment variable
    /// 2. ./yorc-bridge.yaml (working directory)
    /// 3. ~/.yorc-bridge/config.yaml (user home)
    /// 4. /etc/yorc-bridge/config.yaml
    pub fn discover_config() -> Option<PathBuf> {
        if let Ok(path) = std::env::var("YORC_BRIDGE_CONFIG_PATH") {
            let path = PathBuf::from(path);
            if path.exists() {
                return Some(path);
            }
        }

        let cwd = PathBuf::from("./yorc-bridge.yaml");
        if cwd.exists() {
            return Some(cwd);
        }

        if let Some(home) = dirs::home_dir() {
            let user_config = home.join(".yorc-bridge").join("config.yaml");
            if user_config.exists() {
                return Some(user_config);
            }
        }

        let system_config = PathBuf::from("/etc/yorc-bridge/config.yaml");
        if system_config.exists() {
            return Some(system_config);
        }

        None
    }

    /// Load configuration with discovery, fallback to default
    pub fn load_or_default(cli_path: Option<PathBuf>) -> anyhow::Result<Self> {
        // Explicit CLI path fails if missing or invalid
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

    /// Apply environment variable overrides so container deployments can
    /// inject endpoints and secrets without editing the manifest
    pub fn apply_env_overrides(&mut self) {
        if let Ok(url) = std::env::var("YORC_BRIDGE_ORCHESTRATOR_URL") {
            tracing::info!("Environment override: YORC_BRIDGE_ORCHESTRATOR_URL={}", url);
            self.spec.orchestrator.url = url;
        }

        if let Ok(url) = std::env::var("YORC_BRIDGE_DATABASE_URL") {
            tracing::info!("Environment override: YORC_BRIDGE_DATABASE_URL is set");
            self.spec.persistence.database_url = Some(url);
        }

        if let Ok(val) = std::env::var("YORC_BRIDGE_RECONCILIATION_ENABLED") {
            match val.to_lowercase().as_str() {
                "true" | "1" | "yes" | "on" => self.spec.reconciliation.enabled = true,
                "false" | "0" | "no" | "off" => self.spec.reconciliation.enabled = false,
                _ => {
                    tracing::warn!(
                        "Invalid YORC_BRIDGE_RECONCILIATION_ENABLED '{}', expected true/false",
                        val
                    );
                }
            }
        }
    }

    /// Validate configuration. Errors here are fatal at startup.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.api_version != API_VERSION {
            return Err(ConfigError::ApiVersion(self.api_version.clone()));
        }
        if self.kind != KIND {
            return Err(ConfigError::Kind(self.kind.clone()));
        }
        if self.metadata.name.trim().is_empty() {
            return Err(ConfigError::Empty("metadata.name"));
        }

        let orchestrator = &self.spec.orchestrator;
        if orchestrator.id.trim().is_empty() {
            return Err(ConfigError::Empty("spec.orchestrator.id"));
        }

        let parsed = url::Url::parse(&orchestrator.url).map_err(|e| ConfigError::InvalidUrl {
            url: orchestrator.url.clone(),
            reason: e.to_string(),
        })?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(ConfigError::InvalidUrl {
                url: orchestrator.url.clone(),
                reason: format!("unsupported scheme '{}'", parsed.scheme()),
            });
        }

        if let Some(path) = &orchestrator.ca_certificate {
            let pem = std::fs::read(path).map_err(|e| ConfigError::CaCertificate {
                path: path.clone(),
                reason: e.to_string(),
            })?;
            if !String::from_utf8_lossy(&pem).contains("-----BEGIN CERTIFICATE-----") {
                return Err(ConfigError::CaCertificate {
                    path: path.clone(),
                    reason: "no PEM certificate block found".to_string(),
                });
            }
        }

        if orchestrator.long_poll_wait.is_zero() {
            return Err(ConfigError::Zero("spec.orchestrator.long_poll_wait"));
        }
        if self.spec.reconciliation.interval.is_zero() {
            return Err(ConfigError::Zero("spec.reconciliation.interval"));
        }
        if self.spec.event_bus.channel_capacity == 0 {
            return Err(ConfigError::Zero("spec.event_bus.channel_capacity"));
        }
        if self.spec.runtime.worker_threads == 0 {
            return Err(ConfigError::Zero("spec.runtime.worker_threads"));
        }

        if self.spec.persistence.backend == PersistenceBackend::Postgres
            && self
                .spec
                .persistence
                .database_url
                .as_deref()
                .map_or(true, |u| u.trim().is_empty())
        {
            return Err(ConfigError::MissingDatabaseUrl);
        }

        Ok(())
    }
}

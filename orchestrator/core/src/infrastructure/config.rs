// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Deployment Configuration
//
// Kubernetes-style manifest (apiVersion/kind/metadata/spec) describing where a
// Reelforge deployment finds its database, reasoning stages and platform
// metrics gateways. Tunable thresholds are NOT here: they live in the
// `system_settings` table and are read live through `SettingsProvider`.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::domain::cycle::CycleStage;
use crate::domain::measurement::Platform;
use crate::infrastructure::retry::RetryPolicy;

pub const API_VERSION: &str = "reelforge.io/v1";
pub const KIND: &str = "OrchestratorConfig";
pub const CONFIG_PATH_ENV: &str = "REELFORGE_CONFIG_PATH";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),

    #[error("Environment variable {0} is not set")]
    MissingEnv(String),
}

/// Top-level deployment manifest
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfigManifest {
    /// API version (must be "reelforge.io/v1")
    #[serde(rename = "apiVersion")]
    pub api_version: String,

    /// Resource kind (must be "OrchestratorConfig")
    pub kind: String,

    pub metadata: ManifestMetadata,

    pub spec: OrchestratorConfigSpec,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestMetadata {
    pub name: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub labels: Option<BTreeMap<String, String>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OrchestratorConfigSpec {
    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub cycle: CycleConfig,

    #[serde(default)]
    pub stages: StagesConfig,

    /// Metrics gateways, one per platform
    #[serde(default)]
    pub platforms: Vec<PlatformAdapterConfig>,

    #[serde(default)]
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Connection URL. Supports "env:VAR_NAME"; falls back to `DATABASE_URL`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CycleConfig {
    /// Time between scheduled cycles in daemon mode
    #[serde(with = "humantime_serde", default = "default_cycle_interval")]
    pub interval: Duration,

    /// How long a plan waits for a human decision before counting as rejected
    #[serde(with = "humantime_serde", default = "default_approval_timeout")]
    pub approval_timeout: Duration,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StagesConfig {
    /// Stage endpoints default to `{base_url}/{stage_name}`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,

    /// Per-stage overrides keyed by stage name (e.g. `plan_content`)
    #[serde(default)]
    pub endpoints: BTreeMap<String, String>,

    #[serde(with = "humantime_serde", default = "default_stage_timeout")]
    pub timeout: Duration,

    #[serde(default)]
    pub retry: RetryConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(with = "humantime_serde", default = "default_base_delay")]
    pub base_delay: Duration,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlatformAdapterConfig {
    pub platform: Platform,

    pub endpoint: String,

    /// Name of the env var holding the bearer token
    #[serde(skip_serializing_if = "Option::is_none")]
    pub credential_env: Option<String>,

    #[serde(with = "humantime_serde", default = "default_http_timeout")]
    pub timeout: Duration,

    #[serde(default = "default_true")]
    pub enabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Prometheus exporter listen address; `None` disables the exporter
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metrics_listen: Option<String>,

    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_true() -> bool {
    true
}

fn default_max_connections() -> u32 {
    5
}

fn default_cycle_interval() -> Duration {
    Duration::from_secs(6 * 3600)
}

fn default_approval_timeout() -> Duration {
    Duration::from_secs(24 * 3600)
}

fn default_stage_timeout() -> Duration {
    Duration::from_secs(300)
}

fn default_http_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay() -> Duration {
    Duration::from_secs(1)
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            max_connections: default_max_connections(),
        }
    }
}

impl Default for CycleConfig {
    fn default() -> Self {
        Self {
            interval: default_cycle_interval(),
            approval_timeout: default_approval_timeout(),
        }
    }
}

impl Default for StagesConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            endpoints: BTreeMap::new(),
            timeout: default_stage_timeout(),
            retry: RetryConfig::default(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay: default_base_delay(),
        }
    }
}

impl RetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_attempts, self.base_delay)
    }
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            metrics_listen: Some("0.0.0.0:9464".to_string()),
            log_level: default_log_level(),
        }
    }
}

impl Default for OrchestratorConfigManifest {
    fn default() -> Self {
        Self {
            api_version: API_VERSION.to_string(),
            kind: KIND.to_string(),
            metadata: ManifestMetadata {
                name: "reelforge".to_string(),
                labels: None,
            },
            spec: OrchestratorConfigSpec::default(),
        }
    }
}

/// Resolve an "env:VAR_NAME" reference; plain values pass through.
fn resolve_value(value: &str) -> Result<String, ConfigError> {
    match value.strip_prefix("env:") {
        Some(var) => std::env::var(var).map_err(|_| ConfigError::MissingEnv(var.to_string())),
        None => Ok(value.to_string()),
    }
}

impl OrchestratorConfigManifest {
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml_str(&content)
    }

    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    pub fn to_yaml_string(&self) -> Result<String, ConfigError> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Discover configuration file using precedence order
    /// 1. REELFORGE_CONFIG_PATH environment variable
    /// 2. ./reelforge-config.yaml (working directory)
    /// 3. /etc/reelforge/config.yaml
    pub fn discover_config() -> Option<PathBuf> {
        if let Ok(path) = std::env::var(CONFIG_PATH_ENV) {
            let path = PathBuf::from(path);
            if path.exists() {
                return Some(path);
            }
        }

        [
            PathBuf::from("./reelforge-config.yaml"),
            PathBuf::from("/etc/reelforge/config.yaml"),
        ]
        .into_iter()
        .find(|p| p.exists())
    }

    /// Explicit path must load; otherwise discover, falling back to defaults.
    pub fn load_or_default(cli_path: Option<PathBuf>) -> Result<Self, ConfigError> {
        let mut config = if let Some(path) = cli_path {
            tracing::info!("Loading configuration from explicit path: {:?}", path);
            Self::from_yaml_file(&path)?
        } else if let Some(path) = Self::discover_config() {
            tracing::info!("Loading configuration from discovered path: {:?}", path);
            Self::from_yaml_file(&path)?
        } else {
            tracing::warn!("No configuration file found in standard locations. Using defaults.");
            Self::default()
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Container deployments override the config through env vars.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("REELFORGE_STAGES_BASE_URL") {
            tracing::info!("Environment override: REELFORGE_STAGES_BASE_URL={}", val);
            self.spec.stages.base_url = Some(val);
        }

        if let Ok(val) = std::env::var("REELFORGE_METRICS_LISTEN") {
            tracing::info!("Environment override: REELFORGE_METRICS_LISTEN={}", val);
            self.spec.observability.metrics_listen = if val.is_empty() { None } else { Some(val) };
        }

        if let Ok(val) = std::env::var("REELFORGE_CYCLE_INTERVAL") {
            match humantime_serde::re::humantime::parse_duration(&val) {
                Ok(interval) => self.spec.cycle.interval = interval,
                Err(e) => tracing::warn!(
                    "Invalid value for REELFORGE_CYCLE_INTERVAL: '{}' ({}). Ignoring.",
                    val,
                    e
                ),
            }
        }
    }

    /// `spec.database.url` (with env: indirection) or `DATABASE_URL`.
    pub fn database_url(&self) -> Result<String, ConfigError> {
        match &self.spec.database.url {
            Some(url) => resolve_value(url),
            None => std::env::var("DATABASE_URL").map_err(|_| ConfigError::MissingEnv("DATABASE_URL".to_string())),
        }
    }

    pub fn stage_endpoint(&self, stage: CycleStage) -> Option<String> {
        if let Some(url) = self.spec.stages.endpoints.get(stage.as_str()) {
            return Some(url.clone());
        }
        self.spec
            .stages
            .base_url
            .as_ref()
            .map(|base| format!("{}/{}", base.trim_end_matches('/'), stage.as_str()))
    }

    pub fn enabled_platforms(&self) -> impl Iterator<Item = &PlatformAdapterConfig> {
        self.spec.platforms.iter().filter(|p| p.enabled)
    }

    pub fn metrics_listen_addr(&self) -> Result<Option<SocketAddr>, ConfigError> {
        self.spec
            .observability
            .metrics_listen
            .as_deref()
            .map(|addr| {
                addr.parse()
                    .map_err(|e| ConfigError::Invalid(format!("metrics_listen '{addr}': {e}")))
            })
            .transpose()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.api_version != API_VERSION {
            return Err(ConfigError::Invalid(format!(
                "apiVersion '{}' must be '{}'",
                self.api_version, API_VERSION
            )));
        }

        if self.kind != KIND {
            return Err(ConfigError::Invalid(format!("kind '{}' must be '{}'", self.kind, KIND)));
        }

        if self.metadata.name.is_empty() {
            return Err(ConfigError::Invalid("metadata.name cannot be empty".to_string()));
        }

        for name in self.spec.stages.endpoints.keys() {
            if CycleStage::parse(name).is_none() {
                return Err(ConfigError::Invalid(format!("unknown stage in stages.endpoints: {name}")));
            }
        }

        if self.spec.stages.retry.max_attempts == 0 {
            return Err(ConfigError::Invalid("stages.retry.max_attempts must be at least 1".to_string()));
        }

        let mut seen = HashSet::new();
        for adapter in &self.spec.platforms {
            if adapter.endpoint.is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "platform {} endpoint cannot be empty",
                    adapter.platform
                )));
            }
            if !seen.insert(adapter.platform) {
                return Err(ConfigError::Invalid(format!(
                    "platform {} configured more than once",
                    adapter.platform
                )));
            }
        }

        if self.spec.cycle.interval.is_zero() {
            return Err(ConfigError::Invalid("cycle.interval must be positive".to_string()));
        }

        self.metrics_listen_addr()?;
        Ok(())
    }

    /// Stages that have neither an override nor a base URL.
    pub fn unrouted_stages(&self) -> Vec<CycleStage> {
        CycleStage::ALL
            .into_iter()
            .filter(|s| self.stage_endpoint(*s).is_none())
            .collect()
    }
}

impl PlatformAdapterConfig {
    /// Bearer token from `credential_env`, if one is configured.
    pub fn credential(&self) -> Result<Option<String>, ConfigError> {
        self.credential_env
            .as_deref()
            .map(|var| std::env::var(var).map_err(|_| ConfigError::MissingEnv(var.to_string())))
            .transpose()
    }
}

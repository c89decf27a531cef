// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Process Worker Configuration
//
// Defines the configuration schema for a process worker, including:
// - Kubernetes-style manifest format (apiVersion/kind/metadata/spec)
// - Step runner settings (lock lease, polling, parallelism)
// - Storage backend selection
// - Logging settings

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::domain::repository::{PostgresConfig, StorageBackend};

pub const API_VERSION: &str = "portal.process/v1";
pub const KIND: &str = "ProcessWorkerConfig";

/// Top-level Kubernetes-style worker configuration manifest
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessWorkerConfigManifest {
    /// API version (must be "portal.process/v1")
    #[serde(rename = "apiVersion")]
    pub api_version: String,

    /// Resource kind (must be "ProcessWorkerConfig")
    pub kind: String,

    pub metadata: ManifestMetadata,

    pub spec: ProcessWorkerConfigSpec,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestMetadata {
    /// Human-readable worker name
    pub name: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub labels: Option<HashMap<String, String>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProcessWorkerConfigSpec {
    #[serde(default)]
    pub worker: WorkerConfig,

    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub observability: Option<ObservabilityConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Lifetime of the lock lease taken before steps with external side effects
    #[serde(default = "default_lock_expiry_seconds")]
    pub lock_expiry_seconds: u64,

    /// Delay between runner polls when no process is due
    #[serde(default = "default_poll_interval_seconds")]
    pub poll_interval_seconds: u64,

    /// Upper bound of processes fetched per poll
    #[serde(default = "default_max_processes_per_run")]
    pub max_processes_per_run: usize,

    /// Processes driven concurrently within one poll
    #[serde(default = "default_max_parallel_processes")]
    pub max_parallel_processes: usize,
}

impl WorkerConfig {
    pub fn lock_expiry(&self) -> Duration {
        Duration::from_secs(self.lock_expiry_seconds)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_seconds)
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            lock_expiry_seconds: default_lock_expiry_seconds(),
            poll_interval_seconds: default_poll_interval_seconds(),
            max_processes_per_run: default_max_processes_per_run(),
            max_parallel_processes: default_max_parallel_processes(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DatabaseBackend {
    InMemory,
    Postgres,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_backend")]
    pub backend: DatabaseBackend,

    /// Connection URL (supports "env:VAR_NAME" for environment variables)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            url: None,
            max_connections: default_max_connections(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logging: Option<LoggingConfig>,
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

// Default value functions
fn default_lock_expiry_seconds() -> u64 {
    300
}

fn default_poll_interval_seconds() -> u64 {
    30
}

fn default_max_processes_per_run() -> usize {
    50
}

fn default_max_parallel_processes() -> usize {
    4
}

fn default_backend() -> DatabaseBackend {
    DatabaseBackend::InMemory
}

fn default_max_connections() -> u32 {
    5
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

impl Default for ProcessWorkerConfigManifest {
    fn default() -> Self {
        let hostname = hostname::get()
            .ok()
            .and_then(|h| h.into_string().ok())
            .unwrap_or_else(|| "process-worker".to_string());

        Self {
            api_version: API_VERSION.to_string(),
            kind: KIND.to_string(),
            metadata: ManifestMetadata {
                name: hostname,
                version: Some("1.0.0".to_string()),
                labels: None,
            },
            spec: ProcessWorkerConfigSpec::default(),
        }
    }
}

impl ProcessWorkerConfigManifest {
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
    /// 1. PORTAL_PROCESS_CONFIG_PATH environment variable
    /// 2. ./process-worker.yaml (working directory)
    /// 3. ~/.portal-process/config.yaml (user home)
    /// 4. /etc/portal-process/config.yaml (system, Unix)
    pub fn discover_config() -> Option<PathBuf> {
        if let Ok(path) = std::env::var("PORTAL_PROCESS_CONFIG_PATH") {
            let path = PathBuf::from(path);
            if path.exists() {
                return Some(path);
            }
        }

        let cwd = PathBuf::from("./process-worker.yaml");
        if cwd.exists() {
            return Some(cwd);
        }

        if let Some(home) = dirs::home_dir() {
            let user_config = home.join(".portal-process").join("config.yaml");
            if user_config.exists() {
                return Some(user_config);
            }
        }

        let system_config = PathBuf::from("/etc/portal-process/config.yaml");
        if system_config.exists() {
            return Some(system_config);
        }

        None
    }

    /// Load configuration with discovery, fallback to default
    pub fn load_or_default(cli_path: Option<PathBuf>) -> anyhow::Result<Self> {
        // Explicit CLI path fails if missing/invalid
        if let Some(path) = cli_path {
            tracing::info!("Loading configuration from explicit path: {:?}", path);
            let mut config = Self::from_yaml_file(&path)
                .map_err(|e| anyhow::anyhow!("Failed to load config at {:?}: {}", path, e))?;
            config.apply_env_overrides();
            return Ok(config);
        }

        if let Some(config_path) = Self::discover_config() {
            tracing::info!("Loading configuration from discovered path: {:?}", config_path);
            let mut config = Self::from_yaml_file(config_path)?;
            config.apply_env_overrides();
            Ok(config)
        } else {
            tracing::warn!("No configuration file found in standard locations. Using defaults.");
            let mut config = Self::default();
            config.apply_env_overrides();
            Ok(config)
        }
    }

    /// Apply environment variable overrides to configuration
    pub fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("PORTAL_PROCESS_LOCK_EXPIRY_SECONDS") {
            match val.parse::<u64>() {
                Ok(seconds) => {
                    tracing::info!("Environment override: PORTAL_PROCESS_LOCK_EXPIRY_SECONDS={}", seconds);
                    self.spec.worker.lock_expiry_seconds = seconds;
                }
                Err(_) => {
                    tracing::warn!(
                        "Invalid value for PORTAL_PROCESS_LOCK_EXPIRY_SECONDS: '{}'. Expected seconds. Ignoring.",
                        val
                    );
                }
            }
        }

        if let Ok(url) = std::env::var("PORTAL_PROCESS_DATABASE_URL") {
            tracing::info!("Environment override: PORTAL_PROCESS_DATABASE_URL");
            self.spec.database.url = Some(url);
            self.spec.database.backend = DatabaseBackend::Postgres;
        }
    }

    /// Resolve `spec.database.url`, expanding "env:VAR_NAME".
    pub fn database_url(&self) -> anyhow::Result<Option<String>> {
        match self.spec.database.url.as_deref() {
            None => Ok(None),
            Some(url) => match url.strip_prefix("env:") {
                Some(var) => std::env::var(var)
                    .map(Some)
                    .map_err(|_| anyhow::anyhow!("Environment variable '{}' referenced by spec.database.url is not set", var)),
                None => Ok(Some(url.to_string())),
            },
        }
    }

    pub fn storage_backend(&self) -> anyhow::Result<StorageBackend> {
        match self.spec.database.backend {
            DatabaseBackend::InMemory => Ok(StorageBackend::InMemory),
            DatabaseBackend::Postgres => {
                let connection_string = self
                    .database_url()?
                    .ok_or_else(|| anyhow::anyhow!("spec.database.url is required for the postgres backend"))?;
                Ok(StorageBackend::PostgreSQL(PostgresConfig {
                    connection_string,
                    max_connections: self.spec.database.max_connections,
                }))
            }
        }
    }

    pub fn logging(&self) -> LoggingConfig {
        self.spec
            .observability
            .as_ref()
            .and_then(|o| o.logging.clone())
            .unwrap_or_else(|| LoggingConfig {
                level: default_log_level(),
                format: default_log_format(),
            })
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.api_version != API_VERSION {
            anyhow::bail!("Invalid apiVersion: '{}'. Must be '{}'", self.api_version, API_VERSION);
        }

        if self.kind != KIND {
            anyhow::bail!("Invalid kind: '{}'. Must be '{}'", self.kind, KIND);
        }

        if self.metadata.name.is_empty() {
            anyhow::bail!("metadata.name cannot be empty");
        }

        let worker = &self.spec.worker;
        if worker.lock_expiry_seconds == 0 {
            anyhow::bail!("spec.worker.lock_expiry_seconds must be greater than zero");
        }
        if worker.poll_interval_seconds == 0 {
            anyhow::bail!("spec.worker.poll_interval_seconds must be greater than zero");
        }
        if worker.max_processes_per_run == 0 || worker.max_parallel_processes == 0 {
            anyhow::bail!("spec.worker process limits must be greater than zero");
        }

        if self.spec.database.backend == DatabaseBackend::Postgres && self.spec.database.url.is_none() {
            anyhow::bail!("spec.database.url is required for the postgres backend");
        }

        if let Some(logging) = self.spec.observability.as_ref().and_then(|o| o.logging.as_ref()) {
            if logging.format != "json" && logging.format != "text" {
                anyhow::bail!("Invalid logging format: '{}'. Must be 'json' or 'text'", logging.format);
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_minimal_manifest_fills_defaults() {
        let yaml = r#"
apiVersion: portal.process/v1
kind: ProcessWorkerConfig
metadata:
  name: worker-1
spec: {}
"#;
        let config = ProcessWorkerConfigManifest::from_yaml_str(yaml).unwrap();
        assert_eq!(config.metadata.name, "worker-1");
        assert_eq!(config.spec.worker.lock_expiry_seconds, 300);
        assert_eq!(config.spec.worker.poll_interval_seconds, 30);
        assert_eq!(config.spec.database.backend, DatabaseBackend::InMemory);
        assert_eq!(config.logging().format, "text");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_postgres_backend_requires_url() {
        let yaml = r#"
apiVersion: portal.process/v1
kind: ProcessWorkerConfig
metadata:
  name: worker-1
spec:
  database:
    backend: postgres
"#;
        let mut config = ProcessWorkerConfigManifest::from_yaml_str(yaml).unwrap();
        assert!(config.validate().is_err());
        assert!(config.storage_backend().is_err());

        config.spec.database.url = Some("postgres://localhost/portal".to_string());
        assert!(config.validate().is_ok());
        match config.storage_backend().unwrap() {
            StorageBackend::PostgreSQL(pg) => {
                assert_eq!(pg.connection_string, "postgres://localhost/portal");
                assert_eq!(pg.max_connections, 5);
            }
            StorageBackend::InMemory => panic!("expected postgres backend"),
        }
    }

    #[test]
    fn test_validation() {
        let mut manifest = ProcessWorkerConfigManifest::default();
        assert!(manifest.validate().is_ok());

        manifest.api_version = "wrong/v1".to_string();
        assert!(manifest.validate().is_err());
        manifest.api_version = API_VERSION.to_string();

        manifest.kind = "WrongKind".to_string();
        assert!(manifest.validate().is_err());
        manifest.kind = KIND.to_string();

        manifest.spec.worker.lock_expiry_seconds = 0;
        assert!(manifest.validate().is_err());
        manifest.spec.worker.lock_expiry_seconds = 60;

        manifest.spec.observability = Some(ObservabilityConfig {
            logging: Some(LoggingConfig { level: "debug".to_string(), format: "xml".to_string() }),
        });
        assert!(manifest.validate().is_err());
    }

    #[test]
    fn test_yaml_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("process-worker.yaml");

        let mut manifest = ProcessWorkerConfigManifest::default();
        manifest.spec.worker.poll_interval_seconds = 5;
        manifest.to_yaml_file(&path).unwrap();

        let loaded = ProcessWorkerConfigManifest::load_or_default(Some(path)).unwrap();
        assert_eq!(loaded.spec.worker.poll_interval_seconds, 5);
        assert_eq!(loaded.kind, KIND);
    }
}

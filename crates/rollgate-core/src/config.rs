//! rollgate.toml configuration parser.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::duration::parse_duration;

/// Default deadline for a single rollout watcher.
pub const DEFAULT_WATCH_TIMEOUT: Duration = Duration::from_secs(300);

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid duration for {field}: {value:?}")]
    InvalidDuration { field: &'static str, value: String },

    #[error("duplicate cluster id: {0}")]
    DuplicateCluster(String),

    #[error("cluster {id}: {reason}")]
    InvalidCluster { id: String, reason: String },
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DaemonConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub rollout: RolloutConfig,
    #[serde(default)]
    pub clusters: Vec<ClusterConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            data_dir: default_data_dir(),
        }
    }
}

fn default_port() -> u16 {
    8080
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("/var/lib/rollgate")
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RolloutConfig {
    /// Deadline for one watcher invocation, e.g. "5m".
    pub watch_timeout: Option<String>,
}

impl RolloutConfig {
    pub fn watch_timeout(&self) -> Result<Duration, ConfigError> {
        match &self.watch_timeout {
            None => Ok(DEFAULT_WATCH_TIMEOUT),
            Some(raw) => parse_duration(raw).ok_or_else(|| ConfigError::InvalidDuration {
                field: "rollout.watch_timeout",
                value: raw.clone(),
            }),
        }
    }
}

/// A cluster the daemon can talk to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterConfig {
    pub id: String,
    pub name: Option<String>,
    /// Base URL of the cluster API server.
    pub api_server: String,
    /// Inline bearer token. Prefer `token_file`.
    pub token: Option<String>,
    pub token_file: Option<PathBuf>,
    /// PEM bundle used to verify the API server.
    pub ca_file: Option<PathBuf>,
    #[serde(default)]
    pub insecure_skip_tls_verify: bool,
}

impl ClusterConfig {
    /// Resolve the bearer token, reading `token_file` if set.
    pub fn resolve_token(&self) -> Result<Option<String>, ConfigError> {
        if let Some(token) = &self.token {
            return Ok(Some(token.trim().to_string()));
        }
        match &self.token_file {
            Some(path) => read_to_string(path).map(|t| Some(t.trim().to_string())),
            None => Ok(None),
        }
    }

    pub fn resolve_ca_pem(&self) -> Result<Option<String>, ConfigError> {
        match &self.ca_file {
            Some(path) => read_to_string(path).map(Some),
            None => Ok(None),
        }
    }
}

impl DaemonConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: DaemonConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        self.rollout.watch_timeout()?;
        let mut seen = std::collections::HashSet::new();
        for cluster in &self.clusters {
            if cluster.id.is_empty() {
                return Err(ConfigError::InvalidCluster {
                    id: cluster.id.clone(),
                    reason: "id must not be empty".to_string(),
                });
            }
            if !cluster.api_server.starts_with("http://")
                && !cluster.api_server.starts_with("https://")
            {
                return Err(ConfigError::InvalidCluster {
                    id: cluster.id.clone(),
                    reason: format!("api_server must be an http(s) URL: {}", cluster.api_server),
                });
            }
            if !seen.insert(cluster.id.as_str()) {
                return Err(ConfigError::DuplicateCluster(cluster.id.clone()));
            }
        }
        Ok(())
    }
}

fn read_to_string(path: &Path) -> Result<String, ConfigError> {
    std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })
}

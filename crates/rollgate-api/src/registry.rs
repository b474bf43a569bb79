//! Cluster id to platform client resolution.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use rollgate_platform::{KubeConfig, KubePlatform, Platform, PlatformError};
use rollgate_state::{ClusterRecord, StateError, StateStore};
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("cluster not found: {0}")]
    UnknownCluster(String),

    #[error(transparent)]
    State(#[from] StateError),

    #[error(transparent)]
    Platform(#[from] PlatformError),
}

/// Lazily built, cached platform clients keyed by cluster id.
///
/// With a fixed platform every cluster id resolves to it and the store is
/// not consulted; `rollgated --dev-platform` and the tests use this.
#[derive(Clone, Default)]
pub struct PlatformRegistry {
    clients: Arc<RwLock<HashMap<String, Arc<dyn Platform>>>>,
    fixed: Option<Arc<dyn Platform>>,
}

impl PlatformRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fixed(platform: Arc<dyn Platform>) -> Self {
        Self {
            clients: Arc::default(),
            fixed: Some(platform),
        }
    }

    pub fn resolve(&self, store: &StateStore, cluster: &str) -> Result<Arc<dyn Platform>, ResolveError> {
        if let Some(platform) = &self.fixed {
            return Ok(platform.clone());
        }
        if let Some(platform) = self.read().get(cluster) {
            return Ok(platform.clone());
        }
        let record = store
            .get_cluster(cluster)?
            .ok_or_else(|| ResolveError::UnknownCluster(cluster.to_string()))?;
        let platform: Arc<dyn Platform> = Arc::new(KubePlatform::new(kube_config(&record))?);
        info!(cluster, api_server = %record.api_server, "platform client created");
        self.write().insert(cluster.to_string(), platform.clone());
        Ok(platform)
    }

    /// Drop the cached client so the next request picks up new settings.
    pub fn evict(&self, cluster: &str) {
        self.write().remove(cluster);
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<String, Arc<dyn Platform>>> {
        self.clients.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<String, Arc<dyn Platform>>> {
        self.clients.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn kube_config(record: &ClusterRecord) -> KubeConfig {
    KubeConfig {
        api_server: record.api_server.clone(),
        token: record.token.clone(),
        ca_cert_pem: record.ca_cert_pem.clone(),
        insecure_skip_tls_verify: record.insecure_skip_tls_verify,
        request_timeout: Duration::from_secs(30),
    }
}

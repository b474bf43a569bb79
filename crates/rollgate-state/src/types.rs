//! Domain types for the Rollgate state store.

use serde::{Deserialize, Serialize};

/// Unique identifier for a registered cluster.
pub type ClusterId = String;

// ── Cluster ────────────────────────────────────────────────────────

/// A cluster the daemon knows how to reach.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClusterRecord {
    pub id: ClusterId,
    pub name: String,
    /// Base URL of the cluster API server.
    pub api_server: String,
    /// Bearer token used for every request.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    /// PEM-encoded CA bundle for the API server certificate.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ca_cert_pem: Option<String>,
    #[serde(default)]
    pub insecure_skip_tls_verify: bool,
    /// Unix timestamp (seconds) when this cluster was registered.
    pub created_at: u64,
}

impl ClusterRecord {
    /// Copy without credentials, for API listings.
    pub fn redacted(&self) -> Self {
        Self {
            token: self.token.as_ref().map(|_| "***".to_string()),
            ca_cert_pem: None,
            ..self.clone()
        }
    }
}

// ── Audit ──────────────────────────────────────────────────────────

/// Kind of mutation recorded in the audit trail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    Pause,
    Resume,
    PatchImage,
}

impl std::fmt::Display for AuditAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuditAction::Pause => write!(f, "pause"),
            AuditAction::Resume => write!(f, "resume"),
            AuditAction::PatchImage => write!(f, "patch_image"),
        }
    }
}

/// Audit entry as submitted by a caller; the store assigns `seq`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NewAuditRecord {
    pub cluster: ClusterId,
    pub namespace: String,
    /// Controller kind of the workload ("deployment", ...).
    pub kind: String,
    pub name: String,
    pub action: AuditAction,
    /// Principal that triggered the mutation.
    pub actor: String,
    /// The JSON patch that was applied.
    pub payload: serde_json::Value,
    /// Unix timestamp (seconds).
    pub recorded_at: u64,
}

/// A persisted audit entry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AuditRecord {
    pub seq: u64,
    #[serde(flatten)]
    pub entry: NewAuditRecord,
}

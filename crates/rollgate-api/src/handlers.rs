//! REST API handlers for clusters, the audit trail and health.

use std::time::{SystemTime, UNIX_EPOCH};

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use rollgate_state::ClusterRecord;
use serde::Deserialize;
use tracing::info;

use crate::ApiState;
use crate::registry::ResolveError;
use crate::response::{ApiResponse, error_response, platform_status};
use crate::rollout_handlers::DEFAULT_CLUSTER;

const DEFAULT_AUDIT_LIMIT: usize = 100;

pub(crate) fn resolve_error(e: &ResolveError) -> Response {
    let status = match e {
        ResolveError::UnknownCluster(_) => StatusCode::NOT_FOUND,
        ResolveError::State(_) => StatusCode::INTERNAL_SERVER_ERROR,
        ResolveError::Platform(e) => platform_status(e),
    };
    error_response(&e.to_string(), status)
}

// ── Clusters ───────────────────────────────────────────────────

/// Request body to register a cluster.
#[derive(Debug, Deserialize)]
pub struct RegisterCluster {
    pub id: String,
    pub name: Option<String>,
    pub api_server: String,
    pub token: Option<String>,
    pub ca_cert_pem: Option<String>,
    #[serde(default)]
    pub insecure_skip_tls_verify: bool,
}

/// GET /api/v1/clusters
pub async fn list_clusters(State(state): State<ApiState>) -> Response {
    match state.store.list_clusters() {
        Ok(clusters) => {
            let clusters: Vec<ClusterRecord> = clusters.iter().map(ClusterRecord::redacted).collect();
            ApiResponse::ok(clusters).into_response()
        }
        Err(e) => error_response(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR),
    }
}

/// GET /api/v1/clusters/:id
pub async fn get_cluster(State(state): State<ApiState>, Path(id): Path<String>) -> Response {
    match state.store.get_cluster(&id) {
        Ok(Some(cluster)) => ApiResponse::ok(cluster.redacted()).into_response(),
        Ok(None) => error_response("cluster not found", StatusCode::NOT_FOUND),
        Err(e) => error_response(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR),
    }
}

/// POST /api/v1/clusters
pub async fn register_cluster(
    State(state): State<ApiState>,
    Json(req): Json<RegisterCluster>,
) -> Response {
    if req.id.trim().is_empty() {
        return error_response("cluster id must not be empty", StatusCode::BAD_REQUEST);
    }
    if !req.api_server.starts_with("http://") && !req.api_server.starts_with("https://") {
        return error_response("api_server must be an http(s) URL", StatusCode::BAD_REQUEST);
    }
    let record = ClusterRecord {
        name: req.name.unwrap_or_else(|| req.id.clone()),
        id: req.id,
        api_server: req.api_server,
        token: req.token,
        ca_cert_pem: req.ca_cert_pem,
        insecure_skip_tls_verify: req.insecure_skip_tls_verify,
        created_at: epoch_secs(),
    };
    match state.store.put_cluster(&record) {
        Ok(()) => {
            state.platforms.evict(&record.id);
            info!(cluster = %record.id, api_server = %record.api_server, "cluster registered");
            (StatusCode::CREATED, ApiResponse::ok(record.redacted())).into_response()
        }
        Err(e) => error_response(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR),
    }
}

/// DELETE /api/v1/clusters/:id
pub async fn delete_cluster(State(state): State<ApiState>, Path(id): Path<String>) -> Response {
    match state.store.delete_cluster(&id) {
        Ok(true) => {
            state.platforms.evict(&id);
            info!(cluster = %id, "cluster removed");
            StatusCode::NO_CONTENT.into_response()
        }
        Ok(false) => error_response("cluster not found", StatusCode::NOT_FOUND),
        Err(e) => error_response(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR),
    }
}

// ── Audit ──────────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
pub struct AuditQuery {
    pub limit: Option<usize>,
    pub cluster: Option<String>,
    pub namespace: Option<String>,
    pub name: Option<String>,
}

/// GET /api/v1/audit
///
/// With `namespace` and `name` the listing is narrowed to one workload in
/// `cluster` (default "default").
pub async fn list_audit(State(state): State<ApiState>, Query(query): Query<AuditQuery>) -> Response {
    let limit = query.limit.unwrap_or(DEFAULT_AUDIT_LIMIT);
    let records = match (&query.namespace, &query.name) {
        (Some(namespace), Some(name)) => {
            let cluster = query.cluster.as_deref().unwrap_or(DEFAULT_CLUSTER);
            state.store.list_audit_for(cluster, namespace, name, limit)
        }
        _ => state.store.list_audit(limit),
    };
    match records {
        Ok(records) => ApiResponse::ok(records).into_response(),
        Err(e) => error_response(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR),
    }
}

// ── Health ─────────────────────────────────────────────────────

/// GET /healthz
pub async fn healthz(State(state): State<ApiState>) -> Response {
    ApiResponse::ok(serde_json::json!({
        "status": "ok",
        "active_rollouts": state.locks.held(),
    }))
    .into_response()
}

fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

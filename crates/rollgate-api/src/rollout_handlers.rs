//! REST API handlers for staged rollouts.
//!
//! Routes are addressed as `/controller/{kind}/<action>/{name}` with the
//! cluster and namespace in the query string. The acting principal comes
//! from the `x-rollgate-user` header.

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use rollgate_platform::{ControllerKind, PatchOp, WorkloadRef};
use rollgate_rollout::{RolloutController, RolloutError, RolloutOptions};
use serde::Deserialize;
use tracing::debug;

use crate::ApiState;
use crate::handlers::resolve_error;
use crate::response::{ApiResponse, error_response, platform_status, rollout_error};

pub const ACTOR_HEADER: &str = "x-rollgate-user";
pub(crate) const DEFAULT_CLUSTER: &str = "default";
const DEFAULT_NAMESPACE: &str = "default";

#[derive(Debug, Default, Deserialize)]
pub struct ControllerQuery {
    pub cluster: Option<String>,
    pub namespace: Option<String>,
    pub step: Option<String>,
    pub wait: Option<bool>,
}

impl ControllerQuery {
    fn cluster(&self) -> &str {
        self.cluster.as_deref().unwrap_or(DEFAULT_CLUSTER)
    }

    fn namespace(&self) -> &str {
        self.namespace.as_deref().unwrap_or(DEFAULT_NAMESPACE)
    }

    fn options(&self) -> RolloutOptions {
        RolloutOptions {
            wait_for_decision: self.wait,
        }
    }
}

/// Body of an image rollout: the JSON patch that changes the template.
#[derive(Debug, Deserialize)]
pub struct PatchJson {
    #[serde(default)]
    pub patches: Vec<PatchOp>,
}

fn actor(headers: &HeaderMap) -> String {
    headers
        .get(ACTOR_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .unwrap_or("anonymous")
        .to_string()
}

fn workload_ref(query: &ControllerQuery, kind: &str, name: &str) -> Result<WorkloadRef, Response> {
    let kind = ControllerKind::parse(kind).ok_or_else(|| {
        rollout_error(&RolloutError::WorkloadKindUnsupported(kind.to_string()))
    })?;
    Ok(WorkloadRef::new(kind, query.namespace(), name))
}

fn controller_for(
    state: &ApiState,
    query: &ControllerQuery,
    kind: &str,
    name: &str,
) -> Result<(RolloutController, WorkloadRef), Response> {
    let target = workload_ref(query, kind, name)?;
    let cluster = query.cluster();
    let platform = state
        .platforms
        .resolve(&state.store, cluster)
        .map_err(|e| resolve_error(&e))?;
    let controller = RolloutController::new(
        cluster,
        platform,
        state.audit.clone(),
        state.locks.clone(),
        state.settings,
    );
    Ok((controller, target))
}

macro_rules! try_response {
    ($expr:expr) => {
        match $expr {
            Ok(value) => value,
            Err(response) => return response,
        }
    };
}

/// PATCH /api/v1/controller/:kind/rolling/:name?step=N
pub async fn patch_image(
    State(state): State<ApiState>,
    Path((kind, name)): Path<(String, String)>,
    Query(query): Query<ControllerQuery>,
    headers: HeaderMap,
    Json(body): Json<PatchJson>,
) -> Response {
    let (controller, target) = try_response!(controller_for(&state, &query, &kind, &name));
    let step = query.step.as_deref().unwrap_or_default();
    debug!(workload = %target, step, ops = body.patches.len(), "image rollout requested");
    match controller
        .patch_image(&target, step, body.patches, &actor(&headers), query.options())
        .await
    {
        Ok(snapshot) => ApiResponse::ok(snapshot).into_response(),
        Err(e) => rollout_error(&e),
    }
}

/// PATCH /api/v1/controller/:kind/step/resume/:name
pub async fn patch_step_resume(
    State(state): State<ApiState>,
    Path((kind, name)): Path<(String, String)>,
    Query(query): Query<ControllerQuery>,
    headers: HeaderMap,
) -> Response {
    let (controller, target) = try_response!(controller_for(&state, &query, &kind, &name));
    match controller
        .patch_step_resume(&target, &actor(&headers), query.options())
        .await
    {
        Ok(snapshot) => ApiResponse::ok(snapshot).into_response(),
        Err(e) => rollout_error(&e),
    }
}

/// PATCH /api/v1/controller/:kind/all/resume/:name
pub async fn patch_all_resume(
    State(state): State<ApiState>,
    Path((kind, name)): Path<(String, String)>,
    Query(query): Query<ControllerQuery>,
    headers: HeaderMap,
) -> Response {
    let (controller, target) = try_response!(controller_for(&state, &query, &kind, &name));
    match controller
        .patch_all_resume(&target, &actor(&headers), query.options())
        .await
    {
        Ok(snapshot) => ApiResponse::ok(snapshot).into_response(),
        Err(e) => rollout_error(&e),
    }
}

/// PATCH /api/v1/controller/:kind/pause/:name
pub async fn patch_pause(
    State(state): State<ApiState>,
    Path((kind, name)): Path<(String, String)>,
    Query(query): Query<ControllerQuery>,
    headers: HeaderMap,
) -> Response {
    let (controller, target) = try_response!(controller_for(&state, &query, &kind, &name));
    match controller.patch_pause(&target, &actor(&headers)).await {
        Ok(snapshot) => ApiResponse::ok(snapshot).into_response(),
        Err(e) => rollout_error(&e),
    }
}

/// GET|PATCH /api/v1/controller/:kind/watch/:name
pub async fn watch_pod_ip(
    State(state): State<ApiState>,
    Path((kind, name)): Path<(String, String)>,
    Query(query): Query<ControllerQuery>,
) -> Response {
    let (controller, target) = try_response!(controller_for(&state, &query, &kind, &name));
    match controller.watch_pod_ip(&target).await {
        Ok(snapshot) => ApiResponse::ok(snapshot).into_response(),
        Err(e) => rollout_error(&e),
    }
}

/// GET /api/v1/controller/:kind/:name
pub async fn get_workload(
    State(state): State<ApiState>,
    Path((kind, name)): Path<(String, String)>,
    Query(query): Query<ControllerQuery>,
) -> Response {
    let target = try_response!(workload_ref(&query, &kind, &name));
    let platform = match state.platforms.resolve(&state.store, query.cluster()) {
        Ok(platform) => platform,
        Err(e) => return resolve_error(&e),
    };
    match platform.get_workload(&target).await {
        Ok(workload) => ApiResponse::ok(workload).into_response(),
        Err(e) => error_response(&e.to_string(), platform_status(&e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{HeaderValue, StatusCode};

    #[test]
    fn actor_defaults_to_anonymous() {
        let mut headers = HeaderMap::new();
        assert_eq!(actor(&headers), "anonymous");
        headers.insert(ACTOR_HEADER, HeaderValue::from_static(" alice "));
        assert_eq!(actor(&headers), "alice");
    }

    #[test]
    fn query_defaults() {
        let query = ControllerQuery::default();
        assert_eq!(query.cluster(), "default");
        assert_eq!(query.namespace(), "default");
        assert_eq!(query.options().wait_for_decision, None);
    }

    #[test]
    fn unknown_kind_is_bad_request() {
        let query = ControllerQuery::default();
        let response = workload_ref(&query, "cronjob", "nightly").unwrap_err();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let target = workload_ref(&query, "Deployment", "web").unwrap();
        assert_eq!(target.kind, ControllerKind::Deployment);
        assert_eq!(target.namespace, "default");
    }

    #[test]
    fn patch_json_body() {
        let body: PatchJson = serde_json::from_str(
            r#"{"patches":[{"op":"replace","path":"/spec/template/spec/containers/0/image","value":"web:v2"}]}"#,
        )
        .unwrap();
        assert_eq!(body.patches.len(), 1);
        assert_eq!(body.patches[0].path, "/spec/template/spec/containers/0/image");
    }
}

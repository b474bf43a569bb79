//! JSON envelope and error-to-status mapping shared by all handlers.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use rollgate_platform::PlatformError;
use rollgate_rollout::RolloutError;

/// Response wrapper for consistent API format.
#[derive(serde::Serialize)]
pub(crate) struct ApiResponse<T: serde::Serialize> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T: serde::Serialize> ApiResponse<T> {
    pub(crate) fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data: Some(data),
            error: None,
        })
    }
}

pub(crate) fn error_response(msg: &str, status: StatusCode) -> Response {
    (
        status,
        Json(ApiResponse::<()> {
            success: false,
            data: None,
            error: Some(msg.to_string()),
        }),
    )
        .into_response()
}

pub(crate) fn rollout_status(e: &RolloutError) -> StatusCode {
    match e {
        RolloutError::MissingStep
        | RolloutError::StepOutOfRange { .. }
        | RolloutError::InvalidStep(_)
        | RolloutError::InvalidStrategyValue(_)
        | RolloutError::WorkloadKindUnsupported(_) => StatusCode::BAD_REQUEST,
        RolloutError::WorkloadNotFound(_) | RolloutError::NoActiveGeneration(_) => {
            StatusCode::NOT_FOUND
        }
        RolloutError::RolloutInProgress(_) => StatusCode::CONFLICT,
        RolloutError::TimedOut { .. } => StatusCode::GATEWAY_TIMEOUT,
        RolloutError::Platform(e) => platform_status(e),
        RolloutError::Audit(_) | RolloutError::WatcherLost(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

pub(crate) fn platform_status(e: &PlatformError) -> StatusCode {
    match e {
        PlatformError::NotFound(_) => StatusCode::NOT_FOUND,
        PlatformError::Rejected(_) => StatusCode::UNPROCESSABLE_ENTITY,
        PlatformError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
        PlatformError::Api { .. } | PlatformError::Transport(_) | PlatformError::Decode(_) => {
            StatusCode::BAD_GATEWAY
        }
    }
}

pub(crate) fn rollout_error(e: &RolloutError) -> Response {
    error_response(&e.to_string(), rollout_status(e))
}

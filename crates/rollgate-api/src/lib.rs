//! rollgate-api — REST API for Rollgate.
//!
//! Axum route handlers for the staged rollout operations plus cluster
//! registration and the audit trail.
//!
//! # API Routes
//!
//! All rollout routes take `cluster`, `namespace`, and optionally `step`
//! and `wait` as query parameters.
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | PATCH | `/api/v1/controller/:kind/rolling/:name` | Start a staged image rollout |
//! | PATCH | `/api/v1/controller/:kind/step/resume/:name` | Release the next batch |
//! | PATCH | `/api/v1/controller/:kind/all/resume/:name` | Release every remaining batch |
//! | PATCH | `/api/v1/controller/:kind/pause/:name` | Pause the rollout |
//! | GET, PATCH | `/api/v1/controller/:kind/watch/:name` | Counts and pod IPs |
//! | GET | `/api/v1/controller/:kind/:name` | Raw workload view |
//! | GET, POST | `/api/v1/clusters` | List / register clusters |
//! | GET, DELETE | `/api/v1/clusters/:id` | Get / remove a cluster |
//! | GET | `/api/v1/audit` | Audit trail, newest first |
//! | GET | `/healthz` | Liveness |

pub mod handlers;
pub mod registry;
mod response;
pub mod rollout_handlers;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, patch};
use rollgate_rollout::{AuditSink, RolloutLocks, RolloutSettings};
use rollgate_state::StateStore;

pub use registry::PlatformRegistry;
pub use rollout_handlers::ACTOR_HEADER;

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub store: StateStore,
    pub audit: Arc<dyn AuditSink>,
    pub platforms: PlatformRegistry,
    pub locks: RolloutLocks,
    pub settings: RolloutSettings,
}

impl ApiState {
    /// State whose audit trail goes to `store`.
    pub fn new(
        store: StateStore,
        platforms: PlatformRegistry,
        locks: RolloutLocks,
        settings: RolloutSettings,
    ) -> Self {
        Self {
            audit: Arc::new(store.clone()),
            store,
            platforms,
            locks,
            settings,
        }
    }
}

/// Build the complete API router.
pub fn build_router(state: ApiState) -> Router {
    let controller_routes = Router::new()
        .route("/{kind}/rolling/{name}", patch(rollout_handlers::patch_image))
        .route("/{kind}/step/resume/{name}", patch(rollout_handlers::patch_step_resume))
        .route("/{kind}/all/resume/{name}", patch(rollout_handlers::patch_all_resume))
        .route("/{kind}/pause/{name}", patch(rollout_handlers::patch_pause))
        .route(
            "/{kind}/watch/{name}",
            get(rollout_handlers::watch_pod_ip).patch(rollout_handlers::watch_pod_ip),
        )
        .route("/{kind}/{name}", get(rollout_handlers::get_workload));

    let api_routes = Router::new()
        .nest("/controller", controller_routes)
        .route("/clusters", get(handlers::list_clusters).post(handlers::register_cluster))
        .route("/clusters/{id}", get(handlers::get_cluster).delete(handlers::delete_cluster))
        .route("/audit", get(handlers::list_audit));

    Router::new()
        .nest("/api/v1", api_routes)
        .route("/healthz", get(handlers::healthz))
        .with_state(state)
}

#[cfg(test)]
pub(crate) fn test_state() -> ApiState {
    let store = StateStore::open_in_memory().unwrap();
    ApiState::new(
        store,
        PlatformRegistry::fixed(Arc::new(rollgate_platform::MemoryPlatform::new())),
        RolloutLocks::new(),
        RolloutSettings::default(),
    )
}

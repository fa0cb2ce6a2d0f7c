// Module: http
// HTTP/JSON REST API and WebSocket push channel

pub mod admin;
pub mod error;
pub mod health;
pub mod middleware;
pub mod stream;
pub mod sync;
pub mod video;
pub mod websocket;

use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use playsync_cluster::DeviceMessageHub;
use playsync_core::{
    service::{MediaCatalog, StreamTokenService, SyncEngine},
    Config,
};

pub use error::{AppError, AppResult};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub tokens: Arc<StreamTokenService>,
    pub catalog: Arc<dyn MediaCatalog>,
    pub engine: SyncEngine,
    pub message_hub: DeviceMessageHub,
    pub config: Arc<Config>,
}

/// Create the HTTP router with all routes
pub fn create_router(state: AppState) -> Router {
    let device_routes = Router::new()
        .route(
            "/api/sessions/{session_id}/devices/{device_id}",
            post(sync::join).get(sync::get_replica).delete(sync::leave),
        )
        .route(
            "/api/sessions/{session_id}/devices/{device_id}/position",
            post(sync::update_position),
        )
        .route(
            "/api/sessions/{session_id}/devices/{device_id}/play-state",
            post(sync::update_play_state),
        )
        .route(
            "/api/sessions/{session_id}/devices/{device_id}/quality",
            post(sync::update_quality),
        )
        .route(
            "/api/sessions/{session_id}/devices/{device_id}/ui",
            post(sync::update_ui),
        )
        .route(
            "/api/sessions/{session_id}/devices/{device_id}/suspend",
            post(sync::suspend),
        )
        .route(
            "/api/sessions/{session_id}/devices/{device_id}/resume",
            post(sync::resume),
        )
        .route(
            "/api/sessions/{session_id}/devices/{device_id}/conflict/resolve",
            post(sync::resolve_conflict),
        );

    let session_routes = Router::new()
        .route("/api/sessions/{session_id}/replicas", get(sync::list_replicas))
        .route("/api/sessions/{session_id}/sync", post(sync::force_sync))
        .route(
            "/api/sessions/{session_id}/conflicts/detect",
            post(sync::detect_conflicts),
        )
        .route(
            "/api/sessions/{session_id}/conflicts/resolve",
            post(sync::resolve_session_conflicts),
        );

    Router::new()
        // Health check and metrics endpoints (for monitoring probes)
        .merge(health::create_health_router())
        // Stream tokens and the delivery gate
        .route("/api/videos/{id}/token", get(video::issue_token))
        .route("/api/videos/{id}/validate-token", post(video::validate_token))
        .route("/api/videos/{id}/stream/secure", get(stream::stream_secure))
        // Cross-device sync
        .merge(device_routes)
        .merge(session_routes)
        // Admin routes
        .route("/api/admin/sync/reconcile", post(admin::reconcile))
        .route("/api/admin/sync/health", get(admin::health))
        .route("/api/admin/sync/cleanup", post(admin::cleanup))
        // WebSocket endpoint
        .route(
            "/ws/sessions/{session_id}/devices/{device_id}",
            get(websocket::websocket_handler),
        )
        .route_layer(axum::middleware::from_fn(
            crate::observability::metrics_layer,
        ))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

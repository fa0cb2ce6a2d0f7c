// Operator endpoints for the sync scheduler

use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};
use tracing::info;

use playsync_core::service::{HealthSummary, ReconcileReport};

use super::{AppResult, AppState};

#[derive(Debug, Default, Deserialize)]
pub struct CleanupRequest {
    /// Overrides `sync.retention_days`
    pub retention_days: Option<i64>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CleanupResponse {
    pub removed: u64,
    pub retention_days: i64,
}

/// Run one reconciliation scan now
///
/// POST /api/admin/sync/reconcile
pub async fn reconcile(State(state): State<AppState>) -> AppResult<Json<ReconcileReport>> {
    let report = state.engine.reconcile_due().await?;
    info!(
        scanned = report.scanned,
        completed = report.completed,
        failed = report.failed,
        "Manual reconciliation finished"
    );
    Ok(Json(report))
}

/// GET /api/admin/sync/health
pub async fn health(State(state): State<AppState>) -> AppResult<Json<HealthSummary>> {
    Ok(Json(state.engine.health_summary().await?))
}

/// POST /api/admin/sync/cleanup
pub async fn cleanup(
    State(state): State<AppState>,
    req: Option<Json<CleanupRequest>>,
) -> AppResult<Json<CleanupResponse>> {
    let retention_days = req
        .and_then(|Json(r)| r.retention_days)
        .unwrap_or(state.config.sync.retention_days)
        .max(0);
    let removed = state.engine.cleanup_inactive(retention_days).await?;
    Ok(Json(CleanupResponse {
        removed,
        retention_days,
    }))
}

// Cross-device sync HTTP handlers

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::info;

use playsync_core::{
    models::{DeviceId, Platform, SessionId, SynchronizationState, UiSettings, VideoQuality},
    service::{ForceSyncReport, ResolutionStrategy, SyncUpdate},
};

use super::{AppError, AppResult, AppState};

#[derive(Debug, Deserialize)]
pub struct JoinRequest {
    pub platform: String,
}

#[derive(Debug, Deserialize)]
pub struct PositionRequest {
    pub position: f64,
}

#[derive(Debug, Deserialize)]
pub struct PlayStateRequest {
    pub is_playing: bool,
}

#[derive(Debug, Deserialize)]
pub struct QualityRequest {
    pub quality: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct ResolveRequest {
    pub strategy: Option<String>,
}

/// Accepted update; the origin replica is already persisted
#[derive(Debug, Serialize, Deserialize)]
pub struct UpdateAccepted {
    pub session_id: SessionId,
    pub device_id: DeviceId,
    pub kind: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ConflictsResponse {
    pub session_id: SessionId,
    pub count: usize,
    pub replicas: Vec<SynchronizationState>,
}

type ReplicaPath = Path<(String, String)>;

fn ids((session_id, device_id): (String, String)) -> (SessionId, DeviceId) {
    (SessionId::from(session_id), DeviceId::from(device_id))
}

fn parse_strategy(req: Option<Json<ResolveRequest>>) -> AppResult<ResolutionStrategy> {
    match req.and_then(|Json(r)| r.strategy) {
        Some(s) => Ok(s.parse::<ResolutionStrategy>()?),
        None => Ok(ResolutionStrategy::default()),
    }
}

/// Join a device to a session
///
/// POST /api/sessions/{sid}/devices/{did}
pub async fn join(
    State(state): State<AppState>,
    Path(path): ReplicaPath,
    Json(req): Json<JoinRequest>,
) -> AppResult<(StatusCode, Json<SynchronizationState>)> {
    let (session_id, device_id) = ids(path);
    let platform = req.platform.parse::<Platform>()?;
    let replica = state
        .engine
        .initialize(&session_id, &device_id, platform)
        .await?;
    Ok((StatusCode::CREATED, Json(replica)))
}

/// GET /api/sessions/{sid}/devices/{did}
pub async fn get_replica(
    State(state): State<AppState>,
    Path(path): ReplicaPath,
) -> AppResult<Json<SynchronizationState>> {
    let (session_id, device_id) = ids(path);
    Ok(Json(state.engine.get_replica(&session_id, &device_id).await?))
}

/// DELETE /api/sessions/{sid}/devices/{did}
pub async fn leave(
    State(state): State<AppState>,
    Path(path): ReplicaPath,
) -> AppResult<StatusCode> {
    let (session_id, device_id) = ids(path);
    state.engine.leave(&session_id, &device_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn accept(
    state: &AppState,
    path: (String, String),
    update: SyncUpdate,
) -> AppResult<(StatusCode, Json<UpdateAccepted>)> {
    let (session_id, device_id) = ids(path);
    let kind = update.kind().to_string();
    state
        .engine
        .dispatch_update(&session_id, &device_id, update)
        .await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(UpdateAccepted {
            session_id,
            device_id,
            kind,
        }),
    ))
}

/// POST /api/sessions/{sid}/devices/{did}/position
pub async fn update_position(
    State(state): State<AppState>,
    Path(path): ReplicaPath,
    Json(req): Json<PositionRequest>,
) -> AppResult<(StatusCode, Json<UpdateAccepted>)> {
    if !req.position.is_finite() || req.position < 0.0 {
        return Err(AppError::bad_request("Position must be a non-negative number"));
    }
    accept(&state, path, SyncUpdate::Position(req.position)).await
}

/// POST /api/sessions/{sid}/devices/{did}/play-state
pub async fn update_play_state(
    State(state): State<AppState>,
    Path(path): ReplicaPath,
    Json(req): Json<PlayStateRequest>,
) -> AppResult<(StatusCode, Json<UpdateAccepted>)> {
    accept(&state, path, SyncUpdate::PlayState(req.is_playing)).await
}

/// POST /api/sessions/{sid}/devices/{did}/quality
pub async fn update_quality(
    State(state): State<AppState>,
    Path(path): ReplicaPath,
    Json(req): Json<QualityRequest>,
) -> AppResult<(StatusCode, Json<UpdateAccepted>)> {
    let quality = req.quality.parse::<VideoQuality>()?;
    accept(&state, path, SyncUpdate::Quality(quality)).await
}

/// POST /api/sessions/{sid}/devices/{did}/ui
pub async fn update_ui(
    State(state): State<AppState>,
    Path(path): ReplicaPath,
    Json(settings): Json<UiSettings>,
) -> AppResult<(StatusCode, Json<UpdateAccepted>)> {
    if settings.is_empty() {
        return Err(AppError::bad_request("No UI settings supplied"));
    }
    accept(&state, path, SyncUpdate::Ui(settings)).await
}

/// POST /api/sessions/{sid}/devices/{did}/suspend
pub async fn suspend(
    State(state): State<AppState>,
    Path(path): ReplicaPath,
) -> AppResult<Json<SynchronizationState>> {
    let (session_id, device_id) = ids(path);
    Ok(Json(state.engine.suspend(&session_id, &device_id).await?))
}

/// POST /api/sessions/{sid}/devices/{did}/resume
pub async fn resume(
    State(state): State<AppState>,
    Path(path): ReplicaPath,
) -> AppResult<Json<SynchronizationState>> {
    let (session_id, device_id) = ids(path);
    Ok(Json(state.engine.resume(&session_id, &device_id).await?))
}

/// POST /api/sessions/{sid}/devices/{did}/conflict/resolve
pub async fn resolve_conflict(
    State(state): State<AppState>,
    Path(path): ReplicaPath,
    req: Option<Json<ResolveRequest>>,
) -> AppResult<Json<SynchronizationState>> {
    let (session_id, device_id) = ids(path);
    let strategy = parse_strategy(req)?;
    let resolved = state
        .engine
        .resolve_conflict(&session_id, &device_id, &strategy)
        .await?;
    info!(
        session_id = %session_id,
        device_id = %device_id,
        strategy = strategy.as_str(),
        "Conflict resolved via API"
    );
    Ok(Json(resolved))
}

/// GET /api/sessions/{sid}/replicas
pub async fn list_replicas(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> AppResult<Json<Vec<SynchronizationState>>> {
    let session_id = SessionId::from(session_id);
    Ok(Json(state.engine.list_session_replicas(&session_id).await?))
}

/// POST /api/sessions/{sid}/sync
pub async fn force_sync(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> AppResult<Json<ForceSyncReport>> {
    let session_id = SessionId::from(session_id);
    Ok(Json(state.engine.force_sync_all(&session_id).await?))
}

/// POST /api/sessions/{sid}/conflicts/detect
pub async fn detect_conflicts(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> AppResult<Json<ConflictsResponse>> {
    let session_id = SessionId::from(session_id);
    let replicas = state.engine.detect_conflicts(&session_id).await?;
    Ok(Json(ConflictsResponse {
        session_id,
        count: replicas.len(),
        replicas,
    }))
}

/// POST /api/sessions/{sid}/conflicts/resolve
pub async fn resolve_session_conflicts(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    req: Option<Json<ResolveRequest>>,
) -> AppResult<Json<ConflictsResponse>> {
    let session_id = SessionId::from(session_id);
    let strategy = parse_strategy(req)?;
    let replicas = state
        .engine
        .resolve_session_conflicts(&session_id, &strategy)
        .await?;
    Ok(Json(ConflictsResponse {
        session_id,
        count: replicas.len(),
        replicas,
    }))
}

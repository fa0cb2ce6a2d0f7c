// Stream token HTTP handlers

use axum::{
    extract::{Path, Query, State},
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use playsync_core::models::{StreamToken, VideoId, VideoQuality};

use super::{middleware::AuthUser, AppError, AppResult, AppState};

#[derive(Debug, Deserialize)]
pub struct TokenQuery {
    /// Defaults to `auto`
    pub quality: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenResponse {
    pub video_id: String,
    /// Compact form accepted by `validate-token`
    pub token: String,
    pub signed_url: String,
    pub expires_at: DateTime<Utc>,
    pub quality: VideoQuality,
}

#[derive(Debug, Deserialize)]
pub struct ValidateTokenRequest {
    pub token: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidateTokenResponse {
    pub valid: bool,
    pub expires_at: DateTime<Utc>,
}

/// Issue a stream token and signed URL for the caller
///
/// GET /api/videos/{id}/token?quality=<q>
pub async fn issue_token(
    auth: AuthUser,
    State(state): State<AppState>,
    Path(video_id): Path<String>,
    Query(query): Query<TokenQuery>,
) -> AppResult<Json<TokenResponse>> {
    let quality = match query.quality.as_deref() {
        Some(q) => q.parse::<VideoQuality>()?,
        None => VideoQuality::Auto,
    };
    let video_id = VideoId::from(video_id);

    if !state.catalog.has_video(&video_id).await? {
        return Err(AppError::not_found("Video not found"));
    }

    let signed = state
        .tokens
        .issue_signed_url(&video_id, &auth.user_id, quality)?;
    let expires_at = signed
        .token
        .expires_at_datetime()
        .ok_or_else(|| AppError::internal_server_error("Token expiry out of range"))?;

    info!(
        video_id = %video_id,
        user_id = %auth.user_id,
        quality = %quality,
        "Stream token issued"
    );

    Ok(Json(TokenResponse {
        video_id: video_id.to_string(),
        token: signed.token.encode()?,
        signed_url: signed.url,
        expires_at,
        quality,
    }))
}

/// Check a token previously issued for this video
///
/// POST /api/videos/{id}/validate-token
pub async fn validate_token(
    State(state): State<AppState>,
    Path(video_id): Path<String>,
    Json(req): Json<ValidateTokenRequest>,
) -> AppResult<Json<ValidateTokenResponse>> {
    let token = StreamToken::decode(&req.token)?;
    if token.video_id.as_str() != video_id {
        return Err(playsync_core::Error::BadSignature.into());
    }
    state.tokens.validate(&token)?;

    let expires_at = token
        .expires_at_datetime()
        .ok_or_else(|| AppError::unauthorized("Unauthorized"))?;

    Ok(Json(ValidateTokenResponse {
        valid: true,
        expires_at,
    }))
}

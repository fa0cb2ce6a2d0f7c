// HTTP middleware

use axum::{extract::FromRequestParts, http::request::Parts};
use playsync_core::models::UserId;

use super::AppError;

/// Header carrying the caller identity established by the upstream gateway
pub const USER_ID_HEADER: &str = "x-user-id";

/// Caller identity. Authentication happens upstream; this only reads the result.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user_id: UserId,
}

impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let user_id = parts
            .headers
            .get(USER_ID_HEADER)
            .ok_or_else(|| AppError::unauthorized("Missing caller identity"))?
            .to_str()
            .map_err(|_| AppError::unauthorized("Invalid caller identity"))?
            .trim();

        if user_id.is_empty() {
            return Err(AppError::unauthorized("Missing caller identity"));
        }

        Ok(Self {
            user_id: UserId::from(user_id),
        })
    }
}

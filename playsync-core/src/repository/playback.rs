use async_trait::async_trait;
use dashmap::DashMap;
use sqlx::{postgres::PgRow, PgPool, Row};
use std::sync::Arc;

use crate::{
    models::{PlaybackSession, SessionId, VideoQuality},
    Error, Result,
};

/// Read-only view of the authoritative playback sessions.
///
/// The session service owns this data; the sync engine only fetches it when
/// reconciling or force-syncing.
#[async_trait]
pub trait PlaybackSessionSource: Send + Sync {
    /// Any failure (missing session, transport error) surfaces as `SessionFetchFailed`
    async fn get_playback_session(&self, session_id: &SessionId) -> Result<PlaybackSession>;
}

/// Reads `playback_sessions` from the shared database
#[derive(Clone)]
pub struct PgPlaybackSessionSource {
    pool: PgPool,
}

impl PgPlaybackSessionSource {
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_session(row: &PgRow) -> Result<PlaybackSession> {
        let quality: Option<String> = row.try_get("quality")?;
        let quality = quality
            .as_deref()
            .map(str::parse::<VideoQuality>)
            .transpose()?
            .unwrap_or_default();

        Ok(PlaybackSession {
            session_id: row.try_get("session_id")?,
            position: row.try_get("position")?,
            speed: row.try_get("speed")?,
            is_active: row.try_get("is_active")?,
            quality,
        })
    }
}

#[async_trait]
impl PlaybackSessionSource for PgPlaybackSessionSource {
    async fn get_playback_session(&self, session_id: &SessionId) -> Result<PlaybackSession> {
        let fetch_failed = |reason: String| Error::SessionFetchFailed {
            session_id: session_id.clone(),
            reason,
        };

        let row = sqlx::query(
            "SELECT session_id, position, speed, is_active, quality
             FROM playback_sessions
             WHERE session_id = $1",
        )
        .bind(session_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| fetch_failed(e.to_string()))?
        .ok_or_else(|| fetch_failed("session not found".to_string()))?;

        Self::row_to_session(&row).map_err(|e| fetch_failed(e.to_string()))
    }
}

/// In-process session table, used when no database is configured and in tests
#[derive(Clone, Default)]
pub struct MemoryPlaybackSessions {
    sessions: Arc<DashMap<SessionId, PlaybackSession>>,
}

impl MemoryPlaybackSessions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upsert(&self, session: PlaybackSession) {
        self.sessions.insert(session.session_id.clone(), session);
    }

    pub fn remove(&self, session_id: &SessionId) -> Option<PlaybackSession> {
        self.sessions.remove(session_id).map(|(_, s)| s)
    }
}

#[async_trait]
impl PlaybackSessionSource for MemoryPlaybackSessions {
    async fn get_playback_session(&self, session_id: &SessionId) -> Result<PlaybackSession> {
        self.sessions
            .get(session_id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| Error::SessionFetchFailed {
                session_id: session_id.clone(),
                reason: "session not found".to_string(),
            })
    }
}

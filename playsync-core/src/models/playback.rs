use serde::{Deserialize, Serialize};

use super::id::SessionId;
use super::platform::VideoQuality;

/// Authoritative playback state of a session.
///
/// Owned by the session service; this crate only reads it and treats it as
/// ground truth during reconciliation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaybackSession {
    pub session_id: SessionId,
    pub position: f64, // playback position in seconds
    pub speed: f64,    // 0.5, 1.0, 1.5, 2.0, etc.
    pub is_active: bool,
    pub quality: VideoQuality,
}

impl PlaybackSession {
    #[must_use]
    pub const fn new(session_id: SessionId) -> Self {
        Self {
            session_id,
            position: 0.0,
            speed: 1.0,
            is_active: false,
            quality: VideoQuality::Auto,
        }
    }

    #[must_use]
    pub const fn with_position(mut self, position: f64) -> Self {
        self.position = position;
        self
    }

    #[must_use]
    pub const fn with_speed(mut self, speed: f64) -> Self {
        self.speed = speed;
        self
    }

    #[must_use]
    pub const fn with_active(mut self, is_active: bool) -> Self {
        self.is_active = is_active;
        self
    }

    #[must_use]
    pub const fn with_quality(mut self, quality: VideoQuality) -> Self {
        self.quality = quality;
        self
    }
}

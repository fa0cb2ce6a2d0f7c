use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::id::{DeviceId, SessionId};
use super::platform::VideoQuality;
use super::sync_state::{ConflictKind, SyncData, UiSettings};

/// Messages fanned out to devices of a session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SyncMessage {
    /// A peer seeked
    PositionUpdate {
        session_id: SessionId,
        source_device_id: DeviceId,
        target_device_id: DeviceId,
        position: f64,
        timestamp: DateTime<Utc>,
    },

    /// A peer played or paused
    PlayStateUpdate {
        session_id: SessionId,
        source_device_id: DeviceId,
        target_device_id: DeviceId,
        is_playing: bool,
        timestamp: DateTime<Utc>,
    },

    /// A peer switched quality and the target can play it
    QualityUpdate {
        session_id: SessionId,
        source_device_id: DeviceId,
        target_device_id: DeviceId,
        quality: VideoQuality,
        timestamp: DateTime<Utc>,
    },

    /// A peer changed UI flags
    UiUpdate {
        session_id: SessionId,
        source_device_id: DeviceId,
        target_device_id: DeviceId,
        settings: UiSettings,
        timestamp: DateTime<Utc>,
    },

    /// A replica was reconciled against session truth
    SyncCompleted {
        session_id: SessionId,
        device_id: DeviceId,
        sync_data: SyncData,
        latency_ms: f64,
        timestamp: DateTime<Utc>,
    },

    ConflictDetected {
        session_id: SessionId,
        device_id: DeviceId,
        kind: ConflictKind,
        evidence: Map<String, Value>,
        timestamp: DateTime<Utc>,
    },

    ConflictResolved {
        session_id: SessionId,
        device_id: DeviceId,
        strategy: String,
        position: f64,
        timestamp: DateTime<Utc>,
    },
}

impl SyncMessage {
    /// Wire tag, for logging
    #[must_use]
    pub const fn event_type(&self) -> &'static str {
        match self {
            Self::PositionUpdate { .. } => "position_update",
            Self::PlayStateUpdate { .. } => "play_state_update",
            Self::QualityUpdate { .. } => "quality_update",
            Self::UiUpdate { .. } => "ui_update",
            Self::SyncCompleted { .. } => "sync_completed",
            Self::ConflictDetected { .. } => "conflict_detected",
            Self::ConflictResolved { .. } => "conflict_resolved",
        }
    }

    #[must_use]
    pub const fn session_id(&self) -> &SessionId {
        match self {
            Self::PositionUpdate { session_id, .. }
            | Self::PlayStateUpdate { session_id, .. }
            | Self::QualityUpdate { session_id, .. }
            | Self::UiUpdate { session_id, .. }
            | Self::SyncCompleted { session_id, .. }
            | Self::ConflictDetected { session_id, .. }
            | Self::ConflictResolved { session_id, .. } => session_id,
        }
    }
}

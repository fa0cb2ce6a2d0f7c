//! Per-(session, device) synchronization replica
//!
//! A `SynchronizationState` is a device's local copy of a session's playback
//! state plus the bookkeeping the sync engine needs to schedule, measure and
//! police it. Only the sync engine mutates replicas.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::str::FromStr;

use super::id::{DeviceId, SessionId};
use super::platform::{Platform, VideoQuality};
use super::playback::PlaybackSession;
use crate::{Error, Result};

/// Replicated playback payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncData {
    pub position: f64,
    pub speed: f64,
    pub is_playing: bool,
    pub quality: VideoQuality,
    pub fullscreen: bool,
    pub controls_visible: bool,
    pub subtitles_enabled: bool,
    pub subtitle_language: Option<String>,
    pub volume: f64,
    pub muted: bool,
}

impl Default for SyncData {
    fn default() -> Self {
        Self {
            position: 0.0,
            speed: 1.0,
            is_playing: false,
            quality: VideoQuality::Auto,
            fullscreen: false,
            controls_visible: true,
            subtitles_enabled: false,
            subtitle_language: None,
            volume: 1.0,
            muted: false,
        }
    }
}

impl SyncData {
    /// Seed a payload from authoritative session state; UI flags start at defaults
    #[must_use]
    pub fn from_session(session: &PlaybackSession) -> Self {
        Self {
            position: session.position,
            speed: session.speed,
            is_playing: session.is_active,
            quality: session.quality,
            ..Self::default()
        }
    }
}

/// Partial update of the UI flags of a replica
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UiSettings {
    pub fullscreen: Option<bool>,
    pub controls_visible: Option<bool>,
    pub subtitles_enabled: Option<bool>,
    pub subtitle_language: Option<String>,
    pub volume: Option<f64>,
    pub muted: Option<bool>,
}

impl UiSettings {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fullscreen.is_none()
            && self.controls_visible.is_none()
            && self.subtitles_enabled.is_none()
            && self.subtitle_language.is_none()
            && self.volume.is_none()
            && self.muted.is_none()
    }

    pub fn apply_to(&self, data: &mut SyncData) {
        if let Some(v) = self.fullscreen {
            data.fullscreen = v;
        }
        if let Some(v) = self.controls_visible {
            data.controls_visible = v;
        }
        if let Some(v) = self.subtitles_enabled {
            data.subtitles_enabled = v;
        }
        if let Some(ref lang) = self.subtitle_language {
            data.subtitle_language = Some(lang.clone());
        }
        if let Some(v) = self.volume {
            data.volume = v.clamp(0.0, 1.0);
        }
        if let Some(v) = self.muted {
            data.muted = v;
        }
    }
}

/// Replica lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
    Suspended,
}

impl SyncStatus {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Suspended => "suspended",
        }
    }

    /// `pending -> in_progress -> {completed | failed} -> pending`, with
    /// `suspended` reachable from `pending`/`completed` and left via `pending`.
    #[must_use]
    pub const fn can_transition_to(&self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::InProgress | Self::Suspended)
                | (Self::InProgress, Self::Completed | Self::Failed)
                | (Self::Completed, Self::Pending | Self::Suspended)
                | (Self::Failed | Self::Suspended, Self::Pending)
        )
    }

    /// Statuses the scheduler will pick up once the deadline elapses
    #[must_use]
    pub const fn is_schedulable(&self) -> bool {
        matches!(self, Self::Pending | Self::Completed | Self::Failed)
    }
}

impl std::fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SyncStatus {
    type Err = Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "in_progress" => Ok(Self::InProgress),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "suspended" => Ok(Self::Suspended),
            other => Err(Error::InvalidInput(format!("Unknown sync status: {other}"))),
        }
    }
}

/// Rolling reconciliation metrics
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SyncMetrics {
    /// Average latency over successful reconciliations
    pub average_latency_ms: f64,
    /// `successful_syncs / total_syncs`, 0.0 before the first attempt
    pub success_rate: f64,
    pub total_syncs: u64,
    pub successful_syncs: u64,
    pub failed_syncs: u64,
}

impl SyncMetrics {
    pub fn record_success(&mut self, latency_ms: f64) {
        self.total_syncs += 1;
        self.successful_syncs += 1;
        #[allow(clippy::cast_precision_loss)]
        let n = self.successful_syncs as f64;
        self.average_latency_ms += (latency_ms - self.average_latency_ms) / n;
        self.refresh_success_rate();
    }

    pub fn record_failure(&mut self) {
        self.total_syncs += 1;
        self.failed_syncs += 1;
        self.refresh_success_rate();
    }

    #[allow(clippy::cast_precision_loss)]
    fn refresh_success_rate(&mut self) {
        if self.total_syncs > 0 {
            self.success_rate = self.successful_syncs as f64 / self.total_syncs as f64;
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictKind {
    Position,
}

impl std::fmt::Display for ConflictKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Position => f.write_str("position"),
        }
    }
}

/// Conflict bookkeeping of a replica
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConflictInfo {
    pub has_conflicts: bool,
    pub kind: Option<ConflictKind>,
    pub evidence: Map<String, Value>,
    pub detected_at: Option<DateTime<Utc>>,
}

impl ConflictInfo {
    /// A flagged conflict must carry a kind and evidence
    #[must_use]
    pub fn is_consistent(&self) -> bool {
        !self.has_conflicts || (self.kind.is_some() && !self.evidence.is_empty())
    }

    #[must_use]
    pub fn evidence_f64(&self, key: &str) -> Option<f64> {
        self.evidence.get(key).and_then(Value::as_f64)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorSeverity {
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncErrorRecord {
    pub message: String,
    pub severity: ErrorSeverity,
    pub occurred_at: DateTime<Utc>,
}

/// One device's replica of a session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SynchronizationState {
    pub session_id: SessionId,
    pub device_id: DeviceId,
    pub platform: Platform,
    pub sync_data: SyncData,
    pub status: SyncStatus,
    pub sync_frequency_secs: i64,
    pub last_sync_time: DateTime<Utc>,
    pub next_sync_time: DateTime<Utc>,
    pub retry_count: u32,
    pub max_retries: u32,
    pub metrics: SyncMetrics,
    pub conflict: ConflictInfo,
    pub errors: Vec<SyncErrorRecord>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SynchronizationState {
    pub const DEFAULT_SYNC_FREQUENCY_SECS: i64 = 5;
    pub const DEFAULT_MAX_RETRIES: u32 = 3;
    /// Oldest error records are dropped beyond this many
    pub const MAX_ERROR_HISTORY: usize = 10;

    /// Create a pending replica seeded from the session, first sync scheduled
    #[must_use]
    pub fn new(
        session: &PlaybackSession,
        device_id: DeviceId,
        platform: Platform,
        now: DateTime<Utc>,
    ) -> Self {
        let mut state = Self {
            session_id: session.session_id.clone(),
            device_id,
            platform,
            sync_data: SyncData::from_session(session),
            status: SyncStatus::Pending,
            sync_frequency_secs: Self::DEFAULT_SYNC_FREQUENCY_SECS,
            last_sync_time: now,
            next_sync_time: now,
            retry_count: 0,
            max_retries: Self::DEFAULT_MAX_RETRIES,
            metrics: SyncMetrics::default(),
            conflict: ConflictInfo::default(),
            errors: Vec::new(),
            created_at: now,
            updated_at: now,
        };
        state.schedule_next(now);
        state
    }

    #[must_use]
    pub fn with_sync_frequency_secs(mut self, secs: i64) -> Self {
        self.sync_frequency_secs = secs;
        self.next_sync_time = self.last_sync_time + self.sync_frequency();
        self
    }

    #[must_use]
    pub const fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    #[must_use]
    pub fn sync_frequency(&self) -> Duration {
        Duration::seconds(self.sync_frequency_secs)
    }

    /// Stamp `last_sync_time` and derive the next deadline from it
    pub fn schedule_next(&mut self, now: DateTime<Utc>) {
        self.last_sync_time = now;
        self.next_sync_time = now + self.sync_frequency();
    }

    #[must_use]
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.status.is_schedulable() && self.next_sync_time <= now
    }

    /// How long the deadline has elapsed, if it has
    #[must_use]
    pub fn overdue_by(&self, now: DateTime<Utc>) -> Option<Duration> {
        (self.next_sync_time < now).then(|| now - self.next_sync_time)
    }

    pub fn transition(&mut self, next: SyncStatus) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(Error::InvalidStateTransition {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        Ok(())
    }

    /// Copy the authoritative fields of the session into the payload
    pub fn apply_session(&mut self, session: &PlaybackSession) {
        self.sync_data.position = session.position;
        self.sync_data.speed = session.speed;
        self.sync_data.is_playing = session.is_active;
        self.sync_data.quality = session.quality;
    }

    pub fn mark_conflict(
        &mut self,
        kind: ConflictKind,
        evidence: Map<String, Value>,
        now: DateTime<Utc>,
    ) {
        self.conflict = ConflictInfo {
            has_conflicts: true,
            kind: Some(kind),
            evidence,
            detected_at: Some(now),
        };
    }

    pub fn clear_conflict(&mut self) {
        self.conflict = ConflictInfo::default();
    }

    pub fn record_error(
        &mut self,
        message: impl Into<String>,
        severity: ErrorSeverity,
        now: DateTime<Utc>,
    ) {
        self.errors.push(SyncErrorRecord {
            message: message.into(),
            severity,
            occurred_at: now,
        });
        if self.errors.len() > Self::MAX_ERROR_HISTORY {
            let excess = self.errors.len() - Self::MAX_ERROR_HISTORY;
            self.errors.drain(..excess);
        }
    }

    #[must_use]
    pub const fn retries_exhausted(&self) -> bool {
        self.retry_count >= self.max_retries
    }

    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.updated_at = now;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> PlaybackSession {
        PlaybackSession::new(SessionId::from("s1"))
            .with_position(42.0)
            .with_speed(1.5)
            .with_active(true)
            .with_quality(VideoQuality::P720)
    }

    #[test]
    fn test_new_replica_is_seeded_and_scheduled() {
        let now = Utc::now();
        let state = SynchronizationState::new(&session(), DeviceId::from("tv"), Platform::Tv, now);

        assert_eq!(state.status, SyncStatus::Pending);
        assert_eq!(state.sync_data.position, 42.0);
        assert_eq!(state.sync_data.speed, 1.5);
        assert!(state.sync_data.is_playing);
        assert_eq!(state.sync_data.quality, VideoQuality::P720);
        assert_eq!(state.max_retries, 3);
        assert_eq!(state.next_sync_time, state.last_sync_time + Duration::seconds(5));
        assert!(!state.is_due(now));
        assert!(state.is_due(now + Duration::seconds(5)));
    }

    #[test]
    fn test_status_transitions() {
        use SyncStatus::{Completed, Failed, InProgress, Pending, Suspended};

        assert!(Pending.can_transition_to(InProgress));
        assert!(InProgress.can_transition_to(Completed));
        assert!(InProgress.can_transition_to(Failed));
        assert!(Completed.can_transition_to(Pending));
        assert!(Failed.can_transition_to(Pending));
        assert!(Pending.can_transition_to(Suspended));
        assert!(Completed.can_transition_to(Suspended));
        assert!(Suspended.can_transition_to(Pending));

        assert!(!Pending.can_transition_to(Completed));
        assert!(!Failed.can_transition_to(Suspended));
        assert!(!InProgress.can_transition_to(Suspended));
        assert!(!Suspended.can_transition_to(InProgress));
    }

    #[test]
    fn test_transition_rejects_illegal_moves() {
        let mut state =
            SynchronizationState::new(&session(), DeviceId::from("tv"), Platform::Tv, Utc::now());
        let err = state.transition(SyncStatus::Completed).unwrap_err();
        assert!(matches!(
            err,
            Error::InvalidStateTransition {
                from: SyncStatus::Pending,
                to: SyncStatus::Completed
            }
        ));
        assert_eq!(state.status, SyncStatus::Pending);
    }

    #[test]
    fn test_rolling_metrics() {
        let mut metrics = SyncMetrics::default();
        metrics.record_success(10.0);
        metrics.record_success(20.0);
        metrics.record_failure();
        metrics.record_success(30.0);

        assert_eq!(metrics.total_syncs, 4);
        assert_eq!(metrics.successful_syncs, 3);
        assert_eq!(metrics.failed_syncs, 1);
        assert!((metrics.average_latency_ms - 20.0).abs() < f64::EPSILON);
        assert!((metrics.success_rate - 0.75).abs() < f64::EPSILON);
    }

    #[test]
    fn test_error_history_is_bounded() {
        let now = Utc::now();
        let mut state = SynchronizationState::new(&session(), DeviceId::from("tv"), Platform::Tv, now);
        for i in 0..15 {
            state.record_error(format!("error {i}"), ErrorSeverity::High, now);
        }
        assert_eq!(state.errors.len(), SynchronizationState::MAX_ERROR_HISTORY);
        assert_eq!(state.errors[0].message, "error 5");
    }

    #[test]
    fn test_conflict_consistency() {
        let now = Utc::now();
        let mut state = SynchronizationState::new(&session(), DeviceId::from("tv"), Platform::Tv, now);
        assert!(state.conflict.is_consistent());

        let mut evidence = Map::new();
        evidence.insert("delta".to_string(), Value::from(10.0));
        state.mark_conflict(ConflictKind::Position, evidence, now);
        assert!(state.conflict.has_conflicts);
        assert!(state.conflict.is_consistent());
        assert_eq!(state.conflict.evidence_f64("delta"), Some(10.0));

        state.clear_conflict();
        assert!(!state.conflict.has_conflicts);
        assert!(state.conflict.kind.is_none());
    }

    #[test]
    fn test_ui_settings_apply() {
        let mut data = SyncData::default();
        let ui = UiSettings {
            fullscreen: Some(true),
            volume: Some(1.7),
            subtitle_language: Some("en".to_string()),
            ..UiSettings::default()
        };
        ui.apply_to(&mut data);
        assert!(data.fullscreen);
        assert_eq!(data.volume, 1.0);
        assert_eq!(data.subtitle_language.as_deref(), Some("en"));
        assert!(data.controls_visible);
        assert!(UiSettings::default().is_empty());
    }
}

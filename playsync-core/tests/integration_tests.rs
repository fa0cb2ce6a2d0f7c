//! Integration tests for the playsync-core sync engine
//!
//! Exercise the engine end to end over the in-memory stores.
//!
//! Run with: cargo test --test integration_tests

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use playsync_core::{
    models::{
        DeviceId, PlaybackSession, Platform, SessionId, SyncMessage, SyncStatus,
        SynchronizationState,
    },
    repository::{MemoryPlaybackSessions, MemorySyncStateRepository, SyncStateRepository},
    service::{
        ResolutionStrategy, StaticCapabilityProfile, SyncEngine, SyncEngineConfig, SyncMessenger,
    },
    Error, Result,
};

#[derive(Default)]
struct CapturingMessenger {
    broadcasts: Mutex<Vec<SyncMessage>>,
    direct: Mutex<Vec<(DeviceId, SyncMessage)>>,
}

impl SyncMessenger for CapturingMessenger {
    fn broadcast(&self, _session_id: &SessionId, message: &SyncMessage) {
        self.broadcasts.lock().push(message.clone());
    }

    fn send_to_device(
        &self,
        _session_id: &SessionId,
        device_id: &DeviceId,
        message: &SyncMessage,
    ) -> Result<()> {
        self.direct.lock().push((device_id.clone(), message.clone()));
        Ok(())
    }
}

/// Memory store whose `update` can be scripted to fail per device.
///
/// Each device holds a queue of outcomes consumed one per update call;
/// `true` fails that call. An empty queue means success.
#[derive(Default)]
struct FaultyRepo {
    inner: MemorySyncStateRepository,
    script: Mutex<HashMap<DeviceId, VecDeque<bool>>>,
}

impl FaultyRepo {
    fn script_updates(&self, device: &str, outcomes: &[bool]) {
        self.script
            .lock()
            .insert(DeviceId::from(device), outcomes.iter().copied().collect());
    }
}

#[async_trait]
impl SyncStateRepository for FaultyRepo {
    async fn create(&self, state: &SynchronizationState) -> Result<()> {
        self.inner.create(state).await
    }

    async fn get(
        &self,
        session_id: &SessionId,
        device_id: &DeviceId,
    ) -> Result<Option<SynchronizationState>> {
        self.inner.get(session_id, device_id).await
    }

    async fn update(&self, state: &SynchronizationState) -> Result<()> {
        let fail = self
            .script
            .lock()
            .get_mut(&state.device_id)
            .and_then(VecDeque::pop_front)
            .unwrap_or(false);
        if fail {
            return Err(Error::Database(sqlx::Error::PoolTimedOut));
        }
        self.inner.update(state).await
    }

    async fn delete(&self, session_id: &SessionId, device_id: &DeviceId) -> Result<bool> {
        self.inner.delete(session_id, device_id).await
    }

    async fn list_by_session(&self, session_id: &SessionId) -> Result<Vec<SynchronizationState>> {
        self.inner.list_by_session(session_id).await
    }

    async fn list_by_device(&self, device_id: &DeviceId) -> Result<Vec<SynchronizationState>> {
        self.inner.list_by_device(device_id).await
    }

    async fn list_due(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<SynchronizationState>> {
        self.inner.list_due(now, limit).await
    }

    async fn delete_inactive_before(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        self.inner.delete_inactive_before(cutoff).await
    }
}

struct TestEnv {
    engine: SyncEngine,
    repo: MemorySyncStateRepository,
    faults: Arc<FaultyRepo>,
    sessions: MemoryPlaybackSessions,
    messenger: Arc<CapturingMessenger>,
    session_id: SessionId,
}

impl TestEnv {
    fn new() -> Self {
        let repo = MemorySyncStateRepository::new();
        let faults = Arc::new(FaultyRepo {
            inner: repo.clone(),
            ..FaultyRepo::default()
        });
        let sessions = MemoryPlaybackSessions::new();
        let messenger = Arc::new(CapturingMessenger::default());
        let session_id = SessionId::from("watch-party");
        sessions.upsert(PlaybackSession::new(session_id.clone()));

        let engine = SyncEngine::new(
            faults.clone(),
            Arc::new(sessions.clone()),
            Arc::new(StaticCapabilityProfile::default()),
            messenger.clone(),
            SyncEngineConfig {
                session_fetch_retries: 0,
                delivery_retry_delay: Duration::from_millis(1),
                ..SyncEngineConfig::default()
            },
        );

        Self {
            engine,
            repo,
            faults,
            sessions,
            messenger,
            session_id,
        }
    }

    async fn join(&self, device: &str, platform: Platform) {
        self.engine
            .initialize(&self.session_id, &DeviceId::from(device), platform)
            .await
            .unwrap();
    }

    async fn set_position(&self, device: &str, position: f64) {
        let mut state = self
            .engine
            .get_replica(&self.session_id, &DeviceId::from(device))
            .await
            .unwrap();
        state.sync_data.position = position;
        self.repo.update(&state).await.unwrap();
    }

    async fn replica(&self, device: &str) -> playsync_core::models::SynchronizationState {
        self.engine
            .get_replica(&self.session_id, &DeviceId::from(device))
            .await
            .unwrap()
    }
}

#[tokio::test]
async fn test_position_conflict_evidence() {
    let env = TestEnv::new();
    env.join("a-phone", Platform::Mobile).await;
    env.join("b-tv", Platform::Tv).await;
    env.join("c-web", Platform::Web).await;
    env.set_position("a-phone", 10.0).await;
    env.set_position("b-tv", 20.0).await;
    env.set_position("c-web", 10.0).await;

    let flagged = env.engine.detect_conflicts(&env.session_id).await.unwrap();
    assert_eq!(flagged.len(), 1);
    assert_eq!(flagged[0].device_id.as_str(), "b-tv");

    let tv = env.replica("b-tv").await;
    assert!(tv.conflict.has_conflicts);
    assert!(tv.conflict.is_consistent());
    assert_eq!(tv.conflict.evidence_f64("base_position"), Some(10.0));
    assert_eq!(tv.conflict.evidence_f64("current_position"), Some(20.0));
    assert_eq!(tv.conflict.evidence_f64("delta"), Some(10.0));
    assert_eq!(
        tv.conflict.evidence.get("base_device_id").and_then(|v| v.as_str()),
        Some("a-phone")
    );

    assert!(!env.replica("a-phone").await.conflict.has_conflicts);
    assert!(!env.replica("c-web").await.conflict.has_conflicts);

    let detected = env
        .messenger
        .broadcasts
        .lock()
        .iter()
        .filter(|m| m.event_type() == "conflict_detected")
        .count();
    assert_eq!(detected, 1);
}

#[tokio::test]
async fn test_small_drift_is_not_a_conflict() {
    let env = TestEnv::new();
    env.join("a-phone", Platform::Mobile).await;
    env.join("b-tv", Platform::Tv).await;
    env.set_position("a-phone", 10.0).await;
    env.set_position("b-tv", 12.0).await;

    let flagged = env.engine.detect_conflicts(&env.session_id).await.unwrap();
    assert!(flagged.is_empty());
    assert!(!env.replica("b-tv").await.conflict.has_conflicts);
}

#[tokio::test]
async fn test_latest_wins_resolution() {
    let env = TestEnv::new();
    env.join("a-phone", Platform::Mobile).await;
    env.join("b-tv", Platform::Tv).await;
    env.set_position("a-phone", 10.0).await;
    env.set_position("b-tv", 20.0).await;
    env.engine.detect_conflicts(&env.session_id).await.unwrap();

    // The reference replica moved last, so its position wins
    let mut phone = env.replica("a-phone").await;
    phone.updated_at = Utc::now() + ChronoDuration::seconds(5);
    env.repo.update(&phone).await.unwrap();

    let resolved = env
        .engine
        .resolve_conflict(
            &env.session_id,
            &DeviceId::from("b-tv"),
            &ResolutionStrategy::LatestWins,
        )
        .await
        .unwrap();
    assert_eq!(resolved.sync_data.position, 10.0);
    assert!(!resolved.conflict.has_conflicts);
    assert!(resolved.conflict.evidence.is_empty());

    let stored = env.replica("b-tv").await;
    assert_eq!(stored.sync_data.position, 10.0);
    assert!(!stored.conflict.has_conflicts);

    assert!(env
        .messenger
        .broadcasts
        .lock()
        .iter()
        .any(|m| m.event_type() == "conflict_resolved"));
    assert!(env
        .messenger
        .direct
        .lock()
        .iter()
        .any(|(device, m)| device.as_str() == "b-tv" && m.event_type() == "conflict_resolved"));

    let again = env
        .engine
        .resolve_conflict(
            &env.session_id,
            &DeviceId::from("b-tv"),
            &ResolutionStrategy::LatestWins,
        )
        .await;
    assert!(matches!(again, Err(Error::NoActiveConflict { .. })));
}

#[tokio::test]
async fn test_bulk_resolution_with_session_truth() {
    let env = TestEnv::new();
    env.join("a-phone", Platform::Mobile).await;
    env.join("b-tv", Platform::Tv).await;
    env.join("c-web", Platform::Web).await;
    env.set_position("a-phone", 10.0).await;
    env.set_position("b-tv", 30.0).await;
    env.set_position("c-web", 40.0).await;
    env.engine.detect_conflicts(&env.session_id).await.unwrap();
    env.sessions
        .upsert(PlaybackSession::new(env.session_id.clone()).with_position(12.0));

    let resolved = env
        .engine
        .resolve_session_conflicts(&env.session_id, &ResolutionStrategy::SessionWins)
        .await
        .unwrap();
    assert_eq!(resolved.len(), 2);
    for device in ["b-tv", "c-web"] {
        let state = env.replica(device).await;
        assert_eq!(state.sync_data.position, 12.0);
        assert!(!state.conflict.has_conflicts);
    }
}

#[tokio::test]
async fn test_scan_only_touches_due_replicas() {
    let env = TestEnv::new();
    env.join("a-phone", Platform::Mobile).await;
    env.join("b-tv", Platform::Tv).await;

    let now = Utc::now();
    let mut due = env.replica("a-phone").await;
    due.next_sync_time = now - ChronoDuration::seconds(1);
    env.repo.update(&due).await.unwrap();
    let mut not_due = env.replica("b-tv").await;
    not_due.next_sync_time = now + ChronoDuration::seconds(60);
    env.repo.update(&not_due).await.unwrap();
    let untouched_before = env.replica("b-tv").await;

    env.sessions.upsert(
        PlaybackSession::new(env.session_id.clone())
            .with_position(99.0)
            .with_active(true),
    );

    let report = env.engine.reconcile_due_at(now).await.unwrap();
    assert_eq!(report.scanned, 1);
    assert_eq!(report.completed, 1);
    assert_eq!(report.failed, 0);

    let phone = env.replica("a-phone").await;
    assert_eq!(phone.status, SyncStatus::Completed);
    assert_eq!(phone.sync_data.position, 99.0);
    assert!(phone.sync_data.is_playing);
    assert_eq!(phone.metrics.total_syncs, 1);
    assert_eq!(phone.metrics.successful_syncs, 1);
    assert_eq!(phone.last_sync_time, now);
    assert_eq!(
        phone.next_sync_time,
        phone.last_sync_time + ChronoDuration::seconds(phone.sync_frequency_secs)
    );

    assert_eq!(env.replica("b-tv").await, untouched_before);
}

#[tokio::test]
async fn test_propagation_never_touches_origin() {
    let env = TestEnv::new();
    env.join("a-phone", Platform::Mobile).await;
    env.join("b-tv", Platform::Tv).await;
    env.join("c-web", Platform::Web).await;
    let origin_before = env.replica("a-phone").await;

    let report = env
        .engine
        .propagate_position(&env.session_id, &DeviceId::from("a-phone"), 300.0)
        .await
        .unwrap();
    assert_eq!(report.updated.len(), 2);
    assert!(report.failed.is_empty());

    assert_eq!(env.replica("a-phone").await, origin_before);
    assert_eq!(env.replica("b-tv").await.sync_data.position, 300.0);
    assert_eq!(env.replica("c-web").await.sync_data.position, 300.0);

    let direct = env.messenger.direct.lock();
    assert_eq!(direct.len(), 2);
    assert!(direct.iter().all(|(device, m)| {
        device.as_str() != "a-phone" && m.event_type() == "position_update"
    }));
}

#[tokio::test]
async fn test_propagation_continues_past_failed_peer() {
    let env = TestEnv::new();
    env.join("a-phone", Platform::Mobile).await;
    env.join("b-tv", Platform::Tv).await;
    env.join("c-web", Platform::Web).await;
    let tv_before = env.replica("b-tv").await;
    env.faults.script_updates("b-tv", &[true]);

    let report = env
        .engine
        .propagate_position(&env.session_id, &DeviceId::from("a-phone"), 300.0)
        .await
        .unwrap();
    assert_eq!(report.failed, vec![DeviceId::from("b-tv")]);
    assert_eq!(report.updated, vec![DeviceId::from("c-web")]);

    assert_eq!(env.replica("b-tv").await, tv_before);
    assert_eq!(env.replica("c-web").await.sync_data.position, 300.0);

    let direct = env.messenger.direct.lock();
    assert_eq!(direct.len(), 1);
    assert_eq!(direct[0].0.as_str(), "c-web");
}

#[tokio::test]
async fn test_reconcile_persist_failure_marks_replica_failed() {
    let env = TestEnv::new();
    env.join("b-tv", Platform::Tv).await;
    env.sessions
        .upsert(PlaybackSession::new(env.session_id.clone()).with_position(42.0));
    // in_progress is stored, the completion write fails, the failure is stored
    env.faults.script_updates("b-tv", &[false, true, false]);

    let later = Utc::now() + ChronoDuration::seconds(6);
    let report = env.engine.reconcile_due_at(later).await.unwrap();
    assert_eq!(report.scanned, 1);
    assert_eq!(report.completed, 0);
    assert_eq!(report.failed, 1);

    let tv = env.replica("b-tv").await;
    assert_eq!(tv.status, SyncStatus::Failed);
    assert_eq!(tv.retry_count, 1);
    assert_eq!(tv.errors.len(), 1);
    assert_eq!(tv.metrics.total_syncs, 1);
    assert_eq!(tv.metrics.successful_syncs, 0);
    assert_eq!(tv.metrics.failed_syncs, 1);
    assert_ne!(tv.sync_data.position, 42.0);

    // The next cycle recovers normally
    let report = env
        .engine
        .reconcile_due_at(later + ChronoDuration::seconds(6))
        .await
        .unwrap();
    assert_eq!(report.completed, 1);
    let tv = env.replica("b-tv").await;
    assert_eq!(tv.status, SyncStatus::Completed);
    assert_eq!(tv.sync_data.position, 42.0);
    assert_eq!(tv.metrics.total_syncs, 2);
    assert_eq!(tv.metrics.successful_syncs, 1);
}

#[tokio::test]
async fn test_latest_wins_moves_stale_reference() {
    let env = TestEnv::new();
    env.join("a-phone", Platform::Mobile).await;
    env.join("b-tv", Platform::Tv).await;
    env.set_position("a-phone", 10.0).await;
    env.set_position("b-tv", 20.0).await;
    env.engine.detect_conflicts(&env.session_id).await.unwrap();

    // The flagged replica moved last, so it keeps its position
    let mut tv = env.replica("b-tv").await;
    tv.updated_at = Utc::now() + ChronoDuration::seconds(5);
    env.repo.update(&tv).await.unwrap();

    let resolved = env
        .engine
        .resolve_conflict(
            &env.session_id,
            &DeviceId::from("b-tv"),
            &ResolutionStrategy::LatestWins,
        )
        .await
        .unwrap();
    assert_eq!(resolved.sync_data.position, 20.0);
    assert_eq!(env.replica("a-phone").await.sync_data.position, 20.0);
    assert!(env
        .messenger
        .direct
        .lock()
        .iter()
        .any(|(device, m)| device.as_str() == "a-phone" && m.event_type() == "position_update"));

    let flagged = env.engine.detect_conflicts(&env.session_id).await.unwrap();
    assert!(flagged.is_empty());
}

#[tokio::test]
async fn test_health_summary_reports_failures() {
    let env = TestEnv::new();
    for i in 0..7 {
        env.join(&format!("device-{i}"), Platform::Web).await;
    }
    env.sessions.remove(&env.session_id);

    let later = Utc::now() + ChronoDuration::seconds(6);
    let report = env.engine.reconcile_due_at(later).await.unwrap();
    assert_eq!(report.failed, 7);

    let summary = env
        .engine
        .health_summary_at(later + ChronoDuration::seconds(60))
        .await
        .unwrap();
    assert_eq!(summary.failed, 7);
    assert_eq!(summary.total_due, 7);
    assert_eq!(
        summary.status,
        playsync_core::service::HealthStatus::Degraded
    );
    assert_eq!(summary.warnings.len(), 7);
}

#[tokio::test]
async fn test_retention_sweep() {
    let env = TestEnv::new();
    env.join("a-phone", Platform::Mobile).await;
    env.join("b-tv", Platform::Tv).await;

    let mut stale = env.replica("a-phone").await;
    stale.updated_at = Utc::now() - ChronoDuration::days(45);
    env.repo.update(&stale).await.unwrap();

    let removed = env.engine.cleanup_inactive(30).await.unwrap();
    assert_eq!(removed, 1);
    assert_eq!(env.engine.list_session_replicas(&env.session_id).await.unwrap().len(), 1);
}

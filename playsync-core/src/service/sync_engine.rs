//! Cross-device synchronization engine
//!
//! Owns every write to the replica store: device joins, update fan-out,
//! conflict detection/resolution and the periodic reconciliation against the
//! authoritative playback session.

use backon::Retryable;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use dashmap::{mapref::entry::Entry, DashMap};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    config::SyncConfig,
    metrics,
    models::{
        ConflictKind, DeviceId, ErrorSeverity, PlaybackSession, Platform, SessionId, SyncMessage,
        SyncStatus, SynchronizationState, UiSettings, VideoQuality,
    },
    repository::{PlaybackSessionSource, SyncStateRepository},
    resilience,
    service::{
        capability::CapabilityLookup,
        conflict::{evidence, ConflictContext, ConflictResolver},
        messaging::{deliver_with_retry, SyncMessenger},
    },
    Error, Result,
};

/// Engine tuning, usually derived from [`SyncConfig`]
#[derive(Debug, Clone)]
pub struct SyncEngineConfig {
    pub default_frequency_secs: i64,
    pub max_retries: u32,
    pub conflict_threshold_secs: f64,
    pub worker_pool_size: usize,
    pub scan_batch_limit: usize,
    pub overdue_warning_secs: i64,
    pub delivery_retry_attempts: usize,
    pub delivery_retry_delay: Duration,
    pub session_fetch_retries: usize,
    pub detect_conflicts_on_reconcile: bool,
    pub dispatch_idle_timeout: Duration,
}

impl Default for SyncEngineConfig {
    fn default() -> Self {
        Self::from(&SyncConfig::default())
    }
}

impl From<&SyncConfig> for SyncEngineConfig {
    fn from(config: &SyncConfig) -> Self {
        Self {
            default_frequency_secs: config.default_frequency_secs,
            max_retries: config.max_retries,
            conflict_threshold_secs: config.conflict_threshold_secs,
            worker_pool_size: config.worker_pool_size.max(1),
            scan_batch_limit: config.scan_batch_limit.max(1),
            overdue_warning_secs: config.overdue_warning_secs,
            delivery_retry_attempts: config.delivery_retry_attempts,
            delivery_retry_delay: Duration::from_millis(config.delivery_retry_delay_ms),
            session_fetch_retries: config.session_fetch_retries,
            detect_conflicts_on_reconcile: config.detect_conflicts_on_reconcile,
            dispatch_idle_timeout: Duration::from_millis(config.dispatch_idle_timeout_ms),
        }
    }
}

/// A single-field change originating from one device
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum SyncUpdate {
    Position(f64),
    PlayState(bool),
    Quality(VideoQuality),
    Ui(UiSettings),
}

impl SyncUpdate {
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Position(_) => "position",
            Self::PlayState(_) => "play_state",
            Self::Quality(_) => "quality",
            Self::Ui(_) => "ui",
        }
    }

    fn apply_to(&self, state: &mut SynchronizationState) {
        match self {
            Self::Position(position) => state.sync_data.position = *position,
            Self::PlayState(is_playing) => state.sync_data.is_playing = *is_playing,
            Self::Quality(quality) => state.sync_data.quality = *quality,
            Self::Ui(settings) => settings.apply_to(&mut state.sync_data),
        }
    }

    fn to_message(
        &self,
        session_id: &SessionId,
        source: &DeviceId,
        target: &DeviceId,
        timestamp: DateTime<Utc>,
    ) -> SyncMessage {
        let session_id = session_id.clone();
        let source_device_id = source.clone();
        let target_device_id = target.clone();
        match self {
            Self::Position(position) => SyncMessage::PositionUpdate {
                session_id,
                source_device_id,
                target_device_id,
                position: *position,
                timestamp,
            },
            Self::PlayState(is_playing) => SyncMessage::PlayStateUpdate {
                session_id,
                source_device_id,
                target_device_id,
                is_playing: *is_playing,
                timestamp,
            },
            Self::Quality(quality) => SyncMessage::QualityUpdate {
                session_id,
                source_device_id,
                target_device_id,
                quality: *quality,
                timestamp,
            },
            Self::Ui(settings) => SyncMessage::UiUpdate {
                session_id,
                source_device_id,
                target_device_id,
                settings: settings.clone(),
                timestamp,
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// The target platform cannot play the propagated quality
    CapabilityMismatch,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedReplica {
    pub device_id: DeviceId,
    pub reason: SkipReason,
}

/// Outcome of fanning one update out to the peers of its origin device
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropagationReport {
    pub updated: Vec<DeviceId>,
    pub skipped: Vec<SkippedReplica>,
    pub failed: Vec<DeviceId>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileReport {
    pub scanned: usize,
    pub completed: usize,
    pub failed: usize,
    pub conflicts_detected: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForceSyncReport {
    pub synced: usize,
    pub skipped: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthSummary {
    pub status: HealthStatus,
    pub total_due: usize,
    pub pending: usize,
    pub failed: usize,
    pub conflicted: usize,
    pub warnings: Vec<String>,
    pub checked_at: DateTime<Utc>,
}

impl HealthSummary {
    #[must_use]
    pub const fn classify(failed: usize, conflicted: usize) -> HealthStatus {
        if failed > 10 || conflicted > 5 {
            HealthStatus::Unhealthy
        } else if failed > 5 || conflicted > 2 {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        }
    }
}

enum ReconcileOutcome {
    Completed(SessionId),
    Failed,
}

type DispatchKey = (SessionId, DeviceId);

struct DispatchHandle {
    id: u64,
    tx: mpsc::UnboundedSender<SyncUpdate>,
    /// Cancelled once the worker has drained its queue and exited
    finished: CancellationToken,
}

/// Synchronization engine
///
/// Cheap to clone; clones share stores, messenger and dispatch queues.
#[derive(Clone)]
pub struct SyncEngine {
    repo: Arc<dyn SyncStateRepository>,
    sessions: Arc<dyn PlaybackSessionSource>,
    capabilities: Arc<dyn CapabilityLookup>,
    messenger: Arc<dyn SyncMessenger>,
    config: SyncEngineConfig,
    dispatch: Arc<DashMap<DispatchKey, DispatchHandle>>,
    next_dispatch_id: Arc<AtomicU64>,
}

impl std::fmt::Debug for SyncEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncEngine")
            .field("config", &self.config)
            .field("dispatch_queues", &self.dispatch.len())
            .finish()
    }
}

impl SyncEngine {
    #[must_use]
    pub fn new(
        repo: Arc<dyn SyncStateRepository>,
        sessions: Arc<dyn PlaybackSessionSource>,
        capabilities: Arc<dyn CapabilityLookup>,
        messenger: Arc<dyn SyncMessenger>,
        config: SyncEngineConfig,
    ) -> Self {
        Self {
            repo,
            sessions,
            capabilities,
            messenger,
            config,
            dispatch: Arc::new(DashMap::new()),
            next_dispatch_id: Arc::new(AtomicU64::new(0)),
        }
    }

    #[must_use]
    pub const fn config(&self) -> &SyncEngineConfig {
        &self.config
    }

    // ========== Replica lifecycle ==========

    /// Join a device to a session, seeding its replica from the session
    pub async fn initialize(
        &self,
        session_id: &SessionId,
        device_id: &DeviceId,
        platform: Platform,
    ) -> Result<SynchronizationState> {
        let session = self.fetch_session_with_retry(session_id).await?;
        let now = Utc::now();
        let state = SynchronizationState::new(&session, device_id.clone(), platform, now)
            .with_sync_frequency_secs(self.config.default_frequency_secs)
            .with_max_retries(self.config.max_retries);

        self.repo.create(&state).await?;

        info!(
            session_id = %session_id,
            device_id = %device_id,
            platform = %platform,
            next_sync_time = %state.next_sync_time,
            "Replica initialized"
        );
        Ok(state)
    }

    pub async fn get_replica(
        &self,
        session_id: &SessionId,
        device_id: &DeviceId,
    ) -> Result<SynchronizationState> {
        self.repo
            .get(session_id, device_id)
            .await?
            .ok_or_else(|| Error::ReplicaNotFound {
                session_id: session_id.clone(),
                device_id: device_id.clone(),
            })
    }

    pub async fn list_session_replicas(
        &self,
        session_id: &SessionId,
    ) -> Result<Vec<SynchronizationState>> {
        self.repo.list_by_session(session_id).await
    }

    /// Remove a device from a session
    pub async fn leave(&self, session_id: &SessionId, device_id: &DeviceId) -> Result<()> {
        if !self.repo.delete(session_id, device_id).await? {
            return Err(Error::ReplicaNotFound {
                session_id: session_id.clone(),
                device_id: device_id.clone(),
            });
        }
        if let Some((_, handle)) = self
            .dispatch
            .remove(&(session_id.clone(), device_id.clone()))
        {
            debug!(dispatch_id = handle.id, "Dropped dispatch queue of departed device");
        }
        info!(session_id = %session_id, device_id = %device_id, "Replica removed");
        Ok(())
    }

    /// Stop scheduling a replica. Allowed from `pending` and `completed`.
    pub async fn suspend(
        &self,
        session_id: &SessionId,
        device_id: &DeviceId,
    ) -> Result<SynchronizationState> {
        let mut state = self.get_replica(session_id, device_id).await?;
        state.transition(SyncStatus::Suspended)?;
        state.touch(Utc::now());
        self.repo.update(&state).await?;
        info!(session_id = %session_id, device_id = %device_id, "Replica suspended");
        Ok(state)
    }

    /// Put a suspended replica back on the schedule
    pub async fn resume(
        &self,
        session_id: &SessionId,
        device_id: &DeviceId,
    ) -> Result<SynchronizationState> {
        let mut state = self.get_replica(session_id, device_id).await?;
        if state.status != SyncStatus::Suspended {
            return Err(Error::InvalidStateTransition {
                from: state.status,
                to: SyncStatus::Pending,
            });
        }
        let now = Utc::now();
        state.transition(SyncStatus::Pending)?;
        state.schedule_next(now);
        state.touch(now);
        self.repo.update(&state).await?;
        info!(session_id = %session_id, device_id = %device_id, "Replica resumed");
        Ok(state)
    }

    // ========== Update and propagate ==========

    /// Record a local change on the origin replica and queue its fan-out.
    ///
    /// Returns once the origin replica is persisted; peers are updated by
    /// the origin device's dispatch worker, in submission order.
    pub async fn dispatch_update(
        &self,
        session_id: &SessionId,
        origin: &DeviceId,
        update: SyncUpdate,
    ) -> Result<SynchronizationState> {
        let mut state = self.get_replica(session_id, origin).await?;
        update.apply_to(&mut state);
        state.touch(Utc::now());
        self.repo.update(&state).await?;

        self.enqueue(session_id, origin, update);
        Ok(state)
    }

    pub async fn propagate_position(
        &self,
        session_id: &SessionId,
        origin: &DeviceId,
        position: f64,
    ) -> Result<PropagationReport> {
        self.propagate(session_id, origin, &SyncUpdate::Position(position))
            .await
    }

    pub async fn propagate_play_state(
        &self,
        session_id: &SessionId,
        origin: &DeviceId,
        is_playing: bool,
    ) -> Result<PropagationReport> {
        self.propagate(session_id, origin, &SyncUpdate::PlayState(is_playing))
            .await
    }

    pub async fn propagate_quality(
        &self,
        session_id: &SessionId,
        origin: &DeviceId,
        quality: VideoQuality,
    ) -> Result<PropagationReport> {
        self.propagate(session_id, origin, &SyncUpdate::Quality(quality))
            .await
    }

    pub async fn propagate_ui(
        &self,
        session_id: &SessionId,
        origin: &DeviceId,
        settings: UiSettings,
    ) -> Result<PropagationReport> {
        self.propagate(session_id, origin, &SyncUpdate::Ui(settings))
            .await
    }

    /// Apply `update` to every replica of the session except the origin's.
    ///
    /// Per-replica failures are logged and reported; they never abort the
    /// loop.
    pub async fn propagate(
        &self,
        session_id: &SessionId,
        origin: &DeviceId,
        update: &SyncUpdate,
    ) -> Result<PropagationReport> {
        let peers = self.repo.list_by_session(session_id).await?;
        let mut report = PropagationReport::default();

        for mut peer in peers.into_iter().filter(|p| &p.device_id != origin) {
            if let SyncUpdate::Quality(quality) = update {
                if !self.capabilities.can_play_quality(peer.platform, *quality) {
                    debug!(
                        session_id = %session_id,
                        device_id = %peer.device_id,
                        platform = %peer.platform,
                        quality = %quality,
                        "Skipping quality update the device cannot play"
                    );
                    report.skipped.push(SkippedReplica {
                        device_id: peer.device_id,
                        reason: SkipReason::CapabilityMismatch,
                    });
                    continue;
                }
            }

            let now = Utc::now();
            update.apply_to(&mut peer);
            peer.touch(now);

            if let Err(e) = self.repo.update(&peer).await {
                warn!(
                    session_id = %session_id,
                    device_id = %peer.device_id,
                    kind = update.kind(),
                    error = %e,
                    "Failed to persist propagated update"
                );
                report.failed.push(peer.device_id);
                continue;
            }

            let message = update.to_message(session_id, origin, &peer.device_id, now);
            if let Err(e) = self
                .messenger
                .send_to_device(session_id, &peer.device_id, &message)
            {
                debug!(
                    session_id = %session_id,
                    device_id = %peer.device_id,
                    error = %e,
                    "Peer not reachable, replica updated without notification"
                );
            }
            report.updated.push(peer.device_id);
        }

        metrics::sync::PROPAGATIONS
            .with_label_values(&[update.kind(), "updated"])
            .inc_by(report.updated.len() as f64);
        metrics::sync::PROPAGATIONS
            .with_label_values(&[update.kind(), "skipped"])
            .inc_by(report.skipped.len() as f64);
        metrics::sync::PROPAGATIONS
            .with_label_values(&[update.kind(), "failed"])
            .inc_by(report.failed.len() as f64);

        debug!(
            session_id = %session_id,
            origin = %origin,
            kind = update.kind(),
            updated = report.updated.len(),
            skipped = report.skipped.len(),
            failed = report.failed.len(),
            "Update propagated"
        );
        Ok(report)
    }

    /// Number of live per-device dispatch workers
    #[must_use]
    pub fn active_dispatch_queues(&self) -> usize {
        self.dispatch.len()
    }

    fn enqueue(&self, session_id: &SessionId, origin: &DeviceId, update: SyncUpdate) {
        let key = (session_id.clone(), origin.clone());
        let mut update = update;
        loop {
            let (id, tx, finished) = {
                let handle = self
                    .dispatch
                    .entry(key.clone())
                    .or_insert_with(|| self.spawn_dispatch_worker(key.clone(), None));
                (handle.id, handle.tx.clone(), handle.finished.clone())
            };
            match tx.send(update) {
                Ok(()) => return,
                Err(mpsc::error::SendError(returned)) => {
                    // Worker went idle and may still be draining; its
                    // successor starts only after it exits
                    update = returned;
                    if let Entry::Occupied(mut entry) = self.dispatch.entry(key.clone()) {
                        if entry.get().id == id {
                            entry.insert(self.spawn_dispatch_worker(key.clone(), Some(finished)));
                        }
                    }
                }
            }
        }
    }

    fn spawn_dispatch_worker(
        &self,
        key: DispatchKey,
        predecessor: Option<CancellationToken>,
    ) -> DispatchHandle {
        let id = self.next_dispatch_id.fetch_add(1, Ordering::Relaxed);
        let (tx, mut rx) = mpsc::unbounded_channel::<SyncUpdate>();
        let finished = CancellationToken::new();
        let done = finished.clone();
        let engine = self.clone();
        let idle_timeout = self.config.dispatch_idle_timeout;

        tokio::spawn(async move {
            let _done = done.drop_guard();
            if let Some(predecessor) = predecessor {
                predecessor.cancelled().await;
            }
            let (session_id, origin) = &key;
            loop {
                match tokio::time::timeout(idle_timeout, rx.recv()).await {
                    Ok(Some(update)) => engine.run_dispatched(session_id, origin, &update).await,
                    Ok(None) => break,
                    Err(_) => {
                        // Close first so late senders fail over to a successor
                        rx.close();
                        while let Ok(update) = rx.try_recv() {
                            engine.run_dispatched(session_id, origin, &update).await;
                        }
                        engine.dispatch.remove_if(&key, |_, h| h.id == id);
                        break;
                    }
                }
            }
            debug!(session_id = %session_id, device_id = %origin, dispatch_id = id, "Dispatch worker stopped");
        });

        DispatchHandle { id, tx, finished }
    }

    async fn run_dispatched(&self, session_id: &SessionId, origin: &DeviceId, update: &SyncUpdate) {
        if let Err(e) = self.propagate(session_id, origin, update).await {
            error!(
                session_id = %session_id,
                origin = %origin,
                kind = update.kind(),
                error = %e,
                "Dispatched propagation failed"
            );
        }
    }

    // ========== Conflicts ==========

    /// Flag replicas whose position drifted from the session's first replica.
    ///
    /// Returns the replicas flagged in this pass.
    pub async fn detect_conflicts(
        &self,
        session_id: &SessionId,
    ) -> Result<Vec<SynchronizationState>> {
        let replicas = self.repo.list_by_session(session_id).await?;
        let Some((base, others)) = replicas.split_first() else {
            return Ok(Vec::new());
        };

        let mut flagged = Vec::new();
        for replica in others {
            let delta = (replica.sync_data.position - base.sync_data.position).abs();
            if delta <= self.config.conflict_threshold_secs {
                continue;
            }

            let now = Utc::now();
            let mut ev = Map::new();
            ev.insert(
                evidence::BASE_POSITION.to_string(),
                Value::from(base.sync_data.position),
            );
            ev.insert(
                evidence::CURRENT_POSITION.to_string(),
                Value::from(replica.sync_data.position),
            );
            ev.insert(evidence::DELTA.to_string(), Value::from(delta));
            ev.insert(
                evidence::BASE_DEVICE_ID.to_string(),
                Value::from(base.device_id.as_str()),
            );
            ev.insert(
                evidence::BASE_UPDATED_AT.to_string(),
                Value::from(base.updated_at.to_rfc3339()),
            );

            let mut state = replica.clone();
            state.mark_conflict(ConflictKind::Position, ev.clone(), now);
            if let Err(e) = self.repo.update(&state).await {
                warn!(
                    session_id = %session_id,
                    device_id = %state.device_id,
                    error = %e,
                    "Failed to persist conflict flag"
                );
                continue;
            }

            warn!(
                session_id = %session_id,
                device_id = %state.device_id,
                base_device_id = %base.device_id,
                delta,
                "Position conflict detected"
            );
            metrics::sync::CONFLICTS.with_label_values(&["detected"]).inc();
            self.messenger.broadcast(
                session_id,
                &SyncMessage::ConflictDetected {
                    session_id: session_id.clone(),
                    device_id: state.device_id.clone(),
                    kind: ConflictKind::Position,
                    evidence: ev,
                    timestamp: now,
                },
            );
            flagged.push(state);
        }

        Ok(flagged)
    }

    /// Settle the conflict on one replica with `resolver`
    pub async fn resolve_conflict(
        &self,
        session_id: &SessionId,
        device_id: &DeviceId,
        resolver: &dyn ConflictResolver,
    ) -> Result<SynchronizationState> {
        let mut state = self.get_replica(session_id, device_id).await?;
        if !state.conflict.has_conflicts {
            return Err(Error::NoActiveConflict {
                session_id: session_id.clone(),
                device_id: device_id.clone(),
            });
        }

        let reference = match state
            .conflict
            .evidence
            .get(evidence::BASE_DEVICE_ID)
            .and_then(Value::as_str)
        {
            Some(base) => self.repo.get(session_id, &DeviceId::from(base)).await?,
            None => None,
        };
        let session = if resolver.requires_session() {
            Some(self.fetch_session_with_retry(session_id).await?)
        } else {
            None
        };

        let position = resolver.resolve(&ConflictContext {
            conflicted: &state,
            reference: reference.as_ref(),
            session: session.as_ref(),
        })?;

        let now = Utc::now();
        state.sync_data.position = position;
        state.clear_conflict();
        state.touch(now);
        self.repo.update(&state).await?;
        if let Some(reference) = reference {
            self.align_reference(reference, device_id, position, now).await;
        }

        info!(
            session_id = %session_id,
            device_id = %device_id,
            strategy = resolver.name(),
            position,
            "Conflict resolved"
        );
        metrics::sync::CONFLICTS.with_label_values(&["resolved"]).inc();

        let message = SyncMessage::ConflictResolved {
            session_id: session_id.clone(),
            device_id: device_id.clone(),
            strategy: resolver.name().to_string(),
            position,
            timestamp: now,
        };
        self.messenger.broadcast(session_id, &message);
        if let Err(e) = deliver_with_retry(
            self.messenger.as_ref(),
            session_id,
            device_id,
            &message,
            self.config.delivery_retry_attempts,
            self.config.delivery_retry_delay,
        )
        .await
        {
            warn!(
                session_id = %session_id,
                device_id = %device_id,
                error = %e,
                "Resolved device could not be notified"
            );
        }

        Ok(state)
    }

    /// Move the reference replica onto a settled position it is still out of
    /// tolerance with, so the next detection pass does not flag the pair again
    async fn align_reference(
        &self,
        mut reference: SynchronizationState,
        winner: &DeviceId,
        position: f64,
        now: DateTime<Utc>,
    ) {
        if (reference.sync_data.position - position).abs() <= self.config.conflict_threshold_secs {
            return;
        }

        let session_id = reference.session_id.clone();
        reference.sync_data.position = position;
        reference.touch(now);
        if let Err(e) = self.repo.update(&reference).await {
            warn!(
                session_id = %session_id,
                device_id = %reference.device_id,
                error = %e,
                "Failed to move reference replica onto resolved position"
            );
            return;
        }

        let message = SyncUpdate::Position(position).to_message(
            &session_id,
            winner,
            &reference.device_id,
            now,
        );
        if let Err(e) = self
            .messenger
            .send_to_device(&session_id, &reference.device_id, &message)
        {
            debug!(
                session_id = %session_id,
                device_id = %reference.device_id,
                error = %e,
                "Reference device not reachable, replica moved without notification"
            );
        }
    }

    /// Resolve every flagged replica of a session; failures are logged and skipped
    pub async fn resolve_session_conflicts(
        &self,
        session_id: &SessionId,
        resolver: &dyn ConflictResolver,
    ) -> Result<Vec<SynchronizationState>> {
        let flagged: Vec<_> = self
            .repo
            .list_by_session(session_id)
            .await?
            .into_iter()
            .filter(|s| s.conflict.has_conflicts)
            .collect();

        let mut resolved = Vec::with_capacity(flagged.len());
        for state in flagged {
            match self
                .resolve_conflict(session_id, &state.device_id, resolver)
                .await
            {
                Ok(state) => resolved.push(state),
                Err(e) => warn!(
                    session_id = %session_id,
                    device_id = %state.device_id,
                    error = %e,
                    "Conflict resolution failed"
                ),
            }
        }
        Ok(resolved)
    }

    // ========== Reconciliation ==========

    pub async fn reconcile_due(&self) -> Result<ReconcileReport> {
        self.reconcile_due_at(Utc::now()).await
    }

    /// Reconcile every replica whose deadline elapsed by `now`
    pub async fn reconcile_due_at(&self, now: DateTime<Utc>) -> Result<ReconcileReport> {
        let due = self.repo.list_due(now, self.config.scan_batch_limit).await?;
        let mut report = ReconcileReport {
            scanned: due.len(),
            ..ReconcileReport::default()
        };
        if due.is_empty() {
            return Ok(report);
        }

        let outcomes: Vec<ReconcileOutcome> = futures::stream::iter(due)
            .map(|state| self.reconcile_one(state, now))
            .buffer_unordered(self.config.worker_pool_size)
            .collect()
            .await;

        let mut touched = BTreeSet::new();
        for outcome in outcomes {
            match outcome {
                ReconcileOutcome::Completed(session_id) => {
                    report.completed += 1;
                    touched.insert(session_id);
                }
                ReconcileOutcome::Failed => report.failed += 1,
            }
        }

        if self.config.detect_conflicts_on_reconcile {
            for session_id in &touched {
                match self.detect_conflicts(session_id).await {
                    Ok(flagged) => report.conflicts_detected += flagged.len(),
                    Err(e) => warn!(session_id = %session_id, error = %e, "Conflict scan failed"),
                }
            }
        }

        info!(
            scanned = report.scanned,
            completed = report.completed,
            failed = report.failed,
            conflicts = report.conflicts_detected,
            "Reconciliation scan finished"
        );
        Ok(report)
    }

    async fn reconcile_one(&self, mut state: SynchronizationState, now: DateTime<Utc>) -> ReconcileOutcome {
        let session_id = state.session_id.clone();
        let device_id = state.device_id.clone();

        if let Err(e) = self.begin_sync(&mut state, now).await {
            warn!(session_id = %session_id, device_id = %device_id, error = %e, "Could not start reconciliation");
            metrics::sync::RECONCILIATIONS.with_label_values(&["failed"]).inc();
            return ReconcileOutcome::Failed;
        }

        let started = Instant::now();
        let result = match self.sessions.get_playback_session(&session_id).await {
            Ok(session) => {
                self.complete_sync(&mut state, &session, started.elapsed(), now)
                    .await
            }
            Err(e) => Err(e),
        };

        match result {
            Ok(()) => {
                metrics::sync::RECONCILIATIONS.with_label_values(&["completed"]).inc();
                ReconcileOutcome::Completed(session_id)
            }
            Err(e) => {
                self.fail_sync(&mut state, &e, now).await;
                metrics::sync::RECONCILIATIONS.with_label_values(&["failed"]).inc();
                ReconcileOutcome::Failed
            }
        }
    }

    /// Move a replica into `in_progress` and persist it
    async fn begin_sync(&self, state: &mut SynchronizationState, now: DateTime<Utc>) -> Result<()> {
        if matches!(state.status, SyncStatus::Completed | SyncStatus::Failed) {
            state.transition(SyncStatus::Pending)?;
        }
        if state.status != SyncStatus::InProgress {
            state.transition(SyncStatus::InProgress)?;
        }
        state.touch(now);
        self.repo.update(state).await
    }

    async fn complete_sync(
        &self,
        state: &mut SynchronizationState,
        session: &PlaybackSession,
        latency: Duration,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let latency_ms = latency.as_secs_f64() * 1000.0;
        // `state` stays in_progress until the store accepts the completion
        let mut next = state.clone();
        next.apply_session(session);
        next.metrics.record_success(latency_ms);
        next.transition(SyncStatus::Completed)?;
        next.retry_count = 0;
        next.schedule_next(now);
        next.touch(now);
        self.repo.update(&next).await?;
        *state = next;

        metrics::sync::RECONCILE_LATENCY
            .with_label_values(&[state.platform.as_str()])
            .observe(latency.as_secs_f64());
        self.messenger.broadcast(
            &state.session_id,
            &SyncMessage::SyncCompleted {
                session_id: state.session_id.clone(),
                device_id: state.device_id.clone(),
                sync_data: state.sync_data.clone(),
                latency_ms,
                timestamp: now,
            },
        );
        debug!(
            session_id = %state.session_id,
            device_id = %state.device_id,
            latency_ms,
            next_sync_time = %state.next_sync_time,
            "Replica reconciled"
        );
        Ok(())
    }

    async fn fail_sync(&self, state: &mut SynchronizationState, cause: &Error, now: DateTime<Utc>) {
        state.record_error(cause.to_string(), ErrorSeverity::High, now);
        state.metrics.record_failure();
        if state.status == SyncStatus::InProgress {
            state.status = SyncStatus::Failed;
        }
        state.retry_count = state.retry_count.saturating_add(1).min(state.max_retries);
        state.schedule_next(now);
        state.touch(now);

        if state.retries_exhausted() {
            error!(
                session_id = %state.session_id,
                device_id = %state.device_id,
                retry_count = state.retry_count,
                error = %cause,
                "Reconciliation keeps failing, retries exhausted"
            );
        } else {
            warn!(
                session_id = %state.session_id,
                device_id = %state.device_id,
                retry_count = state.retry_count,
                error = %cause,
                "Reconciliation failed, rescheduled"
            );
        }

        if let Err(e) = self.repo.update(state).await {
            error!(
                session_id = %state.session_id,
                device_id = %state.device_id,
                error = %e,
                "Failed to persist reconciliation failure"
            );
        }
    }

    /// Reconcile every non-suspended replica of a session right now
    pub async fn force_sync_all(&self, session_id: &SessionId) -> Result<ForceSyncReport> {
        let started = Instant::now();
        let session = self.fetch_session_with_retry(session_id).await?;
        let fetch_latency = started.elapsed();
        let replicas = self.repo.list_by_session(session_id).await?;

        let mut report = ForceSyncReport::default();
        for mut state in replicas {
            if state.status == SyncStatus::Suspended {
                report.skipped += 1;
                continue;
            }
            let now = Utc::now();
            let result = match self.begin_sync(&mut state, now).await {
                Ok(()) => self.complete_sync(&mut state, &session, fetch_latency, now).await,
                Err(e) => Err(e),
            };
            match result {
                Ok(()) => report.synced += 1,
                Err(e) => {
                    self.fail_sync(&mut state, &e, now).await;
                    report.failed += 1;
                }
            }
        }

        info!(
            session_id = %session_id,
            synced = report.synced,
            skipped = report.skipped,
            failed = report.failed,
            "Force sync finished"
        );
        Ok(report)
    }

    // ========== Health & retention ==========

    pub async fn health_summary(&self) -> Result<HealthSummary> {
        self.health_summary_at(Utc::now()).await
    }

    /// Classify the currently due replicas
    pub async fn health_summary_at(&self, now: DateTime<Utc>) -> Result<HealthSummary> {
        let due = self.repo.list_due(now, self.config.scan_batch_limit).await?;
        let overdue_limit = ChronoDuration::seconds(self.config.overdue_warning_secs);

        let pending = due
            .iter()
            .filter(|s| s.status == SyncStatus::Pending)
            .count();
        let failed = due.iter().filter(|s| s.status == SyncStatus::Failed).count();
        let conflicted = due.iter().filter(|s| s.conflict.has_conflicts).count();
        let warnings = due
            .iter()
            .filter_map(|s| {
                s.overdue_by(now)
                    .filter(|late| *late > overdue_limit)
                    .map(|late| {
                        format!(
                            "Replica {}/{} is overdue by {}s",
                            s.session_id,
                            s.device_id,
                            late.num_seconds()
                        )
                    })
            })
            .collect();

        Ok(HealthSummary {
            status: HealthSummary::classify(failed, conflicted),
            total_due: due.len(),
            pending,
            failed,
            conflicted,
            warnings,
            checked_at: now,
        })
    }

    /// Retention sweep: drop replicas idle for `retention_days`
    pub async fn cleanup_inactive(&self, retention_days: i64) -> Result<u64> {
        let cutoff = Utc::now() - ChronoDuration::days(retention_days);
        let removed = self.repo.delete_inactive_before(cutoff).await?;
        if removed > 0 {
            info!(removed, retention_days, "Inactive replicas removed");
        }
        Ok(removed)
    }

    async fn fetch_session_with_retry(&self, session_id: &SessionId) -> Result<PlaybackSession> {
        (|| self.sessions.get_playback_session(session_id))
            .retry(resilience::session_fetch_backoff(
                self.config.session_fetch_retries,
            ))
            .notify(|err, after| {
                warn!(
                    session_id = %session_id,
                    error = %err,
                    retry_in = ?after,
                    "Playback session fetch failed, retrying"
                );
            })
            .await
    }
}

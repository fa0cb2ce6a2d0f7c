pub mod memory;
pub mod playback;
pub mod sync_state;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::{
    models::{DeviceId, SessionId, SynchronizationState},
    Result,
};

pub use memory::MemorySyncStateRepository;
pub use playback::{MemoryPlaybackSessions, PgPlaybackSessionSource, PlaybackSessionSource};
pub use sync_state::PgSyncStateRepository;

/// Persistence contract for synchronization replicas.
///
/// Keyed by (session, device). Holds no business rules; the sync engine is
/// the only writer.
#[async_trait]
pub trait SyncStateRepository: Send + Sync {
    /// Insert a new replica. Fails with `AlreadyExists` if the key is taken.
    async fn create(&self, state: &SynchronizationState) -> Result<()>;

    async fn get(
        &self,
        session_id: &SessionId,
        device_id: &DeviceId,
    ) -> Result<Option<SynchronizationState>>;

    /// Overwrite an existing replica (last writer wins).
    /// Fails with `ReplicaNotFound` if the key does not exist.
    async fn update(&self, state: &SynchronizationState) -> Result<()>;

    /// Remove one replica, returning whether it existed
    async fn delete(&self, session_id: &SessionId, device_id: &DeviceId) -> Result<bool>;

    /// All replicas of a session, oldest first (ties broken by device id)
    async fn list_by_session(&self, session_id: &SessionId) -> Result<Vec<SynchronizationState>>;

    /// All replicas a device holds across sessions
    async fn list_by_device(&self, device_id: &DeviceId) -> Result<Vec<SynchronizationState>>;

    /// Schedulable replicas whose `next_sync_time` has elapsed, earliest deadline first
    async fn list_due(&self, now: DateTime<Utc>, limit: usize)
        -> Result<Vec<SynchronizationState>>;

    /// Retention sweep: delete replicas not updated since `cutoff`
    async fn delete_inactive_before(&self, cutoff: DateTime<Utc>) -> Result<u64>;
}

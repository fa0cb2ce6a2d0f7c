//! In-memory replica store for single-node deployments and tests

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::{mapref::entry::Entry, DashMap};
use std::sync::Arc;

use super::SyncStateRepository;
use crate::{
    models::{DeviceId, SessionId, SynchronizationState},
    Error, Result,
};

type ReplicaKey = (SessionId, DeviceId);

#[derive(Clone, Default)]
pub struct MemorySyncStateRepository {
    replicas: Arc<DashMap<ReplicaKey, SynchronizationState>>,
}

impl std::fmt::Debug for MemorySyncStateRepository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemorySyncStateRepository")
            .field("replicas", &self.replicas.len())
            .finish()
    }
}

impl MemorySyncStateRepository {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.replicas.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.replicas.is_empty()
    }

    fn key(state: &SynchronizationState) -> ReplicaKey {
        (state.session_id.clone(), state.device_id.clone())
    }

    fn collect_sorted<F>(&self, filter: F) -> Vec<SynchronizationState>
    where
        F: Fn(&SynchronizationState) -> bool,
    {
        let mut states: Vec<_> = self
            .replicas
            .iter()
            .filter(|entry| filter(entry.value()))
            .map(|entry| entry.value().clone())
            .collect();
        states.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.device_id.cmp(&b.device_id))
        });
        states
    }
}

#[async_trait]
impl SyncStateRepository for MemorySyncStateRepository {
    async fn create(&self, state: &SynchronizationState) -> Result<()> {
        match self.replicas.entry(Self::key(state)) {
            Entry::Occupied(_) => Err(Error::AlreadyExists(format!(
                "Replica {}/{}",
                state.session_id, state.device_id
            ))),
            Entry::Vacant(slot) => {
                slot.insert(state.clone());
                Ok(())
            }
        }
    }

    async fn get(
        &self,
        session_id: &SessionId,
        device_id: &DeviceId,
    ) -> Result<Option<SynchronizationState>> {
        Ok(self
            .replicas
            .get(&(session_id.clone(), device_id.clone()))
            .map(|entry| entry.value().clone()))
    }

    async fn update(&self, state: &SynchronizationState) -> Result<()> {
        match self.replicas.get_mut(&Self::key(state)) {
            Some(mut entry) => {
                *entry = state.clone();
                Ok(())
            }
            None => Err(Error::ReplicaNotFound {
                session_id: state.session_id.clone(),
                device_id: state.device_id.clone(),
            }),
        }
    }

    async fn delete(&self, session_id: &SessionId, device_id: &DeviceId) -> Result<bool> {
        Ok(self
            .replicas
            .remove(&(session_id.clone(), device_id.clone()))
            .is_some())
    }

    async fn list_by_session(&self, session_id: &SessionId) -> Result<Vec<SynchronizationState>> {
        Ok(self.collect_sorted(|s| &s.session_id == session_id))
    }

    async fn list_by_device(&self, device_id: &DeviceId) -> Result<Vec<SynchronizationState>> {
        Ok(self.collect_sorted(|s| &s.device_id == device_id))
    }

    async fn list_due(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<SynchronizationState>> {
        let mut due = self.collect_sorted(|s| s.is_due(now));
        due.sort_by_key(|s| s.next_sync_time);
        due.truncate(limit);
        Ok(due)
    }

    async fn delete_inactive_before(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let before = self.replicas.len();
        self.replicas.retain(|_, state| state.updated_at >= cutoff);
        Ok((before.saturating_sub(self.replicas.len())) as u64)
    }
}

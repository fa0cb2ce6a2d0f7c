use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{postgres::PgRow, types::Json, PgPool, Row};

use super::SyncStateRepository;
use crate::{
    models::{
        ConflictInfo, DeviceId, SessionId, SyncData, SyncErrorRecord, SyncMetrics,
        SynchronizationState,
    },
    Error, Result,
};

const SELECT_COLUMNS: &str = "session_id, device_id, platform, sync_data, status, \
     sync_frequency_secs, last_sync_time, next_sync_time, retry_count, max_retries, \
     metrics, conflict, errors, created_at, updated_at";

/// PostgreSQL replica store (`sync_states` table)
#[derive(Clone)]
pub struct PgSyncStateRepository {
    pool: PgPool,
}

impl PgSyncStateRepository {
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_state(row: &PgRow) -> Result<SynchronizationState> {
        let platform: String = row.try_get("platform")?;
        let status: String = row.try_get("status")?;
        let retry_count: i32 = row.try_get("retry_count")?;
        let max_retries: i32 = row.try_get("max_retries")?;
        let sync_data: Json<SyncData> = row.try_get("sync_data")?;
        let metrics: Json<SyncMetrics> = row.try_get("metrics")?;
        let conflict: Json<ConflictInfo> = row.try_get("conflict")?;
        let errors: Json<Vec<SyncErrorRecord>> = row.try_get("errors")?;

        Ok(SynchronizationState {
            session_id: row.try_get("session_id")?,
            device_id: row.try_get("device_id")?,
            platform: platform
                .parse()
                .map_err(|e| Error::Internal(format!("Corrupt platform column: {e}")))?,
            sync_data: sync_data.0,
            status: status
                .parse()
                .map_err(|e| Error::Internal(format!("Corrupt status column: {e}")))?,
            sync_frequency_secs: row.try_get("sync_frequency_secs")?,
            last_sync_time: row.try_get("last_sync_time")?,
            next_sync_time: row.try_get("next_sync_time")?,
            retry_count: u32::try_from(retry_count).unwrap_or(0),
            max_retries: u32::try_from(max_retries).unwrap_or(0),
            metrics: metrics.0,
            conflict: conflict.0,
            errors: errors.0,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    fn rows_to_states(rows: &[PgRow]) -> Result<Vec<SynchronizationState>> {
        rows.iter().map(Self::row_to_state).collect()
    }
}

#[async_trait]
impl SyncStateRepository for PgSyncStateRepository {
    async fn create(&self, state: &SynchronizationState) -> Result<()> {
        sqlx::query(
            "INSERT INTO sync_states (session_id, device_id, platform, sync_data, status,
                 sync_frequency_secs, last_sync_time, next_sync_time, retry_count, max_retries,
                 metrics, conflict, has_conflicts, errors, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)",
        )
        .bind(&state.session_id)
        .bind(&state.device_id)
        .bind(state.platform.as_str())
        .bind(Json(&state.sync_data))
        .bind(state.status.as_str())
        .bind(state.sync_frequency_secs)
        .bind(state.last_sync_time)
        .bind(state.next_sync_time)
        .bind(i32::try_from(state.retry_count).unwrap_or(i32::MAX))
        .bind(i32::try_from(state.max_retries).unwrap_or(i32::MAX))
        .bind(Json(&state.metrics))
        .bind(Json(&state.conflict))
        .bind(state.conflict.has_conflicts)
        .bind(Json(&state.errors))
        .bind(state.created_at)
        .bind(state.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get(
        &self,
        session_id: &SessionId,
        device_id: &DeviceId,
    ) -> Result<Option<SynchronizationState>> {
        let row = sqlx::query(&format!(
            "SELECT {SELECT_COLUMNS} FROM sync_states WHERE session_id = $1 AND device_id = $2"
        ))
        .bind(session_id)
        .bind(device_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::row_to_state).transpose()
    }

    async fn update(&self, state: &SynchronizationState) -> Result<()> {
        let result = sqlx::query(
            "UPDATE sync_states
             SET platform = $3, sync_data = $4, status = $5, sync_frequency_secs = $6,
                 last_sync_time = $7, next_sync_time = $8, retry_count = $9, max_retries = $10,
                 metrics = $11, conflict = $12, has_conflicts = $13, errors = $14, updated_at = $15
             WHERE session_id = $1 AND device_id = $2",
        )
        .bind(&state.session_id)
        .bind(&state.device_id)
        .bind(state.platform.as_str())
        .bind(Json(&state.sync_data))
        .bind(state.status.as_str())
        .bind(state.sync_frequency_secs)
        .bind(state.last_sync_time)
        .bind(state.next_sync_time)
        .bind(i32::try_from(state.retry_count).unwrap_or(i32::MAX))
        .bind(i32::try_from(state.max_retries).unwrap_or(i32::MAX))
        .bind(Json(&state.metrics))
        .bind(Json(&state.conflict))
        .bind(state.conflict.has_conflicts)
        .bind(Json(&state.errors))
        .bind(state.updated_at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(Error::ReplicaNotFound {
                session_id: state.session_id.clone(),
                device_id: state.device_id.clone(),
            });
        }
        Ok(())
    }

    async fn delete(&self, session_id: &SessionId, device_id: &DeviceId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM sync_states WHERE session_id = $1 AND device_id = $2")
            .bind(session_id)
            .bind(device_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_by_session(&self, session_id: &SessionId) -> Result<Vec<SynchronizationState>> {
        let rows = sqlx::query(&format!(
            "SELECT {SELECT_COLUMNS} FROM sync_states
             WHERE session_id = $1
             ORDER BY created_at ASC, device_id ASC"
        ))
        .bind(session_id)
        .fetch_all(&self.pool)
        .await?;

        Self::rows_to_states(&rows)
    }

    async fn list_by_device(&self, device_id: &DeviceId) -> Result<Vec<SynchronizationState>> {
        let rows = sqlx::query(&format!(
            "SELECT {SELECT_COLUMNS} FROM sync_states
             WHERE device_id = $1
             ORDER BY created_at ASC, session_id ASC"
        ))
        .bind(device_id)
        .fetch_all(&self.pool)
        .await?;

        Self::rows_to_states(&rows)
    }

    async fn list_due(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<SynchronizationState>> {
        let rows = sqlx::query(&format!(
            "SELECT {SELECT_COLUMNS} FROM sync_states
             WHERE next_sync_time <= $1
               AND status IN ('pending', 'completed', 'failed')
             ORDER BY next_sync_time ASC
             LIMIT $2"
        ))
        .bind(now)
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;

        Self::rows_to_states(&rows)
    }

    async fn delete_inactive_before(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query("DELETE FROM sync_states WHERE updated_at < $1")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

use anyhow::Result;
use sqlx::PgPool;
use tracing::{error, info};

/// Apply `migrations/` to the pool.
///
/// sqlx takes a Postgres advisory lock while migrating, so concurrent
/// replicas starting together serialize on it.
pub async fn run_migrations(pool: &PgPool) -> Result<()> {
    info!("Running database migrations...");
    sqlx::migrate!("../migrations")
        .run(pool)
        .await
        .map_err(|e| {
            error!("Failed to run migrations: {}", e);
            anyhow::anyhow!("Migration failed: {e}")
        })?;
    info!("Migrations completed");
    Ok(())
}

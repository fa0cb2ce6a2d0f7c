mod migrations;
mod server;

use anyhow::Result;
use clap::Parser;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use playsync_api::AppState;
use playsync_cluster::DeviceMessageHub;
use playsync_core::{
    logging,
    repository::{
        MemoryPlaybackSessions, MemorySyncStateRepository, PgPlaybackSessionSource,
        PgSyncStateRepository, PlaybackSessionSource, SyncStateRepository,
    },
    service::{
        FsMediaCatalog, SchedulerConfig, StaticCapabilityProfile, StreamTokenService, SyncEngine,
        SyncEngineConfig, SyncScheduler,
    },
    Config,
};

use server::PlaySyncServer;

#[derive(Parser, Debug)]
#[command(name = "playsync")]
#[command(about = "PlaySync cross-device playback sync and secure streaming server", long_about = None)]
struct Args {
    /// Configuration file (TOML/YAML/JSON); environment variables override it
    #[arg(short, long, env = "PLAYSYNC_CONFIG")]
    config: Option<String>,
}

/// Initialize database connection pool
async fn init_database(config: &Config) -> Result<PgPool> {
    info!("Connecting to database...");

    let pool: PgPool = PgPoolOptions::new()
        .max_connections(config.database.max_connections)
        .min_connections(config.database.min_connections)
        .acquire_timeout(Duration::from_secs(config.database.connect_timeout_seconds))
        .idle_timeout(Duration::from_secs(config.database.idle_timeout_seconds))
        .connect(&config.database.url)
        .await
        .map_err(|e| {
            error!("Failed to connect to database: {}", e);
            anyhow::anyhow!("Database connection failed: {e}")
        })?;

    info!("Database connected successfully");
    Ok(pool)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // 1. Load configuration
    let config = Config::load(args.config.as_deref())?;

    // 2. Validate configuration (fail fast on misconfigurations)
    if let Err(errors) = config.validate() {
        for e in &errors {
            eprintln!("Config validation error: {e}");
        }
        return Err(anyhow::anyhow!(
            "Configuration validation failed with {} error(s)",
            errors.len()
        ));
    }

    // 3. Initialize logging
    logging::init_logging(&config.logging)?;
    info!("PlaySync server starting...");
    info!("HTTP address: {}", config.http_address());

    // 4. Replica store and playback session source
    let (pool, repo, sessions): (
        Option<PgPool>,
        Arc<dyn SyncStateRepository>,
        Arc<dyn PlaybackSessionSource>,
    ) = if config.uses_database() {
        let pool = init_database(&config).await?;
        if config.database.run_migrations {
            migrations::run_migrations(&pool).await?;
        }
        (
            Some(pool.clone()),
            Arc::new(PgSyncStateRepository::new(pool.clone())),
            Arc::new(PgPlaybackSessionSource::new(pool)),
        )
    } else {
        warn!("database.url not set, replicas and sessions are kept in memory only");
        (
            None,
            Arc::new(MemorySyncStateRepository::new()),
            Arc::new(MemoryPlaybackSessions::new()),
        )
    };

    // 5. Message hub and sync engine
    let message_hub = DeviceMessageHub::new();
    let engine = SyncEngine::new(
        repo,
        sessions,
        Arc::new(StaticCapabilityProfile::default()),
        Arc::new(message_hub.clone()),
        SyncEngineConfig::from(&config.sync),
    );
    info!(
        worker_pool_size = engine.config().worker_pool_size,
        conflict_threshold_secs = engine.config().conflict_threshold_secs,
        "Sync engine initialized"
    );

    // 6. Background reconciliation
    let scheduler = SyncScheduler::start(engine.clone(), SchedulerConfig::from(&config.sync));

    // 7. Streaming
    let tokens = Arc::new(StreamTokenService::from_config(&config.streaming));
    let catalog = Arc::new(FsMediaCatalog::new(&config.streaming.media_root));
    info!(media_root = %config.streaming.media_root, "Media catalog ready");

    let state = AppState {
        tokens,
        catalog,
        engine,
        message_hub,
        config: Arc::new(config.clone()),
    };

    // 8. Serve until shutdown
    PlaySyncServer::new(config, state, scheduler, pool)
        .start()
        .await
}

//! Server lifecycle management
//!
//! Starts the HTTP server next to the sync scheduler and tears both down in
//! order on SIGTERM or Ctrl+C.

use sqlx::PgPool;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, warn};

use playsync_api::AppState;
use playsync_core::{service::SyncScheduler, Config};

/// `PlaySync` server - owns the HTTP listener, scheduler and database pool
pub struct PlaySyncServer {
    config: Config,
    state: AppState,
    scheduler: SyncScheduler,
    pool: Option<PgPool>,
}

impl PlaySyncServer {
    pub const fn new(
        config: Config,
        state: AppState,
        scheduler: SyncScheduler,
        pool: Option<PgPool>,
    ) -> Self {
        Self {
            config,
            state,
            scheduler,
            pool,
        }
    }

    /// Serve until a shutdown signal, then drain
    pub async fn start(self) -> anyhow::Result<()> {
        let http_address = self.config.http_address();
        let listener = tokio::net::TcpListener::bind(&http_address)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to bind HTTP address {http_address}: {e}"))?;
        info!("HTTP server listening on {}", http_address);

        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let router = playsync_api::create_router(self.state.clone());

        let mut http_handle = tokio::spawn(async move {
            let graceful = async move {
                let _ = shutdown_rx.changed().await;
            };
            if let Err(e) = axum::serve(listener, router)
                .with_graceful_shutdown(graceful)
                .await
            {
                error!("HTTP server error: {}", e);
            }
            info!("HTTP server shut down gracefully");
        });

        let http_stopped = tokio::select! {
            _ = &mut http_handle => {
                error!("HTTP server stopped unexpectedly");
                true
            }
            () = shutdown_signal() => {
                info!("Shutdown signal received, starting graceful shutdown...");
                false
            }
        };

        let _ = shutdown_tx.send(true);
        if !http_stopped {
            let grace = Duration::from_secs(self.config.server.shutdown_grace_seconds);
            if tokio::time::timeout(grace, &mut http_handle).await.is_err() {
                warn!(
                    "In-flight requests still running after {}s, aborting",
                    grace.as_secs()
                );
                http_handle.abort();
            }
        }

        self.shutdown().await;
        Ok(())
    }

    async fn shutdown(self) {
        info!("Shutting down PlaySync server...");

        // 1. Stop scanning; the scan in flight finishes first
        self.scheduler.shutdown().await;

        // 2. Device sockets close once the hub drops their senders
        let open = self.state.message_hub.connection_count();
        if open > 0 {
            info!("Closing {} device connection(s)", open);
        }

        // 3. Close the database connection pool
        if let Some(pool) = self.pool {
            info!("Closing database connection pool...");
            pool.close().await;
            info!("Database pool closed");
        }

        info!("PlaySync server shut down complete");
    }
}

/// Wait for a shutdown signal (SIGTERM or SIGINT/Ctrl+C)
async fn shutdown_signal() {
    let ctrl_c = async {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Received Ctrl+C signal");
            }
            Err(e) => {
                error!("Failed to install Ctrl+C handler: {}", e);
            }
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
                info!("Received SIGTERM signal");
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}

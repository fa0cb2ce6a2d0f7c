//! Periodic reconciliation driver

use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, Instrument};

use crate::{config::SyncConfig, logging::generate_trace_id, service::sync_engine::SyncEngine};

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub scan_interval: Duration,
    pub cleanup_interval: Duration,
    pub retention_days: i64,
}

impl From<&SyncConfig> for SchedulerConfig {
    fn from(config: &SyncConfig) -> Self {
        Self {
            scan_interval: Duration::from_millis(config.scan_interval_ms.max(1)),
            cleanup_interval: Duration::from_secs(config.cleanup_interval_hours.max(1) * 3600),
            retention_days: config.retention_days,
        }
    }
}

/// Owns the background scan and retention tasks.
///
/// Created at service start; [`SyncScheduler::shutdown`] stops both loops
/// after the scan in flight finishes.
pub struct SyncScheduler {
    cancel: CancellationToken,
    handles: Vec<JoinHandle<()>>,
}

impl SyncScheduler {
    #[must_use]
    pub fn start(engine: SyncEngine, config: SchedulerConfig) -> Self {
        let cancel = CancellationToken::new();
        let scan = tokio::spawn(scan_loop(engine.clone(), config.scan_interval, cancel.clone()));
        let cleanup = tokio::spawn(cleanup_loop(
            engine,
            config.cleanup_interval,
            config.retention_days,
            cancel.clone(),
        ));
        info!(
            scan_interval_ms = config.scan_interval.as_millis(),
            retention_days = config.retention_days,
            "Sync scheduler started"
        );
        Self {
            cancel,
            handles: vec![scan, cleanup],
        }
    }

    #[must_use]
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        !self.cancel.is_cancelled() && self.handles.iter().any(|h| !h.is_finished())
    }

    pub async fn shutdown(self) {
        self.cancel.cancel();
        for handle in self.handles {
            if let Err(e) = handle.await {
                error!(error = %e, "Scheduler task ended abnormally");
            }
        }
        info!("Sync scheduler stopped");
    }
}

async fn scan_loop(engine: SyncEngine, period: Duration, cancel: CancellationToken) {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            _ = interval.tick() => {}
        }

        let span = tracing::info_span!("sync_scan", trace_id = %generate_trace_id());
        match engine.reconcile_due().instrument(span).await {
            Ok(report) if report.scanned > 0 => {
                debug!(scanned = report.scanned, failed = report.failed, "Scan tick");
            }
            Ok(_) => {}
            Err(e) => error!(error = %e, "Reconciliation scan failed"),
        }
    }
}

async fn cleanup_loop(
    engine: SyncEngine,
    period: Duration,
    retention_days: i64,
    cancel: CancellationToken,
) {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            _ = interval.tick() => {}
        }

        if let Err(e) = engine.cleanup_inactive(retention_days).await {
            error!(error = %e, "Retention sweep failed");
        }
    }
}

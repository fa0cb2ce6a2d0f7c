//! Retry policies for the sync engine's external calls
//!
//! Retry logic is provided by the `backon` crate; this module only fixes the
//! shapes of the backoff used by each call site.

use backon::{ConstantBuilder, ExponentialBuilder};
use std::time::Duration;

/// Exponential backoff for fetching the authoritative session on join and
/// force-sync. `retries` is the number of attempts after the first.
#[must_use]
pub fn session_fetch_backoff(retries: usize) -> ExponentialBuilder {
    ExponentialBuilder::default()
        .with_min_delay(Duration::from_millis(100))
        .with_max_delay(Duration::from_secs(2))
        .with_max_times(retries)
        .with_jitter()
}

/// Fixed-delay backoff for direct device notifications
#[must_use]
pub fn delivery_backoff(attempts: usize, delay: Duration) -> ConstantBuilder {
    ConstantBuilder::default()
        .with_delay(delay)
        .with_max_times(attempts.saturating_sub(1))
}

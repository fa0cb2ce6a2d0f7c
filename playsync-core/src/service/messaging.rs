//! Outbound messaging seam of the sync engine
//!
//! The transport (WebSocket hub, cluster bus, ...) lives outside this crate.

use backon::Retryable;
use std::time::Duration;
use tracing::warn;

use crate::{
    models::{DeviceId, SessionId, SyncMessage},
    resilience, Result,
};

/// Delivers sync messages to connected devices.
///
/// Implementations must not block: both calls hand the message off and
/// return immediately.
pub trait SyncMessenger: Send + Sync {
    /// Best-effort delivery to every device of a session
    fn broadcast(&self, session_id: &SessionId, message: &SyncMessage);

    /// Delivery to one device. Fails with `Messaging` when the device has no
    /// live connection.
    fn send_to_device(
        &self,
        session_id: &SessionId,
        device_id: &DeviceId,
        message: &SyncMessage,
    ) -> Result<()>;
}

/// Messenger that drops everything, for headless deployments
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopMessenger;

impl SyncMessenger for NoopMessenger {
    fn broadcast(&self, _session_id: &SessionId, _message: &SyncMessage) {}

    fn send_to_device(
        &self,
        _session_id: &SessionId,
        _device_id: &DeviceId,
        _message: &SyncMessage,
    ) -> Result<()> {
        Ok(())
    }
}

/// Send to one device, retrying with a fixed delay.
///
/// `attempts` counts the first try.
pub async fn deliver_with_retry(
    messenger: &dyn SyncMessenger,
    session_id: &SessionId,
    device_id: &DeviceId,
    message: &SyncMessage,
    attempts: usize,
    delay: Duration,
) -> Result<()> {
    (|| async { messenger.send_to_device(session_id, device_id, message) })
        .retry(resilience::delivery_backoff(attempts, delay))
        .notify(|err, after| {
            warn!(
                session_id = %session_id,
                device_id = %device_id,
                event = message.event_type(),
                error = %err,
                retry_in = ?after,
                "Direct delivery failed, retrying"
            );
        })
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;
    use chrono::Utc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Fails the first `failures` sends
    struct FlakyMessenger {
        failures: usize,
        calls: AtomicUsize,
    }

    impl SyncMessenger for FlakyMessenger {
        fn broadcast(&self, _session_id: &SessionId, _message: &SyncMessage) {}

        fn send_to_device(
            &self,
            _session_id: &SessionId,
            _device_id: &DeviceId,
            _message: &SyncMessage,
        ) -> Result<()> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                Err(Error::Messaging("device offline".to_string()))
            } else {
                Ok(())
            }
        }
    }

    fn message() -> SyncMessage {
        SyncMessage::ConflictResolved {
            session_id: SessionId::from("s1"),
            device_id: DeviceId::from("tv"),
            strategy: "latest_wins".to_string(),
            position: 10.0,
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_retry_until_delivered() {
        let messenger = FlakyMessenger {
            failures: 2,
            calls: AtomicUsize::new(0),
        };
        let result = deliver_with_retry(
            &messenger,
            &SessionId::from("s1"),
            &DeviceId::from("tv"),
            &message(),
            3,
            Duration::from_millis(1),
        )
        .await;
        assert!(result.is_ok());
        assert_eq!(messenger.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_is_bounded() {
        let messenger = FlakyMessenger {
            failures: usize::MAX,
            calls: AtomicUsize::new(0),
        };
        let result = deliver_with_retry(
            &messenger,
            &SessionId::from("s1"),
            &DeviceId::from("tv"),
            &message(),
            3,
            Duration::from_millis(1),
        )
        .await;
        assert!(matches!(result, Err(Error::Messaging(_))));
        assert_eq!(messenger.calls.load(Ordering::SeqCst), 3);
    }
}

use dashmap::DashMap;
use playsync_core::{
    models::{DeviceId, SessionId, SyncMessage},
    service::SyncMessenger,
    Error, Result,
};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Handle for a device connection subscription
pub type ConnectionId = String;

/// Message sender for a device connection
pub type MessageSender = mpsc::UnboundedSender<SyncMessage>;

#[derive(Debug, Clone)]
pub struct Subscriber {
    pub connection_id: ConnectionId,
    pub device_id: DeviceId,
    pub sender: MessageSender,
}

/// In-memory hub routing sync messages to the devices connected to this node.
///
/// A device may hold several connections (tabs, reconnect overlap); every
/// live one receives its messages.
#[derive(Clone, Default)]
pub struct DeviceMessageHub {
    /// session_id -> subscribers
    sessions: Arc<DashMap<SessionId, Vec<Subscriber>>>,

    /// connection_id -> (session_id, device_id) for cleanup
    connections: Arc<DashMap<ConnectionId, (SessionId, DeviceId)>>,
}

impl DeviceMessageHub {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fresh connection id for [`Self::subscribe`]
    #[must_use]
    pub fn new_connection_id() -> ConnectionId {
        nanoid::nanoid!(16)
    }

    /// Subscribe a device connection to its session's messages
    pub fn subscribe(
        &self,
        session_id: SessionId,
        device_id: DeviceId,
        connection_id: ConnectionId,
    ) -> mpsc::UnboundedReceiver<SyncMessage> {
        let (tx, rx) = mpsc::unbounded_channel();

        self.sessions
            .entry(session_id.clone())
            .or_default()
            .push(Subscriber {
                connection_id: connection_id.clone(),
                device_id: device_id.clone(),
                sender: tx,
            });
        self.connections
            .insert(connection_id.clone(), (session_id.clone(), device_id.clone()));

        info!(
            session_id = %session_id,
            device_id = %device_id,
            connection_id = %connection_id,
            "Device subscribed to session"
        );
        rx
    }

    pub fn unsubscribe(&self, connection_id: &str) {
        let Some((_, (session_id, device_id))) = self.connections.remove(connection_id) else {
            warn!(connection_id = %connection_id, "Attempted to unsubscribe unknown connection");
            return;
        };

        if let Some(mut subscribers) = self.sessions.get_mut(&session_id) {
            subscribers.retain(|sub| sub.connection_id != connection_id);
            if subscribers.is_empty() {
                drop(subscribers);
                self.sessions.remove_if(&session_id, |_, subs| subs.is_empty());
                debug!(session_id = %session_id, "Session has no more subscribers, removed");
            }
        }

        info!(
            session_id = %session_id,
            device_id = %device_id,
            connection_id = %connection_id,
            "Device unsubscribed from session"
        );
    }

    /// Send to every connection of the session; returns how many accepted it
    pub fn publish(&self, session_id: &SessionId, message: &SyncMessage) -> usize {
        self.publish_filtered(session_id, message, |_| true)
    }

    /// Send to every connection one device holds in the session
    pub fn publish_to_device(
        &self,
        session_id: &SessionId,
        device_id: &DeviceId,
        message: &SyncMessage,
    ) -> usize {
        self.publish_filtered(session_id, message, |sub| &sub.device_id == device_id)
    }

    fn publish_filtered<F>(&self, session_id: &SessionId, message: &SyncMessage, filter: F) -> usize
    where
        F: Fn(&Subscriber) -> bool,
    {
        let mut sent_count = 0;
        let mut failed_connections = Vec::new();

        if let Some(subscribers) = self.sessions.get(session_id) {
            for subscriber in subscribers.iter().filter(|sub| filter(sub)) {
                match subscriber.sender.send(message.clone()) {
                    Ok(()) => sent_count += 1,
                    Err(err) => {
                        warn!(
                            session_id = %session_id,
                            device_id = %subscriber.device_id,
                            connection_id = %subscriber.connection_id,
                            error = %err,
                            "Failed to send message to device, marking for cleanup"
                        );
                        failed_connections.push(subscriber.connection_id.clone());
                    }
                }
            }
        }

        for conn_id in failed_connections {
            self.unsubscribe(&conn_id);
        }

        if sent_count > 0 {
            debug!(
                session_id = %session_id,
                sent_count,
                event_type = message.event_type(),
                "Message delivered"
            );
        }
        sent_count
    }

    #[must_use]
    pub fn subscriber_count(&self, session_id: &SessionId) -> usize {
        self.sessions.get(session_id).map_or(0, |subs| subs.len())
    }

    #[must_use]
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Devices with at least one live connection in the session
    #[must_use]
    pub fn connected_devices(&self, session_id: &SessionId) -> Vec<DeviceId> {
        let mut devices: Vec<DeviceId> = self
            .sessions
            .get(session_id)
            .map(|subs| subs.iter().map(|sub| sub.device_id.clone()).collect())
            .unwrap_or_default();
        devices.sort();
        devices.dedup();
        devices
    }
}

impl SyncMessenger for DeviceMessageHub {
    fn broadcast(&self, session_id: &SessionId, message: &SyncMessage) {
        self.publish(session_id, message);
    }

    fn send_to_device(
        &self,
        session_id: &SessionId,
        device_id: &DeviceId,
        message: &SyncMessage,
    ) -> Result<()> {
        if self.publish_to_device(session_id, device_id, message) == 0 {
            return Err(Error::Messaging(format!(
                "Device {device_id} has no live connection in session {session_id}"
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn position(session: &SessionId, target: &str) -> SyncMessage {
        SyncMessage::PositionUpdate {
            session_id: session.clone(),
            source_device_id: DeviceId::from("phone"),
            target_device_id: DeviceId::from(target),
            position: 42.0,
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_subscribe_and_publish() {
        let hub = DeviceMessageHub::new();
        let session = SessionId::from("s1");
        let mut rx = hub.subscribe(session.clone(), DeviceId::from("tv"), "conn1".to_string());

        assert_eq!(hub.subscriber_count(&session), 1);
        assert_eq!(hub.connection_count(), 1);

        assert_eq!(hub.publish(&session, &position(&session, "tv")), 1);
        let received = rx.recv().await.unwrap();
        assert_eq!(received.event_type(), "position_update");
    }

    #[tokio::test]
    async fn test_unsubscribe_cleans_up() {
        let hub = DeviceMessageHub::new();
        let session = SessionId::from("s1");
        let _rx = hub.subscribe(session.clone(), DeviceId::from("tv"), "conn1".to_string());

        hub.unsubscribe("conn1");
        assert_eq!(hub.subscriber_count(&session), 0);
        assert_eq!(hub.connection_count(), 0);
        assert_eq!(hub.session_count(), 0);
    }

    #[tokio::test]
    async fn test_send_to_device_targets_one_device() {
        let hub = DeviceMessageHub::new();
        let session = SessionId::from("s1");
        let mut tv = hub.subscribe(session.clone(), DeviceId::from("tv"), "conn-tv".to_string());
        let mut web = hub.subscribe(session.clone(), DeviceId::from("web"), "conn-web".to_string());

        hub.send_to_device(&session, &DeviceId::from("tv"), &position(&session, "tv"))
            .unwrap();

        let received = tokio::time::timeout(std::time::Duration::from_millis(100), tv.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(received.event_type(), "position_update");

        let nothing = tokio::time::timeout(std::time::Duration::from_millis(50), web.recv()).await;
        assert!(nothing.is_err(), "web should not have received the message");
    }

    #[tokio::test]
    async fn test_offline_device_is_an_error() {
        let hub = DeviceMessageHub::new();
        let session = SessionId::from("s1");
        let result = hub.send_to_device(&session, &DeviceId::from("tv"), &position(&session, "tv"));
        assert!(matches!(result, Err(Error::Messaging(_))));
    }

    #[tokio::test]
    async fn test_dropped_receivers_are_pruned() {
        let hub = DeviceMessageHub::new();
        let session = SessionId::from("s1");
        let rx = hub.subscribe(session.clone(), DeviceId::from("tv"), "conn1".to_string());
        let _rx2 = hub.subscribe(session.clone(), DeviceId::from("web"), "conn2".to_string());
        drop(rx);

        assert_eq!(hub.publish(&session, &position(&session, "tv")), 1);
        assert_eq!(hub.connection_count(), 1);
        assert_eq!(hub.connected_devices(&session), vec![DeviceId::from("web")]);
    }
}

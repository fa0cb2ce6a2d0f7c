//! Test helpers and fixtures for playsync-core tests

use parking_lot::Mutex;

use crate::{
    models::{DeviceId, SessionId, SyncMessage},
    service::messaging::SyncMessenger,
    Result,
};

/// Messenger that records everything it is asked to deliver
#[derive(Default)]
pub struct RecordingMessenger {
    broadcasts: Mutex<Vec<(SessionId, SyncMessage)>>,
    direct: Mutex<Vec<(DeviceId, SyncMessage)>>,
}

impl RecordingMessenger {
    pub fn broadcast_count(&self) -> usize {
        self.broadcasts.lock().len()
    }

    pub fn direct_count(&self) -> usize {
        self.direct.lock().len()
    }

    pub fn broadcast_messages(&self) -> Vec<SyncMessage> {
        self.broadcasts.lock().iter().map(|(_, m)| m.clone()).collect()
    }

    pub fn direct_messages(&self) -> Vec<SyncMessage> {
        self.direct.lock().iter().map(|(_, m)| m.clone()).collect()
    }
}

impl SyncMessenger for RecordingMessenger {
    fn broadcast(&self, session_id: &SessionId, message: &SyncMessage) {
        self.broadcasts
            .lock()
            .push((session_id.clone(), message.clone()));
    }

    fn send_to_device(
        &self,
        _session_id: &SessionId,
        device_id: &DeviceId,
        message: &SyncMessage,
    ) -> Result<()> {
        self.direct.lock().push((device_id.clone(), message.clone()));
        Ok(())
    }
}

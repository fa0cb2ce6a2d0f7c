// Module: sync

pub mod device_hub;

pub use device_hub::{ConnectionId, DeviceMessageHub, MessageSender, Subscriber};

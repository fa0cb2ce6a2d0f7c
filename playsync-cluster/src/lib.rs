//! Local fan-out of sync messages to connected devices

pub mod sync;

pub use sync::{ConnectionId, DeviceMessageHub, MessageSender, Subscriber};

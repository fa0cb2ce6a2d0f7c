pub mod id;
pub mod message;
pub mod platform;
pub mod playback;
pub mod stream_token;
pub mod sync_state;

pub use id::{generate_id, DeviceId, SessionId, UserId, VideoId};
pub use message::SyncMessage;
pub use platform::{Platform, VideoQuality};
pub use playback::PlaybackSession;
pub use stream_token::StreamToken;
pub use sync_state::{
    ConflictInfo, ConflictKind, ErrorSeverity, SyncData, SyncErrorRecord, SyncMetrics,
    SyncStatus, SynchronizationState, UiSettings,
};

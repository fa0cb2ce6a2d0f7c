pub mod byte_range;
pub mod capability;
pub mod catalog;
pub mod conflict;
pub mod messaging;
pub mod scheduler;
pub mod stream_token;
pub mod sync_engine;

pub use byte_range::ByteRange;
pub use capability::{CapabilityLookup, StaticCapabilityProfile};
pub use catalog::{FsMediaCatalog, MediaCatalog, MediaFile};
pub use conflict::{ConflictContext, ConflictResolver, ResolutionStrategy};
pub use messaging::{deliver_with_retry, NoopMessenger, SyncMessenger};
pub use scheduler::{SchedulerConfig, SyncScheduler};
pub use stream_token::{SignedStreamParams, SignedStreamUrl, StreamTokenService};
pub use sync_engine::{
    ForceSyncReport, HealthStatus, HealthSummary, PropagationReport, ReconcileReport,
    SkipReason, SkippedReplica, SyncEngine, SyncEngineConfig, SyncUpdate,
};

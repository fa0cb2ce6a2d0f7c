// PlaySync API Library
//
// HTTP and WebSocket surface over the playsync-core services

pub mod http;
pub mod observability;

// Re-export commonly used types
pub use http::{create_router, AppState};

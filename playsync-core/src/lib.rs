//! PlaySync core: stream tokens, byte-range delivery helpers, replica
//! storage and the cross-device sync engine.

pub mod config;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod models;
pub mod repository;
pub mod resilience;
pub mod service;

#[cfg(test)]
pub mod test_helpers;

pub use config::Config;
pub use error::{Error, Result};

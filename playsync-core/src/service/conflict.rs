//! Conflict resolution strategies

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::{
    models::{PlaybackSession, SynchronizationState},
    Error, Result,
};

/// Evidence keys recorded when a position conflict is flagged
pub mod evidence {
    pub const BASE_POSITION: &str = "base_position";
    pub const CURRENT_POSITION: &str = "current_position";
    pub const DELTA: &str = "delta";
    pub const BASE_DEVICE_ID: &str = "base_device_id";
    pub const BASE_UPDATED_AT: &str = "base_updated_at";
}

/// Everything a strategy may look at when settling a conflict
#[derive(Debug, Clone, Copy)]
pub struct ConflictContext<'a> {
    pub conflicted: &'a SynchronizationState,
    /// Replica the conflict was measured against, if it still exists
    pub reference: Option<&'a SynchronizationState>,
    /// Authoritative state; present only when the strategy asks for it
    pub session: Option<&'a PlaybackSession>,
}

impl ConflictContext<'_> {
    /// Reference position: live replica first, recorded evidence otherwise
    #[must_use]
    pub fn reference_position(&self) -> Option<f64> {
        self.reference
            .map(|r| r.sync_data.position)
            .or_else(|| self.conflicted.conflict.evidence_f64(evidence::BASE_POSITION))
    }

    #[must_use]
    pub fn reference_updated_at(&self) -> Option<DateTime<Utc>> {
        self.reference.map(|r| r.updated_at).or_else(|| {
            self.conflicted
                .conflict
                .evidence
                .get(evidence::BASE_UPDATED_AT)
                .and_then(|v| v.as_str())
                .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
                .map(|dt| dt.with_timezone(&Utc))
        })
    }
}

/// Picks the position a conflicted replica should settle on
pub trait ConflictResolver: Send + Sync {
    fn name(&self) -> &str;

    /// Whether [`ConflictContext::session`] must be populated
    fn requires_session(&self) -> bool {
        false
    }

    fn resolve(&self, ctx: &ConflictContext<'_>) -> Result<f64>;
}

/// Built-in strategies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionStrategy {
    /// The replica updated most recently keeps its position; ties keep the
    /// conflicted replica's own position. A reference left out of tolerance is
    /// moved onto the settled position by the engine.
    #[default]
    LatestWins,
    /// Adopt the reference replica's position
    ReferenceWins,
    /// Adopt the authoritative session position
    SessionWins,
}

impl ResolutionStrategy {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::LatestWins => "latest_wins",
            Self::ReferenceWins => "reference_wins",
            Self::SessionWins => "session_wins",
        }
    }
}

impl FromStr for ResolutionStrategy {
    type Err = Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "latest_wins" | "latest" => Ok(Self::LatestWins),
            "reference_wins" | "reference" => Ok(Self::ReferenceWins),
            "session_wins" | "session" => Ok(Self::SessionWins),
            other => Err(Error::InvalidInput(format!(
                "Unknown resolution strategy: {other}"
            ))),
        }
    }
}

impl ConflictResolver for ResolutionStrategy {
    fn name(&self) -> &str {
        self.as_str()
    }

    fn requires_session(&self) -> bool {
        matches!(self, Self::SessionWins)
    }

    fn resolve(&self, ctx: &ConflictContext<'_>) -> Result<f64> {
        let own = ctx.conflicted.sync_data.position;
        match self {
            Self::LatestWins => {
                let reference_is_newer = ctx
                    .reference_updated_at()
                    .is_some_and(|at| at > ctx.conflicted.updated_at);
                Ok(if reference_is_newer {
                    ctx.reference_position().unwrap_or(own)
                } else {
                    own
                })
            }
            Self::ReferenceWins => ctx.reference_position().ok_or_else(|| {
                Error::Internal("Conflict evidence has no reference position".to_string())
            }),
            Self::SessionWins => ctx.session.map(|s| s.position).ok_or_else(|| {
                Error::Internal("Session-wins resolution without session state".to_string())
            }),
        }
    }
}

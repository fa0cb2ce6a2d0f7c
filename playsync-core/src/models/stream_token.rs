use base64::Engine;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::id::{UserId, VideoId};
use super::platform::VideoQuality;
use crate::{Error, Result};

/// Signed, time-boxed, quality-scoped stream access credential.
///
/// Never persisted and never updated; a new token is issued per playback
/// request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamToken {
    pub video_id: VideoId,
    pub user_id: UserId,
    /// Unix timestamp (seconds)
    pub expires_at: i64,
    pub quality: VideoQuality,
    /// base64url (no padding) MAC output
    pub signature: String,
}

impl StreamToken {
    /// Canonical signing input `videoId:userId:expiryUnix:quality`.
    ///
    /// Tokens issued by earlier deployments were signed over exactly this
    /// string; changing it invalidates every outstanding URL.
    #[must_use]
    pub fn signing_input(
        video_id: &VideoId,
        user_id: &UserId,
        expires_at: i64,
        quality: VideoQuality,
    ) -> String {
        format!(
            "{}:{}:{}:{}",
            video_id.as_str(),
            user_id.as_str(),
            expires_at,
            quality.as_str()
        )
    }

    #[must_use]
    pub fn canonical_input(&self) -> String {
        Self::signing_input(&self.video_id, &self.user_id, self.expires_at, self.quality)
    }

    #[must_use]
    pub fn expires_at_datetime(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(self.expires_at, 0)
    }

    /// Compact opaque form handed to clients (base64url of the JSON fields)
    pub fn encode(&self) -> Result<String> {
        let json = serde_json::to_vec(self)?;
        Ok(base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(json))
    }

    /// Parse the compact form. Undecodable input is reported as a bad signature.
    pub fn decode(encoded: &str) -> Result<Self> {
        let bytes = base64::engine::general_purpose::URL_SAFE_NO_PAD
            .decode(encoded.trim())
            .map_err(|_| Error::BadSignature)?;
        serde_json::from_slice(&bytes).map_err(|_| Error::BadSignature)
    }
}

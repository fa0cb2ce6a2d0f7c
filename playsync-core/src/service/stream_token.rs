//! Stream token authority
//!
//! Issues and validates signed, time-boxed, quality-scoped credentials for a
//! (video, user) pair. Stateless: every check is a recomputation of the
//! HMAC-SHA256 over `videoId:userId:expiryUnix:quality`.

use base64::Engine;
use chrono::{DateTime, Duration, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use tracing::debug;

use crate::{
    config::StreamingConfig,
    metrics,
    models::{StreamToken, UserId, VideoId, VideoQuality},
    Error, Result,
};

type HmacSha256 = Hmac<Sha256>;

/// Query parameters carried by a signed stream URL.
///
/// `token` is the base64 of the user id (encoded, not encrypted).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SignedStreamParams {
    pub token: Option<String>,
    pub expires: Option<i64>,
    pub quality: Option<String>,
    pub signature: Option<String>,
}

impl SignedStreamParams {
    /// Rebuild the token the URL was signed for.
    ///
    /// Anything missing or undecodable is reported as a bad signature so
    /// callers cannot tell which part was wrong.
    pub fn into_token(self, video_id: VideoId) -> Result<StreamToken> {
        let (Some(token), Some(expires_at), Some(quality), Some(signature)) =
            (self.token, self.expires, self.quality, self.signature)
        else {
            return Err(Error::BadSignature);
        };

        let user_bytes = base64::engine::general_purpose::STANDARD
            .decode(token.as_bytes())
            .map_err(|_| Error::BadSignature)?;
        let user_id = String::from_utf8(user_bytes).map_err(|_| Error::BadSignature)?;
        let quality = quality
            .parse::<VideoQuality>()
            .map_err(|_| Error::BadSignature)?;

        Ok(StreamToken {
            video_id,
            user_id: UserId::from(user_id),
            expires_at,
            quality,
            signature,
        })
    }
}

/// A freshly issued signed URL together with the token it encodes
#[derive(Debug, Clone)]
pub struct SignedStreamUrl {
    pub url: String,
    pub token: StreamToken,
}

#[derive(Clone)]
pub struct StreamTokenService {
    secret: Vec<u8>,
    ttl: Duration,
    public_base_url: String,
}

impl std::fmt::Debug for StreamTokenService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamTokenService")
            .field("secret", &"[REDACTED]")
            .field("ttl", &self.ttl)
            .field("public_base_url", &self.public_base_url)
            .finish()
    }
}

impl StreamTokenService {
    pub const DEFAULT_TTL_SECONDS: i64 = 7200;

    #[must_use]
    pub fn new(secret: impl Into<Vec<u8>>, ttl: Duration, public_base_url: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
            ttl,
            public_base_url: public_base_url.into().trim_end_matches('/').to_string(),
        }
    }

    #[must_use]
    pub fn from_config(config: &StreamingConfig) -> Self {
        let ttl_seconds =
            i64::try_from(config.token_ttl_seconds).unwrap_or(Self::DEFAULT_TTL_SECONDS);
        Self::new(
            config.token_secret.as_bytes().to_vec(),
            Duration::seconds(ttl_seconds),
            config.public_base_url.clone(),
        )
    }

    #[must_use]
    pub const fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Issue a token expiring `ttl` from now
    pub fn issue(
        &self,
        video_id: &VideoId,
        user_id: &UserId,
        quality: VideoQuality,
    ) -> Result<StreamToken> {
        self.issue_at(video_id, user_id, quality, Utc::now())
    }

    pub fn issue_at(
        &self,
        video_id: &VideoId,
        user_id: &UserId,
        quality: VideoQuality,
        now: DateTime<Utc>,
    ) -> Result<StreamToken> {
        let expires_at = (now + self.ttl).timestamp();
        let signature = self.sign(&StreamToken::signing_input(
            video_id, user_id, expires_at, quality,
        ))?;

        metrics::stream::TOKENS_ISSUED
            .with_label_values(&[quality.as_str()])
            .inc();
        debug!(video_id = %video_id, user_id = %user_id, quality = %quality, expires_at, "Issued stream token");

        Ok(StreamToken {
            video_id: video_id.clone(),
            user_id: user_id.clone(),
            expires_at,
            quality,
            signature,
        })
    }

    /// Check signature, then expiry
    pub fn validate(&self, token: &StreamToken) -> Result<()> {
        self.validate_at(token, Utc::now())
    }

    pub fn validate_at(&self, token: &StreamToken, now: DateTime<Utc>) -> Result<()> {
        let result = self.check(token, now);
        let outcome = match &result {
            Ok(()) => "ok",
            Err(Error::TokenExpired) => "expired",
            Err(_) => "bad_signature",
        };
        metrics::stream::TOKEN_VALIDATIONS
            .with_label_values(&[outcome])
            .inc();
        result
    }

    fn check(&self, token: &StreamToken, now: DateTime<Utc>) -> Result<()> {
        let expected = self.sign(&token.canonical_input())?;
        if !bool::from(expected.as_bytes().ct_eq(token.signature.as_bytes())) {
            return Err(Error::BadSignature);
        }
        if now.timestamp() > token.expires_at {
            return Err(Error::TokenExpired);
        }
        Ok(())
    }

    /// Issue a token and render it as a `/stream/secure` URL
    pub fn issue_signed_url(
        &self,
        video_id: &VideoId,
        user_id: &UserId,
        quality: VideoQuality,
    ) -> Result<SignedStreamUrl> {
        let token = self.issue(video_id, user_id, quality)?;
        let url = self.signed_url_for(&token);
        Ok(SignedStreamUrl { url, token })
    }

    #[must_use]
    pub fn signed_url_for(&self, token: &StreamToken) -> String {
        let encoded_user =
            base64::engine::general_purpose::STANDARD.encode(token.user_id.as_str().as_bytes());
        let query = url::form_urlencoded::Serializer::new(String::new())
            .append_pair("token", &encoded_user)
            .append_pair("expires", &token.expires_at.to_string())
            .append_pair("quality", token.quality.as_str())
            .append_pair("signature", &token.signature)
            .finish();
        format!(
            "{}/api/videos/{}/stream/secure?{query}",
            self.public_base_url,
            url::form_urlencoded::byte_serialize(token.video_id.as_str().as_bytes())
                .collect::<String>()
        )
    }

    fn sign(&self, input: &str) -> Result<String> {
        let mut mac = HmacSha256::new_from_slice(&self.secret)
            .map_err(|e| Error::Internal(format!("Failed to create HMAC: {e}")))?;
        mac.update(input.as_bytes());
        Ok(base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes()))
    }
}

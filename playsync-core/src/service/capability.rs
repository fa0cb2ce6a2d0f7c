use crate::models::{Platform, VideoQuality};

/// Decides whether a platform can render a given rendition.
///
/// Consulted before a quality change is propagated to a peer; a negative
/// answer skips that peer silently.
pub trait CapabilityLookup: Send + Sync {
    fn can_play_quality(&self, platform: Platform, quality: VideoQuality) -> bool;
}

/// Fixed per-platform ceilings
#[derive(Debug, Clone)]
pub struct StaticCapabilityProfile {
    pub web: VideoQuality,
    pub mobile: VideoQuality,
    pub tv: VideoQuality,
    pub desktop: VideoQuality,
}

impl Default for StaticCapabilityProfile {
    fn default() -> Self {
        Self {
            web: VideoQuality::P1440,
            mobile: VideoQuality::P1080,
            tv: VideoQuality::P2160,
            desktop: VideoQuality::P2160,
        }
    }
}

impl StaticCapabilityProfile {
    #[must_use]
    pub const fn max_quality(&self, platform: Platform) -> VideoQuality {
        match platform {
            Platform::Web => self.web,
            Platform::Mobile => self.mobile,
            Platform::Tv => self.tv,
            Platform::Desktop => self.desktop,
        }
    }
}

impl CapabilityLookup for StaticCapabilityProfile {
    fn can_play_quality(&self, platform: Platform, quality: VideoQuality) -> bool {
        quality == VideoQuality::Auto || quality <= self.max_quality(platform)
    }
}

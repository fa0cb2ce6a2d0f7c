use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::Error;

/// Client platform a replica runs on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Platform {
    Web,
    Mobile,
    Tv,
    Desktop,
}

impl Platform {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Web => "web",
            Self::Mobile => "mobile",
            Self::Tv => "tv",
            Self::Desktop => "desktop",
        }
    }
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Platform {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "web" => Ok(Self::Web),
            "mobile" | "phone" | "ios" | "android" => Ok(Self::Mobile),
            "tv" => Ok(Self::Tv),
            "desktop" => Ok(Self::Desktop),
            other => Err(Error::InvalidInput(format!("Unknown platform: {other}"))),
        }
    }
}

/// Requested rendition quality.
///
/// Variants are ordered by vertical resolution; `Auto` lets the player pick
/// and sorts lowest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum VideoQuality {
    #[serde(rename = "auto")]
    Auto,
    #[serde(rename = "240p")]
    P240,
    #[serde(rename = "360p")]
    P360,
    #[serde(rename = "480p")]
    P480,
    #[serde(rename = "720p")]
    P720,
    #[serde(rename = "1080p")]
    P1080,
    #[serde(rename = "1440p")]
    P1440,
    #[serde(rename = "2160p")]
    P2160,
}

impl VideoQuality {
    pub const ALL: [Self; 8] = [
        Self::Auto,
        Self::P240,
        Self::P360,
        Self::P480,
        Self::P720,
        Self::P1080,
        Self::P1440,
        Self::P2160,
    ];

    /// Canonical tag, also used as the signed quality field of stream tokens
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::P240 => "240p",
            Self::P360 => "360p",
            Self::P480 => "480p",
            Self::P720 => "720p",
            Self::P1080 => "1080p",
            Self::P1440 => "1440p",
            Self::P2160 => "2160p",
        }
    }
}

impl Default for VideoQuality {
    fn default() -> Self {
        Self::Auto
    }
}

impl std::fmt::Display for VideoQuality {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for VideoQuality {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase();
        Self::ALL
            .into_iter()
            .find(|q| q.as_str() == normalized)
            .or(match normalized.as_str() {
                "4k" => Some(Self::P2160),
                "hd" => Some(Self::P720),
                "fhd" => Some(Self::P1080),
                _ => None,
            })
            .ok_or_else(|| Error::InvalidInput(format!("Unknown quality: {s}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quality_round_trips_through_tag() {
        for quality in VideoQuality::ALL {
            assert_eq!(quality.as_str().parse::<VideoQuality>().unwrap(), quality);
        }
    }

    #[test]
    fn test_quality_aliases() {
        assert_eq!("4K".parse::<VideoQuality>().unwrap(), VideoQuality::P2160);
        assert!("8k".parse::<VideoQuality>().is_err());
    }

    #[test]
    fn test_quality_ordering() {
        assert!(VideoQuality::P2160 > VideoQuality::P1080);
        assert!(VideoQuality::Auto < VideoQuality::P240);
    }

    #[test]
    fn test_platform_parse() {
        assert_eq!("TV".parse::<Platform>().unwrap(), Platform::Tv);
        assert_eq!("android".parse::<Platform>().unwrap(), Platform::Mobile);
        assert!("fridge".parse::<Platform>().is_err());
    }

    #[test]
    fn test_quality_serde_tag() {
        let json = serde_json::to_string(&VideoQuality::P1080).unwrap();
        assert_eq!(json, "\"1080p\"");
    }
}

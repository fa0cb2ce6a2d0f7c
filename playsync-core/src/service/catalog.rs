//! Media catalog lookup for the delivery gate

use async_trait::async_trait;
use std::path::{Path, PathBuf};

use crate::{
    models::{VideoId, VideoQuality},
    Error, Result,
};

/// A playable file resolved for (video, quality)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaFile {
    pub path: PathBuf,
    pub size: u64,
    pub content_type: &'static str,
}

/// Read-only view of the video catalog
#[async_trait]
pub trait MediaCatalog: Send + Sync {
    /// `NotFound` when no rendition exists for the pair
    async fn resolve(&self, video_id: &VideoId, quality: VideoQuality) -> Result<MediaFile>;

    async fn has_video(&self, video_id: &VideoId) -> Result<bool>;
}

const EXTENSIONS: [(&str, &str); 4] = [
    ("mp4", "video/mp4"),
    ("webm", "video/webm"),
    ("mkv", "video/x-matroska"),
    ("ts", "video/mp2t"),
];

/// Catalog laid out as `{root}/{video_id}/{quality}.{mp4|webm|mkv|ts}`
#[derive(Debug, Clone)]
pub struct FsMediaCatalog {
    root: PathBuf,
}

impl FsMediaCatalog {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn video_dir(&self, video_id: &VideoId) -> Result<PathBuf> {
        let id = video_id.as_str();
        let safe = !id.is_empty()
            && !id.starts_with('.')
            && id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
        if !safe {
            return Err(Error::InvalidInput(format!("Invalid video id: {id}")));
        }
        Ok(self.root.join(id))
    }

    async fn find_rendition(dir: &Path, quality: VideoQuality) -> Result<Option<MediaFile>> {
        for (ext, content_type) in EXTENSIONS {
            let path = dir.join(format!("{}.{ext}", quality.as_str()));
            match tokio::fs::metadata(&path).await {
                Ok(meta) if meta.is_file() => {
                    return Ok(Some(MediaFile {
                        path,
                        size: meta.len(),
                        content_type,
                    }));
                }
                Ok(_) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(Error::Internal(format!("Media lookup failed: {e}"))),
            }
        }
        Ok(None)
    }
}

#[async_trait]
impl MediaCatalog for FsMediaCatalog {
    async fn resolve(&self, video_id: &VideoId, quality: VideoQuality) -> Result<MediaFile> {
        let dir = self.video_dir(video_id)?;

        if let Some(file) = Self::find_rendition(&dir, quality).await? {
            return Ok(file);
        }
        // `auto` without a dedicated file falls back to the best rendition present
        if quality == VideoQuality::Auto {
            for candidate in VideoQuality::ALL.into_iter().rev() {
                if let Some(file) = Self::find_rendition(&dir, candidate).await? {
                    return Ok(file);
                }
            }
        }

        Err(Error::NotFound(format!(
            "Video {video_id} has no {quality} rendition"
        )))
    }

    async fn has_video(&self, video_id: &VideoId) -> Result<bool> {
        let dir = self.video_dir(video_id)?;
        Ok(tokio::fs::metadata(&dir)
            .await
            .map(|meta| meta.is_dir())
            .unwrap_or(false))
    }
}

//! Media sources
//!
//! Where a job's audio comes from. Chat integrations implement [`MediaSource`]
//! over their attachment API; [`LocalFileSource`] serves files already on disk.

use async_trait::async_trait;
use std::path::{Path, PathBuf};

use super::PipelineError;

/// Metadata known before the media is fetched
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaInfo {
    /// Size in bytes as reported by the source
    pub size_bytes: u64,

    /// File extension used for the cached copy (without the dot)
    pub extension: String,
}

/// A single media attachment
#[async_trait]
pub trait MediaSource: Send + Sync {
    /// Size and type of the media
    async fn describe(&self) -> Result<MediaInfo, PipelineError>;

    /// Write the media to `dest`
    async fn fetch(&self, dest: &Path) -> Result<(), PipelineError>;
}

/// Media file on the local filesystem
#[derive(Debug, Clone)]
pub struct LocalFileSource {
    path: PathBuf,
}

impl LocalFileSource {
    /// Wrap a local file
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Source path
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl MediaSource for LocalFileSource {
    async fn describe(&self) -> Result<MediaInfo, PipelineError> {
        let metadata = tokio::fs::metadata(&self.path).await?;
        if !metadata.is_file() {
            return Err(PipelineError::InvalidMedia(format!(
                "{} is not a regular file",
                self.path.display()
            )));
        }

        let extension = self
            .path
            .extension()
            .map(|ext| ext.to_string_lossy().to_lowercase())
            .unwrap_or_else(|| "unknown".to_string());

        Ok(MediaInfo {
            size_bytes: metadata.len(),
            extension,
        })
    }

    async fn fetch(&self, dest: &Path) -> Result<(), PipelineError> {
        tokio::fs::copy(&self.path, dest).await?;
        Ok(())
    }
}

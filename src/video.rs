use std::io::Write;
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use tracing::debug;

use crate::Result;

/// A user-selected video, held in memory for the duration of one pipeline run.
#[derive(Debug, Clone)]
pub struct SourceVideo {
    /// Original file name, used for logging and preview naming
    pub name: String,

    /// Raw video bytes
    pub data: Vec<u8>,
}

impl SourceVideo {
    pub fn new(name: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            data,
        }
    }

    /// Load a video from disk, keeping the file name for display.
    pub async fn from_path(path: &Path) -> Result<Self> {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "video.mp4".to_string());
        let data = tokio::fs::read(path).await?;
        Ok(Self { name, data })
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Preview copy of the selected video, handed to a front end for playback.
///
/// Stands in for the browser object-URL of the original UI: acquired when a
/// file is selected, revoked when the handle is dropped. Backed by a named
/// temp file so every exit path (replace, remove, reset) releases it.
#[derive(Debug)]
pub struct VideoPreview {
    file: NamedTempFile,
}

impl VideoPreview {
    /// Write a preview copy of the video to a fresh temp file.
    pub fn create(video: &SourceVideo) -> Result<Self> {
        let mut file = tempfile::Builder::new()
            .prefix("upload-ai-preview-")
            .suffix(".mp4")
            .tempfile()?;
        file.write_all(&video.data)?;
        file.flush()?;

        debug!("preview created for {} at {}", video.name, file.path().display());
        Ok(Self { file })
    }

    /// Path a front end can point a player at while the handle is alive.
    pub fn path(&self) -> &Path {
        self.file.path()
    }

    pub fn path_buf(&self) -> PathBuf {
        self.file.path().to_path_buf()
    }
}

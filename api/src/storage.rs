//! Scratch storage for uploaded videos.
//!
//! Each upload gets its own directory under the system temp dir. The
//! directory is removed by [`TempUpload::cleanup`] or, failing that, when the
//! handle is dropped.

use std::io;
use std::path::{Path, PathBuf};

/// Container extension for an upload content type
pub fn get_extension(content_type: &str) -> &'static str {
    match content_type {
        "video/mp4" => "mp4",
        "video/webm" => "webm",
        "video/quicktime" => "mov",
        "video/x-msvideo" => "avi",
        "video/x-matroska" => "mkv",
        _ => "bin",
    }
}

#[derive(Debug)]
pub struct TempUpload {
    dir: PathBuf,
    path: PathBuf,
    removed: bool,
}

impl TempUpload {
    /// Write `data` to a fresh scratch directory
    pub async fn write(data: &[u8], content_type: &str) -> io::Result<Self> {
        let dir = std::env::temp_dir().join(format!("sign_upload_{}", rand::random::<u64>()));
        tokio::fs::create_dir_all(&dir).await?;

        let upload = Self {
            path: dir.join(format!("video.{}", get_extension(content_type))),
            dir,
            removed: false,
        };
        tokio::fs::write(&upload.path, data).await?;
        Ok(upload)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn cleanup(mut self) {
        if let Err(e) = tokio::fs::remove_dir_all(&self.dir).await {
            tracing::warn!(dir = %self.dir.display(), "Failed to remove upload dir: {}", e);
        }
        self.removed = true;
    }
}

impl Drop for TempUpload {
    fn drop(&mut self) {
        if !self.removed {
            let _ = std::fs::remove_dir_all(&self.dir);
        }
    }
}

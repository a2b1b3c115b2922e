//! Hand-off of finished tracks to the file system.

use std::path::{Path, PathBuf};
use tracing::info;

use crate::encoder::EncodedArtifact;
use crate::error::CaptureResult;
use crate::track::Track;

pub const EXTENSION: &str = "mp3";

/// Replace every character outside `[A-Za-z0-9]` with a space and trim
pub fn sanitize(segment: &str) -> String {
    segment
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { ' ' })
        .collect::<String>()
        .trim()
        .to_string()
}

/// Relative path for a track: `<prefix>[/<directory>]/<artist> - <title>.mp3`
pub fn track_filename(prefix: &str, track: &Track) -> PathBuf {
    let mut path = PathBuf::from(prefix);

    if let Some(directory) = track.directory.as_deref() {
        let directory = sanitize(directory);
        if !directory.is_empty() {
            path.push(directory);
        }
    }

    path.push(format!(
        "{} - {}.{}",
        sanitize(&track.artist),
        sanitize(&track.title),
        EXTENSION
    ));

    path
}

/// Receives each finished artifact exactly once
#[async_trait::async_trait]
pub trait Downloader: Send + Sync {
    /// Save `artifact` under `filename`, overwriting an existing file; returns where it went
    async fn save(&self, artifact: EncodedArtifact, filename: &Path) -> CaptureResult<PathBuf>;
}

/// Writes artifacts below a download directory
pub struct FileDownloader {
    root: PathBuf,
}

impl FileDownloader {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait::async_trait]
impl Downloader for FileDownloader {
    async fn save(&self, artifact: EncodedArtifact, filename: &Path) -> CaptureResult<PathBuf> {
        let path = self.root.join(filename);

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let reference = artifact.reference();
        tokio::fs::write(&path, artifact.into_bytes()).await?;

        info!("Saved {} ({}) to {}", reference, EncodedArtifact::MIME_TYPE, path.display());

        Ok(path)
    }
}

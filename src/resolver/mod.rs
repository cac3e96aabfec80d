use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("invalid video url: {0}")]
    InvalidUrl(String),
    #[error("resolution service error: {0}")]
    Service(String),
    #[error("no stream available for {0}")]
    NoStream(String),
}

/// A progressive-quality variant offered by the resolution service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamVariant {
    pub resolution: String,
    pub fps: u32,
}

impl fmt::Display for StreamVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({} fps)", self.resolution, self.fps)
    }
}

/// Boundary to an external video-resolution service. The download core
/// treats implementations as opaque: they own both stream negotiation and
/// the transfer of the chosen variant.
#[async_trait]
pub trait StreamResolver: Send + Sync {
    /// Lists the progressive variants available for a video URL.
    async fn variants(&self, video_url: &str) -> Result<Vec<StreamVariant>, ResolveError>;

    /// Downloads the chosen variant and returns the written file's path.
    async fn download(
        &self,
        video_url: &str,
        variant: &StreamVariant,
        output_dir: &Path,
    ) -> Result<PathBuf, ResolveError>;
}

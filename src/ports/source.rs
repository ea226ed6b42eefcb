use crate::domain::video::ArtifactInfo;
use crate::error::SourceError;
use async_trait::async_trait;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadRequest {
    CaptionsOnly,
    VideoOnly,
    Both,
}

impl DownloadRequest {
    pub fn captions(self) -> bool {
        matches!(self, DownloadRequest::CaptionsOnly | DownloadRequest::Both)
    }

    pub fn video(self) -> bool {
        matches!(self, DownloadRequest::VideoOnly | DownloadRequest::Both)
    }
}

/// Where the requested files were expected, and whether they showed up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Downloaded {
    pub captions: ArtifactInfo,
    pub video: ArtifactInfo,
}

/// Captions and video retrieval service.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MediaSource: Send + Sync {
    /// A missing artifact is not an error: it comes back with `exists: false`.
    async fn download(&self, video_id: &str, request: DownloadRequest) -> Result<Downloaded, SourceError>;
}

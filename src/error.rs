//! Error types, one per collaborator seam.

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while persisting pipeline checkpoints.
///
/// Read failures never surface here: an unreadable entry is a cache miss.
#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("failed to encode checkpoint '{key}': {source}")]
    Encode {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to persist checkpoint '{key}': {source}")]
    Persist {
        key: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid checkpoint key '{0}'")]
    InvalidKey(String),
}

/// Errors from the captions/video retrieval service.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("yt-dlp not found in PATH")]
    YtDlpNotFound,

    #[error("download of {video_id} failed: {message}")]
    DownloadFailed { video_id: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl SourceError {
    pub fn download_failed(video_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::DownloadFailed {
            video_id: video_id.into(),
            message: message.into(),
        }
    }
}

/// Errors from the channel catalog API.
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("channel '{0}' not found")]
    ChannelNotFound(String),

    #[error("invalid publish date '{0}'")]
    InvalidDate(String),
}

pub type MediaResult<T> = Result<T, MediaError>;

/// Errors from the media engine.
#[derive(Debug, Error)]
pub enum MediaError {
    #[error("FFmpeg not found in PATH")]
    FfmpegNotFound,

    #[error("FFmpeg command failed: {message}")]
    FfmpegFailed {
        message: String,
        stderr: Option<String>,
        exit_code: Option<i32>,
    },

    #[error("File not found: {0}")]
    FileNotFound(PathBuf),

    #[error("Invalid clip window [{start:.3}, {end:.3}]")]
    InvalidWindow { start: f64, end: f64 },

    #[error("Nothing to concatenate")]
    EmptyBatch,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl MediaError {
    pub fn ffmpeg_failed(
        message: impl Into<String>,
        stderr: Option<String>,
        exit_code: Option<i32>,
    ) -> Self {
        Self::FfmpegFailed {
            message: message.into(),
            stderr,
            exit_code,
        }
    }
}

/// Configuration errors, each naming the offending variable.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{name}: invalid value '{value}' ({reason})")]
    InvalidValue {
        name: String,
        value: String,
        reason: String,
    },

    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("invalid word pattern: {0}")]
    Pattern(#[from] regex::Error),
}

impl ConfigError {
    pub fn invalid(name: impl Into<String>, value: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            name: name.into(),
            value: value.into(),
            reason: reason.into(),
        }
    }
}

pub type CatchResult<T> = Result<T, CatchError>;

/// Errors that abort a whole run.
#[derive(Debug, Error)]
pub enum CatchError {
    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),

    #[error(transparent)]
    Catalog(#[from] CatalogError),

    #[error(transparent)]
    Media(#[from] MediaError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// A downloaded (or expected) file and whether it is actually on disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactInfo {
    pub exists: bool,
    pub path: PathBuf,
}

impl ArtifactInfo {
    pub fn new(path: impl Into<PathBuf>, exists: bool) -> Self {
        Self {
            exists,
            path: path.into(),
        }
    }

    /// Describe `path` as it currently is on disk.
    pub fn probe(path: &Path) -> Self {
        Self::new(path, path.is_file())
    }

    /// Whether the file is still there, regardless of what was recorded.
    pub fn on_disk(&self) -> bool {
        self.exists && self.path.is_file()
    }
}

/// One timed span of captions whose text matched the word pattern.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Occurrence {
    /// Seconds from the start of the video
    pub start: f64,
    /// Matched text, trimmed
    pub text: String,
    pub end: f64,
}

/// Result of the captions stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoMetadata {
    pub captions: ArtifactInfo,
}

/// Result of the occurrences stage.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct OccurrenceData {
    pub occurrences: Vec<Occurrence>,
    /// Estimated from the last caption timestamp
    pub duration: Option<f64>,
}

/// Result of the clips stage, with the occurrences the clips were cut from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClipsRecord {
    pub cut_from: Vec<Occurrence>,
    pub clips: Vec<PathBuf>,
}

impl ClipsRecord {
    /// Whether these clips were cut for exactly `occurrences`.
    pub fn matches(&self, occurrences: &[Occurrence]) -> bool {
        const EPSILON: f64 = 1e-6;
        self.clips.len() == occurrences.len()
            && self.cut_from.len() == occurrences.len()
            && self.cut_from.iter().zip(occurrences).all(|(a, b)| {
                a.text == b.text && (a.start - b.start).abs() < EPSILON && (a.end - b.end).abs() < EPSILON
            })
    }
}

/// Everything known about a video, filled in stage by stage.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct VideoData {
    pub captions: Option<ArtifactInfo>,
    pub video: Option<ArtifactInfo>,
    pub occurrences: Vec<Occurrence>,
    pub duration: Option<f64>,
    /// Aligned with `occurrences` by index when present
    pub clips: Option<Vec<PathBuf>>,
}

impl VideoData {
    /// Clip paths, only when they line up with the occurrences.
    pub fn aligned_clips(&self) -> Option<&[PathBuf]> {
        self.clips
            .as_deref()
            .filter(|clips| clips.len() == self.occurrences.len())
    }
}

/// A video of the channel, as listed by the catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Video {
    pub id: String,
    pub title: String,
    pub published_at: DateTime<Utc>,
    #[serde(skip)]
    pub data: Option<VideoData>,
}

impl Video {
    pub fn new(id: impl Into<String>, title: impl Into<String>, published_at: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            published_at,
            data: None,
        }
    }
}

pub fn watch_url(video_id: &str) -> String {
    format!("https://youtube.com/watch?v={video_id}")
}

/// Checkpoint keys of a single video.
pub mod keys {
    pub const CHANNEL_ID: &str = "channel_id";
    pub const VIDEOS: &str = "videos";
    pub const MERGE_QUEUE: &str = "build/merge_queue";

    pub fn metadata(video_id: &str) -> String {
        format!("videos/{video_id}/metadata")
    }

    pub fn occurrences(video_id: &str) -> String {
        format!("videos/{video_id}/occurrences")
    }

    pub fn clips(video_id: &str) -> String {
        format!("videos/{video_id}/clips")
    }
}

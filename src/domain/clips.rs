//! Ordered enumeration of every produced clip of a channel.

use crate::domain::video::Video;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::PathBuf;

/// Include/exclude sets of video ids. An empty include set admits everything.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VideoFilter {
    include: HashSet<String>,
    exclude: HashSet<String>,
}

impl VideoFilter {
    pub fn new<I, E>(include: I, exclude: E) -> Self
    where
        I: IntoIterator<Item = String>,
        E: IntoIterator<Item = String>,
    {
        Self {
            include: include.into_iter().collect(),
            exclude: exclude.into_iter().collect(),
        }
    }

    pub fn admits(&self, video_id: &str) -> bool {
        (self.include.is_empty() || self.include.contains(video_id))
            && !self.exclude.contains(video_id)
    }
}

/// One clip, tagged with where it sits in the channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClipRef {
    pub video_id: String,
    pub video_title: String,
    /// Start of the occurrence in the source video, in seconds
    pub spoken_at: f64,
    pub path: PathBuf,
    /// 1-based position within the video
    pub position: usize,
    /// 1-based position within the whole stream
    pub sequence: u64,
}

/// Lazy iterator over clips: videos by publish date, clips by index.
///
/// Videos without aligned clip data are skipped. Enumerating twice over the
/// same snapshot yields the same sequence.
pub struct ClipStream<'a> {
    videos: Vec<&'a Video>,
    video_idx: usize,
    clip_idx: usize,
    sequence: u64,
}

impl<'a> ClipStream<'a> {
    pub fn new(videos: &'a [Video], filter: &VideoFilter) -> Self {
        let mut videos: Vec<&Video> = videos.iter().filter(|v| filter.admits(&v.id)).collect();
        videos.sort_by_key(|v| v.published_at);
        Self {
            videos,
            video_idx: 0,
            clip_idx: 0,
            sequence: 0,
        }
    }
}

impl Iterator for ClipStream<'_> {
    type Item = ClipRef;

    fn next(&mut self) -> Option<ClipRef> {
        while let Some(&video) = self.videos.get(self.video_idx) {
            let data = video.data.as_ref();
            let clips = data.and_then(|d| d.aligned_clips()).unwrap_or(&[]);
            if let (Some(data), Some(path)) = (data, clips.get(self.clip_idx)) {
                let position = self.clip_idx + 1;
                self.clip_idx += 1;
                self.sequence += 1;
                return Some(ClipRef {
                    video_id: video.id.clone(),
                    video_title: video.title.clone(),
                    spoken_at: data.occurrences[position - 1].start,
                    path: path.clone(),
                    position,
                    sequence: self.sequence,
                });
            }
            self.video_idx += 1;
            self.clip_idx = 0;
        }
        None
    }
}

use crate::domain::clips::ClipRef;
use crate::domain::timestamp;
use crate::domain::video::watch_url;
use crate::logging::progress;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Output frame size every clip is scaled to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

impl FromStr for Resolution {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (w, h) = s
            .split_once(['x', 'X'])
            .ok_or_else(|| format!("expected WIDTHxHEIGHT, got '{s}'"))?;
        let width: u32 = w.trim().parse().map_err(|e| format!("width: {e}"))?;
        let height: u32 = h.trim().parse().map_err(|e| format!("height: {e}"))?;
        if width == 0 || height == 0 {
            return Err("dimensions must be positive".to_string());
        }
        Ok(Self::new(width, height))
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Two text blocks drawn over a clip.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Overlay {
    /// Bottom-left: title, link, time of the occurrence
    pub source: String,
    /// Top-left: counters
    pub counters: String,
}

impl Overlay {
    pub fn for_clip(clip: &ClipRef, total: u64) -> Self {
        let seconds = clip.spoken_at.floor() as u64;
        let link = format!("{}&t={}s", watch_url(&clip.video_id), seconds);
        Self {
            source: format!(
                "{}\n{}\nTime: {}",
                clip.video_title,
                link,
                timestamp::format(clip.spoken_at)
            ),
            counters: format!(
                "Episode counter: {}\nTotal counter  : {}",
                clip.position,
                progress(clip.sequence as usize, total as usize)
            ),
        }
    }
}

use crate::domain::video::Occurrence;
use serde::{Deserialize, Serialize};

/// How a clip is cut around an occurrence.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClipSettings {
    /// Upper bound of a clip duration, in seconds
    pub max_length: f64,
    /// Added to the occurrence start (usually negative)
    pub start_shift: f64,
    /// Added to the occurrence end
    pub end_shift: f64,
}

impl Default for ClipSettings {
    fn default() -> Self {
        Self {
            max_length: 1.5,
            start_shift: -0.25,
            end_shift: 0.75,
        }
    }
}

/// Absolute `[start, end]` range of a clip within its source video.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClipWindow {
    pub start: f64,
    pub end: f64,
}

impl ClipWindow {
    pub fn around(occurrence: &Occurrence, settings: &ClipSettings) -> Self {
        let start = (occurrence.start + settings.start_shift).max(0.0);
        let end = (occurrence.end + settings.end_shift).min(start + settings.max_length);
        Self { start, end }
    }

    pub fn duration(&self) -> f64 {
        self.end - self.start
    }

    pub fn is_valid(&self) -> bool {
        self.start.is_finite() && self.end.is_finite() && self.end > self.start
    }
}

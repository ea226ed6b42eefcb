//! Domain layer - Pure types and algorithms, no I/O besides path probes.

pub mod captions;
pub mod clip_window;
pub mod clips;
pub mod merge;
pub mod overlay;
pub mod stats;
pub mod timestamp;
pub mod video;

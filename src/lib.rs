//! Wordcatch - every utterance of a word across a YouTube channel, in one video
//!
//! Hexagonal Architecture:
//! - domain/: Pure logic (captions, clip windows, clip stream, merge queue, stats)
//! - ports/: Trait definitions
//! - adapters/: yt-dlp, YouTube Data API, ffmpeg, local filesystem
//! - application/: Checkpoints, per-video work, scheduling, merging
//! - config: Environment configuration

pub mod adapters;
pub mod application;
pub mod config;
pub mod domain;
pub mod error;
pub mod logging;
pub mod ports;

// Re-exports for convenience
pub use application::orchestrator::{channel_stats, Orchestrator, RunReport};
pub use config::CatchConfig;
pub use error::{CatchError, CatchResult};

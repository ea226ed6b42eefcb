//! Adapters - Concrete implementations of ports.

pub mod cmd;
pub mod ffmpeg;
pub mod local;
pub mod youtube;
pub mod ytdlp;

//! Local filesystem adapters.

pub mod fs;

pub use fs::FsCheckpointStorage;

use crate::error::CheckpointError;
use async_trait::async_trait;
use std::io;

/// Durable key/value storage of checkpoint payloads.
///
/// Keys are slash-separated logical paths such as `videos/<id>/clips`.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CheckpointStorage: Send + Sync {
    /// Read a payload, `None` when the key was never written
    async fn load(&self, key: &str) -> io::Result<Option<Vec<u8>>>;

    /// Replace the payload atomically: readers see the old or the new one
    async fn save(&self, key: &str, payload: &[u8]) -> Result<(), CheckpointError>;

    async fn remove(&self, key: &str) -> Result<(), CheckpointError>;
}

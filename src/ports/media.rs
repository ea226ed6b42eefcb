use crate::domain::clip_window::ClipWindow;
use crate::domain::overlay::Overlay;
use crate::error::MediaResult;
use async_trait::async_trait;
use std::path::Path;

/// Decode, cut, compose and encode media files.
///
/// Every output is written under a temporary name and moved into place once
/// complete, so a file present under its final name is always usable.
#[async_trait]
pub trait MediaEngine: Send + Sync {
    /// An opened source. May own nested resources (e.g. overlay layers).
    type Handle: Send + Sync;

    async fn cut(&self, source: &Path, window: &ClipWindow, output: &Path) -> MediaResult<()>;

    async fn open(&self, path: &Path) -> MediaResult<Self::Handle>;

    /// Compose text layers over `handle`. On error `handle` is closed.
    async fn overlay(&self, handle: Self::Handle, overlay: &Overlay) -> MediaResult<Self::Handle>;

    /// Release `handle` and everything nested in it.
    fn close(&self, handle: Self::Handle);

    async fn concatenate(&self, handles: &[Self::Handle], output: &Path) -> MediaResult<()>;
}

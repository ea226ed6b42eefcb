use crate::domain::video::Video;
use crate::error::CatalogError;
use async_trait::async_trait;

/// Channel lookup and listing.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ChannelCatalog: Send + Sync {
    async fn channel_id(&self, channel_name: &str) -> Result<String, CatalogError>;

    /// Every video of the channel, oldest first
    async fn videos(&self, channel_id: &str) -> Result<Vec<Video>, CatalogError>;
}

//! Channel catalog backed by the YouTube Data API v3.

use crate::domain::video::Video;
use crate::error::CatalogError;
use crate::ports::catalog::ChannelCatalog;
use async_trait::async_trait;
use chrono::{DateTime, Duration, SecondsFormat, Utc};
use serde::Deserialize;
use std::collections::HashSet;
use tracing::{debug, info};

const API_URL: &str = "https://www.googleapis.com/youtube/v3";
const PAGE_SIZE: &str = "50";
const MAX_VIDEOS: usize = 10_000;

#[derive(Debug, Deserialize)]
struct SearchPage {
    #[serde(default)]
    items: Vec<SearchItem>,
}

#[derive(Debug, Deserialize)]
struct SearchItem {
    id: ItemId,
    snippet: Snippet,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ItemId {
    kind: String,
    video_id: Option<String>,
    channel_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Snippet {
    #[serde(default)]
    title: String,
    published_at: String,
}

fn parse_date(raw: &str) -> Result<DateTime<Utc>, CatalogError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|d| d.with_timezone(&Utc))
        .map_err(|_| CatalogError::InvalidDate(raw.to_string()))
}

pub struct YoutubeCatalog {
    api_key: String,
    base_url: String,
    client: reqwest::Client,
}

impl YoutubeCatalog {
    pub fn new(api_key: impl Into<String>) -> Result<Self, CatalogError> {
        Self::with_base_url(api_key, API_URL)
    }

    pub fn with_base_url(api_key: impl Into<String>, base_url: impl Into<String>) -> Result<Self, CatalogError> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()?;
        Ok(Self {
            api_key: api_key.into(),
            base_url: base_url.into(),
            client,
        })
    }

    /// Run a search, walking back in time with `publishedBefore`.
    async fn search(&self, params: &[(&str, &str)], max_results: usize) -> Result<Vec<SearchItem>, CatalogError> {
        let url = format!("{}/search", self.base_url);
        let mut results: Vec<SearchItem> = Vec::new();
        let mut published_before: Option<String> = None;

        while results.len() < max_results {
            let mut request = self
                .client
                .get(&url)
                .query(&[("key", self.api_key.as_str())])
                .query(params);
            if let Some(before) = &published_before {
                request = request.query(&[("publishedBefore", before.as_str())]);
            }

            let page: SearchPage = request.send().await?.error_for_status()?.json().await?;
            if page.items.is_empty() {
                debug!("No more items to retrieve");
                break;
            }
            results.extend(page.items);
            info!("Retrieved {} items so far", results.len());

            let Some(last) = results.last() else { break };
            // One second earlier so the last item is not listed twice.
            let cursor = parse_date(&last.snippet.published_at)? - Duration::seconds(1);
            let cursor = cursor.to_rfc3339_opts(SecondsFormat::Secs, true);
            if published_before.as_deref() == Some(cursor.as_str()) {
                break;
            }
            published_before = Some(cursor);
        }

        Ok(results)
    }
}

#[async_trait]
impl ChannelCatalog for YoutubeCatalog {
    async fn channel_id(&self, channel_name: &str) -> Result<String, CatalogError> {
        let items = self
            .search(
                &[("q", channel_name), ("part", "snippet,id"), ("type", "channel"), ("maxResults", "1")],
                1,
            )
            .await?;
        items
            .into_iter()
            .find_map(|item| item.id.channel_id)
            .ok_or_else(|| CatalogError::ChannelNotFound(channel_name.to_string()))
    }

    async fn videos(&self, channel_id: &str) -> Result<Vec<Video>, CatalogError> {
        let items = self
            .search(
                &[
                    ("channelId", channel_id),
                    ("part", "snippet,id"),
                    ("type", "video"),
                    ("order", "date"),
                    ("maxResults", PAGE_SIZE),
                ],
                MAX_VIDEOS,
            )
            .await?;
        to_videos(items)
    }
}

/// Keep videos only, drop duplicates, oldest first.
fn to_videos(items: Vec<SearchItem>) -> Result<Vec<Video>, CatalogError> {
    let mut seen = HashSet::new();
    let mut videos = Vec::with_capacity(items.len());
    for item in items {
        if item.id.kind != "youtube#video" {
            continue;
        }
        let Some(id) = item.id.video_id else { continue };
        if !seen.insert(id.clone()) {
            continue;
        }
        let published_at = parse_date(&item.snippet.published_at)?;
        videos.push(Video::new(id, item.snippet.title, published_at));
    }
    videos.sort_by_key(|v| v.published_at);
    Ok(videos)
}

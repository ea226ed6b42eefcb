//! Channel lookup, per-video work, then the merge.

use crate::application::checkpoint::{CheckpointStore, ReadPolicy};
use crate::application::reducer::{MergeReducer, ReduceOutcome, ReducerSettings};
use crate::application::scheduler::WorkScheduler;
use crate::application::video_unit::{UnitState, VideoWorkUnit};
use crate::config::CatchConfig;
use crate::domain::clips::{ClipRef, ClipStream};
use crate::domain::stats::ChannelStats;
use crate::domain::video::{keys, OccurrenceData, Video, VideoData};
use crate::error::{CatchError, CatchResult};
use crate::ports::catalog::ChannelCatalog;
use crate::ports::checkpoint::CheckpointStorage;
use crate::ports::media::MediaEngine;
use crate::ports::source::MediaSource;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

/// Cached result of the channel lookup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct ChannelRecord {
    name: String,
    id: String,
}

/// What a `catch` run did.
#[derive(Debug, Clone, PartialEq)]
pub struct RunReport {
    pub videos: usize,
    pub videos_skipped: usize,
    pub clips: u64,
    /// `None` when the final video was not requested
    pub output: Option<ReduceOutcome>,
}

impl RunReport {
    pub fn output_path(&self) -> Option<&PathBuf> {
        match &self.output {
            Some(ReduceOutcome::Produced(path)) => Some(path),
            _ => None,
        }
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} clips from {} videos ({} skipped): ",
            self.clips, self.videos, self.videos_skipped
        )?;
        match &self.output {
            Some(ReduceOutcome::Produced(path)) => write!(f, "{}", path.display()),
            Some(ReduceOutcome::FinalizeFailed { artifact, .. }) => {
                write!(f, "merged into {} but not moved into place", artifact.display())
            }
            Some(ReduceOutcome::Empty) | None => write!(f, "no output produced"),
        }
    }
}

pub struct Orchestrator<S, M, E, C> {
    config: CatchConfig,
    unit: Arc<VideoWorkUnit<S, M, E>>,
    catalog: C,
}

impl<S, M, E, C> Orchestrator<S, M, E, C>
where
    S: CheckpointStorage + 'static,
    M: MediaSource + 'static,
    E: MediaEngine + 'static,
    C: ChannelCatalog,
{
    pub fn new(config: CatchConfig, catalog: C, unit: VideoWorkUnit<S, M, E>) -> Self {
        Self {
            config,
            unit: Arc::new(unit),
            catalog,
        }
    }

    fn store(&self) -> &CheckpointStore<S> {
        self.unit.store()
    }

    pub async fn run(&self) -> CatchResult<RunReport> {
        let config = &self.config;

        info!("Get channel id of '{}'", config.channel_name);
        let channel_id = self.channel_id().await?;

        info!("Get video list");
        let policy = ReadPolicy::refresh(config.update_video_list);
        let mut videos: Vec<Video> = self
            .store()
            .read(keys::VIDEOS, policy, || async {
                self.catalog.videos(&channel_id).await.map_err(CatchError::from)
            })
            .await?;
        videos.sort_by_key(|v| v.published_at);
        videos.truncate(config.max_videos);
        info!("{} videos to process", videos.len());

        let scheduler = WorkScheduler::new(config.max_workers, config.max_videos);
        let outcomes = scheduler
            .run(Arc::clone(&self.unit), &videos, &config.filter)
            .await?;

        let mut videos_skipped = 0;
        for (video, outcome) in videos.iter_mut().zip(outcomes) {
            if matches!(outcome.state, UnitState::Failed(_) | UnitState::Unstarted) {
                videos_skipped += 1;
            }
            video.data = Some(outcome.data);
        }

        let clips: Vec<ClipRef> = ClipStream::new(&videos, &config.filter).collect();
        info!("{} clips extracted", clips.len());

        let output = if config.generate_final_video && config.generate_clips {
            let reducer = MergeReducer::new(
                self.store(),
                self.unit.engine(),
                ReducerSettings::from_config(config),
            );
            Some(reducer.reduce(clips.iter().cloned()).await?)
        } else {
            None
        };

        Ok(RunReport {
            videos: videos.len(),
            videos_skipped,
            clips: clips.len() as u64,
            output,
        })
    }

    async fn channel_id(&self) -> CatchResult<String> {
        let name = &self.config.channel_name;
        if let Some(record) = self.store().load::<ChannelRecord>(keys::CHANNEL_ID).await {
            if &record.name == name {
                return Ok(record.id);
            }
            info!("Channel changed from '{}', looking it up again", record.name);
        }
        let id = self.catalog.channel_id(name).await?;
        let record = ChannelRecord {
            name: name.clone(),
            id,
        };
        self.store().write(keys::CHANNEL_ID, &record).await?;
        Ok(record.id)
    }
}

/// Statistics over whatever per-video data is cached. Never hits the network.
pub async fn channel_stats<S: CheckpointStorage>(store: &CheckpointStore<S>) -> ChannelStats {
    let mut videos: Vec<Video> = store.load(keys::VIDEOS).await.unwrap_or_default();
    for video in &mut videos {
        if let Some(data) = store.load::<OccurrenceData>(&keys::occurrences(&video.id)).await {
            video.data = Some(VideoData {
                occurrences: data.occurrences,
                duration: data.duration,
                ..Default::default()
            });
        }
    }
    ChannelStats::compute(&videos)
}

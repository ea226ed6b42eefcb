//! Bounded worker pool over the videos of a channel.

use crate::application::video_unit::{UnitOutcome, VideoWorkUnit};
use crate::domain::clips::VideoFilter;
use crate::domain::video::Video;
use crate::error::CheckpointError;
use crate::logging::LogContext;
use crate::ports::checkpoint::CheckpointStorage;
use crate::ports::media::MediaEngine;
use crate::ports::source::MediaSource;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{error, info};

pub struct WorkScheduler {
    max_workers: usize,
    max_videos: usize,
}

impl WorkScheduler {
    pub fn new(max_workers: usize, max_videos: usize) -> Self {
        Self {
            max_workers: max_workers.max(1),
            max_videos,
        }
    }

    /// Run a unit for each of the first `max_videos` videos.
    ///
    /// Outcomes are returned in video order, one per processed video. Filtered
    /// out videos, failed and panicked units contribute an empty outcome.
    /// A checkpoint persistence error aborts the whole pool.
    pub async fn run<S, M, E>(
        &self,
        unit: Arc<VideoWorkUnit<S, M, E>>,
        videos: &[Video],
        filter: &VideoFilter,
    ) -> Result<Vec<UnitOutcome>, CheckpointError>
    where
        S: CheckpointStorage + 'static,
        M: MediaSource + 'static,
        E: MediaEngine + 'static,
    {
        let videos = &videos[..videos.len().min(self.max_videos)];
        let total = videos.len();
        let mut outcomes = vec![UnitOutcome::skipped(); total];

        let semaphore = Arc::new(Semaphore::new(self.max_workers));
        let mut set = JoinSet::new();

        for (index, video) in videos.iter().enumerate() {
            let log = LogContext::positioned(index + 1, total, &video.id);
            if !filter.admits(&video.id) {
                log.info("Filtered out, skipping");
                continue;
            }

            let unit = Arc::clone(&unit);
            let semaphore = Arc::clone(&semaphore);
            let video = video.clone();
            set.spawn(async move {
                let Ok(_permit) = semaphore.acquire_owned().await else {
                    return (index, Ok(UnitOutcome::skipped()));
                };
                (index, unit.run(&video, &log).await)
            });
        }

        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((index, Ok(outcome))) => outcomes[index] = outcome,
                Ok((index, Err(e))) => {
                    error!("({}) unable to persist progress: {}", index + 1, e);
                    set.abort_all();
                    return Err(e);
                }
                Err(e) => error!("a video task failed: {}", e),
            }
        }

        let failed = outcomes.iter().filter(|o| o.failure().is_some()).count();
        info!("Processed {} videos, {} skipped", total, failed);
        Ok(outcomes)
    }
}

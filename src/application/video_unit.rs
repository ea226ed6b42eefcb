//! Per-video pipeline: captions, occurrences, clips.
//!
//! Each stage is its own checkpoint, so an interrupted run resumes at the
//! first stage without a readable entry.

use crate::adapters::local::fs::remove_quietly;
use crate::application::checkpoint::{CheckpointStore, ReadPolicy};
use crate::config::{sanitize_file_component, CatchConfig};
use crate::domain::captions::CaptionsParser;
use crate::domain::clip_window::{ClipSettings, ClipWindow};
use crate::domain::video::{keys, ArtifactInfo, ClipsRecord, OccurrenceData, Video, VideoData, VideoMetadata};
use crate::error::{CheckpointError, ConfigError};
use crate::logging::{progress, LogContext};
use crate::ports::checkpoint::CheckpointStorage;
use crate::ports::media::MediaEngine;
use crate::ports::source::{DownloadRequest, MediaSource};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureReason {
    /// Captions could not be retrieved; retried on the next run
    MetadataUnavailable,
    /// The video has no captions; remembered
    NoCaptions,
    VideoUnavailable,
    MediaEngine,
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            FailureReason::MetadataUnavailable => "captions unavailable",
            FailureReason::NoCaptions => "no captions",
            FailureReason::VideoUnavailable => "video unavailable",
            FailureReason::MediaEngine => "clip extraction failed",
        };
        f.write_str(text)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitState {
    Unstarted,
    MetadataFetched,
    OccurrencesExtracted,
    ClipsExtracted,
    Done,
    Failed(FailureReason),
}

/// Where a unit stopped, and what it gathered on the way.
#[derive(Debug, Clone, PartialEq)]
pub struct UnitOutcome {
    pub state: UnitState,
    pub data: VideoData,
}

impl UnitOutcome {
    pub fn skipped() -> Self {
        Self {
            state: UnitState::Unstarted,
            data: VideoData::default(),
        }
    }

    pub fn failure(&self) -> Option<FailureReason> {
        match self.state {
            UnitState::Failed(reason) => Some(reason),
            _ => None,
        }
    }
}

#[derive(Debug)]
enum StageError {
    Failed(FailureReason, String),
    Checkpoint(CheckpointError),
}

impl StageError {
    fn failed(reason: FailureReason, detail: impl fmt::Display) -> Self {
        StageError::Failed(reason, detail.to_string())
    }
}

impl From<CheckpointError> for StageError {
    fn from(e: CheckpointError) -> Self {
        StageError::Checkpoint(e)
    }
}

#[derive(Debug, Clone)]
pub struct UnitSettings {
    pub parser: CaptionsParser,
    pub clip: ClipSettings,
    /// Clips go to `<clips_dir>/<video id>/`
    pub clips_dir: PathBuf,
    pub override_video_data: bool,
    pub override_clips: bool,
    pub generate_clips: bool,
    pub cleanup_downloads: bool,
}

impl UnitSettings {
    pub fn from_config(config: &CatchConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            parser: CaptionsParser::new(&config.word_to_extract)?,
            clip: config.clip,
            clips_dir: config.output_dir.join("clips"),
            override_video_data: config.override_video_data,
            override_clips: config.override_clips,
            generate_clips: config.generate_clips,
            cleanup_downloads: config.cleanup_downloads,
        })
    }
}

/// Runs the stages of one video at a time. Shared by every worker.
pub struct VideoWorkUnit<S, M, E> {
    store: CheckpointStore<S>,
    source: M,
    engine: E,
    settings: UnitSettings,
}

impl<S, M, E> VideoWorkUnit<S, M, E>
where
    S: CheckpointStorage,
    M: MediaSource,
    E: MediaEngine,
{
    pub fn new(store: CheckpointStore<S>, source: M, engine: E, settings: UnitSettings) -> Self {
        Self {
            store,
            source,
            engine,
            settings,
        }
    }

    pub fn store(&self) -> &CheckpointStore<S> {
        &self.store
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    /// Run every stage of `video`. Only checkpoint persistence errors escape.
    pub async fn run(&self, video: &Video, log: &LogContext) -> Result<UnitOutcome, CheckpointError> {
        let mut outcome = UnitOutcome::skipped();
        match self.stages(video, log, &mut outcome).await {
            Ok(()) => Ok(outcome),
            Err(StageError::Failed(reason, detail)) => {
                match reason {
                    FailureReason::NoCaptions => log.warn(format!("Skipped: {reason}")),
                    _ => log.error(format!("Skipped: {reason}: {detail}")),
                }
                outcome.state = UnitState::Failed(reason);
                Ok(outcome)
            }
            Err(StageError::Checkpoint(e)) => Err(e),
        }
    }

    async fn stages(&self, video: &Video, log: &LogContext, outcome: &mut UnitOutcome) -> Result<(), StageError> {
        let settings = &self.settings;

        log.info("Fetch captions");
        let metadata = self.metadata(&video.id, log).await?;
        outcome.data.captions = Some(metadata.captions.clone());
        outcome.state = UnitState::MetadataFetched;
        if !metadata.captions.exists {
            return Err(StageError::failed(FailureReason::NoCaptions, &video.id));
        }

        log.info("Extract occurrences");
        let occurrences = self.occurrences(&video.id, &metadata, log).await?;
        log.info(format!("Found {} occurrences", occurrences.occurrences.len()));
        outcome.data.occurrences = occurrences.occurrences;
        outcome.data.duration = occurrences.duration;
        outcome.state = UnitState::OccurrencesExtracted;

        if !settings.generate_clips {
            return Ok(());
        }

        log.info("Extract clips");
        let downloaded_video = OnceLock::new();
        let clips = self.clips(video, &outcome.data, &downloaded_video, log).await?;
        outcome.data.clips = Some(clips);
        outcome.state = UnitState::ClipsExtracted;

        outcome.data.video = downloaded_video.into_inner();
        if let Some(video_file) = outcome.data.video.as_mut().filter(|_| settings.cleanup_downloads) {
            remove_quietly(&video_file.path).await;
            video_file.exists = false;
        }
        outcome.state = UnitState::Done;
        Ok(())
    }

    async fn metadata(&self, video_id: &str, log: &LogContext) -> Result<VideoMetadata, StageError> {
        let policy = ReadPolicy::refresh(self.settings.override_video_data);
        self.store
            .read(&keys::metadata(video_id), policy, || async {
                log.debug("Download captions");
                let downloaded = self
                    .source
                    .download(video_id, DownloadRequest::CaptionsOnly)
                    .await
                    .map_err(|e| StageError::failed(FailureReason::MetadataUnavailable, e))?;
                Ok(VideoMetadata {
                    captions: downloaded.captions,
                })
            })
            .await
    }

    async fn occurrences(
        &self,
        video_id: &str,
        metadata: &VideoMetadata,
        log: &LogContext,
    ) -> Result<OccurrenceData, StageError> {
        let policy = ReadPolicy::refresh(self.settings.override_video_data);
        self.store
            .read(&keys::occurrences(video_id), policy, || async {
                let captions = if metadata.captions.on_disk() {
                    metadata.captions.clone()
                } else {
                    log.debug("Captions were cleaned up, download them again");
                    self.source
                        .download(video_id, DownloadRequest::CaptionsOnly)
                        .await
                        .map_err(|e| StageError::failed(FailureReason::MetadataUnavailable, e))?
                        .captions
                };
                if !captions.exists {
                    return Err(StageError::failed(
                        FailureReason::MetadataUnavailable,
                        "captions disappeared",
                    ));
                }

                let raw = tokio::fs::read_to_string(&captions.path)
                    .await
                    .map_err(|e| StageError::failed(FailureReason::MetadataUnavailable, e))?;
                let data = self.settings.parser.extract(&raw);
                if self.settings.cleanup_downloads {
                    remove_quietly(&captions.path).await;
                }
                Ok(data)
            })
            .await
    }

    async fn clips(
        &self,
        video: &Video,
        data: &VideoData,
        downloaded_video: &OnceLock<ArtifactInfo>,
        log: &LogContext,
    ) -> Result<Vec<PathBuf>, StageError> {
        let settings = &self.settings;
        let key = keys::clips(&video.id);

        // Clips cut for other occurrences share their file names with the new ones.
        let stale = match self.store.load::<ClipsRecord>(&key).await {
            Some(record) if !settings.override_clips && record.matches(&data.occurrences) => {
                return Ok(record.clips);
            }
            Some(_) if !settings.override_clips => {
                log.info("Occurrences changed since the clips were cut");
                true
            }
            _ => false,
        };
        let reuse_files = !settings.override_clips && !stale;

        let record = self
            .store
            .read(&key, ReadPolicy::refresh(true), || async {
                let record = |clips: Vec<PathBuf>| ClipsRecord {
                    cut_from: data.occurrences.clone(),
                    clips,
                };
                if data.occurrences.is_empty() {
                    log.info("No occurrences to extract");
                    return Ok(record(Vec::new()));
                }

                let total = data.occurrences.len();
                let targets: Vec<PathBuf> = data
                    .occurrences
                    .iter()
                    .enumerate()
                    .map(|(i, occurrence)| clip_path(&settings.clips_dir, &video.id, i + 1, total, &occurrence.text))
                    .collect();
                if reuse_files && targets.iter().all(|p| p.is_file()) {
                    log.info("Reuse existing clips");
                    return Ok(record(targets));
                }

                log.debug("Download video");
                let downloaded = self
                    .source
                    .download(&video.id, DownloadRequest::VideoOnly)
                    .await
                    .map_err(|e| StageError::failed(FailureReason::VideoUnavailable, e))?;
                let _ = downloaded_video.set(downloaded.video.clone());
                if !downloaded.video.exists {
                    return Err(StageError::failed(FailureReason::VideoUnavailable, "no video file"));
                }

                let cut = self
                    .cut_all(&downloaded.video.path, data, &targets, reuse_files, log)
                    .await;
                if cut.is_err() && settings.cleanup_downloads {
                    remove_quietly(&downloaded.video.path).await;
                }
                cut.map(|()| record(targets))
            })
            .await?;
        Ok(record.clips)
    }

    async fn cut_all(
        &self,
        source: &Path,
        data: &VideoData,
        targets: &[PathBuf],
        reuse_files: bool,
        log: &LogContext,
    ) -> Result<(), StageError> {
        let total = targets.len();
        for (i, (occurrence, target)) in data.occurrences.iter().zip(targets).enumerate() {
            let clip_log = log.child(format!("[{}] ", progress(i + 1, total)));
            if reuse_files && target.is_file() {
                clip_log.debug(format!("Reuse {}", target.display()));
                continue;
            }
            let window = ClipWindow::around(occurrence, &self.settings.clip);
            clip_log.info(format!("Cut [{:.3}, {:.3}]", window.start, window.end));
            self.engine
                .cut(source, &window, target)
                .await
                .map_err(|e| StageError::failed(FailureReason::MediaEngine, e))?;
        }
        Ok(())
    }
}

/// `<clips_dir>/<video id>/<pos>_<word>.mp4`, `pos` zero-padded to the width of `total`.
pub fn clip_path(clips_dir: &Path, video_id: &str, position: usize, total: usize, word: &str) -> PathBuf {
    let width = total.to_string().len();
    clips_dir
        .join(video_id)
        .join(format!("{:0width$}_{}.mp4", position, sanitize_file_component(word), width = width))
}

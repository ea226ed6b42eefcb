//! Folds the ordered clip stream into one artifact with bounded fan-in.

use crate::adapters::local::fs::{copy_file, move_file, remove_quietly};
use crate::application::checkpoint::CheckpointStore;
use crate::config::CatchConfig;
use crate::domain::clips::ClipRef;
use crate::domain::merge::{Batch, MergeQueueState, MergeSource};
use crate::domain::overlay::Overlay;
use crate::domain::video::keys;
use crate::error::{CatchResult, MediaResult};
use crate::ports::checkpoint::CheckpointStorage;
use crate::ports::media::MediaEngine;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone)]
pub struct ReducerSettings {
    /// Maximum number of sources opened at once
    pub threshold: usize,
    pub build_dir: PathBuf,
    /// Name of the final artifact in `build_dir`
    pub final_name: String,
    pub text_overlay: bool,
    /// Delete intermediate artifacts once merged
    pub cleanup_temporary: bool,
}

impl ReducerSettings {
    pub fn from_config(config: &CatchConfig) -> Self {
        Self {
            threshold: config.max_open_files,
            build_dir: config.build_dir.clone(),
            final_name: config.final_video_name(),
            text_overlay: config.text_overlay,
            cleanup_temporary: config.cleanup_temporary_clips,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ReduceOutcome {
    /// Nothing to merge
    Empty,
    Produced(PathBuf),
    /// Everything was merged but the result could not be moved into place
    FinalizeFailed {
        artifact: PathBuf,
        target: PathBuf,
        reason: String,
    },
}

/// Handles opened for one batch, closed on every exit path.
struct OpenBatch<'a, E: MediaEngine> {
    engine: &'a E,
    handles: Vec<E::Handle>,
}

impl<'a, E: MediaEngine> OpenBatch<'a, E> {
    fn new(engine: &'a E, capacity: usize) -> Self {
        Self {
            engine,
            handles: Vec::with_capacity(capacity),
        }
    }
}

impl<E: MediaEngine> Drop for OpenBatch<'_, E> {
    fn drop(&mut self) {
        for handle in self.handles.drain(..) {
            self.engine.close(handle);
        }
    }
}

pub struct MergeReducer<'a, S, E> {
    store: &'a CheckpointStore<S>,
    engine: &'a E,
    settings: ReducerSettings,
}

impl<'a, S, E> MergeReducer<'a, S, E>
where
    S: CheckpointStorage,
    E: MediaEngine,
{
    pub fn new(store: &'a CheckpointStore<S>, engine: &'a E, settings: ReducerSettings) -> Self {
        Self {
            store,
            engine,
            settings,
        }
    }

    fn fan_in(&self) -> usize {
        self.settings.threshold.max(2)
    }

    /// Merge `clips` (in stream order), resuming a previous run if one was
    /// interrupted. `clips` is only consumed when starting afresh.
    pub async fn reduce<I>(&self, clips: I) -> CatchResult<ReduceOutcome>
    where
        I: IntoIterator<Item = ClipRef>,
    {
        if self.settings.threshold < 2 {
            warn!(
                "A threshold of {} cannot reduce anything, using {}",
                self.settings.threshold,
                self.fan_in()
            );
        }

        let mut state = self.initial_state(clips).await?;
        let total = state.total;

        while let Some(batch) = state.take_batch(self.fan_in(), self.settings.text_overlay) {
            let merged = match batch {
                Batch::Passthrough => Vec::new(),
                Batch::EmptyLine => {
                    warn!("Dropping an empty line from the merge queue");
                    Vec::new()
                }
                Batch::Concat { sources, ends_line } => {
                    let output = self.artifact_path(state.batch_counter);
                    if output.is_file() {
                        info!("Reuse {}", output.display());
                    } else {
                        info!(
                            "Merge {} clips into {} ({} left)",
                            sources.len(),
                            output.display(),
                            state.pending.len()
                        );
                        self.concat(&sources, &output, total).await?;
                    }
                    state.push_result(output, ends_line);
                    sources
                }
            };

            self.store.write(keys::MERGE_QUEUE, &state).await?;

            if self.settings.cleanup_temporary {
                for source in merged.iter().filter(|s| s.is_temporary()) {
                    remove_quietly(source.path()).await;
                }
            }
        }

        self.finalize(&state).await
    }

    async fn initial_state<I>(&self, clips: I) -> CatchResult<MergeQueueState>
    where
        I: IntoIterator<Item = ClipRef>,
    {
        match self.store.load::<MergeQueueState>(keys::MERGE_QUEUE).await {
            Some(state) if state.is_consistent() => {
                info!(
                    "Resume merge: {} clips pending, {} queued",
                    state.pending.len(),
                    state.intermediate.len()
                );
                return Ok(state);
            }
            Some(_) => warn!("Discarding an inconsistent merge queue"),
            None => {}
        }

        self.clear_stale_artifacts().await;
        let state = MergeQueueState::seed(clips);
        info!("Merge {} clips, at most {} at a time", state.total, self.fan_in());
        self.store.write(keys::MERGE_QUEUE, &state).await?;
        Ok(state)
    }

    fn artifact_prefix(&self) -> String {
        format!("merge_t{}_", self.settings.threshold)
    }

    fn artifact_path(&self, counter: u64) -> PathBuf {
        self.settings
            .build_dir
            .join(format!("{}{:05}.mp4", self.artifact_prefix(), counter))
    }

    /// Artifacts left behind by a finished build must not be reused.
    async fn clear_stale_artifacts(&self) {
        let Ok(mut entries) = tokio::fs::read_dir(&self.settings.build_dir).await else {
            return;
        };
        let prefix = self.artifact_prefix();
        while let Ok(Some(entry)) = entries.next_entry().await {
            if entry.file_name().to_string_lossy().starts_with(&prefix) {
                remove_quietly(&entry.path()).await;
            }
        }
    }

    async fn concat(&self, sources: &[MergeSource], output: &Path, total: u64) -> MediaResult<()> {
        let mut batch = OpenBatch::new(self.engine, sources.len());
        for source in sources {
            let handle = self.engine.open(source.path()).await?;
            let handle = match source {
                MergeSource::Leaf(clip) if self.settings.text_overlay => {
                    self.engine.overlay(handle, &Overlay::for_clip(clip, total)).await?
                }
                _ => handle,
            };
            batch.handles.push(handle);
        }
        debug!("{} sources open", batch.handles.len());
        self.engine.concatenate(&batch.handles, output).await
    }

    async fn finalize(&self, state: &MergeQueueState) -> CatchResult<ReduceOutcome> {
        let Some((artifact, leaf)) = state.result() else {
            info!("No clips to merge");
            self.store.remove(keys::MERGE_QUEUE).await?;
            return Ok(ReduceOutcome::Empty);
        };

        let target = unique_path(&self.settings.build_dir.join(&self.settings.final_name));
        // Leaf clips belong to the per-video cache.
        let moved = if leaf {
            copy_file(artifact, &target).await
        } else {
            move_file(artifact, &target).await
        };

        match moved {
            Ok(()) => {
                info!("Final video: {}", target.display());
                self.store.remove(keys::MERGE_QUEUE).await?;
                Ok(ReduceOutcome::Produced(target))
            }
            Err(e) => {
                error!(
                    "Unable to move {} to {}: {}",
                    artifact.display(),
                    target.display(),
                    e
                );
                Ok(ReduceOutcome::FinalizeFailed {
                    artifact: artifact.to_path_buf(),
                    target,
                    reason: e.to_string(),
                })
            }
        }
    }
}

/// `path`, or `<stem>_<6 hex>.<ext>` next to it when `path` is taken.
pub fn unique_path(path: &Path) -> PathBuf {
    if !path.exists() {
        return path.to_path_buf();
    }
    let stem = path.file_stem().map(|s| s.to_string_lossy().into_owned()).unwrap_or_default();
    let suffix: String = uuid::Uuid::new_v4().simple().to_string().chars().take(6).collect();
    let name = match path.extension() {
        Some(ext) => format!("{stem}_{suffix}.{}", ext.to_string_lossy()),
        None => format!("{stem}_{suffix}"),
    };
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::checkpoint::test_support::MemoryStorage;
    use crate::application::fakes::FakeEngine;
    use crate::error::CatchError;
    use tempfile::TempDir;

    struct Fixture {
        dir: TempDir,
        storage: MemoryStorage,
        engine: FakeEngine,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                dir: tempfile::tempdir().unwrap(),
                storage: MemoryStorage::default(),
                engine: FakeEngine::default(),
            }
        }

        fn build_dir(&self) -> PathBuf {
            self.dir.path().join("build")
        }

        /// Leaf clips whose content is their sequence number.
        fn clips(&self, n: u64) -> Vec<ClipRef> {
            let clips_dir = self.dir.path().join("clips");
            std::fs::create_dir_all(&clips_dir).unwrap();
            (1..=n)
                .map(|sequence| {
                    let path = clips_dir.join(format!("{sequence}.mp4"));
                    std::fs::write(&path, sequence.to_string()).unwrap();
                    ClipRef {
                        video_id: format!("v{}", sequence / 4),
                        video_title: "title".into(),
                        spoken_at: sequence as f64,
                        path,
                        position: (sequence % 4) as usize + 1,
                        sequence,
                    }
                })
                .collect()
        }

        fn settings(&self, threshold: usize, text_overlay: bool) -> ReducerSettings {
            ReducerSettings {
                threshold,
                build_dir: self.build_dir(),
                final_name: "chan_word.mp4".into(),
                text_overlay,
                cleanup_temporary: true,
            }
        }

        async fn reduce(&self, settings: ReducerSettings, clips: Vec<ClipRef>) -> CatchResult<ReduceOutcome> {
            let store = CheckpointStore::new(self.storage.clone());
            MergeReducer::new(&store, &self.engine, settings).reduce(clips).await
        }
    }

    fn sequence_of(path: &Path) -> Vec<u64> {
        std::fs::read_to_string(path)
            .unwrap()
            .lines()
            .map(|l| l.parse().unwrap())
            .collect()
    }

    fn produced(outcome: ReduceOutcome) -> PathBuf {
        match outcome {
            ReduceOutcome::Produced(path) => path,
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_order_is_preserved_for_every_threshold() {
        let n = 7u64;
        for threshold in [1usize, 2, 3, n as usize, n as usize + 5] {
            for overlay in [false, true] {
                let fx = Fixture::new();
                let outcome = fx.reduce(fx.settings(threshold, overlay), fx.clips(n)).await.unwrap();
                let path = produced(outcome);
                assert_eq!(sequence_of(&path), (1..=n).collect::<Vec<_>>(), "threshold={threshold}");
                assert!(fx.engine.max_open() <= threshold.max(2));
                assert_eq!(fx.engine.open_handles(), 0);
                assert_eq!(fx.engine.open_layers(), 0);
                assert!(fx.storage.get(keys::MERGE_QUEUE).is_none());
            }
        }
    }

    #[tokio::test]
    async fn test_bounded_fan_in_for_random_sizes() {
        let mut seed = 0x2545_f491_u64;
        let mut next = |bound: u64| {
            seed = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            (seed >> 33) % bound
        };
        for _ in 0..25 {
            let n = next(40) + 1;
            let threshold = next(8) as usize + 1;
            let overlay = next(2) == 1;
            let fx = Fixture::new();
            let path = produced(fx.reduce(fx.settings(threshold, overlay), fx.clips(n)).await.unwrap());
            assert_eq!(sequence_of(&path), (1..=n).collect::<Vec<_>>());
            assert!(fx.engine.max_open() <= threshold.max(2), "n={n} threshold={threshold}");
            assert_eq!(fx.engine.open_handles(), 0);
        }
    }

    #[tokio::test]
    async fn test_resume_after_failure() {
        let n = 23u64;
        let baseline = Fixture::new();
        let expected = sequence_of(&produced(
            baseline.reduce(baseline.settings(3, false), baseline.clips(n)).await.unwrap(),
        ));

        for fail_at in [0usize, 4, 9] {
            let fx = Fixture::new();
            let clips = fx.clips(n);
            fx.engine.fail_concat_at(Some(fail_at));
            let err = fx.reduce(fx.settings(3, false), clips.clone()).await.unwrap_err();
            assert!(matches!(err, CatchError::Media(_)));
            assert_eq!(fx.engine.open_handles(), 0);
            assert!(fx.storage.get(keys::MERGE_QUEUE).is_some());

            fx.engine.fail_concat_at(None);
            // a restarted process must not need the stream again
            let path = produced(fx.reduce(fx.settings(3, false), Vec::new()).await.unwrap());
            assert_eq!(sequence_of(&path), expected);
        }
    }

    #[tokio::test]
    async fn test_resume_reuses_artifact_written_before_crash() {
        let n = 23u64;
        let baseline = Fixture::new();
        let expected = sequence_of(&produced(
            baseline.reduce(baseline.settings(3, false), baseline.clips(n)).await.unwrap(),
        ));

        for saved in [1usize, 4, 6] {
            let fx = Fixture::new();
            // the queue write right after batch `saved` fails
            fx.storage.fail_after(Some(saved));
            let err = fx.reduce(fx.settings(3, false), fx.clips(n)).await.unwrap_err();
            assert!(matches!(err, CatchError::Checkpoint(_)));
            let artifact = fx.build_dir().join(format!("merge_t3_{:05}.mp4", saved - 1));
            assert!(artifact.is_file(), "{}", artifact.display());
            let concats_before = fx.engine.concats();

            fx.storage.fail_after(None);
            let path = produced(fx.reduce(fx.settings(3, false), Vec::new()).await.unwrap());
            assert_eq!(sequence_of(&path), expected);
            assert_eq!(fx.engine.concats(), baseline.engine.concats(), "saved={saved}");
            assert!(fx.engine.concats() - concats_before < baseline.engine.concats());
        }
    }

    #[tokio::test]
    async fn test_empty_input_produces_nothing() {
        let fx = Fixture::new();
        let outcome = fx.reduce(fx.settings(4, true), Vec::new()).await.unwrap();
        assert_eq!(outcome, ReduceOutcome::Empty);
        assert_eq!(fx.engine.concats(), 0);
        assert!(!fx.build_dir().join("chan_word.mp4").exists());
        assert!(fx.storage.get(keys::MERGE_QUEUE).is_none());
    }

    #[tokio::test]
    async fn test_single_leaf_is_copied() {
        let fx = Fixture::new();
        let clips = fx.clips(1);
        let path = produced(fx.reduce(fx.settings(4, false), clips.clone()).await.unwrap());
        assert_eq!(fx.engine.concats(), 0);
        assert_eq!(sequence_of(&path), vec![1]);
        assert!(clips[0].path.is_file());
    }

    #[tokio::test]
    async fn test_intermediates_are_cleaned_up() {
        let fx = Fixture::new();
        let path = produced(fx.reduce(fx.settings(2, false), fx.clips(9)).await.unwrap());
        let left: Vec<_> = std::fs::read_dir(fx.build_dir())
            .unwrap()
            .map(|e| e.unwrap().path())
            .collect();
        assert_eq!(left, vec![path]);
        assert!(fx.dir.path().join("clips/9.mp4").is_file());
    }

    #[tokio::test]
    async fn test_occupied_target_gets_suffix() {
        let fx = Fixture::new();
        std::fs::create_dir_all(fx.build_dir()).unwrap();
        std::fs::write(fx.build_dir().join("chan_word.mp4"), "old").unwrap();

        let path = produced(fx.reduce(fx.settings(3, false), fx.clips(4)).await.unwrap());
        let name = path.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("chan_word_") && name.ends_with(".mp4"));
        assert_eq!(name.len(), "chan_word_".len() + 6 + ".mp4".len());
        assert_eq!(std::fs::read_to_string(fx.build_dir().join("chan_word.mp4")).unwrap(), "old");
    }

    #[tokio::test]
    async fn test_persist_failure_is_fatal() {
        let fx = Fixture::new();
        fx.storage.fail_after(Some(2));
        let err = fx.reduce(fx.settings(2, false), fx.clips(6)).await.unwrap_err();
        assert!(matches!(err, CatchError::Checkpoint(_)));
        assert_eq!(fx.engine.open_handles(), 0);
    }

    #[tokio::test]
    async fn test_inconsistent_queue_is_rebuilt() {
        let fx = Fixture::new();
        fx.storage.put(
            keys::MERGE_QUEUE,
            br#"{"pending":[],"intermediate":[{"kind":"boundary"},{"kind":"boundary"}],"batch_counter":3}"#,
        );
        let path = produced(fx.reduce(fx.settings(3, false), fx.clips(5)).await.unwrap());
        assert_eq!(sequence_of(&path), vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_unique_path() {
        let dir = tempfile::tempdir().unwrap();
        let free = dir.path().join("a.mp4");
        assert_eq!(unique_path(&free), free);
        std::fs::write(&free, "x").unwrap();
        assert_ne!(unique_path(&free), free);
    }
}

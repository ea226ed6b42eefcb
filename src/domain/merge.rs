//! Bounded fan-in merge queue.
//!
//! Leaf clips are consumed from `pending` in batches; each batch result is
//! appended to `intermediate`. Once `pending` is drained, `intermediate` is
//! reduced in rounds. A single [`QueueEntry::Boundary`] separates the entries
//! left in the current round (before it) from the results of the current round
//! (after it), so the logical order is always `after ++ before`.
//!
//! The state is plain data: callers persist it after every batch and may
//! resume from any persisted snapshot.

use crate::domain::clips::ClipRef;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum QueueEntry {
    Clip {
        path: PathBuf,
        /// Leaf clips belong to the per-video cache and are never deleted
        #[serde(default)]
        leaf: bool,
    },
    Boundary,
}

impl QueueEntry {
    pub fn is_boundary(&self) -> bool {
        matches!(self, QueueEntry::Boundary)
    }
}

/// An input of a concatenation.
#[derive(Debug, Clone, PartialEq)]
pub enum MergeSource {
    /// A clip straight from the stream, rendered with its overlay if enabled
    Leaf(ClipRef),
    /// A clip already in the queue
    Queued { path: PathBuf, leaf: bool },
}

impl MergeSource {
    pub fn path(&self) -> &Path {
        match self {
            MergeSource::Leaf(clip) => &clip.path,
            MergeSource::Queued { path, .. } => path,
        }
    }

    /// Intermediate artifact that may be deleted once merged.
    pub fn is_temporary(&self) -> bool {
        matches!(self, MergeSource::Queued { leaf: false, .. })
    }
}

/// What the caller has to do before persisting the state again.
#[derive(Debug, Clone, PartialEq)]
pub enum Batch {
    /// Concatenate `sources` then call [`MergeQueueState::push_result`].
    Concat {
        sources: Vec<MergeSource>,
        ends_line: bool,
    },
    /// A lone entry was moved to the back of the queue.
    Passthrough,
    /// A boundary with nothing in front of it was dropped.
    EmptyLine,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct MergeQueueState {
    pub pending: VecDeque<ClipRef>,
    pub intermediate: VecDeque<QueueEntry>,
    pub batch_counter: u64,
    /// Number of clips the queue was seeded with
    #[serde(default)]
    pub total: u64,
}

impl MergeQueueState {
    pub fn seed(clips: impl IntoIterator<Item = ClipRef>) -> Self {
        let pending: VecDeque<ClipRef> = clips.into_iter().collect();
        Self {
            total: pending.len() as u64,
            pending,
            ..Default::default()
        }
    }

    fn boundaries(&self) -> usize {
        self.intermediate.iter().filter(|e| e.is_boundary()).count()
    }

    fn clip_count(&self) -> usize {
        self.intermediate.len() - self.boundaries()
    }

    /// Whether a snapshot can be resumed from.
    ///
    /// While leaves are pending there is no boundary, afterwards at most one.
    pub fn is_consistent(&self) -> bool {
        let boundaries = self.boundaries();
        if self.pending.is_empty() {
            boundaries <= 1
        } else {
            boundaries == 0
        }
    }

    pub fn is_done(&self) -> bool {
        self.pending.is_empty() && self.clip_count() <= 1
    }

    /// The single remaining clip once [`Self::is_done`].
    pub fn result(&self) -> Option<(&Path, bool)> {
        if !self.is_done() {
            return None;
        }
        self.intermediate.iter().find_map(|entry| match entry {
            QueueEntry::Clip { path, leaf } => Some((path.as_path(), *leaf)),
            QueueEntry::Boundary => None,
        })
    }

    /// Pop the next batch of at most `fan_in` sources.
    ///
    /// Passthroughs are applied directly. `render_leaves` forces single leaf
    /// clips through the media engine (e.g. to draw an overlay).
    pub fn take_batch(&mut self, fan_in: usize, render_leaves: bool) -> Option<Batch> {
        let fan_in = fan_in.max(2);

        if !self.pending.is_empty() {
            let take = fan_in.min(self.pending.len());
            let clips: Vec<ClipRef> = self.pending.drain(..take).collect();
            let ends_line = self.pending.is_empty();
            if clips.len() == 1 && !render_leaves {
                let path = clips[0].path.clone();
                self.requeue(QueueEntry::Clip { path, leaf: true }, ends_line);
                return Some(Batch::Passthrough);
            }
            return Some(Batch::Concat {
                sources: clips.into_iter().map(MergeSource::Leaf).collect(),
                ends_line,
            });
        }

        if self.is_done() {
            return None;
        }
        // Without a boundary the whole queue is the current round.
        if self.boundaries() == 0 {
            self.intermediate.push_back(QueueEntry::Boundary);
        }

        let mut group = Vec::with_capacity(fan_in);
        let mut ends_line = false;
        while let Some(entry) = self.intermediate.pop_front() {
            match entry {
                QueueEntry::Boundary => {
                    ends_line = true;
                    break;
                }
                QueueEntry::Clip { path, leaf } => {
                    group.push(MergeSource::Queued { path, leaf });
                    if group.len() == fan_in {
                        if self.intermediate.front().is_some_and(QueueEntry::is_boundary) {
                            self.intermediate.pop_front();
                            ends_line = true;
                        }
                        break;
                    }
                }
            }
        }
        // An unterminated queue ends a line too.
        ends_line |= self.intermediate.is_empty();

        match group.len() {
            0 => Some(Batch::EmptyLine),
            1 => {
                if let Some(MergeSource::Queued { path, leaf }) = group.pop() {
                    self.requeue(QueueEntry::Clip { path, leaf }, ends_line);
                }
                Some(Batch::Passthrough)
            }
            _ => Some(Batch::Concat {
                sources: group,
                ends_line,
            }),
        }
    }

    /// Register the artifact produced for the last [`Batch::Concat`].
    pub fn push_result(&mut self, output: PathBuf, ends_line: bool) {
        self.requeue(
            QueueEntry::Clip {
                path: output,
                leaf: false,
            },
            ends_line,
        );
        self.batch_counter += 1;
    }

    fn requeue(&mut self, entry: QueueEntry, ends_line: bool) {
        self.intermediate.push_back(entry);
        if ends_line {
            self.intermediate.push_back(QueueEntry::Boundary);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn clip(sequence: u64) -> ClipRef {
        ClipRef {
            video_id: format!("v{}", sequence / 3),
            video_title: "title".into(),
            spoken_at: sequence as f64,
            path: PathBuf::from(format!("leaf_{sequence}")),
            position: 1,
            sequence,
        }
    }

    /// Runs the queue to completion, tracking which leaves each artifact holds.
    ///
    /// Returns the leaves of the final artifact in order and the widest batch.
    fn drive(
        mut state: MergeQueueState,
        mut contents: HashMap<PathBuf, Vec<u64>>,
        fan_in: usize,
        render_leaves: bool,
        check_leaf_phase: bool,
    ) -> (MergeQueueState, Vec<u64>, usize) {
        let mut widest = 0;
        let mut leaf_phase_checked = false;

        while let Some(batch) = state.take_batch(fan_in, render_leaves) {
            if let Batch::Concat { sources, ends_line } = batch {
                widest = widest.max(sources.len());
                let output = PathBuf::from(format!("merge_{}", state.batch_counter));
                let merged = sources
                    .iter()
                    .flat_map(|s| contents[s.path()].clone())
                    .collect();
                contents.insert(output.clone(), merged);
                state.push_result(output, ends_line);
            }
            assert!(state.is_consistent());
            assert!(!state
                .intermediate
                .iter()
                .zip(state.intermediate.iter().skip(1))
                .any(|(a, b)| a.is_boundary() && b.is_boundary()));
            if check_leaf_phase && state.pending.is_empty() && !leaf_phase_checked {
                assert_eq!(state.boundaries(), 1);
                leaf_phase_checked = true;
            }
        }

        let order = state
            .result()
            .map(|(path, _)| contents[path].clone())
            .unwrap_or_default();
        (state, order, widest)
    }

    fn simulate(n: u64, fan_in: usize, render_leaves: bool) -> (MergeQueueState, Vec<u64>, usize) {
        let state = MergeQueueState::seed((1..=n).map(clip));
        let contents = (1..=n).map(|s| (PathBuf::from(format!("leaf_{s}")), vec![s])).collect();
        drive(state, contents, fan_in, render_leaves, true)
    }

    /// Deterministic pseudo-random numbers (64-bit LCG).
    struct Lcg(u64);

    impl Lcg {
        fn below(&mut self, bound: usize) -> usize {
            self.0 = self
                .0
                .wrapping_mul(6364136223846793005)
                .wrapping_add(1442695040888963407);
            ((self.0 >> 33) as usize) % bound
        }
    }

    /// A consistent snapshot with random contents and boundary placement,
    /// with the leaf order it stands for.
    fn random_snapshot(rng: &mut Lcg) -> (MergeQueueState, HashMap<PathBuf, Vec<u64>>, Vec<u64>) {
        let queued = rng.below(12) as u64;
        let pending = if rng.below(3) == 0 { rng.below(8) as u64 } else { 0 };
        let mut contents = HashMap::new();

        let mut entries: Vec<QueueEntry> = (1..=queued)
            .map(|id| {
                let path = PathBuf::from(format!("queued_{id}"));
                contents.insert(path.clone(), vec![id]);
                QueueEntry::Clip { path, leaf: id % 2 == 0 }
            })
            .collect();
        let ids: Vec<u64> = (1..=queued).collect();
        let mut expected = ids.clone();
        // a boundary only exists once the leaves are drained
        if pending == 0 && rng.below(4) != 0 {
            let at = rng.below(ids.len() + 1);
            entries.insert(at, QueueEntry::Boundary);
            expected = ids[at..].iter().chain(&ids[..at]).copied().collect();
        }

        let leaves: Vec<ClipRef> = (queued + 1..=queued + pending).map(clip).collect();
        for leaf in &leaves {
            contents.insert(leaf.path.clone(), vec![leaf.sequence]);
            expected.push(leaf.sequence);
        }

        let state = MergeQueueState {
            total: queued + pending,
            pending: leaves.into(),
            intermediate: entries.into(),
            batch_counter: 0,
        };
        assert!(state.is_consistent());
        (state, contents, expected)
    }

    #[test]
    fn test_random_snapshots_keep_order_and_fan_in() {
        let mut rng = Lcg(0x5eed);
        for round in 0..500 {
            let (state, contents, expected) = random_snapshot(&mut rng);
            let fan_in = 2 + rng.below(4);
            let render = rng.below(2) == 0;
            let snapshot = state.clone();
            let (state, order, widest) = drive(state, contents, fan_in, render, false);
            assert_eq!(order, expected, "round {round}: {snapshot:?} fan_in={fan_in}");
            assert!(widest <= fan_in, "round {round}");
            assert!(state.is_done());
        }
    }

    #[test]
    fn test_order_is_preserved_for_any_fan_in() {
        for n in [1u64, 2, 3, 7, 10, 31] {
            for fan_in in [1usize, 2, 3, n as usize, n as usize + 5] {
                for render in [false, true] {
                    let (state, order, widest) = simulate(n, fan_in, render);
                    assert_eq!(order, (1..=n).collect::<Vec<_>>(), "n={n} fan_in={fan_in}");
                    assert!(widest <= fan_in.max(2));
                    assert!(state.is_done());
                }
            }
        }
    }

    #[test]
    fn test_empty_queue_is_done_without_result() {
        let mut state = MergeQueueState::seed(Vec::new());
        assert!(state.is_done());
        assert_eq!(state.take_batch(3, false), None);
        assert_eq!(state.result(), None);
    }

    #[test]
    fn test_single_leaf_passes_through() {
        let (state, order, widest) = simulate(1, 4, false);
        assert_eq!(order, vec![1]);
        assert_eq!(widest, 0);
        assert_eq!(state.result(), Some((Path::new("leaf_1"), true)));
        assert_eq!(state.batch_counter, 0);
    }

    #[test]
    fn test_boundary_behind_full_batch_ends_the_line() {
        let mut state = MergeQueueState {
            intermediate: VecDeque::from(vec![
                QueueEntry::Clip { path: "a".into(), leaf: false },
                QueueEntry::Clip { path: "b".into(), leaf: false },
                QueueEntry::Boundary,
                QueueEntry::Clip { path: "c".into(), leaf: false },
            ]),
            ..Default::default()
        };
        match state.take_batch(2, false) {
            Some(Batch::Concat { sources, ends_line }) => {
                assert_eq!(sources.len(), 2);
                assert!(ends_line);
            }
            other => panic!("unexpected batch {other:?}"),
        }
        state.push_result("ab".into(), true);
        assert_eq!(
            state.intermediate,
            VecDeque::from(vec![
                QueueEntry::Clip { path: "c".into(), leaf: false },
                QueueEntry::Clip { path: "ab".into(), leaf: false },
                QueueEntry::Boundary,
            ])
        );
    }

    #[test]
    fn test_leading_boundary_is_dropped() {
        let mut state = MergeQueueState {
            intermediate: VecDeque::from(vec![
                QueueEntry::Boundary,
                QueueEntry::Clip { path: "b1".into(), leaf: false },
                QueueEntry::Clip { path: "b2".into(), leaf: false },
            ]),
            ..Default::default()
        };
        assert_eq!(state.take_batch(2, false), Some(Batch::EmptyLine));
        match state.take_batch(2, false) {
            Some(Batch::Concat { sources, ends_line }) => {
                let paths: Vec<_> = sources.iter().map(|s| s.path().to_path_buf()).collect();
                assert_eq!(paths, vec![PathBuf::from("b1"), PathBuf::from("b2")]);
                assert!(ends_line);
            }
            other => panic!("unexpected batch {other:?}"),
        }
    }

    #[test]
    fn test_inconsistent_snapshots() {
        let mut state = MergeQueueState::seed((1..=2).map(clip));
        assert!(state.is_consistent());
        state.intermediate.push_back(QueueEntry::Boundary);
        assert!(!state.is_consistent());

        let state = MergeQueueState {
            intermediate: VecDeque::from(vec![QueueEntry::Boundary, QueueEntry::Boundary]),
            ..Default::default()
        };
        assert!(!state.is_consistent());
    }

    #[test]
    fn test_state_serialization_shape() {
        let mut state = MergeQueueState::seed(vec![clip(1)]);
        state.intermediate.push_back(QueueEntry::Boundary);
        let json = serde_json::to_value(&state).unwrap();
        assert_eq!(json["intermediate"][0]["kind"], "boundary");
        let back: MergeQueueState = serde_json::from_value(json).unwrap();
        assert_eq!(back, state);

        let entry: QueueEntry = serde_json::from_str(r#"{"kind":"clip","path":"x.mp4"}"#).unwrap();
        assert_eq!(entry, QueueEntry::Clip { path: "x.mp4".into(), leaf: false });
    }
}

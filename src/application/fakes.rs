//! In-memory media engine for application tests.
//!
//! Clips are text files; concatenation joins their lines, so the content of
//! the final artifact is the order in which leaves were merged.

use crate::domain::clip_window::ClipWindow;
use crate::domain::overlay::Overlay;
use crate::error::{MediaError, MediaResult};
use crate::ports::media::MediaEngine;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

#[derive(Debug)]
pub struct FakeHandle {
    path: PathBuf,
    content: String,
    layers: usize,
}

#[derive(Default)]
struct Counters {
    open: AtomicUsize,
    max_open: AtomicUsize,
    layers: AtomicUsize,
    cuts: AtomicUsize,
    concats: AtomicUsize,
    fail_concat_at: Mutex<Option<usize>>,
    fail_cut_at: Mutex<Option<usize>>,
}

#[derive(Clone, Default)]
pub struct FakeEngine {
    counters: Arc<Counters>,
}

impl FakeEngine {
    pub fn open_handles(&self) -> usize {
        self.counters.open.load(Ordering::SeqCst)
    }

    pub fn max_open(&self) -> usize {
        self.counters.max_open.load(Ordering::SeqCst)
    }

    pub fn open_layers(&self) -> usize {
        self.counters.layers.load(Ordering::SeqCst)
    }

    pub fn cuts(&self) -> usize {
        self.counters.cuts.load(Ordering::SeqCst)
    }

    pub fn concats(&self) -> usize {
        self.counters.concats.load(Ordering::SeqCst)
    }

    /// Fail the `n`-th (0-based) concatenation from now on.
    pub fn fail_concat_at(&self, n: Option<usize>) {
        *self.counters.fail_concat_at.lock().unwrap() = n;
    }

    pub fn fail_cut_at(&self, n: Option<usize>) {
        *self.counters.fail_cut_at.lock().unwrap() = n;
    }
}

#[async_trait]
impl MediaEngine for FakeEngine {
    type Handle = FakeHandle;

    async fn cut(&self, source: &Path, window: &ClipWindow, output: &Path) -> MediaResult<()> {
        let n = self.counters.cuts.fetch_add(1, Ordering::SeqCst);
        if *self.counters.fail_cut_at.lock().unwrap() == Some(n) {
            return Err(MediaError::ffmpeg_failed("cut failed", None, Some(1)));
        }
        let name = source.file_name().unwrap().to_string_lossy();
        if let Some(parent) = output.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(output, format!("{name}@{:.2}-{:.2}", window.start, window.end))?;
        Ok(())
    }

    async fn open(&self, path: &Path) -> MediaResult<FakeHandle> {
        let content = std::fs::read_to_string(path).map_err(|_| MediaError::FileNotFound(path.to_path_buf()))?;
        let open = self.counters.open.fetch_add(1, Ordering::SeqCst) + 1;
        self.counters.max_open.fetch_max(open, Ordering::SeqCst);
        Ok(FakeHandle {
            path: path.to_path_buf(),
            content,
            layers: 0,
        })
    }

    async fn overlay(&self, mut handle: FakeHandle, _overlay: &Overlay) -> MediaResult<FakeHandle> {
        handle.layers += 2;
        self.counters.layers.fetch_add(2, Ordering::SeqCst);
        Ok(handle)
    }

    fn close(&self, handle: FakeHandle) {
        self.counters.layers.fetch_sub(handle.layers, Ordering::SeqCst);
        self.counters.open.fetch_sub(1, Ordering::SeqCst);
        drop(handle.path);
    }

    async fn concatenate(&self, handles: &[FakeHandle], output: &Path) -> MediaResult<()> {
        let n = self.counters.concats.fetch_add(1, Ordering::SeqCst);
        if *self.counters.fail_concat_at.lock().unwrap() == Some(n) {
            return Err(MediaError::ffmpeg_failed("concat failed", None, Some(1)));
        }
        if handles.is_empty() {
            return Err(MediaError::EmptyBatch);
        }
        let content: Vec<&str> = handles.iter().map(|h| h.content.as_str()).collect();
        if let Some(parent) = output.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(output, content.join("\n"))?;
        Ok(())
    }
}

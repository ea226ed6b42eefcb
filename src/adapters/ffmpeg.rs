//! Media engine driving the `ffmpeg` binary.

use crate::adapters::cmd::{find_program, stderr_tail, CommandRunner, TokioCommandRunner};
use crate::domain::clip_window::ClipWindow;
use crate::domain::overlay::{Overlay, Resolution};
use crate::error::{MediaError, MediaResult};
use crate::ports::media::MediaEngine;
use async_trait::async_trait;
use serde::Deserialize;
use std::ffi::OsString;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::debug;

const FONT_SIZE: u32 = 24;
const FRAME_RATE: u32 = 30;
const SAMPLE_RATE: u32 = 44100;

/// An opened media file, plus the text layers drawn over it.
#[derive(Debug)]
pub struct FfmpegHandle {
    path: PathBuf,
    _file: File,
    audio: AudioTrack,
    layers: Vec<TextLayer>,
}

/// Sources without sound get silence of their own length.
#[derive(Debug, Clone, Copy, PartialEq)]
enum AudioTrack {
    Present,
    Silent { duration: f64 },
}

#[derive(Debug, Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    streams: Vec<ProbeStream>,
    format: Option<ProbeFormat>,
}

#[derive(Debug, Deserialize)]
struct ProbeStream {
    codec_type: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ProbeFormat {
    duration: Option<String>,
}

impl ProbeOutput {
    fn audio_track(&self) -> Option<AudioTrack> {
        if self.streams.iter().any(|s| s.codec_type.as_deref() == Some("audio")) {
            return Some(AudioTrack::Present);
        }
        let duration = self.format.as_ref()?.duration.as_deref()?.trim().parse().ok()?;
        Some(AudioTrack::Silent { duration })
    }
}

#[derive(Debug)]
struct TextLayer {
    text: NamedTempFile,
    position: LayerPosition,
}

#[derive(Debug, Clone, Copy)]
enum LayerPosition {
    TopLeft,
    BottomLeft,
}

impl LayerPosition {
    fn coordinates(self) -> &'static str {
        match self {
            LayerPosition::TopLeft => "x=10:y=10",
            LayerPosition::BottomLeft => "x=10:y=h-th-10",
        }
    }
}

pub struct FfmpegEngine<R = TokioCommandRunner> {
    runner: R,
    program: PathBuf,
    probe: PathBuf,
    resolution: Resolution,
    threads: usize,
}

impl FfmpegEngine<TokioCommandRunner> {
    pub fn new(resolution: Resolution, threads: usize) -> MediaResult<Self> {
        let program = find_program("ffmpeg").ok_or(MediaError::FfmpegNotFound)?;
        let probe = find_program("ffprobe").ok_or(MediaError::FfmpegNotFound)?;
        let mut engine = Self::with_runner(TokioCommandRunner, program, resolution, threads);
        engine.probe = probe;
        Ok(engine)
    }
}

impl<R: CommandRunner> FfmpegEngine<R> {
    /// `ffprobe` is looked up next to `program`.
    pub fn with_runner(runner: R, program: impl Into<PathBuf>, resolution: Resolution, threads: usize) -> Self {
        let program = program.into();
        Self {
            runner,
            probe: program.with_file_name("ffprobe"),
            program,
            resolution,
            threads: threads.max(1),
        }
    }

    /// Run ffmpeg writing to a partial file, then move it over `output`.
    async fn run_to(&self, mut args: Vec<OsString>, output: &Path) -> MediaResult<()> {
        if let Some(parent) = output.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let partial = partial_path(output);
        args.extend(["-f", "mp4"].map(OsString::from));
        args.push(partial.clone().into_os_string());

        debug!("ffmpeg {:?}", args);
        let result = self.runner.run(&self.program, &args).await;
        let output_status = match result {
            Ok(out) => out,
            Err(e) => {
                let _ = tokio::fs::remove_file(&partial).await;
                return Err(e.into());
            }
        };
        if !output_status.status.success() {
            let _ = tokio::fs::remove_file(&partial).await;
            return Err(MediaError::ffmpeg_failed(
                format!("ffmpeg exited with {}", output_status.status),
                Some(stderr_tail(&output_status, 5)),
                output_status.status.code(),
            ));
        }
        tokio::fs::rename(&partial, output).await?;
        Ok(())
    }

    async fn audio_track(&self, path: &Path) -> MediaResult<AudioTrack> {
        let args: Vec<OsString> = vec![
            "-v".into(),
            "error".into(),
            "-show_entries".into(),
            "format=duration:stream=codec_type".into(),
            "-of".into(),
            "json".into(),
            path.as_os_str().to_owned(),
        ];
        let output = self.runner.run(&self.probe, &args).await?;
        if !output.status.success() {
            return Err(MediaError::ffmpeg_failed(
                format!("ffprobe exited with {}", output.status),
                Some(stderr_tail(&output, 5)),
                output.status.code(),
            ));
        }
        let probed: ProbeOutput = serde_json::from_slice(&output.stdout)
            .map_err(|e| MediaError::ffmpeg_failed(format!("unreadable ffprobe output: {e}"), None, None))?;
        probed.audio_track().ok_or_else(|| {
            MediaError::ffmpeg_failed(
                format!("{} has neither audio nor a known duration", path.display()),
                None,
                None,
            )
        })
    }

    fn base_args(&self) -> Vec<OsString> {
        ["-y", "-nostdin", "-v", "error"].map(OsString::from).to_vec()
    }

    fn encode_args(&self) -> Vec<OsString> {
        let threads = self.threads.to_string();
        [
            "-c:v", "libx264", "-preset", "veryfast", "-crf", "18", "-pix_fmt", "yuv420p", "-c:a", "aac", "-b:a",
            "192k", "-threads", threads.as_str(),
        ]
        .map(OsString::from)
        .to_vec()
    }

    fn concat_filter(&self, handles: &[FfmpegHandle]) -> String {
        let Resolution { width, height } = self.resolution;
        let mut filter = String::new();
        let mut streams = String::new();
        for (i, handle) in handles.iter().enumerate() {
            filter.push_str(&format!(
                "[{i}:v]scale={width}:{height}:force_original_aspect_ratio=decrease,\
pad={width}:{height}:(ow-iw)/2:(oh-ih)/2,setsar=1,fps={FRAME_RATE}"
            ));
            for layer in &handle.layers {
                filter.push_str(&format!(
                    ",drawtext=textfile='{}':fontsize={FONT_SIZE}:fontcolor=black:box=1:boxcolor=white:boxborderw=4:{}",
                    escape_filter_path(layer.text.path()),
                    layer.position.coordinates()
                ));
            }
            filter.push_str(&format!("[v{i}];"));
            match handle.audio {
                AudioTrack::Present => filter.push_str(&format!(
                    "[{i}:a]aresample={SAMPLE_RATE},aformat=channel_layouts=stereo[a{i}];"
                )),
                AudioTrack::Silent { duration } => filter.push_str(&format!(
                    "aevalsrc=0:channel_layout=stereo:sample_rate={SAMPLE_RATE}:duration={duration:.3}[a{i}];"
                )),
            }
            streams.push_str(&format!("[v{i}][a{i}]"));
        }
        filter.push_str(&format!("{streams}concat=n={}:v=1:a=1[v][a]", handles.len()));
        filter
    }
}

#[async_trait]
impl<R: CommandRunner> MediaEngine for FfmpegEngine<R> {
    type Handle = FfmpegHandle;

    async fn cut(&self, source: &Path, window: &ClipWindow, output: &Path) -> MediaResult<()> {
        if !window.is_valid() {
            return Err(MediaError::InvalidWindow {
                start: window.start,
                end: window.end,
            });
        }
        if !source.is_file() {
            return Err(MediaError::FileNotFound(source.to_path_buf()));
        }
        let mut args = self.base_args();
        args.extend([
            OsString::from("-ss"),
            format!("{:.3}", window.start).into(),
            "-i".into(),
            source.as_os_str().to_owned(),
            "-t".into(),
            format!("{:.3}", window.duration()).into(),
        ]);
        args.extend(self.encode_args());
        self.run_to(args, output).await
    }

    async fn open(&self, path: &Path) -> MediaResult<FfmpegHandle> {
        let file = File::open(path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => MediaError::FileNotFound(path.to_path_buf()),
            _ => MediaError::Io(e),
        })?;
        let audio = self.audio_track(path).await?;
        Ok(FfmpegHandle {
            path: path.to_path_buf(),
            _file: file,
            audio,
            layers: Vec::new(),
        })
    }

    async fn overlay(&self, mut handle: FfmpegHandle, overlay: &Overlay) -> MediaResult<FfmpegHandle> {
        for (text, position) in [
            (&overlay.source, LayerPosition::BottomLeft),
            (&overlay.counters, LayerPosition::TopLeft),
        ] {
            // `handle` and its layers are dropped on error
            let mut file = NamedTempFile::new()?;
            file.write_all(text.as_bytes())?;
            file.flush()?;
            handle.layers.push(TextLayer { text: file, position });
        }
        Ok(handle)
    }

    fn close(&self, handle: FfmpegHandle) {
        let FfmpegHandle { path, _file, layers, .. } = handle;
        for layer in layers {
            if let Err(e) = layer.text.close() {
                debug!("unable to remove overlay layer of {}: {}", path.display(), e);
            }
        }
        drop(_file);
    }

    async fn concatenate(&self, handles: &[FfmpegHandle], output: &Path) -> MediaResult<()> {
        if handles.is_empty() {
            return Err(MediaError::EmptyBatch);
        }
        let mut args = self.base_args();
        for handle in handles {
            args.push("-i".into());
            args.push(handle.path.as_os_str().to_owned());
        }
        args.extend([
            OsString::from("-filter_complex"),
            self.concat_filter(handles).into(),
            "-map".into(),
            "[v]".into(),
            "-map".into(),
            "[a]".into(),
        ]);
        args.extend(self.encode_args());
        self.run_to(args, output).await
    }
}

fn partial_path(output: &Path) -> PathBuf {
    let mut name = output.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".partial");
    output.with_file_name(name)
}

/// Quote a path for use inside a filtergraph option value.
fn escape_filter_path(path: &Path) -> String {
    path.to_string_lossy()
        .replace('\\', "\\\\")
        .replace('\'', "'\\''")
        .replace(':', "\\:")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::cmd::test_support::create_mock_output;
    use crate::adapters::cmd::MockCommandRunner;

    fn engine(runner: MockCommandRunner) -> FfmpegEngine<MockCommandRunner> {
        FfmpegEngine::with_runner(runner, "ffmpeg", Resolution::new(1280, 720), 2)
    }

    const WITH_AUDIO: &str =
        r#"{"streams":[{"codec_type":"video"},{"codec_type":"audio"}],"format":{"duration":"1.500000"}}"#;
    const WITHOUT_AUDIO: &str = r#"{"streams":[{"codec_type":"video"}],"format":{"duration":"2.250000"}}"#;

    /// The mocked ffprobe reports `json` for every file.
    fn probes(runner: &mut MockCommandRunner, json: &'static str) {
        runner
            .expect_run()
            .withf(|program, _| program.ends_with("ffprobe"))
            .returning(move |_, _| Ok(create_mock_output(json, "", 0)));
    }

    /// The mocked ffmpeg writes its last argument, like the real one.
    fn writes_output(runner: &mut MockCommandRunner) {
        runner.expect_run().withf(|program, _| program.ends_with("ffmpeg")).returning(|_, args| {
            let target = args.last().unwrap();
            std::fs::write(target, b"media").unwrap();
            Ok(create_mock_output("", "", 0))
        });
    }

    #[tokio::test]
    async fn test_cut_writes_through_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("video.mp4");
        std::fs::write(&source, "v").unwrap();
        let output = dir.path().join("clips/1_word.mp4");

        let mut runner = MockCommandRunner::new();
        runner
            .expect_run()
            .withf(|_, args| {
                let args: Vec<String> = args.iter().map(|a| a.to_string_lossy().into_owned()).collect();
                args.windows(2).any(|w| w[0] == "-ss" && w[1] == "9.750")
                    && args.windows(2).any(|w| w[0] == "-t" && w[1] == "1.000")
                    && args.last().is_some_and(|a| a.ends_with("1_word.mp4.partial"))
            })
            .times(1)
            .returning(|_, args| {
                std::fs::write(args.last().unwrap(), b"clip").unwrap();
                Ok(create_mock_output("", "", 0))
            });

        let window = ClipWindow { start: 9.75, end: 10.75 };
        engine(runner).cut(&source, &window, &output).await.unwrap();
        assert_eq!(std::fs::read(&output).unwrap(), b"clip");
        assert!(!partial_path(&output).exists());
    }

    #[tokio::test]
    async fn test_failed_cut_leaves_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("video.mp4");
        std::fs::write(&source, "v").unwrap();
        let output = dir.path().join("out.mp4");

        let mut runner = MockCommandRunner::new();
        runner.expect_run().returning(|_, args| {
            std::fs::write(args.last().unwrap(), b"half").unwrap();
            Ok(create_mock_output("", "Invalid data found", 1))
        });

        let window = ClipWindow { start: 0.0, end: 1.0 };
        let err = engine(runner).cut(&source, &window, &output).await.unwrap_err();
        match err {
            MediaError::FfmpegFailed { stderr, exit_code, .. } => {
                assert_eq!(exit_code, Some(1));
                assert_eq!(stderr.as_deref(), Some("Invalid data found"));
            }
            other => panic!("unexpected error {other:?}"),
        }
        assert!(!output.exists());
        assert!(!partial_path(&output).exists());
    }

    #[tokio::test]
    async fn test_cut_rejects_empty_window() {
        let runner = MockCommandRunner::new();
        let window = ClipWindow { start: 2.0, end: 2.0 };
        let err = engine(runner)
            .cut(Path::new("missing.mp4"), &window, Path::new("out.mp4"))
            .await
            .unwrap_err();
        assert!(matches!(err, MediaError::InvalidWindow { .. }));
    }

    #[tokio::test]
    async fn test_overlay_layers_are_removed_on_close() {
        let dir = tempfile::tempdir().unwrap();
        let clip = dir.path().join("clip.mp4");
        std::fs::write(&clip, "c").unwrap();

        let mut runner = MockCommandRunner::new();
        probes(&mut runner, WITH_AUDIO);
        let engine = engine(runner);
        let handle = engine.open(&clip).await.unwrap();
        let overlay = Overlay {
            source: "title".into(),
            counters: "1/1".into(),
        };
        let handle = engine.overlay(handle, &overlay).await.unwrap();
        let layers: Vec<PathBuf> = handle.layers.iter().map(|l| l.text.path().to_path_buf()).collect();
        assert_eq!(layers.len(), 2);
        assert_eq!(std::fs::read_to_string(&layers[0]).unwrap(), "title");

        engine.close(handle);
        assert!(layers.iter().all(|l| !l.exists()));
        assert!(clip.exists());
    }

    #[tokio::test]
    async fn test_open_missing_file() {
        let engine = engine(MockCommandRunner::new());
        let err = engine.open(Path::new("/nonexistent/clip.mp4")).await.unwrap_err();
        assert!(matches!(err, MediaError::FileNotFound(_)));
    }

    #[tokio::test]
    async fn test_concatenate_builds_one_filtergraph() {
        let dir = tempfile::tempdir().unwrap();
        let paths: Vec<PathBuf> = (0..3).map(|i| dir.path().join(format!("{i}.mp4"))).collect();
        for p in &paths {
            std::fs::write(p, "c").unwrap();
        }

        let mut runner = MockCommandRunner::new();
        probes(&mut runner, WITH_AUDIO);
        writes_output(&mut runner);
        let engine = engine(runner);
        let mut handles = Vec::new();
        for p in &paths {
            handles.push(engine.open(p).await.unwrap());
        }

        let filter = engine.concat_filter(&handles);
        assert!(filter.contains("[0:v]scale=1280:720"));
        assert!(filter.ends_with("[v0][a0][v1][a1][v2][a2]concat=n=3:v=1:a=1[v][a]"));

        let output = dir.path().join("merged.mp4");
        engine.concatenate(&handles, &output).await.unwrap();
        assert!(output.is_file());
        for h in handles {
            engine.close(h);
        }

        let err = engine.concatenate(&[], &output).await.unwrap_err();
        assert!(matches!(err, MediaError::EmptyBatch));
    }

    #[tokio::test]
    async fn test_silent_source_gets_generated_audio() {
        let dir = tempfile::tempdir().unwrap();
        let clip = dir.path().join("mute.mp4");
        std::fs::write(&clip, "c").unwrap();

        let mut runner = MockCommandRunner::new();
        probes(&mut runner, WITHOUT_AUDIO);
        let engine = engine(runner);
        let handle = engine.open(&clip).await.unwrap();
        assert_eq!(handle.audio, AudioTrack::Silent { duration: 2.25 });

        let filter = engine.concat_filter(std::slice::from_ref(&handle));
        assert!(filter.contains("aevalsrc=0:channel_layout=stereo:sample_rate=44100:duration=2.250[a0];"));
        assert!(!filter.contains("[0:a]"));
        engine.close(handle);
    }

    #[tokio::test]
    async fn test_probe_failure_fails_open() {
        let dir = tempfile::tempdir().unwrap();
        let clip = dir.path().join("broken.mp4");
        std::fs::write(&clip, "c").unwrap();

        let mut runner = MockCommandRunner::new();
        runner
            .expect_run()
            .returning(|_, _| Ok(create_mock_output("", "moov atom not found", 1)));
        let err = engine(runner).open(&clip).await.unwrap_err();
        assert!(matches!(err, MediaError::FfmpegFailed { exit_code: Some(1), .. }));

        let probe = ProbeOutput {
            streams: Vec::new(),
            format: None,
        };
        assert_eq!(probe.audio_track(), None);
    }

    #[test]
    fn test_escape_filter_path() {
        assert_eq!(escape_filter_path(Path::new("/tmp/a:b")), "/tmp/a\\:b");
    }
}

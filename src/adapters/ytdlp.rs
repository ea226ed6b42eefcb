//! Captions and video retrieval with yt-dlp.

use crate::adapters::cmd::{find_program, stderr_tail, CommandRunner, TokioCommandRunner};
use crate::domain::video::{watch_url, ArtifactInfo};
use crate::error::SourceError;
use crate::ports::source::{DownloadRequest, Downloaded, MediaSource};
use async_trait::async_trait;
use std::ffi::OsString;
use std::path::PathBuf;
use tracing::debug;

const CAPTIONS_LANG: &str = "en";
const VIDEO_FORMAT: &str = "bv*[ext=mp4]+ba[ext=m4a]/b[ext=mp4]/bv*+ba/b";

pub struct YtDlpSource<R = TokioCommandRunner> {
    runner: R,
    program: PathBuf,
    download_dir: PathBuf,
}

impl YtDlpSource<TokioCommandRunner> {
    pub fn new(download_dir: impl Into<PathBuf>) -> Result<Self, SourceError> {
        let program = find_program("yt-dlp").ok_or(SourceError::YtDlpNotFound)?;
        Ok(Self::with_runner(TokioCommandRunner, program, download_dir))
    }
}

impl<R: CommandRunner> YtDlpSource<R> {
    pub fn with_runner(runner: R, program: impl Into<PathBuf>, download_dir: impl Into<PathBuf>) -> Self {
        Self {
            runner,
            program: program.into(),
            download_dir: download_dir.into(),
        }
    }

    pub fn captions_path(&self, video_id: &str) -> PathBuf {
        self.download_dir.join(format!("{video_id}.{CAPTIONS_LANG}.vtt"))
    }

    pub fn video_path(&self, video_id: &str) -> PathBuf {
        self.download_dir.join(format!("{video_id}.mp4"))
    }

    fn args(&self, video_id: &str, captions: bool, video: bool) -> Vec<OsString> {
        let template = self.download_dir.join(format!("{video_id}.%(ext)s"));
        let mut args: Vec<OsString> = vec![
            "--no-playlist".into(),
            "--no-progress".into(),
            "--no-overwrites".into(),
            "-o".into(),
            template.into_os_string(),
        ];
        if captions {
            args.extend(
                ["--write-subs", "--write-auto-subs", "--sub-format", "vtt", "--sub-langs", CAPTIONS_LANG]
                    .map(OsString::from),
            );
        }
        if video {
            args.extend(["-f", VIDEO_FORMAT, "--merge-output-format", "mp4"].map(OsString::from));
        } else {
            args.push("--skip-download".into());
        }
        args.push(watch_url(video_id).into());
        args
    }
}

#[async_trait]
impl<R: CommandRunner> MediaSource for YtDlpSource<R> {
    async fn download(&self, video_id: &str, request: DownloadRequest) -> Result<Downloaded, SourceError> {
        let captions_path = self.captions_path(video_id);
        let video_path = self.video_path(video_id);

        let need_captions = request.captions() && !captions_path.is_file();
        let need_video = request.video() && !video_path.is_file();

        if need_captions || need_video {
            tokio::fs::create_dir_all(&self.download_dir).await?;
            let args = self.args(video_id, need_captions, need_video);
            debug!("yt-dlp {:?}", args);
            let output = self.runner.run(&self.program, &args).await?;
            if !output.status.success() {
                return Err(SourceError::download_failed(video_id, stderr_tail(&output, 3)));
            }
        }

        Ok(Downloaded {
            captions: ArtifactInfo::probe(&captions_path),
            video: ArtifactInfo::probe(&video_path),
        })
    }
}

impl<R> std::fmt::Debug for YtDlpSource<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("YtDlpSource")
            .field("program", &self.program)
            .field("download_dir", &self.download_dir)
            .finish()
    }
}

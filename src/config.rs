//! Run configuration, loaded from the environment (and an optional `.env` file).

use crate::domain::clip_window::ClipSettings;
use crate::domain::clips::VideoFilter;
use crate::domain::captions::WordMatcher;
use crate::domain::overlay::Resolution;
use crate::error::ConfigError;
use std::env;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Prefix shared by every environment variable read here.
pub const ENV_PREFIX: &str = "WORDCATCH_";

/// Configuration of the `catch` and `stats` commands.
#[derive(Clone, Debug)]
pub struct CatchConfig {
    /// Name of the channel to extract the videos from
    pub channel_name: String,
    /// Word (regular expression) to extract from the channel videos
    pub word_to_extract: String,
    /// YouTube Data API key
    pub api_key: String,
    /// Final resolution of the video; smaller and bigger clips are resized
    pub resolution: Resolution,

    /// Folder where everything is extracted
    pub output_dir: PathBuf,
    /// Checkpoint storage (channel, video list, per-video data, merge queue)
    pub data_dir: PathBuf,
    /// Downloaded captions and videos
    pub download_dir: PathBuf,
    /// Intermediate and final artifacts of the merge
    pub build_dir: PathBuf,

    pub clip: ClipSettings,

    /// Persist checkpoints at all
    pub output_data: bool,
    /// Draw title and counters on top of every clip
    pub text_overlay: bool,
    /// Delete downloaded captions/videos once used
    pub cleanup_downloads: bool,
    /// Delete intermediate merge artifacts once folded into a newer one
    pub cleanup_temporary_clips: bool,
    /// Recompute captions metadata and occurrences even if cached
    pub override_video_data: bool,
    /// Recut clips even if cached
    pub override_clips: bool,
    pub generate_clips: bool,
    pub generate_final_video: bool,
    /// Refetch the channel video list even if cached
    pub update_video_list: bool,

    pub filter: VideoFilter,

    /// Maximum number of videos to download, cut and compose
    pub max_videos: usize,
    /// Videos processed concurrently
    pub max_workers: usize,
    /// Threads handed to each encode
    pub max_encode_threads: usize,
    /// Maximum number of clips opened at once while merging
    pub max_open_files: usize,
}

impl CatchConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenv::dotenv().ok();
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Load configuration from `path` (dotenv format), then the environment.
    pub fn from_env_file(path: &Path) -> Result<Self, ConfigError> {
        dotenv::from_path(path).map_err(|e| {
            ConfigError::invalid("--env-file", path.display().to_string(), e.to_string())
        })?;
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Build the configuration from an arbitrary variable source.
    ///
    /// Variables are looked up with [`ENV_PREFIX`] prepended.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let vars = Vars { lookup };

        let output_dir = PathBuf::from(vars.string("OUTPUT_DIR", "."));
        let data_dir = vars.path("DATA_DIR", output_dir.join("data"));
        let download_dir = vars.path("DOWNLOAD_DIR", output_dir.join("download"));
        let build_dir = vars.path("BUILD_DIR", output_dir.join("build"));

        Ok(Self {
            channel_name: vars.string("CHANNEL_NAME", ""),
            word_to_extract: vars.string("WORD_TO_EXTRACT", ""),
            api_key: vars.string("YOUTUBE_API_KEY", ""),
            resolution: vars.parse("RESOLUTION", Resolution::new(1920, 1080))?,
            output_dir,
            data_dir,
            download_dir,
            build_dir,
            clip: ClipSettings {
                max_length: vars.parse("MAX_CLIP_LENGTH", 1.5)?,
                start_shift: vars.parse("START_SHIFT", -0.25)?,
                end_shift: vars.parse("END_SHIFT", 0.75)?,
            },
            output_data: vars.flag("OUTPUT_DATA", true)?,
            text_overlay: vars.flag("TEXT_OVERLAY", true)?,
            cleanup_downloads: vars.flag("CLEANUP_DOWNLOADS", true)?,
            cleanup_temporary_clips: vars.flag("CLEANUP_TEMPORARY_CLIPS", true)?,
            override_video_data: vars.flag("OVERRIDE_VIDEO_DATA", false)?,
            override_clips: vars.flag("OVERRIDE_CLIPS", false)?,
            generate_clips: vars.flag("GENERATE_CLIPS", true)?,
            generate_final_video: vars.flag("GENERATE_FINAL_VIDEO", true)?,
            update_video_list: vars.flag("UPDATE_VIDEO_LIST", false)?,
            filter: VideoFilter::new(vars.list("FILTER_VIDEO_IDS"), vars.list("FILTER_OUT_VIDEO_IDS")),
            max_videos: vars.parse("MAX_VIDEOS", 100_000)?,
            max_workers: vars.parse("MAX_WORKERS", 1)?,
            max_encode_threads: vars.parse("MAX_ENCODE_THREADS", 1)?,
            max_open_files: vars.parse("MAX_OPEN_FILES", 60)?,
        })
    }

    /// Check the values a `catch` run cannot work without.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.channel_name.trim().is_empty() {
            return Err(ConfigError::Missing("WORDCATCH_CHANNEL_NAME"));
        }
        if self.word_to_extract.trim().is_empty() {
            return Err(ConfigError::Missing("WORDCATCH_WORD_TO_EXTRACT"));
        }
        WordMatcher::new(&self.word_to_extract)?;
        if !(self.clip.max_length > 0.0) {
            return Err(ConfigError::invalid(
                "WORDCATCH_MAX_CLIP_LENGTH",
                self.clip.max_length.to_string(),
                "must be positive",
            ));
        }
        if self.max_workers == 0 {
            return Err(ConfigError::invalid("WORDCATCH_MAX_WORKERS", "0", "must be at least 1"));
        }
        if self.max_open_files == 0 {
            return Err(ConfigError::invalid("WORDCATCH_MAX_OPEN_FILES", "0", "must be at least 1"));
        }
        Ok(())
    }

    /// Name of the final artifact, before uniquifying.
    pub fn final_video_name(&self) -> String {
        format!(
            "{}_{}.mp4",
            sanitize_file_component(&self.channel_name),
            sanitize_file_component(&self.word_to_extract)
        )
    }
}

/// Keep only characters that are safe in a file name.
pub fn sanitize_file_component(raw: &str) -> String {
    let cleaned: String = raw
        .trim()
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    if cleaned.is_empty() {
        "_".to_string()
    } else {
        cleaned
    }
}

struct Vars<F> {
    lookup: F,
}

impl<F> Vars<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn raw(&self, name: &str) -> Option<String> {
        (self.lookup)(&format!("{ENV_PREFIX}{name}"))
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn string(&self, name: &str, default: &str) -> String {
        self.raw(name).unwrap_or_else(|| default.to_string())
    }

    fn path(&self, name: &str, default: PathBuf) -> PathBuf {
        self.raw(name).map(PathBuf::from).unwrap_or(default)
    }

    fn parse<T>(&self, name: &str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        match self.raw(name) {
            Some(value) => value
                .parse()
                .map_err(|e: T::Err| ConfigError::invalid(format!("{ENV_PREFIX}{name}"), &value, e.to_string())),
            None => Ok(default),
        }
    }

    fn flag(&self, name: &str, default: bool) -> Result<bool, ConfigError> {
        match self.raw(name) {
            Some(value) => parse_bool(&value).ok_or_else(|| {
                ConfigError::invalid(format!("{ENV_PREFIX}{name}"), &value, "expected a boolean")
            }),
            None => Ok(default),
        }
    }

    fn list(&self, name: &str) -> Vec<String> {
        self.raw(name)
            .map(|value| {
                value
                    .split(',')
                    .map(str::trim)
                    .filter(|id| !id.is_empty())
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default()
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "y" | "on" => Some(true),
        "false" | "0" | "no" | "n" | "off" => Some(false),
        _ => None,
    }
}

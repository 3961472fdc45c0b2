// Media processing over external ffmpeg/ffprobe binaries
//
// - commands: argument builders and process execution
// - processor: the ffmpeg-backed `MediaProcessor`

pub mod commands;
pub mod processor;

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;

pub use commands::{MediaCommand, MediaCommandBuilder};
pub use processor::FfmpegProcessor;

use crate::error::Result;

/// Stream facts read from a media file.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MediaInfo {
    pub title: Option<String>,
    pub duration: Option<f64>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub fps: Option<f64>,
}

/// Audio/video operations the pipeline needs from a media tool.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MediaProcessor: Send + Sync {
    /// Extract the speech track of `video` into `audio`.
    async fn extract_audio(&self, video: &Path, audio: &Path) -> Result<()>;

    /// Cut `video` to the given bounds (seconds) into `output`.
    async fn trim_video(
        &self,
        video: &Path,
        output: &Path,
        start: Option<f64>,
        end: Option<f64>,
    ) -> Result<()>;

    /// Render `subtitles` onto `video`, writing `output`.
    async fn burn_subtitles(&self, video: &Path, subtitles: &Path, output: &Path) -> Result<()>;

    async fn probe(&self, path: &Path) -> Result<MediaInfo>;

    /// Split `audio` into chunks of `chunk` length inside `dir`, returning
    /// each chunk's start offset and path in order.
    async fn split_audio(
        &self,
        audio: &Path,
        dir: &Path,
        chunk: Duration,
    ) -> Result<Vec<(Duration, PathBuf)>>;

    /// Verify the media binaries can be executed.
    async fn check_availability(&self) -> Result<()>;
}

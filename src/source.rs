// Video acquisition
//
// `VideoSource` fetches a remote reference or passes an uploaded file
// through, applying an optional trim window on the way. Reported durations
// are always those of the untrimmed source; `VideoMetadata::with_trim`
// derives the duration of the trimmed result.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use url::Url;

use crate::config::DownloaderConfig;
use crate::error::{BisubError, Result};
use crate::media::{MediaCommand, MediaInfo, MediaProcessor};

const DEFAULT_WIDTH: u32 = 1920;
const DEFAULT_HEIGHT: u32 = 1080;
const DEFAULT_FPS: f64 = 30.0;

/// Where a job's video comes from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceRef {
    Remote(String),
    Local(PathBuf),
}

#[derive(Debug, Clone, PartialEq)]
pub struct FetchRequest {
    pub source: SourceRef,
    pub start: Option<f64>,
    pub end: Option<f64>,
}

/// Display metadata of an acquired video.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoMetadata {
    pub title: String,
    pub description: Option<String>,
    /// Seconds
    pub duration: f64,
    pub width: u32,
    pub height: u32,
    pub fps: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FetchedVideo {
    pub path: PathBuf,
    pub metadata: VideoMetadata,
}

impl VideoMetadata {
    /// Duration after cutting the source to `start..end`.
    pub fn with_trim(mut self, start: Option<f64>, end: Option<f64>) -> Self {
        self.duration = match (start, end) {
            (Some(start), Some(end)) => end - start,
            (Some(start), None) => self.duration - start,
            (None, Some(end)) => end,
            (None, None) => self.duration,
        }
        .max(0.0);
        self
    }

    fn from_parts(
        title: String,
        description: Option<String>,
        duration: f64,
        info: &MediaInfo,
    ) -> Self {
        Self {
            title,
            description,
            duration,
            width: info.width.filter(|w| *w > 0).unwrap_or(DEFAULT_WIDTH),
            height: info.height.filter(|h| *h > 0).unwrap_or(DEFAULT_HEIGHT),
            fps: info.fps.filter(|f| *f > 0.0).unwrap_or(DEFAULT_FPS),
        }
    }
}

/// Reject negative bounds and empty windows.
pub fn validate_trim(start: Option<f64>, end: Option<f64>) -> Result<()> {
    if let Some(start) = start {
        if !start.is_finite() || start < 0.0 {
            return Err(BisubError::InvalidInput(format!(
                "start time must be a non-negative number, got {}",
                start
            )));
        }
    }
    if let Some(end) = end {
        if !end.is_finite() || end <= 0.0 {
            return Err(BisubError::InvalidInput(format!(
                "end time must be positive, got {}",
                end
            )));
        }
        if start.is_some_and(|start| end <= start) {
            return Err(BisubError::InvalidInput(format!(
                "end time {} must be after start time {}",
                end,
                start.unwrap_or_default()
            )));
        }
    }
    Ok(())
}

/// Accept only absolute http(s) references.
pub fn validate_remote(reference: &str) -> Result<Url> {
    let url = Url::parse(reference.trim()).map_err(|e| {
        BisubError::InvalidInput(format!("invalid video URL {:?}: {}", reference, e))
    })?;
    match url.scheme() {
        "http" | "https" if url.host_str().is_some() => Ok(url),
        _ => Err(BisubError::InvalidInput(format!(
            "unsupported video URL: {}",
            reference
        ))),
    }
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait VideoSource: Send + Sync {
    /// Acquire the requested video into `dest_dir`.
    async fn fetch(&self, request: &FetchRequest, dest_dir: &Path) -> Result<FetchedVideo>;
}

/// yt-dlp for remote references, ffmpeg for local trims.
pub struct YtDlpSource {
    config: DownloaderConfig,
    media: Arc<dyn MediaProcessor>,
}

#[derive(Debug, Deserialize)]
struct InfoJson {
    title: Option<String>,
    description: Option<String>,
    duration: Option<f64>,
    width: Option<u32>,
    height: Option<u32>,
    fps: Option<f64>,
}

impl YtDlpSource {
    pub fn new(config: DownloaderConfig, media: Arc<dyn MediaProcessor>) -> Self {
        Self { config, media }
    }

    fn download_command(
        &self,
        url: &Url,
        dest_dir: &Path,
        start: Option<f64>,
        end: Option<f64>,
    ) -> MediaCommand {
        let template = dest_dir.join("source.%(ext)s");
        let mut cmd = MediaCommand::new(&self.config.binary_path, "Video download")
            .args(["--no-playlist", "--no-warnings", "--no-progress"])
            .arg("-f")
            .arg(&self.config.format)
            .args(["--merge-output-format", "mp4"])
            .args(["--dump-single-json", "--no-simulate"])
            .arg("-o")
            .output(template);

        if start.is_some() || end.is_some() {
            cmd = cmd
                .arg("--download-sections")
                .arg(download_section(start, end))
                .arg("--force-keyframes-at-cuts");
        }
        cmd.arg(url.as_str())
    }

    async fn fetch_remote(
        &self,
        reference: &str,
        request: &FetchRequest,
        dest_dir: &Path,
    ) -> Result<FetchedVideo> {
        let url = validate_remote(reference)?;
        info!("Downloading {}", url);

        let stdout = self
            .download_command(&url, dest_dir, request.start, request.end)
            .capture()
            .await
            .map_err(|e| BisubError::Download(e.to_string()))?;

        let info = parse_info_json(&stdout)?;
        let path = find_download(dest_dir).await?;

        let probed = match self.media.probe(&path).await {
            Ok(probed) => probed,
            Err(e) => {
                warn!("ffprobe failed on {}, using downloader metadata: {}", path.display(), e);
                MediaInfo::default()
            }
        };

        // A trimmed download no longer knows the source duration.
        let trimmed = request.start.is_some() || request.end.is_some();
        let duration = info
            .duration
            .or(if trimmed { None } else { probed.duration })
            .filter(|d| *d > 0.0)
            .ok_or_else(|| BisubError::Download("video duration is unknown".to_string()))?;

        let merged = MediaInfo {
            title: None,
            duration: Some(duration),
            width: probed.width.or(info.width),
            height: probed.height.or(info.height),
            fps: probed.fps.or(info.fps),
        };
        let title = non_empty(info.title).unwrap_or_else(|| file_stem(&path));

        Ok(FetchedVideo {
            metadata: VideoMetadata::from_parts(
                title,
                non_empty(info.description),
                duration,
                &merged,
            ),
            path,
        })
    }

    async fn fetch_local(
        &self,
        source: &Path,
        request: &FetchRequest,
        dest_dir: &Path,
    ) -> Result<FetchedVideo> {
        if !source.is_file() {
            return Err(BisubError::Download(format!(
                "uploaded file does not exist: {}",
                source.display()
            )));
        }

        let probed = self
            .media
            .probe(source)
            .await
            .map_err(|e| BisubError::Download(format!("failed to read video metadata: {}", e)))?;
        let duration = probed
            .duration
            .filter(|d| *d > 0.0)
            .ok_or_else(|| BisubError::Download("video duration is unknown".to_string()))?;
        let title = non_empty(probed.title.clone()).unwrap_or_else(|| file_stem(source));
        let metadata = VideoMetadata::from_parts(title, None, duration, &probed);

        if request.start.is_none() && request.end.is_none() {
            debug!("Using uploaded file {} as is", source.display());
            return Ok(FetchedVideo {
                path: source.to_path_buf(),
                metadata,
            });
        }

        let extension = source
            .extension()
            .map(|e| e.to_string_lossy().into_owned())
            .unwrap_or_else(|| "mp4".to_string());
        let trimmed = dest_dir.join(format!("source_trimmed.{}", extension));
        self.media
            .trim_video(source, &trimmed, request.start, request.end)
            .await?;

        Ok(FetchedVideo {
            path: trimmed,
            metadata,
        })
    }
}

#[async_trait]
impl VideoSource for YtDlpSource {
    async fn fetch(&self, request: &FetchRequest, dest_dir: &Path) -> Result<FetchedVideo> {
        validate_trim(request.start, request.end)?;
        tokio::fs::create_dir_all(dest_dir).await?;

        match &request.source {
            SourceRef::Remote(reference) => self.fetch_remote(reference, request, dest_dir).await,
            SourceRef::Local(path) => self.fetch_local(path, request, dest_dir).await,
        }
    }
}

/// yt-dlp `--download-sections` value for a time window.
fn download_section(start: Option<f64>, end: Option<f64>) -> String {
    let start = start.unwrap_or(0.0);
    match end {
        Some(end) => format!("*{}-{}", start, end),
        None => format!("*{}-inf", start),
    }
}

fn parse_info_json(stdout: &str) -> Result<InfoJson> {
    // The JSON document is the last non-empty line of output.
    let line = stdout
        .lines()
        .rev()
        .find(|l| l.trim_start().starts_with('{'))
        .ok_or_else(|| BisubError::Download("downloader returned no video info".to_string()))?;
    serde_json::from_str(line)
        .map_err(|e| BisubError::Download(format!("failed to parse video info: {}", e)))
}

async fn find_download(dest_dir: &Path) -> Result<PathBuf> {
    let mut entries = tokio::fs::read_dir(dest_dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        let is_source = path
            .file_stem()
            .is_some_and(|stem| stem.to_string_lossy() == "source");
        let is_partial = path
            .extension()
            .is_some_and(|ext| ext == "part" || ext == "json");
        if is_source && !is_partial && path.is_file() {
            return Ok(path);
        }
    }
    Err(BisubError::Download(
        "downloaded video file not found".to_string(),
    ))
}

fn non_empty(text: Option<String>) -> Option<String> {
    text.map(|t| t.trim().to_string()).filter(|t| !t.is_empty())
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "video".to_string())
}

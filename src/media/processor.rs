use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, info};

use super::commands::Binary;
use super::{MediaCommandBuilder, MediaInfo, MediaProcessor};
use crate::config::MediaConfig;
use crate::error::{BisubError, Result};

/// ffmpeg-backed media processor.
pub struct FfmpegProcessor {
    config: MediaConfig,
    command_builder: MediaCommandBuilder,
}

impl FfmpegProcessor {
    pub fn new(config: MediaConfig) -> Self {
        let command_builder = MediaCommandBuilder::new(&config.ffmpeg_path, &config.ffprobe_path);
        Self {
            config,
            command_builder,
        }
    }
}

fn require_file(path: &Path, what: &str) -> Result<()> {
    if path.is_file() {
        Ok(())
    } else {
        Err(BisubError::Media(format!(
            "{} does not exist or is not a file: {}",
            what,
            path.display()
        )))
    }
}

#[async_trait]
impl MediaProcessor for FfmpegProcessor {
    async fn extract_audio(&self, video: &Path, audio: &Path) -> Result<()> {
        require_file(video, "Video file")?;
        info!("Extracting audio from {} to {}", video.display(), audio.display());

        self.command_builder
            .extract_audio(video, audio, &self.config.audio_bitrate)
            .execute()
            .await?;

        info!("Audio extraction completed");
        Ok(())
    }

    async fn trim_video(
        &self,
        video: &Path,
        output: &Path,
        start: Option<f64>,
        end: Option<f64>,
    ) -> Result<()> {
        require_file(video, "Video file")?;
        info!("Trimming {} to {:?}..{:?}", video.display(), start, end);

        self.command_builder
            .trim(video, output, start, end)
            .execute()
            .await
    }

    async fn burn_subtitles(&self, video: &Path, subtitles: &Path, output: &Path) -> Result<()> {
        require_file(video, "Video file")?;
        require_file(subtitles, "Subtitle file")?;
        info!(
            "Burning subtitles from {} into {} -> {}",
            subtitles.display(),
            video.display(),
            output.display()
        );

        self.command_builder
            .burn_subtitles(video, subtitles, output, &self.config.burn_options)
            .execute()
            .await?;

        info!("Subtitle burn-in completed");
        Ok(())
    }

    async fn probe(&self, path: &Path) -> Result<MediaInfo> {
        require_file(path, "Media file")?;
        let json = self.command_builder.probe(path).capture().await?;
        parse_probe(&json)
    }

    async fn split_audio(
        &self,
        audio: &Path,
        dir: &Path,
        chunk: Duration,
    ) -> Result<Vec<(Duration, PathBuf)>> {
        require_file(audio, "Audio file")?;
        tokio::fs::create_dir_all(dir).await?;

        let extension = audio
            .extension()
            .map(|ext| ext.to_string_lossy().into_owned())
            .unwrap_or_else(|| "mp3".to_string());
        let pattern = dir.join(format!("chunk_%04d.{}", extension));
        let seconds = chunk.as_secs().max(1);

        self.command_builder
            .split_audio(audio, &pattern, seconds)
            .execute()
            .await?;

        let mut chunks = Vec::new();
        let mut entries = tokio::fs::read_dir(dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with("chunk_") {
                chunks.push(entry.path());
            }
        }
        chunks.sort();

        if chunks.is_empty() {
            return Err(BisubError::Media("Audio split produced no chunks".to_string()));
        }
        debug!("Split {} into {} chunks", audio.display(), chunks.len());

        Ok(chunks
            .into_iter()
            .enumerate()
            .map(|(i, path)| (Duration::from_secs(seconds * i as u64), path))
            .collect())
    }

    async fn check_availability(&self) -> Result<()> {
        for binary in [Binary::Ffmpeg, Binary::Ffprobe] {
            let output = self.command_builder.version_check(binary).capture().await?;
            let version = output.lines().next().unwrap_or("unknown version");
            info!("{:?} available: {}", binary, version);
        }
        Ok(())
    }
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
    width: Option<u32>,
    height: Option<u32>,
    r_frame_rate: Option<String>,
    avg_frame_rate: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ProbeFormat {
    duration: Option<String>,
    #[serde(default)]
    tags: std::collections::HashMap<String, String>,
}

/// Read `MediaInfo` from ffprobe's JSON output.
pub fn parse_probe(json: &str) -> Result<MediaInfo> {
    let probe: ProbeOutput = serde_json::from_str(json)
        .map_err(|e| BisubError::Media(format!("Failed to parse ffprobe output: {}", e)))?;

    let video = probe
        .streams
        .iter()
        .find(|s| s.codec_type.as_deref() == Some("video"));

    let fps = video.and_then(|s| {
        s.avg_frame_rate
            .as_deref()
            .and_then(parse_rate)
            .or_else(|| s.r_frame_rate.as_deref().and_then(parse_rate))
    });

    let (duration, title) = match probe.format {
        Some(format) => (
            format.duration.and_then(|d| d.parse::<f64>().ok()),
            format
                .tags
                .into_iter()
                .find(|(k, _)| k.eq_ignore_ascii_case("title"))
                .map(|(_, v)| v),
        ),
        None => (None, None),
    };

    Ok(MediaInfo {
        title,
        duration,
        width: video.and_then(|s| s.width),
        height: video.and_then(|s| s.height),
        fps,
    })
}

/// `30000/1001` style rate; `0/0` is treated as unknown.
fn parse_rate(rate: &str) -> Option<f64> {
    let (num, den) = rate.split_once('/')?;
    let num: f64 = num.parse().ok()?;
    let den: f64 = den.parse().ok()?;
    (den > 0.0 && num > 0.0).then(|| num / den)
}

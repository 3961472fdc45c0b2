use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{BisubError, Result};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub translate: TranslateConfig,
    pub transcriber: TranscriberConfig,
    pub media: MediaConfig,
    pub downloader: DownloaderConfig,
    pub jobs: JobsConfig,
    pub progress: ProgressConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TranslateConfig {
    /// Base URL of an OpenAI-compatible chat completions API
    pub endpoint: String,
    /// Model used for translation
    pub model: String,
    /// Environment variable holding the API key
    pub api_key_env: String,
    /// Sampling temperature
    pub temperature: f32,
    /// Sent as `reasoning_format` when set (hides reasoning on some providers)
    pub reasoning_format: Option<String>,
    /// HTTP timeout per request
    pub request_timeout_secs: u64,
    /// Entries per model call
    pub batch_size: usize,
    /// Already translated pairs carried into the next batch
    pub context_size: usize,
    /// Upcoming untranslated lines shown after a batch
    pub lookahead_size: usize,
    /// Rows on each side shown when retranslating a single line
    pub neighbor_size: usize,
    /// Retries after a rate-limit signal before giving up
    pub max_rate_limit_retries: u32,
    /// Substring in model output that marks a rate-limit response
    pub rate_limit_marker: String,
    /// Wait used when the rate-limit text carries no parsable duration
    pub default_rate_limit_wait_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TranscriberConfig {
    /// Base URL of an OpenAI-compatible audio transcription API
    pub endpoint: String,
    pub model: String,
    pub api_key_env: String,
    pub request_timeout_secs: u64,
    /// Larger audio files are split before upload
    pub max_upload_mb: u64,
    /// Length of each uploaded chunk when splitting
    pub chunk_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MediaConfig {
    /// Path to ffmpeg binary
    pub ffmpeg_path: String,
    /// Path to ffprobe binary
    pub ffprobe_path: String,
    /// Bitrate for extracted speech audio
    pub audio_bitrate: String,
    /// Additional encoding options for subtitle burn-in
    /// Common options: ["-preset", "medium", "-crf", "23"]
    pub burn_options: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DownloaderConfig {
    /// Path to yt-dlp binary
    pub binary_path: String,
    /// yt-dlp format selector
    pub format: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct JobsConfig {
    /// Directory holding one work directory per job
    pub work_root: PathBuf,
    /// Lifetime of a job record
    pub ttl_secs: u64,
    /// Interval between expired-job sweeps
    pub cleanup_interval_secs: u64,
    /// Idle time before a keepalive event is produced
    pub keepalive_secs: u64,
}

/// Progress checkpoints (percent) reported at the start of each stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProgressConfig {
    pub download: f32,
    pub extract_audio: f32,
    pub download_complete: f32,
    pub transcribe: f32,
    pub translate_start: f32,
    pub translate_end: f32,
    pub merge: f32,
    pub burn: f32,
}

impl Default for TranslateConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://api.groq.com/openai/v1".to_string(),
            model: "openai/gpt-oss-120b".to_string(),
            api_key_env: "GROQ_API_KEY".to_string(),
            temperature: 0.3,
            reasoning_format: None,
            request_timeout_secs: 120,
            batch_size: 10,
            context_size: 3,
            lookahead_size: 3,
            neighbor_size: 2,
            max_rate_limit_retries: 5,
            rate_limit_marker: "Rate limit reached".to_string(),
            default_rate_limit_wait_secs: 60,
        }
    }
}

impl Default for TranscriberConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://api.groq.com/openai/v1".to_string(),
            model: "whisper-large-v3-turbo".to_string(),
            api_key_env: "GROQ_API_KEY".to_string(),
            request_timeout_secs: 600,
            max_upload_mb: 25,
            chunk_seconds: 600,
        }
    }
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: "ffmpeg".to_string(),
            ffprobe_path: "ffprobe".to_string(),
            audio_bitrate: "64k".to_string(),
            burn_options: Vec::new(),
        }
    }
}

impl Default for DownloaderConfig {
    fn default() -> Self {
        Self {
            binary_path: "yt-dlp".to_string(),
            format: "bestvideo[ext=mp4]+bestaudio[ext=m4a]/best[ext=mp4]/best".to_string(),
        }
    }
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            work_root: std::env::temp_dir().join("bisub"),
            ttl_secs: 1800,
            cleanup_interval_secs: 300,
            keepalive_secs: 30,
        }
    }
}

impl Default for ProgressConfig {
    fn default() -> Self {
        Self {
            download: 0.0,
            extract_audio: 15.0,
            download_complete: 20.0,
            transcribe: 20.0,
            translate_start: 50.0,
            translate_end: 70.0,
            merge: 70.0,
            burn: 80.0,
        }
    }
}

impl ProgressConfig {
    /// Progress inside the translation band after `done` of `total` entries.
    pub fn translation(&self, done: usize, total: usize) -> f32 {
        if total == 0 {
            return self.translate_end;
        }
        let ratio = (done.min(total) as f32) / (total as f32);
        self.translate_start + (self.translate_end - self.translate_start) * ratio
    }
}

impl TranslateConfig {
    pub fn default_rate_limit_wait(&self) -> Duration {
        Duration::from_secs(self.default_rate_limit_wait_secs)
    }
}

impl JobsConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs)
    }

    pub fn keepalive(&self) -> Duration {
        Duration::from_secs(self.keepalive_secs)
    }
}

/// Read an API key from the named environment variable.
pub fn api_key_from_env(var: &str) -> Result<String> {
    match std::env::var(var) {
        Ok(key) if !key.trim().is_empty() => Ok(key),
        _ => Err(BisubError::Config(format!(
            "{} environment variable is not set",
            var
        ))),
    }
}

impl Config {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| BisubError::Config(format!("Failed to read config file: {}", e)))?;

        toml::from_str(&content)
            .map_err(|e| BisubError::Config(format!("Failed to parse config file: {}", e)))
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| BisubError::Config(format!("Failed to serialize config: {}", e)))?;

        std::fs::write(path, content)
            .map_err(|e| BisubError::Config(format!("Failed to write config file: {}", e)))?;

        Ok(())
    }
}

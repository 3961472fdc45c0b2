use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use tracing::{debug, info};

use super::{Segment, Transcriber, primary_language, segments_to_subtitle};
use crate::config::{TranscriberConfig, api_key_from_env};
use crate::error::{BisubError, Result};
use crate::media::MediaProcessor;
use crate::subtitle::Subtitle;

#[derive(Debug, Deserialize)]
struct VerboseTranscription {
    #[serde(default)]
    segments: Vec<Segment>,
}

/// Transcriber for OpenAI-compatible `audio/transcriptions` endpoints.
pub struct WhisperApiTranscriber {
    client: Client,
    config: TranscriberConfig,
    api_key: String,
    media: Arc<dyn MediaProcessor>,
}

impl WhisperApiTranscriber {
    pub fn new(config: TranscriberConfig, media: Arc<dyn MediaProcessor>) -> Result<Self> {
        let api_key = api_key_from_env(&config.api_key_env)?;
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;

        Ok(Self {
            client,
            config,
            api_key,
            media,
        })
    }

    fn upload_limit(&self) -> u64 {
        self.config.max_upload_mb * 1024 * 1024
    }

    async fn transcribe_file(&self, audio: &Path, language: &str) -> Result<Subtitle> {
        let bytes = tokio::fs::read(audio).await?;
        let file_name = audio
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "audio.mp3".to_string());

        let form = Form::new()
            .part("file", Part::bytes(bytes).file_name(file_name))
            .text("model", self.config.model.clone())
            .text("response_format", "verbose_json")
            .text("language", primary_language(language).to_string());

        let url = format!(
            "{}/audio/transcriptions",
            self.config.endpoint.trim_end_matches('/')
        );
        debug!("Uploading {} to {}", audio.display(), url);

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .multipart(form)
            .send()
            .await
            .map_err(|e| BisubError::Transcription(format!("HTTP request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(BisubError::Transcription(format!(
                "Transcription API error {}: {}",
                status, body
            )));
        }

        let transcription: VerboseTranscription = response.json().await.map_err(|e| {
            BisubError::Transcription(format!("Failed to parse transcription result: {}", e))
        })?;

        segments_to_subtitle(&transcription.segments)
    }
}

#[async_trait]
impl Transcriber for WhisperApiTranscriber {
    async fn transcribe(&self, audio: &Path, language: &str) -> Result<Subtitle> {
        if !audio.is_file() {
            return Err(BisubError::InvalidInput(format!(
                "Audio file does not exist: {}",
                audio.display()
            )));
        }

        let size = tokio::fs::metadata(audio).await?.len();
        if size <= self.upload_limit() {
            info!("Transcribing {} ({} bytes)", audio.display(), size);
            return self.transcribe_file(audio, language).await;
        }

        info!(
            "Audio {} is {} bytes, above the {} MB upload limit; splitting",
            audio.display(),
            size,
            self.config.max_upload_mb
        );
        let scratch = tempfile::tempdir()?;
        let chunks = self
            .media
            .split_audio(
                audio,
                scratch.path(),
                Duration::from_secs(self.config.chunk_seconds),
            )
            .await?;

        let mut transcribed = Vec::with_capacity(chunks.len());
        for (i, (offset, path)) in chunks.iter().enumerate() {
            debug!("Transcribing chunk {}/{} at {:?}", i + 1, chunks.len(), offset);
            match self.transcribe_file(path, language).await {
                Ok(subtitle) => transcribed.push((*offset, subtitle)),
                // Silent chunks carry no speech
                Err(BisubError::Transcription(msg)) if msg.contains("no segments") => {
                    debug!("Chunk {} has no speech", i + 1);
                }
                Err(e) => return Err(e),
            }
        }

        if transcribed.is_empty() {
            return Err(BisubError::Transcription(
                "Transcription returned no segments".to_string(),
            ));
        }
        Ok(Subtitle::stitch(transcribed)?)
    }
}

use std::time::Duration;

use thiserror::Error;

use crate::subtitle::SubtitleError;

#[derive(Error, Debug)]
pub enum BisubError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parsing error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Download error: {0}")]
    Download(String),

    #[error("Transcription error: {0}")]
    Transcription(String),

    #[error("Translation error: {0}")]
    Translation(String),

    /// The model service asked us to back off for `wait`.
    #[error("Rate limited, retry after {wait:?}")]
    RateLimited { wait: Duration },

    #[error("Rate limit retries exhausted after {attempts} attempts ({context})")]
    RateLimitExhausted { attempts: u32, context: String },

    #[error("Subtitle error: {0}")]
    Subtitle(#[from] SubtitleError),

    #[error("SRT parse error: {0}")]
    SrtParse(String),

    #[error("Media processing error: {0}")]
    Media(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Invalid job state: {0}")]
    InvalidState(String),

    #[error("Job {0} not found")]
    JobNotFound(String),

    #[error("A burn is already in progress for job {0}")]
    BurnInProgress(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl BisubError {
    /// Stable `(code, message)` pair reported to clients.
    pub fn code(&self) -> (&'static str, &'static str) {
        match self {
            Self::Download(_) => ("download_failed", "Failed to download video"),
            Self::Transcription(_) => ("transcription_failed", "Failed to transcribe audio"),
            Self::Translation(_) => ("translation_failed", "Failed to translate subtitles"),
            Self::RateLimited { .. } | Self::RateLimitExhausted { .. } => (
                "translation_rate_limited",
                "Translation service rate limit exceeded",
            ),
            Self::Subtitle(_) => ("invalid_subtitle", "Subtitle data failed validation"),
            Self::SrtParse(_) => ("subtitle_parse_failed", "Failed to parse subtitle text"),
            Self::Media(_) => ("ffmpeg_failed", "Failed to process media"),
            Self::InvalidInput(_) | Self::Config(_) => ("invalid_input", "Invalid input"),
            Self::JobNotFound(_) => ("job_not_found", "Job not found"),
            Self::InvalidState(_) | Self::BurnInProgress(_) => (
                "invalid_state",
                "Job is not in a state that allows this operation",
            ),
            Self::Io(_) | Self::Json(_) | Self::Toml(_) | Self::Http(_) => {
                ("pipeline_failed", "Unexpected pipeline error")
            }
        }
    }

    pub fn is_rate_limit(&self) -> bool {
        matches!(self, Self::RateLimited { .. })
    }
}

pub type Result<T> = std::result::Result<T, BisubError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_faults_have_distinct_codes() {
        assert_eq!(BisubError::Download("x".into()).code().0, "download_failed");
        assert_eq!(BisubError::Transcription("x".into()).code().0, "transcription_failed");
        assert_eq!(BisubError::Translation("x".into()).code().0, "translation_failed");
        assert_eq!(BisubError::Media("x".into()).code().0, "ffmpeg_failed");
        assert_eq!(BisubError::SrtParse("x".into()).code().0, "subtitle_parse_failed");
    }

    #[test]
    fn test_rate_limit_kinds_share_code() {
        let limited = BisubError::RateLimited { wait: Duration::from_secs(3) };
        let exhausted = BisubError::RateLimitExhausted { attempts: 6, context: "batch 1".into() };
        assert_eq!(limited.code(), exhausted.code());
        assert!(limited.is_rate_limit());
        assert!(!exhausted.is_rate_limit());
    }

    #[test]
    fn test_validation_fault_maps_to_invalid_subtitle() {
        let err: BisubError = SubtitleError::CountMismatch { original: 2, translated: 3 }.into();
        assert_eq!(err.code().0, "invalid_subtitle");
    }

    #[test]
    fn test_infrastructure_errors_fall_back_to_generic_code() {
        let err: BisubError = std::io::Error::other("disk gone").into();
        assert_eq!(err.code(), ("pipeline_failed", "Unexpected pipeline error"));
    }
}

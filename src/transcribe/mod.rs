// Speech-to-text
//
// `Transcriber` is the boundary the pipeline depends on. The shipped
// implementation talks to an OpenAI-compatible transcription endpoint and
// splits oversized audio itself.

pub mod whisper_api;

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

pub use whisper_api::WhisperApiTranscriber;

use crate::error::{BisubError, Result};
use crate::subtitle::{Subtitle, SubtitleEntry};

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Transcriber: Send + Sync {
    /// Transcribe `audio` spoken in `language` into a timed subtitle.
    async fn transcribe(&self, audio: &Path, language: &str) -> Result<Subtitle>;
}

/// One timed segment as returned by a `verbose_json` transcription.
#[derive(Debug, Clone, Deserialize)]
pub struct Segment {
    pub start: f64,
    pub end: f64,
    pub text: String,
}

/// Build a valid subtitle from raw segments.
///
/// Blank segments are dropped, a start that runs into the previous segment
/// is moved to the previous end, and segments left without length are dropped.
pub fn segments_to_subtitle(segments: &[Segment]) -> Result<Subtitle> {
    let mut entries: Vec<SubtitleEntry> = Vec::with_capacity(segments.len());

    for segment in segments {
        let text = segment.text.trim();
        if text.is_empty() {
            continue;
        }

        let mut start = seconds(segment.start);
        let end = seconds(segment.end);
        if let Some(previous) = entries.last() {
            start = start.max(previous.end());
        }
        if start >= end {
            continue;
        }

        entries.push(SubtitleEntry::new(entries.len() + 1, start, end, text)?);
    }

    if entries.is_empty() {
        return Err(BisubError::Transcription(
            "Transcription returned no segments".to_string(),
        ));
    }
    Ok(Subtitle::new(entries)?)
}

/// Whole milliseconds; `as` saturates, so NaN becomes zero and huge values clamp.
fn seconds(value: f64) -> Duration {
    Duration::from_millis((value.max(0.0) * 1000.0).round() as u64)
}

/// ISO 639-1 part of a language tag (`zh-TW` becomes `zh`).
pub fn primary_language(language: &str) -> &str {
    language
        .split(['-', '_'])
        .next()
        .unwrap_or(language)
}

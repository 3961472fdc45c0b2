//! Bisub - Bilingual Subtitle Pipeline
//!
//! Turns a remote or local video into a bilingual subtitle track (and optionally
//! a subtitle-burned video) by chaining yt-dlp, a Whisper-compatible
//! transcription API, an LLM chat-completions API and ffmpeg, while streaming
//! job progress as ordered events.

pub mod app;
pub mod cli;
pub mod config;
pub mod error;
pub mod job;
pub mod media;
pub mod pipeline;
pub mod source;
pub mod subtitle;
pub mod transcribe;
pub mod translate;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Configuration file path
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Download (or load) a video, transcribe, translate and write bilingual subtitles
    Process {
        /// Remote video URL
        #[arg(required_unless_present = "file", conflicts_with = "file")]
        url: Option<String>,

        /// Local video file instead of a URL
        #[arg(short, long)]
        file: Option<PathBuf>,

        /// Spoken language of the video
        #[arg(short, long, default_value = "en")]
        source_lang: String,

        /// Language to translate into
        #[arg(short, long, default_value = "zh-TW")]
        target_lang: String,

        /// Trim start in seconds
        #[arg(long)]
        start: Option<f64>,

        /// Trim end in seconds
        #[arg(long)]
        end: Option<f64>,

        /// Also burn the styled subtitles into the video
        #[arg(long)]
        burn: bool,

        /// Output directory for produced files
        #[arg(short, long)]
        output_dir: Option<PathBuf>,
    },

    /// Translate an SRT file into a bilingual SRT file
    Translate {
        /// Input SRT file
        #[arg(short, long)]
        input: PathBuf,

        /// Output bilingual SRT file
        #[arg(short, long)]
        output: PathBuf,

        /// Language of the input subtitles
        #[arg(short, long, default_value = "en")]
        source_lang: String,

        /// Language to translate into
        #[arg(short, long, default_value = "zh-TW")]
        target_lang: String,
    },

    /// Retranslate selected entries of an existing translation
    Retranslate {
        /// Original-language SRT file
        #[arg(long)]
        original: PathBuf,

        /// Translated SRT file with the same entries
        #[arg(long)]
        translated: PathBuf,

        /// Entry indices to retranslate (comma-separated)
        #[arg(short, long, value_delimiter = ',', required = true)]
        indices: Vec<usize>,

        /// Free-text guidance for the model
        #[arg(long)]
        hint: Option<String>,

        /// Output SRT file (defaults to overwriting the translated file)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Language of the original subtitles
        #[arg(short, long, default_value = "en")]
        source_lang: String,

        /// Language of the translated subtitles
        #[arg(short, long, default_value = "zh-TW")]
        target_lang: String,
    },

    /// Burn a subtitle file into a video
    Burn {
        /// Input video file
        #[arg(short, long)]
        video: PathBuf,

        /// Subtitle file (.srt or .ass)
        #[arg(short, long)]
        subtitles: PathBuf,

        /// Output video file
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Verify that ffmpeg and ffprobe can be executed
    Check,
}

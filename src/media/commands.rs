use std::path::Path;
use std::process::Output;

use tokio::process::Command;
use tracing::debug;

use crate::error::{BisubError, Result};

/// One invocation of an external media tool (ffmpeg or ffprobe).
#[derive(Debug, Clone)]
pub struct MediaCommand {
    pub binary_path: String,
    pub args: Vec<String>,
    pub description: String,
}

impl MediaCommand {
    pub fn new<S1: Into<String>, S2: Into<String>>(binary_path: S1, description: S2) -> Self {
        Self {
            binary_path: binary_path.into(),
            args: Vec::new(),
            description: description.into(),
        }
    }

    pub fn arg<S: Into<String>>(mut self, arg: S) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(|s| s.into()));
        self
    }

    pub fn input<P: AsRef<Path>>(self, path: P) -> Self {
        self.arg("-i").arg(path.as_ref().to_string_lossy().to_string())
    }

    pub fn output<P: AsRef<Path>>(self, path: P) -> Self {
        self.arg(path.as_ref().to_string_lossy().to_string())
    }

    /// Force overwrite output
    pub fn overwrite(self) -> Self {
        self.arg("-y")
    }

    /// Keep ffmpeg quiet apart from errors
    pub fn quiet(self) -> Self {
        self.args(["-hide_banner", "-loglevel", "error"])
    }

    pub fn audio_codec<S: Into<String>>(self, codec: S) -> Self {
        self.arg("-c:a").arg(codec)
    }

    pub fn audio_bitrate<S: Into<String>>(self, bitrate: S) -> Self {
        self.arg("-b:a").arg(bitrate)
    }

    /// Copy every stream without re-encoding
    pub fn copy_streams(self) -> Self {
        self.arg("-c").arg("copy")
    }

    pub fn copy_audio(self) -> Self {
        self.audio_codec("copy")
    }

    /// Disable video
    pub fn no_video(self) -> Self {
        self.arg("-vn")
    }

    pub fn video_filter<S: Into<String>>(self, filter: S) -> Self {
        self.arg("-vf").arg(filter)
    }

    /// Seek window applied to the next input
    pub fn window(self, start: Option<f64>, end: Option<f64>) -> Self {
        let cmd = match start {
            Some(start) => self.arg("-ss").arg(format!("{:.3}", start)),
            None => self,
        };
        match end {
            Some(end) => cmd.arg("-to").arg(format!("{:.3}", end)),
            None => cmd,
        }
    }

    /// Run the command, failing on a non-zero exit.
    pub async fn execute(&self) -> Result<()> {
        self.run().await.map(|_| ())
    }

    /// Run the command and return its standard output.
    pub async fn capture(&self) -> Result<String> {
        let output = self.run().await?;
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    async fn run(&self) -> Result<Output> {
        debug!("Executing media command: {} {:?}", self.binary_path, self.args);
        debug!("Description: {}", self.description);

        let output = Command::new(&self.binary_path)
            .args(&self.args)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| {
                BisubError::Media(format!("Failed to execute {}: {}", self.binary_path, e))
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(BisubError::Media(format!(
                "{} failed: {}",
                self.description,
                stderr.trim()
            )));
        }

        Ok(output)
    }
}

/// Builds the ffmpeg and ffprobe invocations used by the pipeline.
pub struct MediaCommandBuilder {
    ffmpeg_path: String,
    ffprobe_path: String,
}

impl MediaCommandBuilder {
    pub fn new<S1: Into<String>, S2: Into<String>>(ffmpeg_path: S1, ffprobe_path: S2) -> Self {
        Self {
            ffmpeg_path: ffmpeg_path.into(),
            ffprobe_path: ffprobe_path.into(),
        }
    }

    /// Speech track as compressed MP3
    pub fn extract_audio(
        &self,
        video_path: &Path,
        audio_path: &Path,
        bitrate: &str,
    ) -> MediaCommand {
        MediaCommand::new(&self.ffmpeg_path, "Audio extraction")
            .quiet()
            .overwrite()
            .input(video_path)
            .no_video()
            .audio_codec("libmp3lame")
            .audio_bitrate(bitrate)
            .output(audio_path)
    }

    pub fn trim(
        &self,
        video_path: &Path,
        output_path: &Path,
        start: Option<f64>,
        end: Option<f64>,
    ) -> MediaCommand {
        MediaCommand::new(&self.ffmpeg_path, "Video trim")
            .quiet()
            .overwrite()
            .window(start, end)
            .input(video_path)
            .copy_streams()
            .output(output_path)
    }

    /// Burn-in uses the `ass` filter for styled subtitles, `subtitles` otherwise.
    pub fn burn_subtitles(
        &self,
        video_path: &Path,
        subtitle_path: &Path,
        output_path: &Path,
        additional_options: &[String],
    ) -> MediaCommand {
        let escaped = escape_filter_path(subtitle_path);
        let is_ass = subtitle_path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("ass"));
        let filter = if is_ass {
            format!("ass={}", escaped)
        } else {
            format!("subtitles={}", escaped)
        };

        MediaCommand::new(&self.ffmpeg_path, "Subtitle burn-in")
            .quiet()
            .overwrite()
            .input(video_path)
            .video_filter(filter)
            .copy_audio()
            .args(additional_options.iter().cloned())
            .output(output_path)
    }

    /// Fixed-length audio segments written to `pattern` (e.g. `chunk_%03d.mp3`).
    pub fn split_audio(
        &self,
        audio_path: &Path,
        pattern: &Path,
        segment_seconds: u64,
    ) -> MediaCommand {
        MediaCommand::new(&self.ffmpeg_path, "Audio split")
            .quiet()
            .overwrite()
            .input(audio_path)
            .args(["-f", "segment", "-segment_time"])
            .arg(segment_seconds.to_string())
            .copy_streams()
            .output(pattern)
    }

    pub fn probe(&self, path: &Path) -> MediaCommand {
        MediaCommand::new(&self.ffprobe_path, "Media probe")
            .args(["-v", "error", "-print_format", "json", "-show_format", "-show_streams"])
            .output(path)
    }

    pub fn version_check(&self, binary: Binary) -> MediaCommand {
        let path = match binary {
            Binary::Ffmpeg => &self.ffmpeg_path,
            Binary::Ffprobe => &self.ffprobe_path,
        };
        MediaCommand::new(path, "Version check").arg("-version")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Binary {
    Ffmpeg,
    Ffprobe,
}

/// Escape a path for use inside an ffmpeg filter argument.
pub fn escape_filter_path(path: &Path) -> String {
    let raw = path.to_string_lossy();
    let mut escaped = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '\\' => escaped.push_str("/"),
            ':' | '\'' | ',' | '[' | ']' | ';' => {
                escaped.push('\\');
                escaped.push(c);
            }
            _ => escaped.push(c),
        }
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn builder() -> MediaCommandBuilder {
        MediaCommandBuilder::new("ffmpeg", "ffprobe")
    }

    #[test]
    fn test_extract_audio_args() {
        let cmd = builder().extract_audio(Path::new("in.mp4"), Path::new("out.mp3"), "64k");
        assert_eq!(cmd.binary_path, "ffmpeg");
        let args = cmd.args.join(" ");
        assert!(args.contains("-i in.mp4 -vn -c:a libmp3lame -b:a 64k out.mp3"));
        assert!(args.contains("-y"));
    }

    #[test]
    fn test_trim_places_window_before_input() {
        let cmd = builder().trim(Path::new("in.mp4"), Path::new("out.mp4"), Some(5.0), Some(12.5));
        let args = cmd.args.join(" ");
        assert!(args.contains("-ss 5.000 -to 12.500 -i in.mp4 -c copy out.mp4"));

        let open_end = builder().trim(Path::new("in.mp4"), Path::new("out.mp4"), Some(5.0), None);
        assert!(!open_end.args.contains(&"-to".to_string()));
    }

    #[test]
    fn test_burn_filter_by_extension() {
        let ass = builder().burn_subtitles(
            Path::new("v.mp4"),
            Path::new("/work/subs.ASS"),
            Path::new("o.mp4"),
            &["-crf".to_string(), "23".to_string()],
        );
        assert!(ass.args.contains(&"ass=/work/subs.ASS".to_string()));
        assert_eq!(ass.args[ass.args.len() - 3..], ["-crf", "23", "o.mp4"]);

        let srt = builder().burn_subtitles(
            Path::new("v.mp4"),
            Path::new("s.srt"),
            Path::new("o.mp4"),
            &[],
        );
        assert!(srt.args.contains(&"subtitles=s.srt".to_string()));
    }

    #[test]
    fn test_escape_filter_path() {
        let path = PathBuf::from("/tmp/it's:here,[1].srt");
        assert_eq!(escape_filter_path(&path), r"/tmp/it\'s\:here\,\[1\].srt");
    }

    #[tokio::test]
    async fn test_missing_binary_is_media_error() {
        let cmd = MediaCommand::new("/nonexistent/bisub-ffmpeg", "Probe").arg("-version");
        assert!(matches!(cmd.execute().await, Err(BisubError::Media(_))));
    }
}

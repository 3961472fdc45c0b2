use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;

use super::{Subtitle, SubtitleEntry};
use crate::error::{BisubError, Result};

static BLOCK_SEPARATOR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\n(?:[ \t]*\n)+").expect("valid block separator pattern"));

static TIMING_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\d{2,}):(\d{2}):(\d{2}),(\d{3})\s*-->\s*(\d{2,}):(\d{2}):(\d{2}),(\d{3})")
        .expect("valid timing pattern")
});

/// Parse SRT text into a validated subtitle.
pub fn parse(content: &str) -> Result<Subtitle> {
    let content = content.replace("\r\n", "\n");
    let content = content.trim();
    if content.is_empty() {
        return Err(BisubError::SrtParse("content cannot be empty".to_string()));
    }

    let mut entries = Vec::new();
    for (block_num, block) in BLOCK_SEPARATOR.split(content).enumerate() {
        let block_num = block_num + 1;
        let lines: Vec<&str> = block.trim().lines().collect();
        if lines.len() < 3 {
            return Err(BisubError::SrtParse(format!(
                "block {}: expected at least 3 lines (index, timing, text), got {}",
                block_num,
                lines.len()
            )));
        }

        let index: usize = lines[0].trim().parse().map_err(|_| {
            BisubError::SrtParse(format!(
                "block {}: invalid index '{}'",
                block_num,
                lines[0].trim()
            ))
        })?;

        let timing = lines[1].trim();
        let caps = TIMING_LINE.captures(timing).ok_or_else(|| {
            BisubError::SrtParse(format!(
                "block {}: invalid timing '{}', expected 'HH:MM:SS,mmm --> HH:MM:SS,mmm'",
                block_num, timing
            ))
        })?;
        let field = |i: usize| caps[i].parse::<u64>().unwrap_or_default();
        let start = to_duration(field(1), field(2), field(3), field(4));
        let end = to_duration(field(5), field(6), field(7), field(8));

        let text = lines[2..].join("\n").trim().to_string();

        let entry = SubtitleEntry::new(index, start, end, text)
            .map_err(|e| BisubError::SrtParse(format!("block {}: {}", block_num, e)))?;
        entries.push(entry);
    }

    Subtitle::new(entries)
        .map_err(|e| BisubError::SrtParse(format!("invalid subtitle structure: {}", e)))
}

/// Serialize a subtitle to SRT text.
pub fn serialize(subtitle: &Subtitle) -> String {
    let blocks: Vec<String> = subtitle
        .iter()
        .map(|entry| {
            format!(
                "{}\n{} --> {}\n{}",
                entry.index(),
                format_srt_time(entry.start()),
                format_srt_time(entry.end()),
                entry.text()
            )
        })
        .collect();

    blocks.join("\n\n") + "\n"
}

fn to_duration(hours: u64, minutes: u64, seconds: u64, millis: u64) -> Duration {
    Duration::from_millis(((hours * 60 + minutes) * 60 + seconds) * 1000 + millis)
}

/// Format a time offset as `HH:MM:SS,mmm`; hours may exceed 24.
fn format_srt_time(time: Duration) -> String {
    let total_milliseconds = time.as_millis() as u64;
    let hours = total_milliseconds / 3_600_000;
    let minutes = (total_milliseconds % 3_600_000) / 60_000;
    let secs = (total_milliseconds % 60_000) / 1_000;
    let millis = total_milliseconds % 1_000;

    format!("{:02}:{:02}:{:02},{:03}", hours, minutes, secs, millis)
}

use std::time::Duration;

use super::{Subtitle, SubtitleError};
use crate::error::{BisubError, Result};

const PLAY_RES_X: u32 = 1920;
const PLAY_RES_Y: u32 = 1080;

const STYLE_FORMAT: &str = "Format: Name, Fontname, Fontsize, PrimaryColour, SecondaryColour, \
OutlineColour, BackColour, Bold, Italic, Underline, StrikeOut, ScaleX, ScaleY, Spacing, Angle, \
BorderStyle, Outline, Shadow, Alignment, MarginL, MarginR, MarginV, Encoding";

const EVENT_FORMAT: &str =
    "Format: Layer, Start, End, Style, Name, MarginL, MarginR, MarginV, Effect, Text";

// Yellow text with a black outline.
const STYLE_COLOURS: &str = "&H0000FFFF,&H0000FFFF,&H00000000,&H00000000,0,0,0,0,100,100,0,0";

/// Serialize an original/translated pair as a two-style ASS script.
///
/// The translated line sits above the original one. Rendering uses a fixed
/// 1920x1080 canvas so the video dimensions only need to be valid.
pub fn serialize_bilingual(
    original: &Subtitle,
    translated: &Subtitle,
    video_width: u32,
    video_height: u32,
) -> Result<String> {
    if video_width == 0 || video_height == 0 {
        return Err(BisubError::InvalidInput(format!(
            "video dimensions must be positive, got {}x{}",
            video_width, video_height
        )));
    }
    if original.len() != translated.len() {
        return Err(SubtitleError::CountMismatch {
            original: original.len(),
            translated: translated.len(),
        }
        .into());
    }

    let mut script = format!(
        "[Script Info]\n\
         Title: Bilingual Subtitle\n\
         ScriptType: v4.00+\n\
         PlayResX: {PLAY_RES_X}\n\
         PlayResY: {PLAY_RES_Y}\n\
         \n\
         [V4+ Styles]\n\
         {STYLE_FORMAT}\n\
         Style: Translated,Arial,20,{STYLE_COLOURS},1,2,0,2,30,30,60,1\n\
         Style: Original,Arial,14,{STYLE_COLOURS},1,2,0,2,30,30,20,1\n\
         \n\
         [Events]\n\
         {EVENT_FORMAT}\n"
    );

    for (orig, trans) in original.iter().zip(translated.iter()) {
        let start = format_ass_time(orig.start());
        let end = format_ass_time(orig.end());
        script.push_str(&format!(
            "Dialogue: 0,{},{},Translated,,0,0,0,,{}\n",
            start,
            end,
            escape_ass_text(trans.text())
        ));
        script.push_str(&format!(
            "Dialogue: 0,{},{},Original,,0,0,0,,{}\n",
            start,
            end,
            escape_ass_text(orig.text())
        ));
    }

    Ok(script)
}

fn escape_ass_text(text: &str) -> String {
    text.replace('\\', "\\\\")
        .replace('{', "\\{")
        .replace('}', "\\}")
        .replace('\n', "\\N")
}

/// `H:MM:SS.cc` with centiseconds.
fn format_ass_time(time: Duration) -> String {
    let total_centis = time.as_millis() as u64 / 10;
    let hours = total_centis / 360_000;
    let minutes = (total_centis % 360_000) / 6_000;
    let seconds = (total_centis % 6_000) / 100;
    let centis = total_centis % 100;
    format!("{}:{:02}:{:02}.{:02}", hours, minutes, seconds, centis)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::subtitle::SubtitleEntry;
    use crate::subtitle::test_support::numbered_subtitle;

    #[test]
    fn test_format_ass_time() {
        assert_eq!(format_ass_time(Duration::ZERO), "0:00:00.00");
        assert_eq!(format_ass_time(Duration::from_millis(3_723_456)), "1:02:03.45");
    }

    #[test]
    fn test_escape_ass_text() {
        assert_eq!(escape_ass_text("a\\b {x}\nnext"), "a\\\\b \\{x\\}\\Nnext");
    }

    #[test]
    fn test_two_dialogue_lines_per_entry_translated_first() {
        let original = numbered_subtitle(2);
        let translated = Subtitle::new(
            original
                .iter()
                .map(|e| e.with_text(format!("T{}", e.index())).unwrap())
                .collect::<Vec<SubtitleEntry>>(),
        )
        .unwrap();

        let script = serialize_bilingual(&original, &translated, 1280, 720).unwrap();

        assert!(script.starts_with("[Script Info]\n"));
        assert!(script.contains("PlayResX: 1920\nPlayResY: 1080"));
        let dialogue: Vec<&str> = script.lines().filter(|l| l.starts_with("Dialogue:")).collect();
        assert_eq!(
            dialogue,
            vec![
                "Dialogue: 0,0:00:00.00,0:00:04.00,Translated,,0,0,0,,T1",
                "Dialogue: 0,0:00:00.00,0:00:04.00,Original,,0,0,0,,Line 1",
                "Dialogue: 0,0:00:05.00,0:00:09.00,Translated,,0,0,0,,T2",
                "Dialogue: 0,0:00:05.00,0:00:09.00,Original,,0,0,0,,Line 2",
            ]
        );
    }

    #[test]
    fn test_rejects_mismatched_tracks() {
        let err = serialize_bilingual(&numbered_subtitle(2), &numbered_subtitle(1), 1920, 1080)
            .unwrap_err();
        assert!(matches!(err, BisubError::Subtitle(SubtitleError::CountMismatch { .. })));
    }

    #[test]
    fn test_rejects_zero_dimensions() {
        let sub = numbered_subtitle(1);
        assert!(matches!(
            serialize_bilingual(&sub, &sub, 0, 1080),
            Err(BisubError::InvalidInput(_))
        ));
    }
}

// Subtitle entry model shared by every stage.
//
// Entries and collections are validated at construction and never mutated
// afterwards; translation and merge build new values instead.

pub mod ass;
pub mod srt;

use std::time::Duration;

use thiserror::Error;

/// Separator placed between the translated and the original line of a merged entry.
pub const BILINGUAL_SEPARATOR: &str = "\n";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SubtitleError {
    #[error("index must be positive, got {0}")]
    InvalidIndex(usize),

    #[error("entry {index}: start {start:?} must be before end {end:?}")]
    InvalidTiming {
        index: usize,
        start: Duration,
        end: Duration,
    },

    #[error("entry {index}: text cannot be empty or whitespace-only")]
    EmptyText { index: usize },

    #[error("subtitle must contain at least one entry")]
    Empty,

    #[error("entry indices must be sequential starting from 1, expected {expected} but got {found}")]
    NonSequentialIndex { expected: usize, found: usize },

    #[error("entry {index} ends at {end:?} but entry {next_index} starts at {next_start:?}")]
    Overlap {
        index: usize,
        end: Duration,
        next_index: usize,
        next_start: Duration,
    },

    #[error("entry count mismatch: original has {original}, translated has {translated}")]
    CountMismatch { original: usize, translated: usize },
}

/// A single timed line of text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubtitleEntry {
    index: usize,
    start: Duration,
    end: Duration,
    text: String,
}

impl SubtitleEntry {
    /// Times are rounded to whole milliseconds and blank text lines removed.
    pub fn new(
        index: usize,
        start: Duration,
        end: Duration,
        text: impl Into<String>,
    ) -> Result<Self, SubtitleError> {
        let text = normalize_text(&text.into());
        let (start, end) = (round_to_millis(start), round_to_millis(end));
        if index < 1 {
            return Err(SubtitleError::InvalidIndex(index));
        }
        if start >= end {
            return Err(SubtitleError::InvalidTiming { index, start, end });
        }
        if text.trim().is_empty() {
            return Err(SubtitleError::EmptyText { index });
        }
        Ok(Self { index, start, end, text })
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn start(&self) -> Duration {
        self.start
    }

    pub fn end(&self) -> Duration {
        self.end
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    /// Same index and timing, different text.
    pub fn with_text(&self, text: impl Into<String>) -> Result<Self, SubtitleError> {
        Self::new(self.index, self.start, self.end, text)
    }
}

/// SRT carries millisecond precision.
fn round_to_millis(time: Duration) -> Duration {
    let millis = (time.as_nanos() + 500_000) / 1_000_000;
    Duration::from_millis(u64::try_from(millis).unwrap_or(u64::MAX))
}

/// Trim the text and drop whitespace-only lines, which would end an SRT block.
pub fn normalize_text(text: &str) -> String {
    text.trim()
        .lines()
        .filter(|line| !line.trim().is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Non-empty, sequentially indexed, non-overlapping sequence of entries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subtitle {
    entries: Vec<SubtitleEntry>,
}

impl Subtitle {
    pub fn new(entries: Vec<SubtitleEntry>) -> Result<Self, SubtitleError> {
        if entries.is_empty() {
            return Err(SubtitleError::Empty);
        }

        for (position, entry) in entries.iter().enumerate() {
            let expected = position + 1;
            if entry.index != expected {
                return Err(SubtitleError::NonSequentialIndex {
                    expected,
                    found: entry.index,
                });
            }
        }

        for pair in entries.windows(2) {
            let (current, next) = (&pair[0], &pair[1]);
            if current.end > next.start {
                return Err(SubtitleError::Overlap {
                    index: current.index,
                    end: current.end,
                    next_index: next.index,
                    next_start: next.start,
                });
            }
        }

        Ok(Self { entries })
    }

    pub fn entries(&self) -> &[SubtitleEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Always false for a constructed subtitle.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, SubtitleEntry> {
        self.entries.iter()
    }

    pub fn into_entries(self) -> Vec<SubtitleEntry> {
        self.entries
    }

    /// Join per-chunk subtitles into one track.
    ///
    /// Each chunk's entries are shifted by the chunk's offset and the result is
    /// renumbered from 1. A start running into the previous entry is clamped to
    /// its end; entries left without duration are dropped.
    pub fn stitch(chunks: Vec<(Duration, Subtitle)>) -> Result<Self, SubtitleError> {
        let mut entries: Vec<SubtitleEntry> = Vec::new();
        for (offset, chunk) in chunks {
            for entry in chunk.entries {
                let floor = entries.last().map(|prev| prev.end).unwrap_or_default();
                let start = entry.start.saturating_add(offset).max(floor);
                let end = entry.end.saturating_add(offset);
                if end <= start {
                    continue;
                }
                entries.push(SubtitleEntry::new(entries.len() + 1, start, end, entry.text)?);
            }
        }
        Self::new(entries)
    }
}

impl<'a> IntoIterator for &'a Subtitle {
    type Item = &'a SubtitleEntry;
    type IntoIter = std::slice::Iter<'a, SubtitleEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

/// Combine original and translated entries into a bilingual track.
///
/// Timing and indices come from `original`; each text is
/// `translated + BILINGUAL_SEPARATOR + original`.
pub fn merge(original: &Subtitle, translated: &Subtitle) -> Result<Subtitle, SubtitleError> {
    if original.len() != translated.len() {
        return Err(SubtitleError::CountMismatch {
            original: original.len(),
            translated: translated.len(),
        });
    }

    let merged = original
        .iter()
        .zip(translated.iter())
        .map(|(orig, trans)| {
            orig.with_text(format!("{}{}{}", trans.text, BILINGUAL_SEPARATOR, orig.text))
        })
        .collect::<Result<Vec<_>, _>>()?;

    Subtitle::new(merged)
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    /// `n` entries of four seconds each, one second apart.
    pub fn numbered_subtitle(n: usize) -> Subtitle {
        let entries = (0..n)
            .map(|i| {
                SubtitleEntry::new(
                    i + 1,
                    Duration::from_secs(i as u64 * 5),
                    Duration::from_secs(i as u64 * 5 + 4),
                    format!("Line {}", i + 1),
                )
                .unwrap()
            })
            .collect();
        Subtitle::new(entries).unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::numbered_subtitle;
    use super::*;

    fn secs(s: u64) -> Duration {
        Duration::from_secs(s)
    }

    fn entry(index: usize, start: u64, end: u64, text: &str) -> SubtitleEntry {
        SubtitleEntry::new(index, secs(start), secs(end), text).unwrap()
    }

    #[test]
    fn test_entry_rejects_bad_values() {
        assert_eq!(
            SubtitleEntry::new(0, secs(0), secs(1), "x"),
            Err(SubtitleError::InvalidIndex(0))
        );
        assert!(matches!(
            SubtitleEntry::new(1, secs(2), secs(2), "x"),
            Err(SubtitleError::InvalidTiming { .. })
        ));
        assert_eq!(
            SubtitleEntry::new(1, secs(0), secs(1), "  \n"),
            Err(SubtitleError::EmptyText { index: 1 })
        );
    }

    #[test]
    fn test_subtitle_requires_sequential_indices() {
        let result = Subtitle::new(vec![entry(1, 0, 1, "a"), entry(3, 2, 3, "b")]);
        assert_eq!(
            result,
            Err(SubtitleError::NonSequentialIndex { expected: 2, found: 3 })
        );
    }

    #[test]
    fn test_subtitle_rejects_overlap_but_allows_touching() {
        assert!(matches!(
            Subtitle::new(vec![entry(1, 0, 3, "a"), entry(2, 2, 4, "b")]),
            Err(SubtitleError::Overlap { index: 1, next_index: 2, .. })
        ));
        assert!(Subtitle::new(vec![entry(1, 0, 2, "a"), entry(2, 2, 4, "b")]).is_ok());
    }

    #[test]
    fn test_subtitle_rejects_empty() {
        assert_eq!(Subtitle::new(Vec::new()), Err(SubtitleError::Empty));
    }

    #[test]
    fn test_merge_keeps_original_timing_and_puts_translation_first() {
        let original =
            Subtitle::new(vec![entry(1, 0, 2, "Hello"), entry(2, 3, 5, "World")]).unwrap();
        let translated =
            Subtitle::new(vec![entry(1, 10, 12, "你好"), entry(2, 13, 15, "世界")]).unwrap();

        let merged = merge(&original, &translated).unwrap();

        assert_eq!(merged.len(), 2);
        assert_eq!(merged.entries()[0].text(), "你好\nHello");
        assert_eq!(merged.entries()[0].start(), secs(0));
        assert_eq!(merged.entries()[1].end(), secs(5));
        assert_eq!(merged.entries()[1].index(), 2);
    }

    #[test]
    fn test_merge_is_not_commutative() {
        let a = Subtitle::new(vec![entry(1, 0, 2, "A")]).unwrap();
        let b = Subtitle::new(vec![entry(1, 5, 6, "B")]).unwrap();

        let ab = merge(&a, &b).unwrap();
        let ba = merge(&b, &a).unwrap();

        assert_eq!(ab.entries()[0].text(), "B\nA");
        assert_eq!(ba.entries()[0].text(), "A\nB");
        assert_ne!(ab.entries()[0].start(), ba.entries()[0].start());
    }

    #[test]
    fn test_merge_count_mismatch() {
        let err = merge(&numbered_subtitle(2), &numbered_subtitle(3)).unwrap_err();
        assert_eq!(err, SubtitleError::CountMismatch { original: 2, translated: 3 });
    }

    #[test]
    fn test_stitch_offsets_and_renumbers() {
        let first = numbered_subtitle(2);
        let second = numbered_subtitle(2);

        let stitched = Subtitle::stitch(vec![(secs(0), first), (secs(600), second)]).unwrap();

        let indices: Vec<usize> = stitched.iter().map(|e| e.index()).collect();
        assert_eq!(indices, vec![1, 2, 3, 4]);
        assert_eq!(stitched.entries()[2].start(), secs(600));
        assert_eq!(stitched.entries()[3].end(), secs(609));
        assert_eq!(stitched.entries()[3].text(), "Line 2");
    }

    #[test]
    fn test_stitch_clamps_chunk_boundary() {
        let first = Subtitle::new(vec![
            SubtitleEntry::new(1, secs(595), Duration::from_millis(600_300), "tail").unwrap(),
        ])
        .unwrap();
        let second = Subtitle::new(vec![
            SubtitleEntry::new(1, secs(0), Duration::from_millis(200), "swallowed").unwrap(),
            SubtitleEntry::new(2, Duration::from_millis(200), secs(2), "head").unwrap(),
        ])
        .unwrap();

        let stitched = Subtitle::stitch(vec![(secs(0), first), (secs(600), second)]).unwrap();

        assert_eq!(stitched.len(), 2);
        assert_eq!(stitched.entries()[1].index(), 2);
        assert_eq!(stitched.entries()[1].text(), "head");
        assert_eq!(stitched.entries()[1].start(), Duration::from_millis(600_300));
        assert_eq!(stitched.entries()[1].end(), secs(602));
    }

    #[test]
    fn test_entry_normalizes_timing_and_blank_lines() {
        let entry = SubtitleEntry::new(
            1,
            Duration::from_micros(1_000_500),
            Duration::from_micros(2_000_400),
            "  first\n\n \nsecond \n",
        )
        .unwrap();

        assert_eq!(entry.start(), Duration::from_millis(1001));
        assert_eq!(entry.end(), Duration::from_millis(2000));
        assert_eq!(entry.text(), "first\nsecond");
        let collapsed =
            SubtitleEntry::new(1, Duration::from_micros(100), Duration::from_micros(400), "x");
        assert!(matches!(collapsed, Err(SubtitleError::InvalidTiming { .. })));
    }
}

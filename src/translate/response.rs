// Parsing of raw model output: numbered batch answers, bare single lines and
// rate-limit notices embedded in the text.

use std::collections::HashMap;
use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;

use crate::error::{BisubError, Result};

static NUMBERED_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(\d+)\s*[.):\u{FF0E}]\s*(.+)$").expect("valid numbered line pattern")
});

static RETRY_AFTER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+)m(\d+(?:\.\d+)?)s").expect("valid retry-after pattern"));

/// Extract exactly `expected` translations from a numbered answer.
///
/// Lines look like `3. text`, `3) text` or `3: text`. The answer must contain
/// the keys `1..=expected` and nothing else.
pub fn parse_numbered(response: &str, expected: usize) -> Result<Vec<String>> {
    let mut translations: HashMap<usize, String> = HashMap::new();

    for line in response.trim().lines() {
        if let Some(caps) = NUMBERED_LINE.captures(line) {
            let Ok(number) = caps[1].parse::<usize>() else {
                continue;
            };
            translations.insert(number, caps[2].trim().to_string());
        }
    }

    if translations.len() != expected {
        return Err(BisubError::Translation(format!(
            "expected {} numbered translations, got {}",
            expected,
            translations.len()
        )));
    }

    (1..=expected)
        .map(|i| match translations.remove(&i) {
            Some(text) if !text.is_empty() => Ok(text),
            Some(_) => Err(BisubError::Translation(format!("empty translation for line {}", i))),
            None => Err(BisubError::Translation(format!("missing translation for line {}", i))),
        })
        .collect()
}

/// Turn a rate-limit notice into `BisubError::RateLimited`.
///
/// When `marker` occurs in `response` the wait is read from a `<m>m<s>s`
/// duration, or `default_wait` if none is present.
pub fn check_rate_limit(response: &str, marker: &str, default_wait: Duration) -> Result<()> {
    if marker.is_empty() || !response.contains(marker) {
        return Ok(());
    }
    Err(BisubError::RateLimited {
        wait: retry_after(response).unwrap_or(default_wait),
    })
}

/// Duration from the first `<m>m<s>s` pattern in `text`.
pub fn retry_after(text: &str) -> Option<Duration> {
    let caps = RETRY_AFTER.captures(text)?;
    let minutes: u64 = caps[1].parse().ok()?;
    let seconds = Duration::try_from_secs_f64(caps[2].parse().ok()?).ok()?;
    Duration::from_secs(minutes.checked_mul(60)?).checked_add(seconds)
}

/// Drop a leading `1.`-style number the model may echo on a single-line answer.
pub fn strip_numbering(text: &str) -> String {
    let text = text.trim();
    match NUMBERED_LINE.captures(text) {
        Some(caps) if !text.contains('\n') => caps[2].trim().to_string(),
        _ => text.to_string(),
    }
}

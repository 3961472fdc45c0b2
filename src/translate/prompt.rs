use super::{LanguagePair, RetranslateEntry, VideoContext};

const TITLE_LIMIT: usize = 200;
const DESCRIPTION_LIMIT: usize = 1200;

/// System prompt shared by every request of one translation call.
pub fn system_prompt(languages: &LanguagePair, video: Option<&VideoContext>) -> String {
    let mut prompt = format!(
        "You are a professional subtitle translator. \
         Translate {source} to {target} naturally and fluently, keeping the tone conversational. \
         Subtitle lines are cut by timing, so a line may be a fragment of a longer sentence; \
         translate each line as given without merging or completing it. \
         Do not add explanations, notes, or commentary.",
        source = languages.source,
        target = languages.target,
    );

    if let Some(grounding) = video.and_then(video_grounding) {
        prompt.push_str("\n\n");
        prompt.push_str(&grounding);
    }

    prompt
}

fn video_grounding(video: &VideoContext) -> Option<String> {
    let title = video
        .title
        .as_deref()
        .map(|t| compact(t, TITLE_LIMIT))
        .filter(|t| !t.is_empty());
    let description = video
        .description
        .as_deref()
        .map(|d| compact(d, DESCRIPTION_LIMIT))
        .filter(|d| !d.is_empty());

    if title.is_none() && description.is_none() {
        return None;
    }

    let mut text =
        String::from("Video information, for terminology and proper nouns only (do not translate):");
    if let Some(title) = title {
        text.push_str(&format!("\nTitle: {}", title));
    }
    if let Some(description) = description {
        text.push_str(&format!("\nDescription: {}", description));
    }
    Some(text)
}

/// Collapse whitespace runs and cut to `limit` characters, marking the cut with an ellipsis.
pub fn compact(text: &str, limit: usize) -> String {
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.chars().count() <= limit {
        return collapsed;
    }
    let mut cut: String = collapsed.chars().take(limit).collect();
    cut.push('…');
    cut
}

/// Prompt for one batch: optional context, numbered request lines, optional lookahead.
pub fn batch_prompt(
    lines: &[&str],
    context: &[(&str, &str)],
    lookahead: &[&str],
    languages: &LanguagePair,
) -> String {
    let mut prompt = String::new();

    if !context.is_empty() {
        prompt.push_str("Previously translated lines, for continuity:\n");
        for (original, translated) in context {
            prompt.push_str(&format!("- {} → {}\n", original, translated));
        }
        prompt.push('\n');
    }

    prompt.push_str(&format!(
        "Translate the following subtitle lines from {} to {}.\n\
         Return ONLY the numbered translations, one per line, matching the input numbering exactly.\n\n",
        languages.source, languages.target
    ));
    for (i, line) in lines.iter().enumerate() {
        prompt.push_str(&format!("{}. {}\n", i + 1, line));
    }

    if !lookahead.is_empty() {
        prompt.push_str("\nUpcoming lines, for reference only (do not translate):\n");
        for line in lookahead {
            prompt.push_str(&format!("- {}\n", line));
        }
    }

    prompt
}

/// Context-free prompt for a single line.
pub fn single_prompt(text: &str, languages: &LanguagePair) -> String {
    format!(
        "Translate this subtitle line from {} to {}. Return only the translation.\n\n{}",
        languages.source, languages.target, text
    )
}

/// Prompt asking for a fresh translation of `target` given its neighbours.
pub fn retranslate_prompt(
    target: &RetranslateEntry,
    before: &[RetranslateEntry],
    after: &[RetranslateEntry],
    hint: Option<&str>,
    languages: &LanguagePair,
) -> String {
    let mut prompt = format!(
        "Retranslate one subtitle line from {} to {}.\n",
        languages.source, languages.target
    );

    if !before.is_empty() || !after.is_empty() {
        prompt.push_str("\nSurrounding lines (original → current translation):\n");
        for row in before {
            prompt.push_str(&format!("- {} → {}\n", row.original, row.translated));
        }
        prompt.push_str("- [line to retranslate]\n");
        for row in after {
            prompt.push_str(&format!("- {} → {}\n", row.original, row.translated));
        }
    }

    prompt.push_str(&format!(
        "\nLine to retranslate:\nOriginal: {}\nCurrent translation: {}\n",
        target.original, target.translated
    ));

    if let Some(hint) = hint.map(str::trim).filter(|h| !h.is_empty()) {
        prompt.push_str(&format!("\nUser guidance: {}\n", hint));
    }

    prompt.push_str(
        "\nReturn a single improved translation line only: no numbering, no quotes, no explanation.",
    );
    prompt
}

// Subtitle translation engine
//
// Two capabilities share the same model client and response parsing:
// - Full-subtitle translation: fixed-size batches with context from the
//   previous batch and lookahead into the next, falling back to one-by-one
//   translation when a batch answer cannot be parsed
// - Partial retranslation: independent single-line requests for selected
//   indices, each grounded on its neighbouring rows
//
// Rate-limit notices from the service are retried with the provider's wait
// before any other error handling applies.

pub mod client;
pub mod prompt;
pub mod response;

use std::collections::{BTreeMap, HashSet};
use std::future::Future;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

pub use client::{ChatCompletionsClient, ChatModel};

use crate::config::TranslateConfig;
use crate::error::{BisubError, Result};
use crate::subtitle::{self, Subtitle};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LanguagePair {
    pub source: String,
    pub target: String,
}

impl LanguagePair {
    pub fn new(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
        }
    }
}

/// Video title and description used to ground terminology.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VideoContext {
    pub title: Option<String>,
    pub description: Option<String>,
}

/// One row of an already translated subtitle, as edited by a client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetranslateEntry {
    pub index: usize,
    pub original: String,
    pub translated: String,
}

impl RetranslateEntry {
    pub fn new(index: usize, original: impl Into<String>, translated: impl Into<String>) -> Self {
        Self {
            index,
            original: original.into(),
            translated: translated.into(),
        }
    }
}

/// Translation engine over a `ChatModel`.
pub struct SubtitleTranslator {
    model: Arc<dyn ChatModel>,
    config: TranslateConfig,
}

impl SubtitleTranslator {
    pub fn new(model: Arc<dyn ChatModel>, config: TranslateConfig) -> Self {
        Self { model, config }
    }

    /// Translate every entry of `subtitle`, keeping its indices and timing.
    ///
    /// `on_progress(done, total)` is called after each completed batch.
    pub async fn translate_subtitle(
        &self,
        subtitle: &Subtitle,
        languages: &LanguagePair,
        video: Option<&VideoContext>,
        on_progress: &mut (dyn FnMut(usize, usize) + Send),
    ) -> Result<Subtitle> {
        let system = prompt::system_prompt(languages, video);
        let entries = subtitle.entries();
        let total = entries.len();
        let batch_size = self.config.batch_size.max(1);
        let mut translated: Vec<String> = Vec::with_capacity(total);

        info!(
            "Translating {} entries from {} to {} in {} batches",
            total,
            languages.source,
            languages.target,
            total.div_ceil(batch_size)
        );

        for start in (0..total).step_by(batch_size) {
            let end = (start + batch_size).min(total);
            let lines: Vec<&str> = entries[start..end].iter().map(|e| e.text()).collect();

            let user_prompt = {
                let context: Vec<(&str, &str)> = (start.saturating_sub(self.config.context_size)
                    ..start)
                    .map(|i| (entries[i].text(), translated[i].as_str()))
                    .collect();
                let lookahead_end = (end + self.config.lookahead_size).min(total);
                let lookahead: Vec<&str> = entries[end..lookahead_end]
                    .iter()
                    .map(|e| e.text())
                    .collect();
                prompt::batch_prompt(&lines, &context, &lookahead, languages)
            };

            let label = format!("entries {}-{}", start + 1, end);
            let (system_ref, prompt_ref, lines_ref, label_ref) =
                (system.as_str(), user_prompt.as_str(), lines.as_slice(), label.as_str());

            let batch = self
                .with_rate_limit_retry(label_ref, move || {
                    self.translate_batch(system_ref, prompt_ref, lines_ref, languages, label_ref)
                })
                .await?;

            translated.extend(batch);
            debug!("Translated {} ({}/{})", label, translated.len(), total);
            on_progress(translated.len(), total);
        }

        let translated_entries = entries
            .iter()
            .zip(translated)
            .map(|(entry, text)| entry.with_text(text))
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(Subtitle::new(translated_entries)?)
    }

    /// Produce fresh translations for `targets`, each grounded on its neighbours in `rows`.
    ///
    /// Every target must be present in `rows`; otherwise nothing is sent.
    pub async fn retranslate(
        &self,
        rows: &[RetranslateEntry],
        targets: &[usize],
        languages: &LanguagePair,
        hint: Option<&str>,
        video: Option<&VideoContext>,
    ) -> Result<BTreeMap<usize, String>> {
        let mut seen = HashSet::new();
        let targets: Vec<usize> = targets.iter().copied().filter(|i| seen.insert(*i)).collect();

        let missing: Vec<usize> = targets
            .iter()
            .copied()
            .filter(|t| !rows.iter().any(|row| row.index == *t))
            .collect();
        if !missing.is_empty() {
            return Err(BisubError::InvalidInput(format!(
                "unknown subtitle indices: {:?}",
                missing
            )));
        }

        let system = prompt::system_prompt(languages, video);
        let neighbors = self.config.neighbor_size;
        let mut results = BTreeMap::new();

        for target in targets {
            let position = rows
                .iter()
                .position(|row| row.index == target)
                .ok_or_else(|| {
                    BisubError::InvalidInput(format!("unknown subtitle index {}", target))
                })?;
            let before = &rows[position.saturating_sub(neighbors)..position];
            let after = &rows[position + 1..(position + 1 + neighbors).min(rows.len())];

            let user_prompt =
                prompt::retranslate_prompt(&rows[position], before, after, hint, languages);
            let label = format!("retranslation of entry {}", target);
            let (system_ref, prompt_ref) = (system.as_str(), user_prompt.as_str());

            let raw = self
                .with_rate_limit_retry(&label, move || self.request_checked(system_ref, prompt_ref))
                .await?;

            let text = subtitle::normalize_text(&response::strip_numbering(&raw));
            if text.is_empty() {
                return Err(BisubError::Translation(format!(
                    "empty retranslation for entry {}",
                    target
                )));
            }
            results.insert(target, text);
        }

        Ok(results)
    }

    /// One batch attempt: numbered request first, one-by-one if that fails.
    async fn translate_batch(
        &self,
        system: &str,
        user_prompt: &str,
        lines: &[&str],
        languages: &LanguagePair,
        label: &str,
    ) -> Result<Vec<String>> {
        let raw = match self.request_checked(system, user_prompt).await {
            Ok(raw) => raw,
            Err(e) if e.is_rate_limit() => return Err(e),
            Err(e) => {
                warn!("Batch request failed for {}, falling back to one-by-one: {}", label, e);
                return self.translate_one_by_one(system, lines, languages).await;
            }
        };

        match response::parse_numbered(&raw, lines.len()) {
            Ok(batch) => Ok(batch),
            Err(e) => {
                warn!("Batch answer unusable for {}, falling back to one-by-one: {}", label, e);
                self.translate_one_by_one(system, lines, languages).await
            }
        }
    }

    async fn translate_one_by_one(
        &self,
        system: &str,
        lines: &[&str],
        languages: &LanguagePair,
    ) -> Result<Vec<String>> {
        let mut results = Vec::with_capacity(lines.len());
        for line in lines {
            let raw = self
                .request_checked(system, &prompt::single_prompt(line, languages))
                .await?;
            let text = subtitle::normalize_text(&raw);
            if text.is_empty() {
                return Err(BisubError::Translation(format!(
                    "empty translation for line: {}",
                    line
                )));
            }
            results.push(text);
        }
        Ok(results)
    }

    async fn request_checked(&self, system: &str, user_prompt: &str) -> Result<String> {
        let raw = self.model.complete(system, user_prompt).await?;
        response::check_rate_limit(
            &raw,
            &self.config.rate_limit_marker,
            self.config.default_rate_limit_wait(),
        )?;
        Ok(raw)
    }

    /// Re-run `attempt` after each rate-limit signal, sleeping the signalled wait.
    async fn with_rate_limit_retry<T, F, Fut>(&self, label: &str, mut attempt: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let max_retries = self.config.max_rate_limit_retries;
        let mut retries = 0;
        loop {
            match attempt().await {
                Err(BisubError::RateLimited { wait }) => {
                    if retries >= max_retries {
                        error!("Rate limit persisted for {} after {} attempts", label, retries + 1);
                        return Err(BisubError::RateLimitExhausted {
                            attempts: retries + 1,
                            context: label.to_string(),
                        });
                    }
                    retries += 1;
                    warn!(
                        "Rate limited on {}, waiting {:?} (retry {}/{})",
                        label, wait, retries, max_retries
                    );
                    tokio::time::sleep(wait).await;
                }
                other => return other,
            }
        }
    }
}

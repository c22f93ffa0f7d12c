use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use regex::Regex;

use crate::config::{RetryPolicy, SummarizerConfig};
use crate::error::{AppError, Result};

use super::{ArticleSummarizer, LanguageModel};

const SYSTEM_PROMPT: &str = r#"You are an expert science communicator who summarizes news articles.
Write engaging, accessible summaries that make complex concepts understandable to general readers.
Use plain English, avoid jargon where possible, and preserve the key facts."#;

pub struct Summarizer {
    model: Arc<dyn LanguageModel>,
    max_input_chars: usize,
    min_summary_chars: usize,
    retry: RetryPolicy,
}

impl Summarizer {
    pub fn new(model: Arc<dyn LanguageModel>, config: &SummarizerConfig) -> Self {
        Self {
            model,
            max_input_chars: config.max_input_chars,
            min_summary_chars: config.min_summary_chars,
            retry: config.retry(),
        }
    }

    pub fn model_version(&self) -> &str {
        self.model.model_version()
    }

    /// Check a model reply, returning why it is unusable.
    fn validate<'a>(&self, output: &'a str) -> std::result::Result<&'a str, String> {
        let trimmed = output.trim();
        if trimmed.is_empty() {
            return Err("model returned an empty summary".to_string());
        }
        let chars = trimmed.chars().count();
        if chars < self.min_summary_chars {
            return Err(format!("summary too short ({} chars)", chars));
        }
        if !trimmed.contains(char::is_whitespace) {
            return Err("summary is a single token, not prose".to_string());
        }
        Ok(trimmed)
    }
}

#[async_trait]
impl ArticleSummarizer for Summarizer {
    async fn summarize(&self, text: &str, max_words: usize) -> Result<String> {
        if text.trim().is_empty() {
            return Err(AppError::Summarization(
                "refusing to summarize empty input".to_string(),
            ));
        }

        let (input, truncated) = truncate_chars(text, self.max_input_chars);
        if truncated {
            tracing::info!(
                original_chars = text.chars().count(),
                kept_chars = self.max_input_chars,
                "input truncated before summarization"
            );
        }

        let prompt = build_prompt(input, max_words);
        let max_tokens = (max_words as u32).saturating_mul(2).max(256);
        let attempts = self.retry.attempts();
        let mut last_error = String::new();

        for attempt in 1..=attempts {
            match self.model.complete(SYSTEM_PROMPT, &prompt, max_tokens).await {
                Ok(output) => match self.validate(&output) {
                    Ok(summary) => return Ok(clamp_words(summary, max_words).to_string()),
                    Err(reason) => last_error = reason,
                },
                Err(e) => last_error = e.to_string(),
            }

            tracing::warn!(attempt, attempts, error = %last_error, "summary attempt failed");
            if attempt < attempts {
                tokio::time::sleep(self.retry.backoff(attempt)).await;
            }
        }

        Err(AppError::Summarization(format!(
            "gave up after {} attempts: {}",
            attempts, last_error
        )))
    }
}

fn build_prompt(input: &str, max_words: usize) -> String {
    format!(
        "Summarize the following article in at most {max_words} words.\n\
         Make it interesting for general readers while keeping the key technical ideas.\n\
         Reply with the summary only.\n\n\
         Article:\n{input}"
    )
}

/// Keep the leading `max_chars` characters. Returns whether anything was cut.
pub(crate) fn truncate_chars(text: &str, max_chars: usize) -> (&str, bool) {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => (&text[..idx], true),
        None => (text, false),
    }
}

/// Cut `text` right after its `max_words`-th word.
pub(crate) fn clamp_words(text: &str, max_words: usize) -> &str {
    static WORD: OnceLock<Option<Regex>> = OnceLock::new();
    let Some(word) = WORD.get_or_init(|| Regex::new(r"\S+").ok()) else {
        return text;
    };

    if max_words == 0 {
        return "";
    }
    match word.find_iter(text).nth(max_words - 1) {
        Some(m) => &text[..m.end()],
        None => text,
    }
}

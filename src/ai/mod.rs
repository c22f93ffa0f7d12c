mod client;
mod summarizer;

use async_trait::async_trait;

use crate::error::Result;

pub use client::ClaudeClient;
pub use summarizer::Summarizer;

/// Raw text generation against an external model.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn complete(&self, system: &str, prompt: &str, max_tokens: u32) -> Result<String>;

    fn model_version(&self) -> &str;
}

/// Produces a bounded-length summary of article text.
#[async_trait]
pub trait ArticleSummarizer: Send + Sync {
    async fn summarize(&self, text: &str, max_words: usize) -> Result<String>;
}

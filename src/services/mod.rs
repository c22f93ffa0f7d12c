mod content_extractor;

use async_trait::async_trait;

use crate::error::Result;

pub use content_extractor::ContentExtractor;

/// Retrieves the main body text of an article page.
#[async_trait]
pub trait ArticleExtractor: Send + Sync {
    async fn extract(&self, link: &str) -> Result<String>;
}

use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArticleStats {
    pub total_articles: u64,
    pub articles_with_summary: u64,
    pub articles_without_summary: u64,
    pub articles_without_content: u64,
    pub last_updated: Option<DateTime<Utc>>,
}

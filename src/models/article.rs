use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::Candidate;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Article {
    pub id: i64,
    pub link: String,
    pub title: String,
    pub author: Option<String>,
    pub publish_date: Option<String>,
    pub content: Option<String>,
    pub summary: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub enrichment_attempts: u32,
    pub last_error: Option<String>,
}

impl Article {
    pub fn state(&self) -> ArticleState {
        match (&self.content, &self.summary) {
            (_, Some(_)) => ArticleState::Summarized,
            (Some(_), None) => ArticleState::ContentReady,
            (None, None) => ArticleState::Discovered,
        }
    }
}

/// Enrichment progress. Only ever moves forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub enum ArticleState {
    Discovered,
    ContentReady,
    Summarized,
}

/// Metadata-only row written when a link is first seen.
#[derive(Debug, Clone)]
pub struct NewArticle {
    pub link: String,
    pub title: String,
    pub author: Option<String>,
    pub publish_date: Option<String>,
}

impl From<Candidate> for NewArticle {
    fn from(candidate: Candidate) -> Self {
        Self {
            link: candidate.link,
            title: candidate.title,
            author: candidate.author,
            publish_date: candidate.publish_date,
        }
    }
}

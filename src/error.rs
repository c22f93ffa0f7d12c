use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Database error: {0}")]
    Database(#[from] tokio_rusqlite::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Config parse error: {0}")]
    TomlDe(#[from] toml::de::Error),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Claude API error: {0}")]
    ClaudeApi(String),

    /// The feed could not be retrieved or parsed; ends novel ingestion for the cycle.
    #[error("Feed unavailable: {0}")]
    FeedUnavailable(String),

    #[error("Extraction failed for {link}: {reason}")]
    Extraction {
        link: String,
        reason: String,
        retryable: bool,
    },

    #[error("Summarization failed: {0}")]
    Summarization(String),

    /// An article with this link is already stored.
    #[error("Article already exists: {0}")]
    DuplicateKey(String),

    /// An update targeted a link that was never inserted.
    #[error("Article not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl AppError {
    pub fn extraction(link: &str, reason: impl Into<String>, retryable: bool) -> Self {
        AppError::Extraction {
            link: link.to_string(),
            reason: reason.into(),
            retryable,
        }
    }

    /// Whether an extraction failure is worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, AppError::Extraction { retryable: true, .. })
    }
}

pub type Result<T> = std::result::Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_transient_extraction_failures_are_retryable() {
        assert!(AppError::extraction("https://x/a", "HTTP 503", true).is_retryable());
        assert!(!AppError::extraction("https://x/a", "HTTP 404", false).is_retryable());
        assert!(!AppError::Summarization("gave up".to_string()).is_retryable());
        assert!(!AppError::ClaudeApi("HTTP 529".to_string()).is_retryable());
    }
}

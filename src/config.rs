use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{AppError, Result};

const DEFAULT_FEED_URL: &str = "https://news.mit.edu/topic/mitquantum-computing-rss.xml";
const DEFAULT_CLAUDE_MODEL: &str = "claude-3-5-haiku-20241022";
const DEFAULT_CLAUDE_API_URL: &str = "https://api.anthropic.com/v1/messages";
const API_KEY_ENV: &str = "ANTHROPIC_API_KEY";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_db_path")]
    pub db_path: String,

    #[serde(default = "default_feed_url")]
    pub feed_url: String,

    pub claude_api_key: Option<String>,

    #[serde(default = "default_claude_model")]
    pub claude_model: String,

    #[serde(default = "default_claude_api_url")]
    pub claude_api_url: String,

    #[serde(default = "default_refresh_interval")]
    pub refresh_interval_minutes: u32,

    /// Only the leading entries of the feed are considered when set.
    #[serde(default)]
    pub max_candidates: Option<usize>,

    /// Failed enrichment attempts after which backlog repair gives up on an
    /// article. Zero retries forever.
    #[serde(default = "default_max_enrichment_attempts")]
    pub max_enrichment_attempts: u32,

    #[serde(default)]
    pub summarizer: SummarizerConfig,

    #[serde(default)]
    pub extractor: ExtractorConfig,

    /// File this configuration was read from.
    #[serde(skip)]
    pub source_path: Option<PathBuf>,
}

/// Retry settings shared by the outbound clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub backoff_base_ms: u64,
    pub timeout_secs: u64,
}

impl RetryPolicy {
    pub fn attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Delay before the retry that follows the given (1-based) attempt.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(16);
        Duration::from_millis(self.backoff_base_ms.saturating_mul(1u64 << shift))
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SummarizerConfig {
    #[serde(default = "default_max_words")]
    pub max_words: usize,

    #[serde(default = "default_max_input_chars")]
    pub max_input_chars: usize,

    #[serde(default = "default_min_summary_chars")]
    pub min_summary_chars: usize,

    #[serde(default = "default_summarizer_retries")]
    pub max_retries: u32,

    #[serde(default = "default_summarizer_backoff")]
    pub backoff_base_ms: u64,

    #[serde(default = "default_summarizer_timeout")]
    pub timeout_secs: u64,
}

impl SummarizerConfig {
    pub fn retry(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            backoff_base_ms: self.backoff_base_ms,
            timeout_secs: self.timeout_secs,
        }
    }
}

impl Default for SummarizerConfig {
    fn default() -> Self {
        Self {
            max_words: default_max_words(),
            max_input_chars: default_max_input_chars(),
            min_summary_chars: default_min_summary_chars(),
            max_retries: default_summarizer_retries(),
            backoff_base_ms: default_summarizer_backoff(),
            timeout_secs: default_summarizer_timeout(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractorConfig {
    #[serde(default = "default_min_content_chars")]
    pub min_content_chars: usize,

    #[serde(default = "default_extractor_retries")]
    pub max_retries: u32,

    #[serde(default = "default_extractor_backoff")]
    pub backoff_base_ms: u64,

    #[serde(default = "default_extractor_timeout")]
    pub timeout_secs: u64,
}

impl ExtractorConfig {
    pub fn retry(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            backoff_base_ms: self.backoff_base_ms,
            timeout_secs: self.timeout_secs,
        }
    }
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            min_content_chars: default_min_content_chars(),
            max_retries: default_extractor_retries(),
            backoff_base_ms: default_extractor_backoff(),
            timeout_secs: default_extractor_timeout(),
        }
    }
}

fn default_db_path() -> String {
    let data_dir = dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("feed-digest");
    std::fs::create_dir_all(&data_dir).ok();
    data_dir.join("articles.db").to_string_lossy().to_string()
}

fn default_feed_url() -> String {
    DEFAULT_FEED_URL.to_string()
}

fn default_claude_model() -> String {
    DEFAULT_CLAUDE_MODEL.to_string()
}

fn default_claude_api_url() -> String {
    DEFAULT_CLAUDE_API_URL.to_string()
}

fn default_refresh_interval() -> u32 {
    24 * 60
}

fn default_max_enrichment_attempts() -> u32 {
    5
}

fn default_max_words() -> usize {
    250
}

fn default_max_input_chars() -> usize {
    8000
}

fn default_min_summary_chars() -> usize {
    40
}

fn default_min_content_chars() -> usize {
    200
}

fn default_summarizer_retries() -> u32 {
    2
}

fn default_summarizer_backoff() -> u64 {
    1000
}

fn default_summarizer_timeout() -> u64 {
    60
}

fn default_extractor_retries() -> u32 {
    1
}

fn default_extractor_backoff() -> u64 {
    500
}

fn default_extractor_timeout() -> u64 {
    30
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            feed_url: default_feed_url(),
            claude_api_key: None,
            claude_model: default_claude_model(),
            claude_api_url: default_claude_api_url(),
            refresh_interval_minutes: default_refresh_interval(),
            max_candidates: None,
            max_enrichment_attempts: default_max_enrichment_attempts(),
            summarizer: SummarizerConfig::default(),
            extractor: ExtractorConfig::default(),
            source_path: None,
        }
    }
}

impl Config {
    /// Load from `path`, or from the default location when `None`.
    /// A missing file is created with defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config_path = path.map(Path::to_path_buf).unwrap_or_else(Self::config_path);

        let mut config = if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            Self::from_toml(&content)?
        } else {
            let config = Config::default();
            config.save_to(&config_path)?;
            config
        };
        config.source_path = Some(config_path);

        if let Ok(key) = std::env::var(API_KEY_ENV) {
            if !key.trim().is_empty() {
                config.claude_api_key = Some(key);
            }
        }

        Ok(config)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if url::Url::parse(&self.feed_url).is_err() {
            return Err(AppError::Config(format!("invalid feed_url: {}", self.feed_url)));
        }
        if url::Url::parse(&self.claude_api_url).is_err() {
            return Err(AppError::Config(format!(
                "invalid claude_api_url: {}",
                self.claude_api_url
            )));
        }
        if self.summarizer.max_words == 0 {
            return Err(AppError::Config("summarizer.max_words must be positive".to_string()));
        }
        if self.summarizer.max_input_chars == 0 {
            return Err(AppError::Config(
                "summarizer.max_input_chars must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub fn save_to(&self, config_path: &Path) -> Result<()> {
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| AppError::Config(e.to_string()))?;
        std::fs::write(config_path, content)?;
        Ok(())
    }

    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("feed-digest")
            .join("config.toml")
    }

    pub fn api_key(&self) -> Result<&str> {
        self.claude_api_key
            .as_deref()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| {
                let path = self.source_path.clone().unwrap_or_else(Self::config_path);
                AppError::Config(format!(
                    "no Claude API key: set claude_api_key in {} or {}",
                    path.display(),
                    API_KEY_ENV
                ))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_uses_defaults() {
        let config = Config::from_toml("").unwrap();
        assert_eq!(config.feed_url, DEFAULT_FEED_URL);
        assert_eq!(config.summarizer.max_words, 250);
        assert_eq!(config.summarizer.max_input_chars, 8000);
        assert_eq!(config.summarizer.retry().attempts(), 3);
        assert_eq!(config.extractor.max_retries, 1);
        assert_eq!(config.max_enrichment_attempts, 5);
    }

    #[test]
    fn nested_sections_override_defaults() {
        let config = Config::from_toml(
            r#"
feed_url = "https://example.com/feed.xml"
max_candidates = 3

[summarizer]
max_words = 120
max_retries = 4

[extractor]
min_content_chars = 50
timeout_secs = 2
"#,
        )
        .unwrap();

        assert_eq!(config.max_candidates, Some(3));
        assert_eq!(config.summarizer.max_words, 120);
        assert_eq!(config.summarizer.max_input_chars, 8000);
        assert_eq!(config.summarizer.retry().attempts(), 5);
        assert_eq!(config.extractor.min_content_chars, 50);
        assert_eq!(config.summarizer.backoff_base_ms, 1000);
        assert_eq!(config.extractor.retry().timeout(), Duration::from_secs(2));
        assert_eq!(config.extractor.max_retries, 1);
    }

    #[test]
    fn invalid_feed_url_is_rejected() {
        let err = Config::from_toml(r#"feed_url = "not a url""#).unwrap_err();
        assert!(matches!(err, AppError::Config(_)));
    }

    #[test]
    fn backoff_doubles_per_attempt() {
        let policy = RetryPolicy {
            max_retries: 3,
            backoff_base_ms: 100,
            timeout_secs: 1,
        };
        assert_eq!(policy.backoff(1), Duration::from_millis(100));
        assert_eq!(policy.backoff(2), Duration::from_millis(200));
        assert_eq!(policy.backoff(3), Duration::from_millis(400));
    }

    #[test]
    fn save_then_load_keeps_values() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");

        let mut config = Config::default();
        config.feed_url = "https://example.org/rss".to_string();
        config.summarizer.max_words = 99;
        config.save_to(&path).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let loaded = Config::from_toml(&content).unwrap();
        assert_eq!(loaded.feed_url, "https://example.org/rss");
        assert_eq!(loaded.summarizer.max_words, 99);
    }

    #[test]
    fn load_remembers_the_file_it_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("custom.toml");
        std::fs::write(&path, r#"feed_url = "https://example.org/rss""#).unwrap();

        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.source_path.as_deref(), Some(path.as_path()));
        assert_eq!(config.claude_api_url, DEFAULT_CLAUDE_API_URL);
    }

    #[test]
    fn missing_api_key_names_the_loaded_file() {
        let config = Config {
            claude_api_key: None,
            source_path: Some(PathBuf::from("/srv/digest/custom.toml")),
            ..Config::default()
        };

        let err = config.api_key().unwrap_err().to_string();
        assert!(err.contains("/srv/digest/custom.toml"), "{err}");
    }
}

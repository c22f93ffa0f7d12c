use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use crate::ai::ArticleSummarizer;
use crate::config::{Config, RetryPolicy};
use crate::db::Repository;
use crate::error::{AppError, Result};
use crate::feed::FeedSource;
use crate::models::NewArticle;
use crate::services::ArticleExtractor;

use super::CycleReport;

#[derive(Debug, Clone, Copy)]
pub struct PipelineSettings {
    pub max_words: usize,
    /// Zero disables the bound.
    pub max_enrichment_attempts: u32,
    pub extract_retry: RetryPolicy,
}

impl PipelineSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_words: config.summarizer.max_words,
            max_enrichment_attempts: config.max_enrichment_attempts,
            extract_retry: config.extractor.retry(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Ingest,
    Backlog,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Ingest => write!(f, "ingest"),
            Phase::Backlog => write!(f, "backlog"),
        }
    }
}

pub struct Pipeline {
    repository: Repository,
    feed: Arc<dyn FeedSource>,
    extractor: Arc<dyn ArticleExtractor>,
    summarizer: Arc<dyn ArticleSummarizer>,
    settings: PipelineSettings,
}

impl Pipeline {
    pub fn new(
        repository: Repository,
        feed: Arc<dyn FeedSource>,
        extractor: Arc<dyn ArticleExtractor>,
        summarizer: Arc<dyn ArticleSummarizer>,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            repository,
            feed,
            extractor,
            summarizer,
            settings,
        }
    }

    #[cfg(test)]
    pub fn repository(&self) -> &Repository {
        &self.repository
    }

    /// Run novel ingestion followed by backlog repair. Failures are logged and
    /// counted in the report; nothing here aborts the cycle.
    pub async fn run_cycle(&self) -> CycleReport {
        let mut report = CycleReport::start();
        tracing::info!("starting pipeline cycle");

        let touched = self.ingest_novel(&mut report).await;
        self.repair_backlog(&touched, &mut report).await;

        report.finish();
        tracing::info!(
            ingested = report.ingested,
            summarized = report.summarized,
            deferred = report.deferred,
            abandoned = report.abandoned,
            feed_error = report.feed_error.is_some(),
            "pipeline cycle finished"
        );
        report
    }

    /// Returns the links this phase attempted to enrich.
    async fn ingest_novel(&self, report: &mut CycleReport) -> HashSet<String> {
        let mut touched = HashSet::new();

        let candidates = match self.feed.fetch_latest().await {
            Ok(candidates) => candidates,
            Err(e) => {
                tracing::error!(phase = %Phase::Ingest, error = %e, "feed unavailable, skipping novel ingestion");
                report.feed_error = Some(e.to_string());
                return touched;
            }
        };
        report.candidates = candidates.len();

        for candidate in candidates {
            let link = candidate.link.clone();

            match self.repository.exists(&link).await {
                Ok(true) => {
                    report.already_known += 1;
                    continue;
                }
                Ok(false) => {}
                Err(e) => {
                    tracing::error!(link = %link, phase = %Phase::Ingest, error = %e, "could not check for existing article");
                    report.deferred += 1;
                    continue;
                }
            }

            match self.repository.insert(NewArticle::from(candidate)).await {
                Ok(_) => {
                    tracing::info!(link = %link, "new article stored");
                    report.ingested += 1;
                }
                Err(AppError::DuplicateKey(_)) => {
                    tracing::debug!(link = %link, "article inserted concurrently, skipping");
                    report.already_known += 1;
                    continue;
                }
                Err(e) => {
                    tracing::error!(link = %link, phase = %Phase::Ingest, error = %e, "could not store article");
                    report.deferred += 1;
                    continue;
                }
            }

            self.enrich(&link, None, Phase::Ingest, report).await;
            touched.insert(link);
        }

        touched
    }

    async fn repair_backlog(&self, touched: &HashSet<String>, report: &mut CycleReport) {
        let backlog = match self.repository.list_missing_summary().await {
            Ok(backlog) => backlog,
            Err(e) => {
                tracing::error!(phase = %Phase::Backlog, error = %e, "could not list backlog");
                return;
            }
        };
        let backlog: Vec<_> = backlog
            .into_iter()
            .filter(|article| !touched.contains(&article.link))
            .collect();
        report.backlog_size = backlog.len();

        let limit = self.settings.max_enrichment_attempts;
        for article in backlog {
            if limit > 0 && article.enrichment_attempts >= limit {
                tracing::debug!(
                    link = %article.link,
                    attempts = article.enrichment_attempts,
                    "attempt limit reached, leaving article unsummarized"
                );
                report.abandoned += 1;
                continue;
            }

            tracing::info!(link = %article.link, state = ?article.state(), "repairing backlog article");
            self.enrich(&article.link, article.content, Phase::Backlog, report)
                .await;
        }
    }

    /// Extract (unless content is already stored) and summarize one article,
    /// committing each step as soon as it succeeds.
    async fn enrich(
        &self,
        link: &str,
        content: Option<String>,
        phase: Phase,
        report: &mut CycleReport,
    ) {
        let content = match content {
            Some(content) => content,
            None => {
                let content = match self.extract_with_retry(link, phase).await {
                    Ok(content) => content,
                    Err(e) => return self.defer(link, phase, e, report).await,
                };
                if let Err(e) = self.repository.update_content(link, &content).await {
                    return self.defer(link, phase, e, report).await;
                }
                report.content_extracted += 1;
                content
            }
        };

        let summary = match self.summarizer.summarize(&content, self.settings.max_words).await {
            Ok(summary) => summary,
            Err(e) => return self.defer(link, phase, e, report).await,
        };
        if let Err(e) = self.repository.update_summary(link, &summary).await {
            return self.defer(link, phase, e, report).await;
        }
        tracing::info!(link, %phase, "summary stored");
        report.summarized += 1;
    }

    async fn extract_with_retry(&self, link: &str, phase: Phase) -> Result<String> {
        let policy = self.settings.extract_retry;
        let attempts = policy.attempts();
        let mut attempt = 1;

        loop {
            match self.extractor.extract(link).await {
                Ok(content) => return Ok(content),
                Err(e) if e.is_retryable() && attempt < attempts => {
                    tracing::warn!(link, %phase, attempt, error = %e, "extraction failed, retrying");
                    tokio::time::sleep(policy.backoff(attempt)).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Log a failed step and leave the article for a later backlog pass.
    async fn defer(&self, link: &str, phase: Phase, err: AppError, report: &mut CycleReport) {
        report.deferred += 1;

        if let AppError::NotFound(_) = err {
            tracing::error!(link, %phase, "consistency bug: update targeted an article that was never stored");
            return;
        }

        tracing::warn!(link, %phase, error = %err, "enrichment deferred");
        if let Err(e) = self.repository.record_failure(link, &err.to_string()).await {
            tracing::error!(link, %phase, error = %e, "could not record failed attempt");
        }
    }
}

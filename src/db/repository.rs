use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, ErrorCode, OptionalExtension, Row};
use tokio_rusqlite::Connection;

use crate::error::{AppError, Result};
use crate::models::{Article, ArticleStats, NewArticle};

use super::schema::SCHEMA;

const ARTICLE_COLUMNS: &str = "id, link, title, author, publish_date, content, summary, \
     created_at, updated_at, enrichment_attempts, last_error";

/// Result of a fill-once column update.
enum Fill {
    Applied { had_content: bool },
    AlreadySet,
    Missing,
}

pub struct Repository {
    conn: Connection,
}

impl Repository {
    pub async fn new(db_path: &str) -> Result<Self> {
        let conn = Connection::open(db_path).await?;
        Self::with_connection(conn).await
    }

    #[cfg(test)]
    pub async fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().await?;
        Self::with_connection(conn).await
    }

    async fn with_connection(conn: Connection) -> Result<Self> {
        conn.call(|conn| {
            conn.execute_batch(SCHEMA)?;
            Ok(())
        })
        .await?;

        Ok(Self { conn })
    }

    pub async fn exists(&self, link: &str) -> Result<bool> {
        let link = link.to_string();
        let exists = self
            .conn
            .call(move |conn| {
                let count: i64 = conn.query_row(
                    "SELECT COUNT(*) FROM articles WHERE link = ?1",
                    params![link],
                    |row| row.get(0),
                )?;
                Ok(count > 0)
            })
            .await?;
        Ok(exists)
    }

    /// Insert a metadata-only row. A link that is already stored yields
    /// `AppError::DuplicateKey` and leaves the existing row untouched.
    pub async fn insert(&self, article: NewArticle) -> Result<i64> {
        let link = article.link.clone();
        let now = timestamp_now();
        let inserted = self
            .conn
            .call(move |conn| {
                let res = conn.execute(
                    r#"INSERT INTO articles (link, title, author, publish_date, created_at, updated_at)
                       VALUES (?1, ?2, ?3, ?4, ?5, ?5)"#,
                    params![
                        article.link,
                        article.title,
                        article.author,
                        article.publish_date,
                        now,
                    ],
                );
                match res {
                    Ok(_) => Ok(Some(conn.last_insert_rowid())),
                    Err(rusqlite::Error::SqliteFailure(e, _))
                        if e.code == ErrorCode::ConstraintViolation =>
                    {
                        Ok(None)
                    }
                    Err(e) => Err(e.into()),
                }
            })
            .await?;

        inserted.ok_or(AppError::DuplicateKey(link))
    }

    /// Store extracted content if none is stored yet.
    pub async fn update_content(&self, link: &str, content: &str) -> Result<()> {
        let key = link.to_string();
        let content = content.to_string();
        let now = timestamp_now();
        let fill = self
            .conn
            .call(move |conn| {
                let changed = conn.execute(
                    "UPDATE articles SET content = ?1, updated_at = ?2 WHERE link = ?3 AND content IS NULL",
                    params![content, now, key],
                )?;
                if changed > 0 {
                    return Ok(Fill::Applied { had_content: true });
                }
                let found = conn
                    .query_row(
                        "SELECT 1 FROM articles WHERE link = ?1",
                        params![key],
                        |_| Ok(()),
                    )
                    .optional()?;
                Ok(if found.is_some() { Fill::AlreadySet } else { Fill::Missing })
            })
            .await?;

        match fill {
            Fill::Applied { .. } => Ok(()),
            Fill::AlreadySet => {
                tracing::debug!(link, "content already stored, keeping existing value");
                Ok(())
            }
            Fill::Missing => Err(AppError::NotFound(link.to_string())),
        }
    }

    /// Store a summary if none is stored yet.
    pub async fn update_summary(&self, link: &str, summary: &str) -> Result<()> {
        let key = link.to_string();
        let summary = summary.to_string();
        let now = timestamp_now();
        let fill = self
            .conn
            .call(move |conn| {
                let row: Option<(bool, bool)> = conn
                    .query_row(
                        "SELECT content IS NOT NULL, summary IS NOT NULL FROM articles WHERE link = ?1",
                        params![key],
                        |row| Ok((row.get(0)?, row.get(1)?)),
                    )
                    .optional()?;
                let Some((had_content, has_summary)) = row else {
                    return Ok(Fill::Missing);
                };
                if has_summary {
                    return Ok(Fill::AlreadySet);
                }
                let changed = conn.execute(
                    "UPDATE articles SET summary = ?1, updated_at = ?2 WHERE link = ?3 AND summary IS NULL",
                    params![summary, now, key],
                )?;
                Ok(if changed > 0 {
                    Fill::Applied { had_content }
                } else {
                    Fill::AlreadySet
                })
            })
            .await?;

        match fill {
            Fill::Applied { had_content } => {
                if !had_content {
                    tracing::warn!(link, "anomaly: summary stored for an article without content");
                }
                Ok(())
            }
            Fill::AlreadySet => {
                tracing::debug!(link, "summary already stored, keeping existing value");
                Ok(())
            }
            Fill::Missing => Err(AppError::NotFound(link.to_string())),
        }
    }

    /// Count a failed enrichment attempt. Does not touch `updated_at`.
    pub async fn record_failure(&self, link: &str, reason: &str) -> Result<()> {
        let key = link.to_string();
        let reason = reason.to_string();
        let changed = self
            .conn
            .call(move |conn| {
                let changed = conn.execute(
                    "UPDATE articles SET enrichment_attempts = enrichment_attempts + 1, last_error = ?1 WHERE link = ?2",
                    params![reason, key],
                )?;
                Ok(changed)
            })
            .await?;

        if changed == 0 {
            return Err(AppError::NotFound(link.to_string()));
        }
        Ok(())
    }

    pub async fn get(&self, link: &str) -> Result<Option<Article>> {
        let link = link.to_string();
        let article = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {ARTICLE_COLUMNS} FROM articles WHERE link = ?1"
                ))?;
                let article = stmt
                    .query_row(params![link], article_from_row)
                    .optional()?;
                Ok(article)
            })
            .await?;
        Ok(article)
    }

    /// Articles still waiting for a summary, oldest first.
    pub async fn list_missing_summary(&self) -> Result<Vec<Article>> {
        self.query_articles(format!(
            "SELECT {ARTICLE_COLUMNS} FROM articles WHERE summary IS NULL ORDER BY created_at ASC, id ASC"
        ))
        .await
    }

    pub async fn list_all(&self) -> Result<Vec<Article>> {
        self.query_articles(format!(
            "SELECT {ARTICLE_COLUMNS} FROM articles ORDER BY created_at DESC, id DESC"
        ))
        .await
    }

    /// Summarized articles, newest first.
    pub async fn list_summarized(&self, limit: usize) -> Result<Vec<Article>> {
        self.query_articles(format!(
            "SELECT {ARTICLE_COLUMNS} FROM articles WHERE summary IS NOT NULL \
             ORDER BY created_at DESC, id DESC LIMIT {limit}"
        ))
        .await
    }

    async fn query_articles(&self, sql: String) -> Result<Vec<Article>> {
        let articles = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(&sql)?;
                let articles = stmt
                    .query_map([], article_from_row)?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(articles)
            })
            .await?;
        Ok(articles)
    }

    pub async fn stats(&self) -> Result<ArticleStats> {
        let stats = self
            .conn
            .call(|conn| {
                let stats = conn.query_row(
                    r#"SELECT COUNT(*),
                              COALESCE(SUM(CASE WHEN summary IS NOT NULL THEN 1 ELSE 0 END), 0),
                              COALESCE(SUM(CASE WHEN content IS NULL THEN 1 ELSE 0 END), 0),
                              MAX(created_at)
                       FROM articles"#,
                    [],
                    |row| {
                        let total: i64 = row.get(0)?;
                        let with_summary: i64 = row.get(1)?;
                        let without_content: i64 = row.get(2)?;
                        let last: Option<String> = row.get(3)?;
                        Ok(ArticleStats {
                            total_articles: total as u64,
                            articles_with_summary: with_summary as u64,
                            articles_without_summary: (total - with_summary) as u64,
                            articles_without_content: without_content as u64,
                            last_updated: last.and_then(|s| parse_datetime(&s)),
                        })
                    },
                )?;
                Ok(stats)
            })
            .await?;
        Ok(stats)
    }
}

fn timestamp_now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn parse_datetime(s: &str) -> Option<DateTime<Utc>> {
    // Try RFC3339 first (e.g., "2026-01-11T12:34:56.123456789Z")
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    // Try SQLite datetime format (e.g., "2026-01-11 12:34:56")
    if let Ok(naive) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return Some(naive.and_utc());
    }
    None
}

fn article_from_row(row: &Row) -> rusqlite::Result<Article> {
    Ok(Article {
        id: row.get(0)?,
        link: row.get(1)?,
        title: row.get(2)?,
        author: row.get(3)?,
        publish_date: row.get(4)?,
        content: row.get(5)?,
        summary: row.get(6)?,
        created_at: row
            .get::<_, String>(7)
            .ok()
            .and_then(|s| parse_datetime(&s))
            .unwrap_or_else(Utc::now),
        updated_at: row
            .get::<_, String>(8)
            .ok()
            .and_then(|s| parse_datetime(&s))
            .unwrap_or_else(Utc::now),
        enrichment_attempts: row.get(9)?,
        last_error: row.get(10)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ArticleState;
    use tokio_test::{assert_err, assert_ok};

    fn stub(link: &str) -> NewArticle {
        NewArticle {
            link: link.to_string(),
            title: format!("Title for {link}"),
            author: Some("A".to_string()),
            publish_date: Some("2025-03-21T00:00:00+00:00".to_string()),
        }
    }

    #[tokio::test]
    async fn insert_then_exists() {
        let repo = Repository::in_memory().await.unwrap();
        assert!(!repo.exists("https://x/a").await.unwrap());

        assert_ok!(repo.insert(stub("https://x/a")).await);
        assert!(repo.exists("https://x/a").await.unwrap());

        let article = repo.get("https://x/a").await.unwrap().unwrap();
        assert_eq!(article.state(), ArticleState::Discovered);
        assert_eq!(article.author.as_deref(), Some("A"));
        assert_eq!(article.created_at, article.updated_at);
        assert_eq!(article.enrichment_attempts, 0);
    }

    #[tokio::test]
    async fn duplicate_insert_is_rejected_without_second_row() {
        let repo = Repository::in_memory().await.unwrap();
        repo.insert(stub("https://x/a")).await.unwrap();

        let err = repo.insert(stub("https://x/a")).await.unwrap_err();
        assert!(matches!(err, AppError::DuplicateKey(ref link) if link == "https://x/a"));
        assert_eq!(repo.list_all().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn updates_bump_updated_at_and_advance_state() {
        let repo = Repository::in_memory().await.unwrap();
        repo.insert(stub("https://x/a")).await.unwrap();
        let created = repo.get("https://x/a").await.unwrap().unwrap();

        repo.update_content("https://x/a", "body").await.unwrap();
        let with_content = repo.get("https://x/a").await.unwrap().unwrap();
        assert_eq!(with_content.state(), ArticleState::ContentReady);
        assert!(with_content.updated_at > created.created_at);

        repo.update_summary("https://x/a", "short summary").await.unwrap();
        let summarized = repo.get("https://x/a").await.unwrap().unwrap();
        assert_eq!(summarized.state(), ArticleState::Summarized);
        assert!(summarized.updated_at > with_content.updated_at);
        assert_eq!(summarized.created_at, created.created_at);
    }

    #[tokio::test]
    async fn filled_values_are_never_overwritten() {
        let repo = Repository::in_memory().await.unwrap();
        repo.insert(stub("https://x/a")).await.unwrap();
        repo.update_content("https://x/a", "first").await.unwrap();
        repo.update_summary("https://x/a", "first summary").await.unwrap();
        let before = repo.get("https://x/a").await.unwrap().unwrap();

        assert_ok!(repo.update_content("https://x/a", "second").await);
        assert_ok!(repo.update_summary("https://x/a", "second summary").await);

        let after = repo.get("https://x/a").await.unwrap().unwrap();
        assert_eq!(after.content.as_deref(), Some("first"));
        assert_eq!(after.summary.as_deref(), Some("first summary"));
        assert_eq!(after.updated_at, before.updated_at);
    }

    #[tokio::test]
    async fn updates_on_unknown_link_are_not_found() {
        let repo = Repository::in_memory().await.unwrap();

        let err = repo.update_content("https://x/missing", "body").await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
        let err = repo.update_summary("https://x/missing", "s").await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
        assert_err!(repo.record_failure("https://x/missing", "boom").await);
    }

    #[tokio::test]
    async fn record_failure_counts_attempts_without_touching_updated_at() {
        let repo = Repository::in_memory().await.unwrap();
        repo.insert(stub("https://x/a")).await.unwrap();
        let before = repo.get("https://x/a").await.unwrap().unwrap();

        repo.record_failure("https://x/a", "timeout").await.unwrap();
        repo.record_failure("https://x/a", "HTTP 503").await.unwrap();

        let after = repo.get("https://x/a").await.unwrap().unwrap();
        assert_eq!(after.enrichment_attempts, 2);
        assert_eq!(after.last_error.as_deref(), Some("HTTP 503"));
        assert_eq!(after.updated_at, before.updated_at);
        assert_eq!(after.state(), ArticleState::Discovered);
    }

    #[tokio::test]
    async fn listings_are_ordered_by_creation() {
        let repo = Repository::in_memory().await.unwrap();
        for link in ["https://x/1", "https://x/2", "https://x/3"] {
            repo.insert(stub(link)).await.unwrap();
        }
        repo.update_content("https://x/2", "body").await.unwrap();
        repo.update_summary("https://x/2", "summary").await.unwrap();

        let missing: Vec<_> = repo
            .list_missing_summary()
            .await
            .unwrap()
            .into_iter()
            .map(|a| a.link)
            .collect();
        assert_eq!(missing, vec!["https://x/1", "https://x/3"]);

        let all: Vec<_> = repo
            .list_all()
            .await
            .unwrap()
            .into_iter()
            .map(|a| a.link)
            .collect();
        assert_eq!(all, vec!["https://x/3", "https://x/2", "https://x/1"]);

        let summarized = repo.list_summarized(20).await.unwrap();
        assert_eq!(summarized.len(), 1);
        assert_eq!(summarized[0].link, "https://x/2");
    }

    #[tokio::test]
    async fn stats_count_enrichment_progress() {
        let repo = Repository::in_memory().await.unwrap();
        let empty = repo.stats().await.unwrap();
        assert_eq!(empty.total_articles, 0);
        assert_eq!(empty.last_updated, None);

        for link in ["https://x/1", "https://x/2", "https://x/3"] {
            repo.insert(stub(link)).await.unwrap();
        }
        repo.update_content("https://x/1", "body").await.unwrap();
        repo.update_summary("https://x/1", "summary").await.unwrap();
        repo.update_content("https://x/2", "body").await.unwrap();

        let stats = repo.stats().await.unwrap();
        assert_eq!(stats.total_articles, 3);
        assert_eq!(stats.articles_with_summary, 1);
        assert_eq!(stats.articles_without_summary, 2);
        assert_eq!(stats.articles_without_content, 1);
        assert!(stats.last_updated.is_some());
    }

    #[tokio::test]
    async fn rows_survive_reopening_the_database() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("articles.db");
        let path = path.to_str().unwrap();

        {
            let repo = Repository::new(path).await.unwrap();
            repo.insert(stub("https://x/a")).await.unwrap();
            repo.update_content("https://x/a", "body").await.unwrap();
        }

        let reopened = Repository::new(path).await.unwrap();
        let article = reopened.get("https://x/a").await.unwrap().unwrap();
        assert_eq!(article.content.as_deref(), Some("body"));
        assert!(matches!(
            reopened.insert(stub("https://x/a")).await,
            Err(AppError::DuplicateKey(_))
        ));
    }
}

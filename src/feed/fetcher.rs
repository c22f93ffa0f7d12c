use std::time::Duration;

use async_trait::async_trait;
use feed_rs::parser;
use reqwest::Client;

use crate::error::{AppError, Result};
use crate::models::Candidate;

use super::FeedSource;

pub struct FeedFetcher {
    client: Client,
    feed_url: String,
    max_candidates: Option<usize>,
}

impl FeedFetcher {
    pub fn new(feed_url: impl Into<String>, max_candidates: Option<usize>) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .connect_timeout(Duration::from_secs(10))
            .user_agent(concat!("feed-digest/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            feed_url: feed_url.into(),
            max_candidates,
        })
    }

    async fn download(&self) -> Result<Vec<u8>> {
        let response = self.client.get(&self.feed_url).send().await?;

        if !response.status().is_success() {
            return Err(anyhow::anyhow!("Failed to fetch feed: HTTP {}", response.status()).into());
        }

        Ok(response.bytes().await?.to_vec())
    }
}

#[async_trait]
impl FeedSource for FeedFetcher {
    async fn fetch_latest(&self) -> Result<Vec<Candidate>> {
        let bytes = self
            .download()
            .await
            .map_err(|e| AppError::FeedUnavailable(format!("{}: {}", self.feed_url, e)))?;

        let candidates = parse_feed(&bytes, self.max_candidates)?;
        tracing::info!(feed = %self.feed_url, count = candidates.len(), "fetched feed");
        Ok(candidates)
    }
}

/// Parse a feed document into candidates, keeping the feed's own order.
/// Entries without a usable title or link are skipped.
pub fn parse_feed(bytes: &[u8], max_candidates: Option<usize>) -> Result<Vec<Candidate>> {
    let feed = parser::parse(bytes).map_err(|e| AppError::FeedUnavailable(e.to_string()))?;
    let limit = max_candidates.unwrap_or(usize::MAX);

    let candidates = feed
        .entries
        .into_iter()
        .take(limit)
        .filter_map(|entry| {
            let title = entry
                .title
                .map(|t| t.content.trim().to_string())
                .filter(|t| !t.is_empty());
            let link = entry
                .links
                .first()
                .map(|l| l.href.trim().to_string())
                .filter(|l| is_http_url(l));

            let (Some(title), Some(link)) = (title, link) else {
                tracing::warn!(entry_id = %entry.id, "skipping feed entry without title or link");
                return None;
            };

            Some(Candidate {
                title,
                link,
                author: entry
                    .authors
                    .first()
                    .map(|a| a.name.trim().to_string())
                    .filter(|a| !a.is_empty()),
                publish_date: entry.published.or(entry.updated).map(|dt| dt.to_rfc3339()),
            })
        })
        .collect();

    Ok(candidates)
}

fn is_http_url(link: &str) -> bool {
    url::Url::parse(link)
        .map(|u| matches!(u.scheme(), "http" | "https") && u.host_str().is_some())
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_err, assert_ok};
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const RSS: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0">
  <channel>
    <title>Quantum News</title>
    <link>https://news.example.edu/</link>
    <description>Latest</description>
    <item>
      <title>Newest article</title>
      <link>https://news.example.edu/2025/newest</link>
      <pubDate>Fri, 21 Mar 2025 10:00:00 GMT</pubDate>
    </item>
    <item>
      <title>No link here</title>
      <description>Entry without a link</description>
    </item>
    <item>
      <link>https://news.example.edu/2025/untitled</link>
      <description>Entry without a title</description>
    </item>
    <item>
      <title>Older article</title>
      <link>https://news.example.edu/2025/older</link>
      <pubDate>Thu, 20 Mar 2025 10:00:00 GMT</pubDate>
    </item>
  </channel>
</rss>"#;

    const ATOM: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<feed xmlns="http://www.w3.org/2005/Atom">
  <title>Atom Feed</title>
  <id>urn:example:feed</id>
  <updated>2025-03-21T10:00:00Z</updated>
  <entry>
    <title>Atom entry</title>
    <id>urn:example:1</id>
    <link href="https://x/a"/>
    <author><name>A</name></author>
    <updated>2025-03-21T10:00:00Z</updated>
  </entry>
</feed>"#;

    #[test]
    fn keeps_feed_order_and_skips_malformed_entries() {
        let candidates = parse_feed(RSS.as_bytes(), None).unwrap();
        let links: Vec<_> = candidates.iter().map(|c| c.link.as_str()).collect();
        assert_eq!(
            links,
            vec![
                "https://news.example.edu/2025/newest",
                "https://news.example.edu/2025/older"
            ]
        );
        assert_eq!(candidates[0].title, "Newest article");
        assert!(candidates[0].publish_date.as_deref().unwrap().starts_with("2025-03-21"));
    }

    #[test]
    fn max_candidates_limits_leading_entries() {
        let candidates = parse_feed(RSS.as_bytes(), Some(1)).unwrap();
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].link, "https://news.example.edu/2025/newest");
    }

    #[test]
    fn reads_atom_author_and_updated_date() {
        let candidates = parse_feed(ATOM.as_bytes(), None).unwrap();
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].link, "https://x/a");
        assert_eq!(candidates[0].author.as_deref(), Some("A"));
        assert!(candidates[0].publish_date.is_some());
    }

    #[test]
    fn unparseable_document_is_feed_unavailable() {
        let err = parse_feed(b"definitely not a feed", None).unwrap_err();
        assert!(matches!(err, AppError::FeedUnavailable(_)));
    }

    async fn serve_feed(status: u16, body: &str) -> MockServer {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/rss.xml"))
            .respond_with(ResponseTemplate::new(status).set_body_string(body))
            .mount(&server)
            .await;
        server
    }

    #[tokio::test]
    async fn fetch_latest_downloads_and_parses_the_feed() {
        let server = serve_feed(200, RSS).await;
        let fetcher = FeedFetcher::new(format!("{}/rss.xml", server.uri()), None).unwrap();

        let candidates = assert_ok!(fetcher.fetch_latest().await);
        assert_eq!(candidates.len(), 2);
        assert_eq!(candidates[0].title, "Newest article");
    }

    #[tokio::test]
    async fn error_status_is_feed_unavailable() {
        let server = serve_feed(503, "maintenance").await;
        let fetcher = FeedFetcher::new(format!("{}/rss.xml", server.uri()), None).unwrap();

        let err = assert_err!(fetcher.fetch_latest().await);
        match err {
            AppError::FeedUnavailable(message) => assert!(message.contains("503"), "{message}"),
            other => panic!("expected FeedUnavailable, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn unreachable_feed_is_feed_unavailable() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let url = format!("http://{}/rss.xml", listener.local_addr().unwrap());
        drop(listener);

        let fetcher = FeedFetcher::new(url, None).unwrap();
        let err = assert_err!(fetcher.fetch_latest().await);
        assert!(matches!(err, AppError::FeedUnavailable(_)));
    }
}

mod fetcher;

use async_trait::async_trait;

use crate::error::Result;
use crate::models::Candidate;

pub use fetcher::FeedFetcher;

/// A source of feed candidates, in the order the feed publishes them.
#[async_trait]
pub trait FeedSource: Send + Sync {
    async fn fetch_latest(&self) -> Result<Vec<Candidate>>;
}

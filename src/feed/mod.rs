mod fetcher;

use async_trait::async_trait;

use crate::error::Result;
use crate::models::CandidateItem;

pub use fetcher::RssFetcher;

/// Produces the candidate items for one cycle.
///
/// A failing source is skipped as a whole; items are never partially built.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self) -> Result<Vec<CandidateItem>>;
}

mod keywords;
mod scorer;

use async_trait::async_trait;

use crate::error::Result;
use crate::models::{CandidateItem, Score};

pub use keywords::KeywordFilter;
pub use scorer::LlmScorer;

/// Rates a candidate for relevance and credibility and writes its summary.
///
/// Implementations report quota exhaustion, timeouts and unusable answers as
/// `AppError::ScoringUnavailable`; the pipeline then retries the item on a
/// later cycle.
#[async_trait]
pub trait Scorer: Send + Sync {
    async fn score(&self, item: &CandidateItem) -> Result<Score>;
}

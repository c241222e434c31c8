use serde::{Deserialize, Serialize};

use super::CandidateItem;

/// What the scorer says about one candidate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Score {
    pub relevance: u8,
    pub credibility: u8,
    pub summary: String,
}

impl Score {
    /// Clamps both scores into 0..=100.
    pub fn new(relevance: u32, credibility: u32, summary: impl Into<String>) -> Self {
        Self {
            relevance: relevance.min(100) as u8,
            credibility: credibility.min(100) as u8,
            summary: summary.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoredItem {
    pub item: CandidateItem,
    pub relevance_score: u8,
    pub credibility_score: u8,
    pub summary: String,
}

impl ScoredItem {
    pub fn new(item: CandidateItem, score: Score) -> Self {
        Self {
            item,
            relevance_score: score.relevance,
            credibility_score: score.credibility,
            summary: score.summary,
        }
    }

    pub fn fingerprint(&self) -> &str {
        &self.item.fingerprint
    }

    pub fn passes(&self, relevance_threshold: u8, credibility_threshold: u8) -> bool {
        self.relevance_score >= relevance_threshold && self.credibility_score >= credibility_threshold
    }
}

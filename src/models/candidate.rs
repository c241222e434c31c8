use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// A news item as it comes out of a source, before any scoring.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateItem {
    pub fingerprint: String,
    pub source_name: String,
    pub title: String,
    pub body: String,
    pub published_at: DateTime<Utc>,
    pub url: String,
}

impl CandidateItem {
    pub fn new(
        source_name: impl Into<String>,
        title: impl Into<String>,
        body: impl Into<String>,
        published_at: DateTime<Utc>,
        url: impl Into<String>,
    ) -> Self {
        let source_name = source_name.into();
        let title = title.into();
        let fingerprint = fingerprint_of(&source_name, &title, &published_at);
        Self {
            fingerprint,
            source_name,
            title,
            body: body.into(),
            published_at,
            url: url.into(),
        }
    }

    /// Returns the item with a usable fingerprint, recomputing it from the
    /// identifying fields when the carried one is blank.
    pub fn with_valid_fingerprint(self) -> Self {
        if !self.fingerprint.trim().is_empty() {
            return self;
        }
        let fingerprint = fingerprint_of(&self.source_name, &self.title, &self.published_at);
        Self { fingerprint, ..self }
    }
}

/// SHA-256 over source, title and publication time, as lowercase hex.
pub fn fingerprint_of(source_name: &str, title: &str, published_at: &DateTime<Utc>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(source_name.trim().as_bytes());
    hasher.update([0x1f]);
    hasher.update(title.trim().as_bytes());
    hasher.update([0x1f]);
    hasher.update(published_at.to_rfc3339().as_bytes());
    format!("{:x}", hasher.finalize())
}

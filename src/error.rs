use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Storage unavailable: {0}")]
    StorageUnavailable(#[from] tokio_rusqlite::Error),

    #[error("Fingerprint already recorded: {0}")]
    DuplicateFingerprint(String),

    #[error("Scoring unavailable: {0}")]
    ScoringUnavailable(String),

    #[error("Cycle deadline passed before any item was claimed")]
    CycleTimeout,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Feed parse error: {0}")]
    FeedParse(#[from] feed_rs::parser::ParseFeedError),

    #[error("Config parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl From<rusqlite::Error> for AppError {
    fn from(err: rusqlite::Error) -> Self {
        AppError::StorageUnavailable(err.into())
    }
}

impl AppError {
    /// Whether this error means the database could not be reached or written.
    pub fn is_storage(&self) -> bool {
        matches!(self, AppError::StorageUnavailable(_))
    }
}

pub type Result<T> = std::result::Result<T, AppError>;

/// Outcome of a single failed send to one chat.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SendError {
    /// The user blocked the bot or the chat no longer exists. Not retried.
    #[error("chat is blocked or unreachable")]
    BlockedByUser,

    #[error("transient send failure: {reason}")]
    Transient {
        reason: String,
        retry_after: Option<Duration>,
    },
}

impl SendError {
    pub fn transient(reason: impl Into<String>) -> Self {
        SendError::Transient {
            reason: reason.into(),
            retry_after: None,
        }
    }
}

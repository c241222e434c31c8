#[cfg(test)]
pub mod flaky;
mod records;
mod schema;
mod subscribers;

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio_rusqlite::Connection;

use crate::error::Result;
use crate::models::{DeliveryLogEntry, RecordStats, SentRecord, Subscriber};

use records::SqliteRecordStore;
use schema::SCHEMA;
use subscribers::SqliteSubscriberStore;

/// Dedupe index and audit trail for every fingerprint the bot has decided on.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// True iff the fingerprint carries neither a sent nor a rejected marker.
    async fn is_new(&self, fingerprint: &str) -> Result<bool>;

    /// Atomically claims the fingerprint for delivery.
    ///
    /// Fails with `AppError::DuplicateFingerprint` when any marker already
    /// exists. The uniqueness check is done by the database, so two callers
    /// racing on the same fingerprint (in one process or several) see exactly
    /// one success.
    async fn mark_sent(&self, fingerprint: &str, subscriber_count: u32) -> Result<SentRecord>;

    /// Remembers a fingerprint that scored below threshold. Returns false if
    /// the fingerprint was already recorded.
    async fn mark_rejected(&self, fingerprint: &str, relevance: u8, credibility: u8) -> Result<bool>;

    #[allow(dead_code)]
    async fn sent_record(&self, fingerprint: &str) -> Result<Option<SentRecord>>;

    async fn log_delivery(&self, entry: DeliveryLogEntry) -> Result<()>;

    async fn stats(&self) -> Result<RecordStats>;
}

#[async_trait]
pub trait SubscriberStore: Send + Sync {
    /// Active subscribers at call time, oldest first.
    async fn list(&self) -> Result<Vec<Subscriber>>;

    /// Inserts the chat if unknown. Existing rows are left untouched.
    #[allow(dead_code)]
    async fn add(&self, chat_id: i64) -> Result<bool> {
        self.add_with_profile(chat_id, None, None).await
    }

    async fn add_with_profile(
        &self,
        chat_id: i64,
        username: Option<String>,
        first_name: Option<String>,
    ) -> Result<bool>;

    /// Returns true only if an active row was switched off.
    async fn deactivate(&self, chat_id: i64) -> Result<bool>;

    /// Returns true only if an inactive row was switched back on.
    async fn reactivate(&self, chat_id: i64) -> Result<bool>;

    async fn get(&self, chat_id: i64) -> Result<Option<Subscriber>>;

    async fn count_active(&self) -> Result<u32>;
}

/// Shared handle to the bot's SQLite database.
#[derive(Clone)]
pub struct Database {
    conn: Connection,
}

impl Database {
    pub async fn open(db_path: &str) -> Result<Self> {
        let conn = Connection::open(db_path).await?;
        Self::init(conn).await
    }

    #[cfg(test)]
    pub async fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().await?;
        Self::init(conn).await
    }

    async fn init(conn: Connection) -> Result<Self> {
        conn.call(|conn| {
            // Several processes may share one file; let writers wait for each other
            conn.busy_timeout(Duration::from_secs(5))?;
            let _mode: String =
                conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;
            conn.execute_batch(SCHEMA)?;
            Ok(())
        })
        .await?;

        Ok(Self { conn })
    }

    pub fn records(&self) -> SqliteRecordStore {
        SqliteRecordStore::new(self.conn.clone())
    }

    pub fn subscribers(&self) -> SqliteSubscriberStore {
        SqliteSubscriberStore::new(self.conn.clone())
    }
}

fn parse_datetime(s: &str) -> Option<DateTime<Utc>> {
    // Try RFC3339 first (e.g., "2026-01-11T12:34:56+00:00")
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    // Try SQLite datetime format (e.g., "2026-01-11 12:34:56")
    if let Ok(naive) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return Some(naive.and_utc());
    }
    None
}

use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{params, OptionalExtension, Row};
use tokio_rusqlite::Connection;

use crate::error::{AppError, Result};
use crate::models::{DeliveryLogEntry, RecordStats, SentRecord};

use super::{parse_datetime, RecordStore};

pub struct SqliteRecordStore {
    conn: Connection,
}

impl SqliteRecordStore {
    pub(super) fn new(conn: Connection) -> Self {
        Self { conn }
    }
}

#[async_trait]
impl RecordStore for SqliteRecordStore {
    async fn is_new(&self, fingerprint: &str) -> Result<bool> {
        let fingerprint = fingerprint.to_string();
        let exists = self
            .conn
            .call(move |conn| {
                let found = conn
                    .query_row(
                        "SELECT 1 FROM seen_items WHERE fingerprint = ?1",
                        params![fingerprint],
                        |_| Ok(()),
                    )
                    .optional()?;
                Ok(found.is_some())
            })
            .await?;
        Ok(!exists)
    }

    async fn mark_sent(&self, fingerprint: &str, subscriber_count: u32) -> Result<SentRecord> {
        let sent_at = Utc::now();
        let fp = fingerprint.to_string();
        let stamp = sent_at.to_rfc3339();
        let inserted = self
            .conn
            .call(move |conn| {
                let changed = conn.execute(
                    r#"INSERT INTO seen_items (fingerprint, status, subscriber_count, recorded_at)
                       VALUES (?1, 'sent', ?2, ?3)
                       ON CONFLICT(fingerprint) DO NOTHING"#,
                    params![fp, subscriber_count, stamp],
                )?;
                Ok(changed == 1)
            })
            .await?;

        if !inserted {
            return Err(AppError::DuplicateFingerprint(fingerprint.to_string()));
        }

        Ok(SentRecord {
            fingerprint: fingerprint.to_string(),
            sent_at,
            subscriber_count,
        })
    }

    async fn mark_rejected(&self, fingerprint: &str, relevance: u8, credibility: u8) -> Result<bool> {
        let fp = fingerprint.to_string();
        let stamp = Utc::now().to_rfc3339();
        let inserted = self
            .conn
            .call(move |conn| {
                let changed = conn.execute(
                    r#"INSERT INTO seen_items (fingerprint, status, relevance_score, credibility_score, recorded_at)
                       VALUES (?1, 'rejected', ?2, ?3, ?4)
                       ON CONFLICT(fingerprint) DO NOTHING"#,
                    params![fp, relevance, credibility, stamp],
                )?;
                Ok(changed == 1)
            })
            .await?;
        Ok(inserted)
    }

    async fn sent_record(&self, fingerprint: &str) -> Result<Option<SentRecord>> {
        let fingerprint = fingerprint.to_string();
        let record = self
            .conn
            .call(move |conn| {
                let record = conn
                    .query_row(
                        r#"SELECT fingerprint, recorded_at, subscriber_count
                           FROM seen_items
                           WHERE fingerprint = ?1 AND status = 'sent'"#,
                        params![fingerprint],
                        sent_record_from_row,
                    )
                    .optional()?;
                Ok(record)
            })
            .await?;
        Ok(record)
    }

    async fn log_delivery(&self, entry: DeliveryLogEntry) -> Result<()> {
        self.conn
            .call(move |conn| {
                conn.execute(
                    r#"INSERT INTO delivery_log (fingerprint, chat_id, status, attempts, error)
                       VALUES (?1, ?2, ?3, ?4, ?5)"#,
                    params![
                        entry.fingerprint,
                        entry.chat_id,
                        entry.status.as_str(),
                        entry.attempts,
                        entry.error,
                    ],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    async fn stats(&self) -> Result<RecordStats> {
        let stats = self
            .conn
            .call(|conn| {
                let (sent, rejected): (i64, i64) = conn.query_row(
                    r#"SELECT
                           COALESCE(SUM(CASE WHEN status = 'sent' THEN 1 ELSE 0 END), 0),
                           COALESCE(SUM(CASE WHEN status = 'rejected' THEN 1 ELSE 0 END), 0)
                       FROM seen_items"#,
                    [],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )?;
                let (deliveries, failed): (i64, i64) = conn.query_row(
                    r#"SELECT
                           COUNT(*),
                           COALESCE(SUM(CASE WHEN status = 'delivered' THEN 0 ELSE 1 END), 0)
                       FROM delivery_log"#,
                    [],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )?;
                Ok(RecordStats {
                    sent: sent as u64,
                    rejected: rejected as u64,
                    deliveries: deliveries as u64,
                    failed_deliveries: failed as u64,
                })
            })
            .await?;
        Ok(stats)
    }
}

#[allow(dead_code)]
fn sent_record_from_row(row: &Row) -> rusqlite::Result<SentRecord> {
    Ok(SentRecord {
        fingerprint: row.get(0)?,
        sent_at: row
            .get::<_, String>(1)
            .ok()
            .and_then(|s| parse_datetime(&s))
            .unwrap_or_else(Utc::now),
        subscriber_count: row.get(2)?,
    })
}

use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{params, OptionalExtension, Row};
use tokio_rusqlite::Connection;

use crate::error::Result;
use crate::models::Subscriber;

use super::{parse_datetime, SubscriberStore};

pub struct SqliteSubscriberStore {
    conn: Connection,
}

impl SqliteSubscriberStore {
    pub(super) fn new(conn: Connection) -> Self {
        Self { conn }
    }
}

#[async_trait]
impl SubscriberStore for SqliteSubscriberStore {
    async fn list(&self) -> Result<Vec<Subscriber>> {
        let subscribers = self
            .conn
            .call(|conn| {
                let mut stmt = conn.prepare(
                    r#"SELECT chat_id, username, first_name, joined_at, is_active, unsubscribed_at
                       FROM subscribers
                       WHERE is_active = 1
                       ORDER BY joined_at, chat_id"#,
                )?;
                let subscribers = stmt
                    .query_map([], subscriber_from_row)?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(subscribers)
            })
            .await?;
        Ok(subscribers)
    }

    async fn add_with_profile(
        &self,
        chat_id: i64,
        username: Option<String>,
        first_name: Option<String>,
    ) -> Result<bool> {
        let joined_at = Utc::now().to_rfc3339();
        let inserted = self
            .conn
            .call(move |conn| {
                let changed = conn.execute(
                    r#"INSERT INTO subscribers (chat_id, username, first_name, joined_at)
                       VALUES (?1, ?2, ?3, ?4)
                       ON CONFLICT(chat_id) DO NOTHING"#,
                    params![chat_id, username, first_name, joined_at],
                )?;
                Ok(changed == 1)
            })
            .await?;
        Ok(inserted)
    }

    async fn deactivate(&self, chat_id: i64) -> Result<bool> {
        let now = Utc::now().to_rfc3339();
        let changed = self
            .conn
            .call(move |conn| {
                let changed = conn.execute(
                    "UPDATE subscribers SET is_active = 0, unsubscribed_at = ?1 WHERE chat_id = ?2 AND is_active = 1",
                    params![now, chat_id],
                )?;
                Ok(changed == 1)
            })
            .await?;
        Ok(changed)
    }

    async fn reactivate(&self, chat_id: i64) -> Result<bool> {
        let now = Utc::now().to_rfc3339();
        let changed = self
            .conn
            .call(move |conn| {
                let changed = conn.execute(
                    "UPDATE subscribers SET is_active = 1, joined_at = ?1, unsubscribed_at = NULL WHERE chat_id = ?2 AND is_active = 0",
                    params![now, chat_id],
                )?;
                Ok(changed == 1)
            })
            .await?;
        Ok(changed)
    }

    async fn get(&self, chat_id: i64) -> Result<Option<Subscriber>> {
        let subscriber = self
            .conn
            .call(move |conn| {
                let subscriber = conn
                    .query_row(
                        r#"SELECT chat_id, username, first_name, joined_at, is_active, unsubscribed_at
                           FROM subscribers WHERE chat_id = ?1"#,
                        params![chat_id],
                        subscriber_from_row,
                    )
                    .optional()?;
                Ok(subscriber)
            })
            .await?;
        Ok(subscriber)
    }

    async fn count_active(&self) -> Result<u32> {
        let count = self
            .conn
            .call(|conn| {
                let count: u32 = conn.query_row(
                    "SELECT COUNT(*) FROM subscribers WHERE is_active = 1",
                    [],
                    |row| row.get(0),
                )?;
                Ok(count)
            })
            .await?;
        Ok(count)
    }
}

fn subscriber_from_row(row: &Row) -> rusqlite::Result<Subscriber> {
    Ok(Subscriber {
        chat_id: row.get(0)?,
        username: row.get(1)?,
        first_name: row.get(2)?,
        joined_at: row
            .get::<_, String>(3)
            .ok()
            .and_then(|s| parse_datetime(&s))
            .unwrap_or_else(Utc::now),
        active: row.get::<_, i64>(4)? != 0,
        unsubscribed_at: row
            .get::<_, Option<String>>(5)?
            .and_then(|s| parse_datetime(&s)),
    })
}

//! Store wrappers that fail on demand.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::error::{AppError, Result};
use crate::models::{DeliveryLogEntry, RecordStats, SentRecord, Subscriber};

use super::{RecordStore, SubscriberStore};

pub fn unavailable() -> AppError {
    AppError::StorageUnavailable(tokio_rusqlite::Error::ConnectionClosed)
}

/// Lets `skip` calls through, then fails the next `fail` calls.
#[derive(Default)]
pub struct Faults(Mutex<(usize, usize)>);

impl Faults {
    pub fn arm(&self, skip: usize, fail: usize) {
        *self.0.lock().unwrap() = (skip, fail);
    }

    fn check(&self) -> Result<()> {
        let mut state = self.0.lock().unwrap();
        if state.1 == 0 {
            return Ok(());
        }
        if state.0 > 0 {
            state.0 -= 1;
            return Ok(());
        }
        state.1 -= 1;
        Err(unavailable())
    }
}

pub struct FlakyRecords {
    inner: Arc<dyn RecordStore>,
    pub is_new: Faults,
    pub mark_sent: Faults,
}

impl FlakyRecords {
    pub fn new(inner: Arc<dyn RecordStore>) -> Self {
        Self {
            inner,
            is_new: Faults::default(),
            mark_sent: Faults::default(),
        }
    }
}

#[async_trait]
impl RecordStore for FlakyRecords {
    async fn is_new(&self, fingerprint: &str) -> Result<bool> {
        self.is_new.check()?;
        self.inner.is_new(fingerprint).await
    }

    async fn mark_sent(&self, fingerprint: &str, subscriber_count: u32) -> Result<SentRecord> {
        self.mark_sent.check()?;
        self.inner.mark_sent(fingerprint, subscriber_count).await
    }

    async fn mark_rejected(&self, fingerprint: &str, relevance: u8, credibility: u8) -> Result<bool> {
        self.inner.mark_rejected(fingerprint, relevance, credibility).await
    }

    async fn sent_record(&self, fingerprint: &str) -> Result<Option<SentRecord>> {
        self.inner.sent_record(fingerprint).await
    }

    async fn log_delivery(&self, entry: DeliveryLogEntry) -> Result<()> {
        self.inner.log_delivery(entry).await
    }

    async fn stats(&self) -> Result<RecordStats> {
        self.inner.stats().await
    }
}

pub struct FlakySubscribers {
    inner: Arc<dyn SubscriberStore>,
    pub list: Faults,
}

impl FlakySubscribers {
    pub fn new(inner: Arc<dyn SubscriberStore>) -> Self {
        Self {
            inner,
            list: Faults::default(),
        }
    }
}

#[async_trait]
impl SubscriberStore for FlakySubscribers {
    async fn list(&self) -> Result<Vec<Subscriber>> {
        self.list.check()?;
        self.inner.list().await
    }

    async fn add_with_profile(
        &self,
        chat_id: i64,
        username: Option<String>,
        first_name: Option<String>,
    ) -> Result<bool> {
        self.inner.add_with_profile(chat_id, username, first_name).await
    }

    async fn deactivate(&self, chat_id: i64) -> Result<bool> {
        self.inner.deactivate(chat_id).await
    }

    async fn reactivate(&self, chat_id: i64) -> Result<bool> {
        self.inner.reactivate(chat_id).await
    }

    async fn get(&self, chat_id: i64) -> Result<Option<Subscriber>> {
        self.inner.get(chat_id).await
    }

    async fn count_active(&self) -> Result<u32> {
        self.inner.count_active().await
    }
}

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, StreamExt};
use tracing::{debug, info, warn};

use crate::config::DeliveryConfig;
use crate::db::{RecordStore, SubscriberStore};
use crate::error::{Result, SendError};
use crate::models::{DeliveryLogEntry, DeliveryStatus, ScoredItem};
use crate::telegram::{format_alert, Sender};

/// How one subscriber fared in a broadcast.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Delivered { attempts: u32 },
    /// The chat blocked the bot; the subscriber has been deactivated.
    Blocked,
    /// Gave up after the retry budget ran out.
    Failed { attempts: u32, reason: String },
}

impl DeliveryOutcome {
    pub fn is_failure(&self) -> bool {
        !matches!(self, DeliveryOutcome::Delivered { .. })
    }

    fn status(&self) -> DeliveryStatus {
        match self {
            DeliveryOutcome::Delivered { .. } => DeliveryStatus::Delivered,
            DeliveryOutcome::Blocked => DeliveryStatus::Blocked,
            DeliveryOutcome::Failed { .. } => DeliveryStatus::Failed,
        }
    }

    fn attempts(&self) -> u32 {
        match self {
            DeliveryOutcome::Delivered { attempts } | DeliveryOutcome::Failed { attempts, .. } => {
                *attempts
            }
            DeliveryOutcome::Blocked => 1,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    pub fingerprint: String,
    pub outcomes: BTreeMap<i64, DeliveryOutcome>,
}

impl BroadcastReport {
    pub fn delivered(&self) -> usize {
        self.outcomes.values().filter(|o| !o.is_failure()).count()
    }

    pub fn failures(&self) -> usize {
        self.outcomes.values().filter(|o| o.is_failure()).count()
    }
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_backoff: Duration,
}

impl RetryPolicy {
    /// Exponential backoff, stretched to any server-requested wait.
    fn delay(&self, attempt: u32, retry_after: Option<Duration>) -> Duration {
        let exponential = self.base_backoff.saturating_mul(1 << (attempt - 1).min(16));
        retry_after.map_or(exponential, |wait| wait.max(exponential))
    }
}

impl From<&DeliveryConfig> for RetryPolicy {
    fn from(config: &DeliveryConfig) -> Self {
        Self {
            max_attempts: config.max_send_attempts.max(1),
            base_backoff: Duration::from_millis(config.retry_backoff_ms),
        }
    }
}

/// Fans an accepted item out to every active subscriber.
pub struct DeliveryDispatcher {
    subscribers: Arc<dyn SubscriberStore>,
    records: Arc<dyn RecordStore>,
    sender: Arc<dyn Sender>,
    retry: RetryPolicy,
    concurrency: usize,
}

impl DeliveryDispatcher {
    pub fn new(
        subscribers: Arc<dyn SubscriberStore>,
        records: Arc<dyn RecordStore>,
        sender: Arc<dyn Sender>,
        config: &DeliveryConfig,
    ) -> Self {
        Self {
            subscribers,
            records,
            sender,
            retry: RetryPolicy::from(config),
            concurrency: config.send_concurrency.max(1),
        }
    }

    /// Sends `item` to the subscriber snapshot taken at call time.
    ///
    /// Individual subscriber failures are reported, never returned as errors;
    /// the call only fails if the snapshot itself cannot be read.
    pub async fn broadcast(&self, item: &ScoredItem) -> Result<BroadcastReport> {
        let subscribers = self.subscribers.list().await?;
        let text = format_alert(item);
        let fingerprint = item.fingerprint().to_string();

        info!(
            fingerprint = %fingerprint,
            title = %item.item.title,
            subscribers = subscribers.len(),
            "broadcasting item"
        );

        let outcomes: BTreeMap<i64, DeliveryOutcome> = stream::iter(subscribers)
            .map(|subscriber| {
                let text = &text;
                let fingerprint = &fingerprint;
                async move {
                    let outcome = self.deliver(subscriber.chat_id, text).await;
                    self.settle(fingerprint, subscriber.chat_id, &outcome).await;
                    (subscriber.chat_id, outcome)
                }
            })
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        let report = BroadcastReport {
            fingerprint,
            outcomes,
        };
        info!(
            fingerprint = %report.fingerprint,
            delivered = report.delivered(),
            failed = report.failures(),
            "broadcast finished"
        );
        Ok(report)
    }

    async fn deliver(&self, chat_id: i64, text: &str) -> DeliveryOutcome {
        let mut attempt = 1;
        loop {
            match self.sender.send(chat_id, text).await {
                Ok(()) => return DeliveryOutcome::Delivered { attempts: attempt },
                Err(SendError::BlockedByUser) => return DeliveryOutcome::Blocked,
                Err(SendError::Transient {
                    reason,
                    retry_after,
                }) => {
                    if attempt >= self.retry.max_attempts {
                        return DeliveryOutcome::Failed {
                            attempts: attempt,
                            reason,
                        };
                    }
                    let delay = self.retry.delay(attempt, retry_after);
                    debug!(chat_id, attempt, ?delay, %reason, "send failed, retrying");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }

    /// Deactivates blocked chats and appends the audit row. Storage hiccups
    /// here are logged and swallowed.
    async fn settle(&self, fingerprint: &str, chat_id: i64, outcome: &DeliveryOutcome) {
        match outcome {
            DeliveryOutcome::Blocked => {
                info!(chat_id, "chat blocked the bot, deactivating subscriber");
                if let Err(e) = self.subscribers.deactivate(chat_id).await {
                    warn!(chat_id, error = %e, "failed to deactivate subscriber");
                }
            }
            DeliveryOutcome::Failed { attempts, reason } => {
                warn!(chat_id, attempts, %reason, "giving up on subscriber for this item");
            }
            DeliveryOutcome::Delivered { .. } => {}
        }

        let entry = DeliveryLogEntry {
            fingerprint: fingerprint.to_string(),
            chat_id,
            status: outcome.status(),
            attempts: outcome.attempts(),
            error: match outcome {
                DeliveryOutcome::Failed { reason, .. } => Some(reason.clone()),
                DeliveryOutcome::Blocked => Some(SendError::BlockedByUser.to_string()),
                DeliveryOutcome::Delivered { .. } => None,
            },
        };
        if let Err(e) = self.records.log_delivery(entry).await {
            warn!(chat_id, error = %e, "failed to write delivery log");
        }
    }
}

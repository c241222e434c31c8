use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SentRecord {
    pub fingerprint: String,
    pub sent_at: DateTime<Utc>,
    pub subscriber_count: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeliveryStatus {
    Delivered,
    Blocked,
    Failed,
}

impl DeliveryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryStatus::Delivered => "delivered",
            DeliveryStatus::Blocked => "blocked",
            DeliveryStatus::Failed => "failed",
        }
    }
}

/// One row of the per-subscriber delivery audit log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryLogEntry {
    pub fingerprint: String,
    pub chat_id: i64,
    pub status: DeliveryStatus,
    pub attempts: u32,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecordStats {
    pub sent: u64,
    pub rejected: u64,
    pub deliveries: u64,
    pub failed_deliveries: u64,
}

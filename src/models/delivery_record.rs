use chrono::{DateTime, Utc};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryStatus {
    Pending,
    Sent,
    FailedRetryable,
    FailedPermanent,
}

impl DeliveryStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, DeliveryStatus::Sent | DeliveryStatus::FailedPermanent)
    }
}

/// The dedup and retry ledger: one record per (entry, destination) pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryRecord {
    pub feed_id: i64,
    pub fingerprint: String,
    pub chat_id: i64,
    pub status: DeliveryStatus,
    pub attempts: u32,
    pub last_attempt_at: Option<DateTime<Utc>>,
}

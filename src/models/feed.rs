use chrono::{DateTime, Utc};

/// Conditional-request validators returned by the last successful fetch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheValidators {
    pub etag: Option<String>,
    pub last_modified: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Feed {
    pub id: i64,
    pub link: String,
    pub title: Option<String>,
    pub poll_interval_seconds: u64,
    pub synced_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
    pub sync_retries: u32,
    /// Set on the first permanently-classified fetch failure, cleared by the
    /// next successful sync. Gates the one-time owner notification.
    pub permanent_error: bool,
    pub validators: CacheValidators,
    /// Sticky flag: set once a document yields duplicate or empty entry ids,
    /// after which fingerprints fall back to content hashes.
    pub guid_unstable: bool,
    pub created_at: DateTime<Utc>,
}

use chrono::{DateTime, Utc};

/// A single feed entry normalized out of an RSS/Atom/JSON document.
/// Identity is the fingerprint, never object identity, because feeds resend
/// unchanged entries verbatim on every poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub feed_id: i64,
    pub fingerprint: String,
    pub title: String,
    pub link: String,
    pub author: Option<String>,
    pub content: Option<String>,
    pub media: Vec<String>,
    pub publication_date: DateTime<Utc>,
}

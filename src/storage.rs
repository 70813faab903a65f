use crate::models::{
    CacheValidators, DeliveryRecord, DeliveryStatus, Destination, Entry, Feed,
};
use chrono::prelude::*;
use chrono::{DateTime, Duration, Utc};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;

pub fn current_time() -> DateTime<Utc> {
    Utc::now().round_subsecs(0)
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum StorageError {
    #[error("feed {0} not found")]
    FeedNotFound(i64),
    #[error("destination {0} not found")]
    DestinationNotFound(i64),
    #[error("delivery record not found")]
    RecordNotFound,
}

/// Bounded dedup horizon: fingerprints past either limit may be pruned.
#[derive(Debug, Clone)]
pub struct RetentionPolicy {
    pub max_entries: usize,
    pub max_age: Duration,
}

#[derive(Default)]
struct SeenSet {
    order: VecDeque<(String, DateTime<Utc>)>,
    fingerprints: HashSet<String>,
}

#[derive(Default)]
struct Inner {
    next_feed_id: i64,
    feeds: HashMap<i64, Feed>,
    destinations: HashMap<i64, Destination>,
    subscriptions: HashSet<(i64, i64)>,
    seen: HashMap<i64, SeenSet>,
    ledger: HashMap<(i64, String, i64), DeliveryRecord>,
}

/// In-memory repository backing the pipeline. All mutations are scoped to a
/// single feed or (entry, destination) key and happen under one lock, so
/// check-then-mark is atomic per fingerprint.
#[derive(Clone, Default)]
pub struct Storage {
    inner: Arc<Mutex<Inner>>,
}

impl Storage {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().expect("storage lock poisoned")
    }

    pub fn create_feed(&self, link: &str, poll_interval_seconds: u64) -> Feed {
        let mut inner = self.lock();

        if let Some(feed) = inner.feeds.values().find(|feed| feed.link == link) {
            return feed.clone();
        }

        inner.next_feed_id += 1;
        let feed = Feed {
            id: inner.next_feed_id,
            link: link.trim().to_string(),
            title: None,
            poll_interval_seconds,
            synced_at: None,
            error: None,
            sync_retries: 0,
            permanent_error: false,
            validators: CacheValidators::default(),
            guid_unstable: false,
            created_at: current_time(),
        };

        inner.feeds.insert(feed.id, feed.clone());
        feed
    }

    pub fn find_feed(&self, feed_id: i64) -> Option<Feed> {
        self.lock().feeds.get(&feed_id).cloned()
    }

    pub fn feed_ids(&self) -> Vec<i64> {
        let mut ids: Vec<i64> = self.lock().feeds.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn remove_feed(&self, feed_id: i64) -> bool {
        let mut inner = self.lock();

        let existed = inner.feeds.remove(&feed_id).is_some();
        inner.subscriptions.retain(|(fid, _)| *fid != feed_id);
        inner.seen.remove(&feed_id);
        inner
            .ledger
            .retain(|(fid, _, _), record| *fid != feed_id || record.status.is_terminal());

        existed
    }

    pub fn set_feed_synced(
        &self,
        feed_id: i64,
        title: Option<String>,
        validators: Option<CacheValidators>,
    ) -> Result<Feed, StorageError> {
        let mut inner = self.lock();
        let feed = inner
            .feeds
            .get_mut(&feed_id)
            .ok_or(StorageError::FeedNotFound(feed_id))?;

        feed.synced_at = Some(current_time());
        feed.error = None;
        feed.sync_retries = 0;
        feed.permanent_error = false;
        if title.is_some() {
            feed.title = title;
        }
        if let Some(validators) = validators {
            feed.validators = validators;
        }

        Ok(feed.clone())
    }

    pub fn set_feed_error(
        &self,
        feed_id: i64,
        error: &str,
        permanent: bool,
    ) -> Result<Feed, StorageError> {
        let mut inner = self.lock();
        let feed = inner
            .feeds
            .get_mut(&feed_id)
            .ok_or(StorageError::FeedNotFound(feed_id))?;

        feed.error = Some(error.to_string());
        feed.sync_retries = feed.sync_retries.saturating_add(1);
        feed.permanent_error = feed.permanent_error || permanent;

        Ok(feed.clone())
    }

    pub fn flag_guid_unstable(&self, feed_id: i64) -> Result<(), StorageError> {
        let mut inner = self.lock();
        let feed = inner
            .feeds
            .get_mut(&feed_id)
            .ok_or(StorageError::FeedNotFound(feed_id))?;

        if !feed.guid_unstable {
            log::warn!("Feed {} declared unstable entry ids", feed_id);
            feed.guid_unstable = true;
        }

        Ok(())
    }

    pub fn upsert_destination(&self, destination: Destination) {
        self.lock()
            .destinations
            .insert(destination.chat_id, destination);
    }

    pub fn find_destination(&self, chat_id: i64) -> Option<Destination> {
        self.lock().destinations.get(&chat_id).cloned()
    }

    /// Removes a destination along with its subscriptions and pending
    /// delivery records. Terminal records stay for the at-most-once check.
    pub fn remove_destination(&self, chat_id: i64) -> bool {
        let mut inner = self.lock();

        let existed = inner.destinations.remove(&chat_id).is_some();
        inner.subscriptions.retain(|(_, cid)| *cid != chat_id);
        inner
            .ledger
            .retain(|(_, _, cid), record| *cid != chat_id || record.status.is_terminal());

        existed
    }

    pub fn subscribe(&self, feed_id: i64, chat_id: i64) -> Result<(), StorageError> {
        let mut inner = self.lock();

        if !inner.feeds.contains_key(&feed_id) {
            return Err(StorageError::FeedNotFound(feed_id));
        }
        if !inner.destinations.contains_key(&chat_id) {
            return Err(StorageError::DestinationNotFound(chat_id));
        }

        inner.subscriptions.insert((feed_id, chat_id));
        Ok(())
    }

    pub fn unsubscribe(&self, feed_id: i64, chat_id: i64) -> bool {
        let mut inner = self.lock();

        let existed = inner.subscriptions.remove(&(feed_id, chat_id));
        inner.ledger.retain(|(fid, _, cid), record| {
            *fid != feed_id || *cid != chat_id || record.status.is_terminal()
        });

        existed
    }

    pub fn is_subscribed(&self, feed_id: i64, chat_id: i64) -> bool {
        self.lock().subscriptions.contains(&(feed_id, chat_id))
    }

    pub fn subscribers_of(&self, feed_id: i64) -> Vec<Destination> {
        let inner = self.lock();

        let mut chat_ids: Vec<i64> = inner
            .subscriptions
            .iter()
            .filter(|(fid, _)| *fid == feed_id)
            .map(|(_, cid)| *cid)
            .collect();
        chat_ids.sort_unstable();

        chat_ids
            .into_iter()
            .filter_map(|cid| inner.destinations.get(&cid).cloned())
            .collect()
    }

    pub fn remove_feeds_without_subscribers(&self) -> Vec<i64> {
        let orphaned: Vec<i64> = {
            let inner = self.lock();
            inner
                .feeds
                .keys()
                .filter(|id| !inner.subscriptions.iter().any(|(fid, _)| fid == *id))
                .copied()
                .collect()
        };

        for feed_id in &orphaned {
            self.remove_feed(*feed_id);
        }

        orphaned
    }

    pub fn has(&self, feed_id: i64, fingerprint: &str) -> bool {
        self.lock()
            .seen
            .get(&feed_id)
            .map(|seen| seen.fingerprints.contains(fingerprint))
            .unwrap_or(false)
    }

    /// Returns the subsequence of entries not previously seen for this feed,
    /// preserving the input order.
    pub fn filter_new(&self, feed_id: i64, entries: &[Entry]) -> Vec<Entry> {
        let inner = self.lock();
        let seen = inner.seen.get(&feed_id);

        entries
            .iter()
            .filter(|entry| {
                seen.map(|s| !s.fingerprints.contains(&entry.fingerprint))
                    .unwrap_or(true)
            })
            .cloned()
            .collect()
    }

    pub fn mark_seen(&self, feed_id: i64, fingerprints: &[String]) {
        let mut inner = self.lock();
        let seen = inner.seen.entry(feed_id).or_default();
        let now = current_time();

        for fingerprint in fingerprints {
            if seen.fingerprints.insert(fingerprint.clone()) {
                seen.order.push_back((fingerprint.clone(), now));
            }
        }
    }

    /// Drops seen fingerprints past the retention horizon. Entries resent
    /// after the horizon will resurface; that is the accepted tradeoff.
    pub fn prune(&self, feed_id: i64, policy: &RetentionPolicy) -> usize {
        let mut inner = self.lock();
        let seen = match inner.seen.get_mut(&feed_id) {
            Some(seen) => seen,
            None => return 0,
        };

        let cutoff = current_time() - policy.max_age;
        let mut pruned = 0;

        while let Some((fingerprint, seen_at)) = seen.order.front() {
            if seen.order.len() > policy.max_entries || *seen_at < cutoff {
                let fingerprint = fingerprint.clone();
                seen.order.pop_front();
                seen.fingerprints.remove(&fingerprint);
                pruned += 1;
            } else {
                break;
            }
        }

        pruned
    }

    /// Creates a pending delivery record unless one already exists for the
    /// (entry, destination) pair. Returns false when the pair was already
    /// enqueued; callers must not send in that case.
    pub fn enqueue_record(&self, feed_id: i64, fingerprint: &str, chat_id: i64) -> bool {
        let mut inner = self.lock();
        let key = (feed_id, fingerprint.to_string(), chat_id);

        if inner.ledger.contains_key(&key) {
            return false;
        }

        inner.ledger.insert(
            key,
            DeliveryRecord {
                feed_id,
                fingerprint: fingerprint.to_string(),
                chat_id,
                status: DeliveryStatus::Pending,
                attempts: 0,
                last_attempt_at: None,
            },
        );

        true
    }

    pub fn find_record(
        &self,
        feed_id: i64,
        fingerprint: &str,
        chat_id: i64,
    ) -> Option<DeliveryRecord> {
        self.lock()
            .ledger
            .get(&(feed_id, fingerprint.to_string(), chat_id))
            .cloned()
    }

    pub fn transition_record(
        &self,
        feed_id: i64,
        fingerprint: &str,
        chat_id: i64,
        status: DeliveryStatus,
    ) -> Result<DeliveryRecord, StorageError> {
        let mut inner = self.lock();
        let record = inner
            .ledger
            .get_mut(&(feed_id, fingerprint.to_string(), chat_id))
            .ok_or(StorageError::RecordNotFound)?;

        if record.status.is_terminal() {
            return Ok(record.clone());
        }

        record.status = status;
        if matches!(
            status,
            DeliveryStatus::Sent | DeliveryStatus::FailedRetryable
        ) {
            record.attempts += 1;
            record.last_attempt_at = Some(current_time());
        }

        Ok(record.clone())
    }
}

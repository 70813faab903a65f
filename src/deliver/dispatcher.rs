use crate::config::Config;
use crate::models::{ChatKind, DeliveryStatus, Destination, Feed};
use crate::notify::Notifier;
use crate::storage::{Storage, StorageError};
use crate::telegram::{ChatClient, OutgoingMessage, SendOutcome};
use std::cmp;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::time::Instant;

#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("destination is permanently unreachable: {0}")]
    Permanent(String),
    #[error("retries exhausted")]
    RetriesExhausted,
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Backoff schedule for retryable send failures. `delay_for` is a pure
/// function of the attempt number.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base: Duration,
    pub multiplier: u32,
}

impl RetryPolicy {
    pub fn from_env() -> Self {
        RetryPolicy {
            max_attempts: Config::delivery_max_attempts(),
            base: Duration::from_secs(Config::delivery_backoff_base_in_seconds()),
            multiplier: Config::delivery_backoff_multiplier(),
        }
    }

    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = self.multiplier.saturating_pow(attempt.saturating_sub(1));
        self.base.saturating_mul(factor)
    }
}

/// Pacing budget for one destination. Tokens may go negative; a negative
/// balance translates into the delay the caller must sleep before sending.
struct RateBucket {
    capacity: f64,
    tokens: f64,
    refill_interval: Duration,
    last_refill: Instant,
}

impl RateBucket {
    fn for_kind(kind: ChatKind, now: Instant) -> Self {
        // Groups get a tighter budget than private chats and channels,
        // matching the platform's per-chat limits.
        let (capacity, refill_interval) = match kind {
            ChatKind::Group => (20.0, Duration::from_millis(3000)),
            ChatKind::Private | ChatKind::Channel => (5.0, Duration::from_millis(1000)),
        };

        RateBucket {
            capacity,
            tokens: capacity,
            refill_interval,
            last_refill: now,
        }
    }

    fn refill(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_refill);
        let accrued = elapsed.as_secs_f64() / self.refill_interval.as_secs_f64();

        self.tokens = (self.tokens + accrued).min(self.capacity);
        self.last_refill = now;
    }

    fn next_delay(&mut self, now: Instant) -> Duration {
        self.refill(now);
        self.tokens -= 1.0;

        if self.tokens >= 0.0 {
            Duration::ZERO
        } else {
            self.refill_interval.mul_f64(-self.tokens)
        }
    }
}

/// Drains delivery records towards destinations. Holds the per-destination
/// bucket lock across the throttle sleep and the send so updates for one
/// chat leave in the order they were enqueued.
pub struct Dispatcher {
    storage: Storage,
    client: Arc<dyn ChatClient>,
    notifier: Arc<dyn Notifier>,
    policy: RetryPolicy,
    buckets: StdMutex<HashMap<i64, Arc<Mutex<RateBucket>>>>,
}

impl Dispatcher {
    pub fn new(
        storage: Storage,
        client: Arc<dyn ChatClient>,
        notifier: Arc<dyn Notifier>,
        policy: RetryPolicy,
    ) -> Self {
        Dispatcher {
            storage,
            client,
            notifier,
            policy,
            buckets: StdMutex::new(HashMap::new()),
        }
    }

    pub async fn dispatch(
        &self,
        feed: &Feed,
        fingerprint: &str,
        destination: &Destination,
        message: OutgoingMessage,
    ) -> Result<(), DeliveryError> {
        match self
            .storage
            .find_record(feed.id, fingerprint, destination.chat_id)
        {
            Some(record) if record.status.is_terminal() => return Ok(()),
            Some(_) => (),
            None => return Err(StorageError::RecordNotFound.into()),
        }

        let bucket = self.bucket_for(destination);
        let mut attempt = 0;

        loop {
            attempt += 1;

            let outcome = {
                let mut bucket = bucket.lock().await;

                let delay = bucket.next_delay(Instant::now());
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }

                self.client.send(destination.chat_id, &message).await
            };

            match outcome {
                SendOutcome::Ok => {
                    self.storage.transition_record(
                        feed.id,
                        fingerprint,
                        destination.chat_id,
                        DeliveryStatus::Sent,
                    )?;

                    return Ok(());
                }

                SendOutcome::RetryAfter(retry_after) => {
                    self.storage.transition_record(
                        feed.id,
                        fingerprint,
                        destination.chat_id,
                        DeliveryStatus::FailedRetryable,
                    )?;

                    if attempt >= self.policy.max_attempts {
                        self.storage.transition_record(
                            feed.id,
                            fingerprint,
                            destination.chat_id,
                            DeliveryStatus::FailedPermanent,
                        )?;

                        log::error!(
                            "Giving up on {} for chat {} after {} attempts",
                            fingerprint,
                            destination.chat_id,
                            attempt
                        );
                        self.notifier
                            .delivery_exhausted(destination.chat_id, feed)
                            .await;

                        return Err(DeliveryError::RetriesExhausted);
                    }

                    let delay = cmp::max(retry_after, self.policy.delay_for(attempt));
                    log::info!(
                        "Retrying {} for chat {} in {:?}",
                        fingerprint,
                        destination.chat_id,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                }

                SendOutcome::Permanent(reason) => {
                    self.storage.transition_record(
                        feed.id,
                        fingerprint,
                        destination.chat_id,
                        DeliveryStatus::FailedPermanent,
                    )?;

                    if self.storage.remove_destination(destination.chat_id) {
                        log::error!("Removing chat {}: {}", destination.chat_id, reason);
                        self.notifier
                            .destination_removed(destination.chat_id, &reason)
                            .await;
                    }

                    return Err(DeliveryError::Permanent(reason));
                }
            }
        }
    }

    fn bucket_for(&self, destination: &Destination) -> Arc<Mutex<RateBucket>> {
        let mut buckets = self.buckets.lock().unwrap();

        buckets
            .entry(destination.chat_id)
            .or_insert_with(|| {
                Arc::new(Mutex::new(RateBucket::for_kind(
                    destination.kind,
                    Instant::now(),
                )))
            })
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::{Dispatcher, RateBucket, RetryPolicy};
    use crate::models::{ChatKind, DeliveryStatus, Destination, Feed};
    use crate::notify::Notifier;
    use crate::storage::Storage;
    use crate::telegram::{ChatClient, OutgoingMessage, SendOutcome};
    use futures::future::BoxFuture;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;
    use tokio::time::Instant;

    struct ScriptedClient {
        outcomes: Mutex<VecDeque<SendOutcome>>,
        sent: Mutex<Vec<(i64, String)>>,
    }

    impl ScriptedClient {
        fn new(outcomes: Vec<SendOutcome>) -> Self {
            ScriptedClient {
                outcomes: Mutex::new(outcomes.into()),
                sent: Mutex::new(Vec::new()),
            }
        }

        fn sent_count(&self) -> usize {
            self.sent.lock().unwrap().len()
        }
    }

    impl ChatClient for ScriptedClient {
        fn send<'a>(
            &'a self,
            chat_id: i64,
            message: &'a OutgoingMessage,
        ) -> BoxFuture<'a, SendOutcome> {
            Box::pin(async move {
                self.sent
                    .lock()
                    .unwrap()
                    .push((chat_id, message.text.clone()));

                self.outcomes
                    .lock()
                    .unwrap()
                    .pop_front()
                    .unwrap_or(SendOutcome::Ok)
            })
        }
    }

    #[derive(Default)]
    struct RecordingNotifier {
        events: Mutex<Vec<String>>,
    }

    impl RecordingNotifier {
        fn events(&self) -> Vec<String> {
            self.events.lock().unwrap().clone()
        }
    }

    impl Notifier for RecordingNotifier {
        fn feed_failed<'a>(&'a self, feed: &'a Feed, reason: &'a str) -> BoxFuture<'a, ()> {
            let event = format!("feed_failed {} {}", feed.id, reason);
            Box::pin(async move { self.events.lock().unwrap().push(event) })
        }

        fn feed_removed<'a>(
            &'a self,
            feed: &'a Feed,
            _subscriber_chat_ids: Vec<i64>,
        ) -> BoxFuture<'a, ()> {
            let event = format!("feed_removed {}", feed.id);
            Box::pin(async move { self.events.lock().unwrap().push(event) })
        }

        fn destination_removed<'a>(&'a self, chat_id: i64, _reason: &'a str) -> BoxFuture<'a, ()> {
            let event = format!("destination_removed {}", chat_id);
            Box::pin(async move { self.events.lock().unwrap().push(event) })
        }

        fn delivery_exhausted<'a>(&'a self, chat_id: i64, _feed: &'a Feed) -> BoxFuture<'a, ()> {
            let event = format!("delivery_exhausted {}", chat_id);
            Box::pin(async move { self.events.lock().unwrap().push(event) })
        }
    }

    fn policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            base: Duration::from_secs(1),
            multiplier: 2,
        }
    }

    fn setup(outcomes: Vec<SendOutcome>) -> (Dispatcher, Arc<ScriptedClient>, Arc<RecordingNotifier>, Storage, Feed, Destination) {
        let storage = Storage::new();
        let client = Arc::new(ScriptedClient::new(outcomes));
        let notifier = Arc::new(RecordingNotifier::default());

        let feed = storage.create_feed("https://example.com/feed.xml", 300);
        let destination = Destination::new(42, ChatKind::Private);
        storage.upsert_destination(destination.clone());
        storage.subscribe(feed.id, destination.chat_id).unwrap();
        storage.enqueue_record(feed.id, "fp-1", destination.chat_id);

        let dispatcher = Dispatcher::new(
            storage.clone(),
            client.clone(),
            notifier.clone(),
            policy(),
        );

        (dispatcher, client, notifier, storage, feed, destination)
    }

    fn message() -> OutgoingMessage {
        OutgoingMessage {
            text: "update".to_string(),
            preview_enabled: false,
        }
    }

    #[test]
    fn backoff_grows_with_the_attempt_number() {
        let policy = policy();

        assert_eq!(policy.delay_for(1), Duration::from_secs(1));
        assert_eq!(policy.delay_for(2), Duration::from_secs(2));
        assert_eq!(policy.delay_for(3), Duration::from_secs(4));
    }

    #[test]
    fn buckets_allow_a_burst_then_pace() {
        let now = Instant::now();
        let mut bucket = RateBucket::for_kind(ChatKind::Private, now);

        for _ in 0..5 {
            assert_eq!(bucket.next_delay(now), Duration::ZERO);
        }

        let first = bucket.next_delay(now);
        let second = bucket.next_delay(now);

        assert!(first > Duration::ZERO);
        assert!(second > first);
    }

    #[test]
    fn bucket_tokens_accrue_while_idle() {
        let now = Instant::now();
        let mut bucket = RateBucket::for_kind(ChatKind::Private, now);

        for _ in 0..6 {
            bucket.next_delay(now);
        }

        let later = now + Duration::from_secs(5);
        assert_eq!(bucket.next_delay(later), Duration::ZERO);
    }

    #[tokio::test]
    async fn a_successful_send_marks_the_record_sent() {
        let (dispatcher, client, _notifier, storage, feed, destination) =
            setup(vec![SendOutcome::Ok]);

        dispatcher
            .dispatch(&feed, "fp-1", &destination, message())
            .await
            .unwrap();

        let record = storage.find_record(feed.id, "fp-1", destination.chat_id).unwrap();
        assert_eq!(record.status, DeliveryStatus::Sent);
        assert_eq!(record.attempts, 1);
        assert_eq!(client.sent_count(), 1);
    }

    #[tokio::test]
    async fn terminal_records_are_never_sent_again() {
        let (dispatcher, client, _notifier, _storage, feed, destination) =
            setup(vec![SendOutcome::Ok]);

        dispatcher
            .dispatch(&feed, "fp-1", &destination, message())
            .await
            .unwrap();
        dispatcher
            .dispatch(&feed, "fp-1", &destination, message())
            .await
            .unwrap();

        assert_eq!(client.sent_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn retryable_failures_back_off_and_eventually_exhaust() {
        let (dispatcher, client, notifier, storage, feed, destination) = setup(vec![
            SendOutcome::RetryAfter(Duration::from_secs(30)),
            SendOutcome::RetryAfter(Duration::from_secs(30)),
            SendOutcome::RetryAfter(Duration::from_secs(30)),
        ]);

        let error = dispatcher
            .dispatch(&feed, "fp-1", &destination, message())
            .await
            .unwrap_err();

        assert!(matches!(error, super::DeliveryError::RetriesExhausted));
        assert_eq!(client.sent_count(), 3);

        let record = storage.find_record(feed.id, "fp-1", destination.chat_id).unwrap();
        assert_eq!(record.status, DeliveryStatus::FailedPermanent);
        assert_eq!(notifier.events(), vec!["delivery_exhausted 42".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn a_permanent_error_removes_the_destination() {
        let (dispatcher, client, notifier, storage, feed, destination) = setup(vec![
            SendOutcome::RetryAfter(Duration::from_secs(30)),
            SendOutcome::Permanent("Forbidden: bot was blocked by the user".to_string()),
        ]);

        let error = dispatcher
            .dispatch(&feed, "fp-1", &destination, message())
            .await
            .unwrap_err();

        assert!(matches!(error, super::DeliveryError::Permanent(_)));
        assert_eq!(client.sent_count(), 2);
        assert!(storage.find_destination(destination.chat_id).is_none());
        assert!(!storage.is_subscribed(feed.id, destination.chat_id));

        let record = storage.find_record(feed.id, "fp-1", destination.chat_id).unwrap();
        assert_eq!(record.status, DeliveryStatus::FailedPermanent);
        assert_eq!(notifier.events(), vec!["destination_removed 42".to_string()]);
    }
}

use crate::config::Config;
use crate::deliver::{Dispatcher, RetryPolicy};
use crate::notify::Notifier;
use crate::storage::{RetentionPolicy, Storage};
use crate::telegram::ChatClient;
use crate::telegraph::LongformPublisher;
use crate::urls::UrlTransforms;
use chrono::Duration as ChronoDuration;
use std::sync::Arc;
use std::time::Duration;

/// Tunables read once at startup.
#[derive(Debug, Clone)]
pub struct Settings {
    pub default_poll_interval: Duration,
    pub backoff_max_multiplier: u32,
    pub concurrent_poll_limit: usize,
    /// Transient fetch failures repeated this many times in a row are
    /// treated as a permanent feed failure.
    pub sync_retry_limit: u32,
    pub max_message_chars: usize,
    pub retention: RetentionPolicy,
    pub stale_feed_limit: ChronoDuration,
}

impl Settings {
    pub fn from_env() -> Self {
        Settings {
            default_poll_interval: Duration::from_secs(Config::poll_interval_in_seconds()),
            backoff_max_multiplier: Config::schedule_backoff_max_multiplier(),
            concurrent_poll_limit: Config::concurrent_poll_limit(),
            sync_retry_limit: Config::sync_retry_limit(),
            max_message_chars: Config::max_message_chars(),
            retention: RetentionPolicy {
                max_entries: Config::dedup_max_entries_per_feed(),
                max_age: ChronoDuration::days(Config::dedup_max_age_in_days()),
            },
            stale_feed_limit: ChronoDuration::hours(Config::stale_feed_limit_in_hours()),
        }
    }
}

/// Wires the pipeline together. One instance per process, shared behind an
/// `Arc` between the scheduler tasks.
pub struct App {
    storage: Storage,
    dispatcher: Dispatcher,
    publisher: Arc<dyn LongformPublisher>,
    notifier: Arc<dyn Notifier>,
    transforms: UrlTransforms,
    settings: Settings,
}

impl App {
    pub fn new(
        storage: Storage,
        client: Arc<dyn ChatClient>,
        publisher: Arc<dyn LongformPublisher>,
        notifier: Arc<dyn Notifier>,
        transforms: UrlTransforms,
        policy: RetryPolicy,
        settings: Settings,
    ) -> Self {
        let dispatcher = Dispatcher::new(storage.clone(), client, notifier.clone(), policy);

        App {
            storage,
            dispatcher,
            publisher,
            notifier,
            transforms,
            settings,
        }
    }

    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn publisher(&self) -> &dyn LongformPublisher {
        self.publisher.as_ref()
    }

    pub fn notifier(&self) -> &dyn Notifier {
        self.notifier.as_ref()
    }

    pub fn transforms(&self) -> &UrlTransforms {
        &self.transforms
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }
}

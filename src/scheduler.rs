use crate::app::App;
use crate::sync::PollFeedJob;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{Notify, Semaphore};
use tokio::task::JoinHandle;

/// Grows the poll interval while a feed keeps failing, capped at
/// `max_multiplier` times the base interval.
pub fn effective_interval(base: Duration, sync_retries: u32, max_multiplier: u32) -> Duration {
    let factor = 2u32
        .saturating_pow(sync_retries)
        .min(max_multiplier.max(1));

    base.saturating_mul(factor)
}

struct FeedSchedule {
    cancel: Arc<Notify>,
    interval: Duration,
    task: JoinHandle<()>,
}

/// Runs one polling task per registered feed. A global semaphore caps how
/// many polls run at once; cancellation lets an in-flight poll finish.
pub struct Scheduler {
    app: Arc<App>,
    semaphore: Arc<Semaphore>,
    registry: Mutex<HashMap<i64, FeedSchedule>>,
}

impl Scheduler {
    pub fn new(app: Arc<App>) -> Arc<Self> {
        let limit = app.settings().concurrent_poll_limit.max(1);

        Arc::new(Scheduler {
            app,
            semaphore: Arc::new(Semaphore::new(limit)),
            registry: Mutex::new(HashMap::new()),
        })
    }

    /// Registers every feed already in storage.
    pub fn start(self: &Arc<Self>) {
        for feed_id in self.app.storage().feed_ids() {
            self.add_feed(feed_id, None);
        }
    }

    pub fn add_feed(self: &Arc<Self>, feed_id: i64, interval: Option<Duration>) {
        let interval = interval.unwrap_or_else(|| self.base_interval(feed_id));

        self.spawn_schedule(feed_id, interval, None);
    }

    pub fn remove_feed(&self, feed_id: i64) {
        self.detach(feed_id);
    }

    pub fn reschedule_feed(self: &Arc<Self>, feed_id: i64, interval: Duration) {
        // the new loop waits for the cancelled task, so an in-flight poll
        // never overlaps the rescheduled one
        let predecessor = self.detach(feed_id).map(|schedule| schedule.task);

        self.spawn_schedule(feed_id, interval, predecessor);
    }

    pub fn scheduled_feed_ids(&self) -> Vec<i64> {
        let mut ids: Vec<i64> = self.registry.lock().unwrap().keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    fn spawn_schedule(
        self: &Arc<Self>,
        feed_id: i64,
        interval: Duration,
        predecessor: Option<JoinHandle<()>>,
    ) {
        let mut registry = self.registry.lock().unwrap();
        if registry.contains_key(&feed_id) {
            return;
        }

        let cancel = Arc::new(Notify::new());
        let loop_cancel = cancel.clone();
        let scheduler = self.clone();

        let task = tokio::spawn(async move {
            if let Some(predecessor) = predecessor {
                let _ = predecessor.await;
            }

            scheduler.poll_loop(feed_id, loop_cancel).await;
        });

        registry.insert(
            feed_id,
            FeedSchedule {
                cancel,
                interval,
                task,
            },
        );
    }

    fn detach(&self, feed_id: i64) -> Option<FeedSchedule> {
        let schedule = self.registry.lock().unwrap().remove(&feed_id)?;

        // notify_one stores a permit, so a task that is mid-poll still
        // observes the cancellation on its next wait
        schedule.cancel.notify_one();

        Some(schedule)
    }

    async fn poll_loop(self: Arc<Self>, feed_id: i64, cancel: Arc<Notify>) {
        loop {
            {
                let _permit = match self.semaphore.acquire().await {
                    Ok(permit) => permit,
                    Err(_) => break,
                };

                let job = PollFeedJob::new(feed_id);
                if let Err(error) = job.run(&self.app).await {
                    log::error!("Polling feed {} failed: {}", feed_id, error);
                }
            }

            let feed = match self.app.storage().find_feed(feed_id) {
                Some(feed) => feed,
                None => {
                    self.registry.lock().unwrap().remove(&feed_id);
                    break;
                }
            };

            let interval = {
                let registry = self.registry.lock().unwrap();
                match registry.get(&feed_id) {
                    Some(schedule) => schedule.interval,
                    None => break,
                }
            };

            let delay = effective_interval(
                interval,
                feed.sync_retries,
                self.app.settings().backoff_max_multiplier,
            );

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = cancel.notified() => break,
            }
        }
    }

    fn base_interval(&self, feed_id: i64) -> Duration {
        self.app
            .storage()
            .find_feed(feed_id)
            .map(|feed| Duration::from_secs(feed.poll_interval_seconds))
            .filter(|interval| !interval.is_zero())
            .unwrap_or(self.app.settings().default_poll_interval)
    }
}

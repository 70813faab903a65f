use crate::app::App;
use crate::deliver::{MessageRenderer, Rendered};
use crate::models::{CacheValidators, Destination, Entry, Feed};
use crate::storage::{self, StorageError};
use crate::sync::fetcher::{self, FetchError, FetchOutcome};
use crate::sync::parser::{self, ParsedFeed};
use crate::telegram::OutgoingMessage;
use aho_corasick::AhoCorasick;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PollError {
    #[error("feed failed: {0}")]
    Feed(String),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Polls one feed once: fetch, parse, dedup, render and hand new entries
/// to the dispatcher. The scheduler creates one of these per tick.
pub struct PollFeedJob {
    feed_id: i64,
}

impl PollFeedJob {
    pub fn new(feed_id: i64) -> Self {
        PollFeedJob { feed_id }
    }

    pub async fn run(&self, app: &App) -> Result<(), PollError> {
        let feed = match app.storage().find_feed(self.feed_id) {
            Some(feed) => feed,
            None => return Ok(()),
        };

        if app.storage().subscribers_of(feed.id).is_empty() {
            log::info!("Feed {} has no subscribers left, removing it", feed.link);
            app.storage().remove_feed(feed.id);
            return Ok(());
        }

        match fetcher::fetch_feed(&feed).await {
            Ok(FetchOutcome::NotModified) => {
                log::info!("Feed {} is unchanged", feed.link);
                app.storage().set_feed_synced(feed.id, None, None)?;
                Ok(())
            }

            Ok(FetchOutcome::Fetched { bytes, validators }) => {
                self.process_document(app, &feed, &bytes, validators).await
            }

            Err(FetchError::Transient(reason)) => {
                self.handle_failure(app, &feed, reason, false).await
            }

            Err(FetchError::Permanent(reason)) => {
                self.handle_failure(app, &feed, reason, true).await
            }
        }
    }

    async fn process_document(
        &self,
        app: &App,
        feed: &Feed,
        bytes: &[u8],
        validators: CacheValidators,
    ) -> Result<(), PollError> {
        let parsed = match parser::parse_feed(feed, bytes) {
            Ok(parsed) => parsed,
            Err(error) => {
                return self.handle_failure(app, feed, format!("{error}"), false).await;
            }
        };

        if parsed.guid_unstable && !feed.guid_unstable {
            app.storage().flag_guid_unstable(feed.id)?;
        }

        let mut new_entries = app.storage().filter_new(feed.id, &parsed.entries);
        // updates reach chats oldest first
        new_entries.sort_by_key(|entry| entry.publication_date);

        log::info!("Feed {} has {} new entries", feed.link, new_entries.len());

        let ParsedFeed { title, .. } = parsed;
        for entry in &new_entries {
            self.process_entry(app, feed, &title, entry).await;
        }

        app.storage().prune(feed.id, &app.settings().retention);
        app.storage()
            .set_feed_synced(feed.id, title, Some(validators))?;

        Ok(())
    }

    /// Enqueues deliveries for every subscriber before committing the
    /// fingerprint, so a crash in between re-polls the entry instead of
    /// silently dropping it.
    async fn process_entry(&self, app: &App, feed: &Feed, feed_title: &Option<String>, entry: &Entry) {
        let destinations = app.storage().subscribers_of(feed.id);

        let mut deliveries: Vec<(Destination, OutgoingMessage)> = Vec::new();
        let mut longform_url: Option<String> = None;
        let mut render_failures = 0;

        for destination in destinations {
            let renderer = self.renderer_for(app, feed, feed_title, entry, &destination);

            let rendered = match renderer.render() {
                Ok(rendered) => rendered,
                Err(error) => {
                    log::error!("Failed to render {} for {}: {}", entry.link, destination.chat_id, error);
                    render_failures += 1;
                    continue;
                }
            };

            let text = match rendered {
                Rendered::Message(text) => text,

                Rendered::Overflow { full_content } => {
                    let url = match &longform_url {
                        Some(url) => url.clone(),
                        None => {
                            let url = self.publish_longform(app, entry, &full_content).await;
                            longform_url = Some(url.clone());
                            url
                        }
                    };

                    renderer.render_summary(&url)
                }
            };

            if !passes_filter(&text, &destination) {
                log::info!("Filtered out {} for chat {}", entry.link, destination.chat_id);
                continue;
            }

            let message = OutgoingMessage {
                text,
                preview_enabled: destination.preview_enabled,
            };
            deliveries.push((destination, message));
        }

        // an entry nothing could be rendered for is not committed, so the
        // next poll retries it; filter-word skips do advance dedup state
        if deliveries.is_empty() && render_failures > 0 {
            log::warn!(
                "Not marking {} as seen, rendering failed for every subscriber",
                entry.link
            );
            return;
        }

        let mut queued = Vec::new();
        for (destination, message) in deliveries {
            if app
                .storage()
                .enqueue_record(feed.id, &entry.fingerprint, destination.chat_id)
            {
                queued.push((destination, message));
            }
        }

        app.storage()
            .mark_seen(feed.id, std::slice::from_ref(&entry.fingerprint));

        for (destination, message) in queued {
            if let Err(error) = app
                .dispatcher()
                .dispatch(feed, &entry.fingerprint, &destination, message)
                .await
            {
                log::error!(
                    "Failed to deliver {} to chat {}: {}",
                    entry.link,
                    destination.chat_id,
                    error
                );
            }
        }
    }

    async fn publish_longform(&self, app: &App, entry: &Entry, full_content: &str) -> String {
        match app
            .publisher()
            .publish(&entry.title, entry.author.as_deref(), full_content)
            .await
        {
            Ok(url) => url,
            Err(error) => {
                // the canonical link still points at the full article
                log::error!("Failed to publish {}: {}", entry.link, error);
                entry.link.clone()
            }
        }
    }

    async fn handle_failure(
        &self,
        app: &App,
        feed: &Feed,
        reason: String,
        permanent: bool,
    ) -> Result<(), PollError> {
        log::warn!("Failed to sync {}: {}", feed.link, reason);

        // transient failures repeated past the retry limit count as permanent
        let permanent =
            permanent || feed.sync_retries.saturating_add(1) >= app.settings().sync_retry_limit;

        app.storage().set_feed_error(feed.id, &reason, permanent)?;
        if permanent && !feed.permanent_error {
            app.notifier().feed_failed(feed, &reason).await;
        }

        let last_healthy = feed.synced_at.unwrap_or(feed.created_at);
        let stale = storage::current_time() - last_healthy > app.settings().stale_feed_limit;

        if stale {
            let subscriber_chat_ids: Vec<i64> = app
                .storage()
                .subscribers_of(feed.id)
                .iter()
                .map(|destination| destination.chat_id)
                .collect();

            app.notifier().feed_removed(feed, subscriber_chat_ids).await;
            app.storage().remove_feed(feed.id);

            return Err(PollError::Feed(format!("removed stale feed: {reason}")));
        }

        Err(PollError::Feed(reason))
    }

    fn renderer_for(
        &self,
        app: &App,
        feed: &Feed,
        feed_title: &Option<String>,
        entry: &Entry,
        destination: &Destination,
    ) -> MessageRenderer {
        let feed_title = feed_title
            .clone()
            .or_else(|| feed.title.clone())
            .or_else(|| Some(feed.link.clone()));

        MessageRenderer::builder()
            .feed_title(feed_title)
            .feed_link(Some(feed.link.clone()))
            .entry_title(Some(entry.title.clone()))
            .entry_link(Some(entry.link.clone()))
            .entry_description(entry.content.clone())
            .entry_media(entry.media.clone())
            .entry_date(Some(entry.publication_date))
            .template(destination.template.clone())
            .offset(destination.utc_offset_minutes)
            .max_chars(app.settings().max_message_chars)
            .transforms(app.transforms().clone())
            .build()
    }
}

/// Applies a destination's filter words to the rendered text. Words
/// starting with `!` exclude matching updates; the rest must match.
fn passes_filter(text: &str, destination: &Destination) -> bool {
    let words = match &destination.filter_words {
        Some(words) if !words.is_empty() => words,
        _ => return true,
    };

    let (negated, required): (Vec<&String>, Vec<&String>) =
        words.iter().partition(|word| word.starts_with('!'));

    let lowercase_text = text.to_lowercase();
    let mut matches = true;

    if !required.is_empty() {
        matches = contains_any(&lowercase_text, required);
    }

    if matches && !negated.is_empty() {
        let trimmed: Vec<String> = negated
            .iter()
            .map(|word| word.trim_start_matches('!').to_string())
            .collect();

        matches = !contains_any(&lowercase_text, trimmed.iter().collect());
    }

    matches
}

fn contains_any(text: &str, words: Vec<&String>) -> bool {
    AhoCorasick::new(words)
        .map(|searcher| searcher.find(text).is_some())
        .unwrap_or(false)
}

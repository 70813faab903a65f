use chrono::Duration as ChronoDuration;
use feedgram::app::{App, Settings};
use feedgram::deliver::RetryPolicy;
use feedgram::models::{ChatKind, DeliveryStatus, Destination, Feed};
use feedgram::notify::Notifier;
use feedgram::storage::{RetentionPolicy, Storage};
use feedgram::sync::PollFeedJob;
use feedgram::telegram::{ChatClient, OutgoingMessage, SendOutcome};
use feedgram::telegraph::{LongformPublisher, PublishError};
use feedgram::urls::UrlTransforms;
use futures::future::BoxFuture;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

struct ScriptedClient {
    outcomes: Mutex<VecDeque<SendOutcome>>,
    sent: Mutex<Vec<(i64, String)>>,
}

impl ScriptedClient {
    fn always_ok() -> Arc<Self> {
        Arc::new(ScriptedClient {
            outcomes: Mutex::new(VecDeque::new()),
            sent: Mutex::new(Vec::new()),
        })
    }

    fn scripted(outcomes: Vec<SendOutcome>) -> Arc<Self> {
        Arc::new(ScriptedClient {
            outcomes: Mutex::new(outcomes.into()),
            sent: Mutex::new(Vec::new()),
        })
    }

    fn sent(&self) -> Vec<(i64, String)> {
        self.sent.lock().unwrap().clone()
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

struct FixedPublisher {
    url: String,
    calls: Mutex<usize>,
}

impl FixedPublisher {
    fn new(url: &str) -> Arc<Self> {
        Arc::new(FixedPublisher {
            url: url.to_string(),
            calls: Mutex::new(0),
        })
    }

    fn calls(&self) -> usize {
        *self.calls.lock().unwrap()
    }
}

impl LongformPublisher for FixedPublisher {
    fn publish<'a>(
        &'a self,
        _title: &'a str,
        _author: Option<&'a str>,
        _content: &'a str,
    ) -> BoxFuture<'a, Result<String, PublishError>> {
        Box::pin(async move {
            *self.calls.lock().unwrap() += 1;
            Ok(self.url.clone())
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

fn settings(max_message_chars: usize) -> Settings {
    Settings {
        default_poll_interval: Duration::from_secs(300),
        backoff_max_multiplier: 16,
        concurrent_poll_limit: 10,
        sync_retry_limit: 10,
        max_message_chars,
        retention: RetentionPolicy {
            max_entries: 5000,
            max_age: ChronoDuration::days(90),
        },
        stale_feed_limit: ChronoDuration::hours(48),
    }
}

fn build_app(
    storage: Storage,
    client: Arc<ScriptedClient>,
    publisher: Arc<FixedPublisher>,
    notifier: Arc<RecordingNotifier>,
    max_message_chars: usize,
) -> App {
    App::new(
        storage,
        client,
        publisher,
        notifier,
        UrlTransforms::default(),
        RetryPolicy {
            max_attempts: 3,
            base: Duration::from_secs(1),
            multiplier: 2,
        },
        settings(max_message_chars),
    )
}

fn rss_document(entry_count: usize) -> String {
    let mut items = String::new();

    for index in (1..=entry_count).rev() {
        items.push_str(&format!(
            "<item>\
             <title>Post {index}</title>\
             <link>https://example.com/posts/{index}</link>\
             <guid isPermaLink=\"false\">post-{index}</guid>\
             <pubDate>Wed, 13 May 2020 {hour:02}:00:00 GMT</pubDate>\
             <description>Body of post {index}</description>\
             </item>",
            index = index,
            hour = 10 + index,
        ));
    }

    format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\
         <rss version=\"2.0\"><channel>\
         <title>Example News</title>\
         <link>https://example.com/</link>\
         <description>news</description>\
         {items}</channel></rss>"
    )
}

#[tokio::test]
async fn new_entries_are_delivered_once_and_oldest_first() {
    let mut server = mockito::Server::new_async().await;

    let storage = Storage::new();
    let client = ScriptedClient::always_ok();
    let publisher = FixedPublisher::new("https://telegra.ph/unused");
    let notifier = Arc::new(RecordingNotifier::default());

    let feed = storage.create_feed(&format!("{}/feed.xml", server.url()), 300);
    storage.upsert_destination(Destination::new(42, ChatKind::Private));
    storage.subscribe(feed.id, 42).unwrap();

    let app = build_app(
        storage.clone(),
        client.clone(),
        publisher,
        notifier,
        4000,
    );

    server
        .mock("GET", "/feed.xml")
        .with_status(200)
        .with_body(rss_document(3))
        .create_async()
        .await;

    PollFeedJob::new(feed.id).run(&app).await.unwrap();

    let sent = client.sent();
    assert_eq!(sent.len(), 3);
    assert!(sent[0].1.contains("Post 1"));
    assert!(sent[1].1.contains("Post 2"));
    assert!(sent[2].1.contains("Post 3"));

    // the same document again yields nothing new
    PollFeedJob::new(feed.id).run(&app).await.unwrap();
    assert_eq!(client.sent().len(), 3);

    // one new entry on top of the old three
    server.reset_async().await;
    server
        .mock("GET", "/feed.xml")
        .with_status(200)
        .with_body(rss_document(4))
        .create_async()
        .await;

    PollFeedJob::new(feed.id).run(&app).await.unwrap();

    let sent = client.sent();
    assert_eq!(sent.len(), 4);
    assert!(sent[3].1.contains("Post 4"));

    let record = storage.find_record(feed.id, "post-4", 42).unwrap();
    assert_eq!(record.status, DeliveryStatus::Sent);

    let updated = storage.find_feed(feed.id).unwrap();
    assert_eq!(updated.title.as_deref(), Some("Example News"));
    assert!(updated.synced_at.is_some());
}

#[tokio::test(start_paused = true)]
async fn a_blocked_destination_is_unsubscribed_and_reported_once() {
    let mut server = mockito::Server::new_async().await;

    let storage = Storage::new();
    let client = ScriptedClient::scripted(vec![
        SendOutcome::RetryAfter(Duration::from_secs(30)),
        SendOutcome::RetryAfter(Duration::from_secs(30)),
        SendOutcome::Permanent("Forbidden: bot was blocked by the user".to_string()),
    ]);
    let publisher = FixedPublisher::new("https://telegra.ph/unused");
    let notifier = Arc::new(RecordingNotifier::default());

    let feed = storage.create_feed(&format!("{}/feed.xml", server.url()), 300);
    storage.upsert_destination(Destination::new(42, ChatKind::Private));
    storage.subscribe(feed.id, 42).unwrap();

    let app = build_app(
        storage.clone(),
        client.clone(),
        publisher,
        notifier.clone(),
        4000,
    );

    server
        .mock("GET", "/feed.xml")
        .with_status(200)
        .with_body(rss_document(1))
        .create_async()
        .await;

    PollFeedJob::new(feed.id).run(&app).await.unwrap();

    assert_eq!(client.sent().len(), 3);
    assert!(storage.find_destination(42).is_none());
    assert!(!storage.is_subscribed(feed.id, 42));

    let record = storage.find_record(feed.id, "post-1", 42).unwrap();
    assert_eq!(record.status, DeliveryStatus::FailedPermanent);

    assert_eq!(notifier.events(), vec!["destination_removed 42".to_string()]);
}

#[tokio::test]
async fn a_permanent_fetch_failure_is_reported_even_after_transient_ones() {
    let mut server = mockito::Server::new_async().await;

    let storage = Storage::new();
    let client = ScriptedClient::always_ok();
    let publisher = FixedPublisher::new("https://telegra.ph/unused");
    let notifier = Arc::new(RecordingNotifier::default());

    let feed = storage.create_feed(&format!("{}/feed.xml", server.url()), 300);
    storage.upsert_destination(Destination::new(42, ChatKind::Private));
    storage.subscribe(feed.id, 42).unwrap();

    let app = build_app(
        storage.clone(),
        client,
        publisher,
        notifier.clone(),
        4000,
    );

    server
        .mock("GET", "/feed.xml")
        .with_status(503)
        .create_async()
        .await;
    assert!(PollFeedJob::new(feed.id).run(&app).await.is_err());
    assert!(notifier.events().is_empty());

    server.reset_async().await;
    server
        .mock("GET", "/feed.xml")
        .with_status(410)
        .create_async()
        .await;
    assert!(PollFeedJob::new(feed.id).run(&app).await.is_err());

    assert_eq!(
        notifier.events(),
        vec![format!("feed_failed {} HTTP 410 Gone", feed.id)]
    );

    // further permanent confirmations stay quiet
    assert!(PollFeedJob::new(feed.id).run(&app).await.is_err());
    assert_eq!(notifier.events().len(), 1);
}

#[tokio::test]
async fn entries_nobody_could_render_are_retried_on_the_next_poll() {
    let mut server = mockito::Server::new_async().await;

    let storage = Storage::new();
    let client = ScriptedClient::always_ok();
    let publisher = FixedPublisher::new("https://telegra.ph/unused");
    let notifier = Arc::new(RecordingNotifier::default());

    let feed = storage.create_feed(&format!("{}/feed.xml", server.url()), 300);
    let mut destination = Destination::new(42, ChatKind::Private);
    destination.template = Some("{{#if}}broken".to_string());
    storage.upsert_destination(destination);
    storage.subscribe(feed.id, 42).unwrap();

    let app = build_app(
        storage.clone(),
        client.clone(),
        publisher,
        notifier,
        4000,
    );

    server
        .mock("GET", "/feed.xml")
        .with_status(200)
        .with_body(rss_document(1))
        .create_async()
        .await;

    PollFeedJob::new(feed.id).run(&app).await.unwrap();

    // nothing sent, and the entry was not committed as seen
    assert!(client.sent().is_empty());
    assert!(!storage.has(feed.id, "post-1"));
    assert!(storage.find_record(feed.id, "post-1", 42).is_none());

    // fixing the template lets the next poll deliver the entry
    storage.upsert_destination(Destination::new(42, ChatKind::Private));

    PollFeedJob::new(feed.id).run(&app).await.unwrap();

    let sent = client.sent();
    assert_eq!(sent.len(), 1);
    assert!(sent[0].1.contains("Post 1"));
    assert!(storage.has(feed.id, "post-1"));
}

#[tokio::test]
async fn oversized_entries_are_published_and_summarized() {
    let mut server = mockito::Server::new_async().await;

    let storage = Storage::new();
    let client = ScriptedClient::always_ok();
    let publisher = FixedPublisher::new("https://telegra.ph/Post-05-13");
    let notifier = Arc::new(RecordingNotifier::default());

    let feed = storage.create_feed(&format!("{}/feed.xml", server.url()), 300);
    storage.upsert_destination(Destination::new(42, ChatKind::Private));
    storage.upsert_destination(Destination::new(43, ChatKind::Private));
    storage.subscribe(feed.id, 42).unwrap();
    storage.subscribe(feed.id, 43).unwrap();

    let app = build_app(
        storage.clone(),
        client.clone(),
        publisher.clone(),
        notifier,
        200,
    );

    let long_body = "many words ".repeat(200);
    let body = format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\
         <rss version=\"2.0\"><channel>\
         <title>Example News</title>\
         <link>https://example.com/</link>\
         <description>news</description>\
         <item>\
         <title>Huge post</title>\
         <link>https://example.com/posts/huge</link>\
         <guid isPermaLink=\"false\">huge</guid>\
         <pubDate>Wed, 13 May 2020 17:00:00 GMT</pubDate>\
         <description>{long_body}</description>\
         </item></channel></rss>"
    );

    server
        .mock("GET", "/feed.xml")
        .with_status(200)
        .with_body(body)
        .create_async()
        .await;

    PollFeedJob::new(feed.id).run(&app).await.unwrap();

    // one page for the entry, shared across both chats
    assert_eq!(publisher.calls(), 1);

    let sent = client.sent();
    assert_eq!(sent.len(), 2);
    for (_, text) in &sent {
        assert!(text.chars().count() <= 200);
        assert!(text.contains("Read more: https://telegra.ph/Post-05-13"));
    }
}

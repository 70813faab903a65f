use dotenv::dotenv;
use feedgram::app::{App, Settings};
use feedgram::config::Config;
use feedgram::deliver::RetryPolicy;
use feedgram::models::{ChatKind, Destination};
use feedgram::notify::TelegramNotifier;
use feedgram::scheduler::Scheduler;
use feedgram::storage::Storage;
use feedgram::telegram::TelegramClient;
use feedgram::telegraph::TelegraphPublisher;
use feedgram::urls::UrlTransforms;
use std::sync::Arc;

#[tokio::main]
async fn main() {
    dotenv().ok();
    env_logger::init();

    let storage = Storage::new();
    let client = Arc::new(TelegramClient::new());
    let publisher = Arc::new(TelegraphPublisher::new());
    let notifier = Arc::new(TelegramNotifier::new(
        client.clone(),
        Config::owner_telegram_id(),
    ));

    let app = Arc::new(App::new(
        storage.clone(),
        client,
        publisher,
        notifier,
        UrlTransforms::from_env(),
        RetryPolicy::from_env(),
        Settings::from_env(),
    ));

    bootstrap_subscriptions(&storage);

    let scheduler = Scheduler::new(app);
    scheduler.start();

    log::info!(
        "Watching {} feeds",
        scheduler.scheduled_feed_ids().len()
    );

    tokio::signal::ctrl_c()
        .await
        .expect("failed to listen for the shutdown signal");

    log::info!("Shutting down");
}

/// Seeds feeds and one subscriber chat from the environment.
fn bootstrap_subscriptions(storage: &Storage) {
    let chat_id = match Config::subscriber_chat_id() {
        Some(chat_id) => chat_id,
        None => {
            log::warn!("SUBSCRIBER_CHAT_ID is not set, nothing to deliver to");
            return;
        }
    };

    let kind = if chat_id < 0 {
        ChatKind::Group
    } else {
        ChatKind::Private
    };
    storage.upsert_destination(Destination::new(chat_id, kind));

    for url in Config::feed_urls() {
        let feed = storage.create_feed(&url, Config::poll_interval_in_seconds());

        if let Err(error) = storage.subscribe(feed.id, chat_id) {
            log::error!("Failed to subscribe {} to {}: {}", chat_id, url, error);
        }
    }
}

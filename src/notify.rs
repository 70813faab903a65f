use crate::models::Feed;
use crate::telegram::{ChatClient, OutgoingMessage, SendOutcome};
use futures::future::BoxFuture;
use std::sync::Arc;

/// Owner/operator notifications for permanent failures. Callers guarantee
/// each event is reported at most once; implementations only deliver.
pub trait Notifier: Send + Sync {
    fn feed_failed<'a>(&'a self, feed: &'a Feed, reason: &'a str) -> BoxFuture<'a, ()>;

    fn feed_removed<'a>(
        &'a self,
        feed: &'a Feed,
        subscriber_chat_ids: Vec<i64>,
    ) -> BoxFuture<'a, ()>;

    fn destination_removed<'a>(&'a self, chat_id: i64, reason: &'a str) -> BoxFuture<'a, ()>;

    fn delivery_exhausted<'a>(&'a self, chat_id: i64, feed: &'a Feed) -> BoxFuture<'a, ()>;
}

pub struct TelegramNotifier {
    client: Arc<dyn ChatClient>,
    owner_chat_id: Option<i64>,
}

impl TelegramNotifier {
    pub fn new(client: Arc<dyn ChatClient>, owner_chat_id: Option<i64>) -> Self {
        TelegramNotifier {
            client,
            owner_chat_id,
        }
    }

    async fn send_to(&self, chat_id: i64, text: String) {
        let message = OutgoingMessage {
            text,
            preview_enabled: false,
        };

        if let SendOutcome::Permanent(reason) = self.client.send(chat_id, &message).await {
            log::error!("Failed to deliver notification to {}: {}", chat_id, reason);
        }
    }

    async fn send_to_owner(&self, text: String) {
        if let Some(owner_chat_id) = self.owner_chat_id {
            self.send_to(owner_chat_id, text).await;
        }
    }
}

impl Notifier for TelegramNotifier {
    fn feed_failed<'a>(&'a self, feed: &'a Feed, reason: &'a str) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            self.send_to_owner(format!("{} is failing: {}", feed.link, reason))
                .await;
        })
    }

    fn feed_removed<'a>(
        &'a self,
        feed: &'a Feed,
        subscriber_chat_ids: Vec<i64>,
    ) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            let message = format!("{} can not be processed. It was removed.", feed.link);

            for chat_id in subscriber_chat_ids {
                self.send_to(chat_id, message.clone()).await;
            }

            self.send_to_owner(message).await;
        })
    }

    fn destination_removed<'a>(&'a self, chat_id: i64, reason: &'a str) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            self.send_to_owner(format!("Removed chat {}: {}", chat_id, reason))
                .await;
        })
    }

    fn delivery_exhausted<'a>(&'a self, chat_id: i64, feed: &'a Feed) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            self.send_to_owner(format!(
                "Gave up delivering an update from {} to chat {}",
                feed.link, chat_id
            ))
            .await;
        })
    }
}

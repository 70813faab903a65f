use crate::config::Config;
use crate::http_client;
use frankenstein::{
    ErrorResponse, LinkPreviewOptions, Message, MethodResponse, ParseMode, SendMessageParams,
};
use futures::future::BoxFuture;
use futures::AsyncReadExt;
use isahc::Request;
use std::time::Duration;

/// Error descriptions Telegram returns for destinations that can never be
/// reached again. Any of these unsubscribes the destination.
const PERMANENT_ERRORS: [&str; 14] = [
    "Bad Request: CHAT_WRITE_FORBIDDEN",
    "Bad Request: chat not found",
    "Bad Request: group chat was upgraded to a supergroup chat",
    "Bad Request: group chat was upgraded to a supergroup chat, migrate to chat id",
    "Bad Request: have no rights to send a message",
    "Bad Request: need administrator rights in the channel chat",
    "Forbidden: bot is not a member of the channel chat",
    "Forbidden: bot is not a member of the supergroup chat",
    "Forbidden: bot was blocked by the user",
    "Forbidden: bot was kicked from the channel chat",
    "Forbidden: bot was kicked from the group chat",
    "Forbidden: bot was kicked from the supergroup chat",
    "Forbidden: the group chat was deleted",
    "Forbidden: user is deactivated",
];

const DEFAULT_RETRY_AFTER: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingMessage {
    pub text: String,
    pub preview_enabled: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    Ok,
    RetryAfter(Duration),
    Permanent(String),
}

/// The outbound chat-platform capability. Implementations classify provider
/// errors into the three outcomes; they never panic on transport failures.
pub trait ChatClient: Send + Sync {
    fn send<'a>(
        &'a self,
        chat_id: i64,
        message: &'a OutgoingMessage,
    ) -> BoxFuture<'a, SendOutcome>;
}

#[derive(Debug, Clone)]
pub struct TelegramClient {
    api_url: String,
}

impl Default for TelegramClient {
    fn default() -> Self {
        Self::new()
    }
}

impl TelegramClient {
    pub fn new() -> Self {
        let token = Config::telegram_bot_token();
        let base_url = Config::telegram_base_url();

        TelegramClient {
            api_url: format!("{base_url}{token}"),
        }
    }

    async fn send_message(&self, params: &SendMessageParams) -> SendOutcome {
        let url = format!("{}/sendMessage", self.api_url);

        let json = match serde_json::to_string(params) {
            Ok(json) => json,
            Err(error) => {
                log::error!("Failed to serialize send params: {error:?}");
                return SendOutcome::RetryAfter(DEFAULT_RETRY_AFTER);
            }
        };

        let request = match Request::post(url)
            .header("Content-Type", "application/json")
            .body(json)
        {
            Ok(request) => request,
            Err(error) => {
                log::error!("Failed to build send request: {error:?}");
                return SendOutcome::RetryAfter(DEFAULT_RETRY_AFTER);
            }
        };

        let mut response = match http_client::client().send_async(request).await {
            Ok(response) => response,
            Err(error) => {
                log::error!("Failed to reach Telegram: {error:?}");
                return SendOutcome::RetryAfter(DEFAULT_RETRY_AFTER);
            }
        };

        let mut bytes = Vec::new();
        if let Err(error) = response.body_mut().read_to_end(&mut bytes).await {
            log::error!("Failed to read Telegram response: {error:?}");
            return SendOutcome::RetryAfter(DEFAULT_RETRY_AFTER);
        }

        if serde_json::from_slice::<MethodResponse<Message>>(&bytes).is_ok() {
            return SendOutcome::Ok;
        }

        match serde_json::from_slice::<ErrorResponse>(&bytes) {
            Ok(error_response) => classify_error(&error_response),
            Err(error) => {
                log::error!(
                    "Unparseable Telegram response {:?}: {error:?}",
                    std::str::from_utf8(&bytes)
                );
                SendOutcome::RetryAfter(DEFAULT_RETRY_AFTER)
            }
        }
    }
}

impl ChatClient for TelegramClient {
    fn send<'a>(
        &'a self,
        chat_id: i64,
        message: &'a OutgoingMessage,
    ) -> BoxFuture<'a, SendOutcome> {
        Box::pin(async move {
            let preview_params = LinkPreviewOptions::builder()
                .is_disabled(!message.preview_enabled)
                .build();

            let params = SendMessageParams::builder()
                .chat_id(chat_id)
                .text(message.text.clone())
                .parse_mode(ParseMode::Html)
                .link_preview_options(preview_params)
                .build();

            self.send_message(&params).await
        })
    }
}

fn classify_error(error: &ErrorResponse) -> SendOutcome {
    if let Some(parameters) = &error.parameters {
        if let Some(retry_after) = parameters.retry_after {
            return SendOutcome::RetryAfter(Duration::from_secs(retry_after as u64));
        }
    }

    if PERMANENT_ERRORS
        .iter()
        .any(|message| error.description.contains(message))
    {
        return SendOutcome::Permanent(error.description.clone());
    }

    SendOutcome::RetryAfter(DEFAULT_RETRY_AFTER)
}

use crate::config::Config;
use crate::http_client;
use futures::future::BoxFuture;
use futures::AsyncReadExt;
use isahc::Request;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("no long-form publisher configured")]
    NotConfigured,
    #[error("publish request failed: {0}")]
    Http(String),
    #[error("publisher rejected the page: {0}")]
    Api(String),
}

/// Accepts normalized article content and returns a stable URL hosting it.
/// Used by the delivery pipeline when a rendered message overflows the
/// message length limit.
pub trait LongformPublisher: Send + Sync {
    fn publish<'a>(
        &'a self,
        title: &'a str,
        author: Option<&'a str>,
        content: &'a str,
    ) -> BoxFuture<'a, Result<String, PublishError>>;
}

#[derive(Serialize)]
#[serde(untagged)]
enum Node {
    Text(String),
    Element {
        tag: &'static str,
        children: Vec<Node>,
    },
}

#[derive(Serialize)]
struct CreatePageRequest<'a> {
    access_token: &'a str,
    title: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    author_name: Option<&'a str>,
    content: Vec<Node>,
}

#[derive(Deserialize)]
struct CreatePageResponse {
    ok: bool,
    result: Option<Page>,
    error: Option<String>,
}

#[derive(Deserialize)]
struct Page {
    url: String,
}

#[derive(Debug, Clone)]
pub struct TelegraphPublisher {
    base_url: String,
    access_token: Option<String>,
}

impl Default for TelegraphPublisher {
    fn default() -> Self {
        Self::new()
    }
}

impl TelegraphPublisher {
    pub fn new() -> Self {
        TelegraphPublisher {
            base_url: Config::telegraph_base_url(),
            access_token: Config::telegraph_access_token(),
        }
    }

    pub fn with_base_url(base_url: String, access_token: Option<String>) -> Self {
        TelegraphPublisher {
            base_url,
            access_token,
        }
    }

    async fn create_page(
        &self,
        title: &str,
        author: Option<&str>,
        content: &str,
    ) -> Result<String, PublishError> {
        let access_token = self
            .access_token
            .as_deref()
            .ok_or(PublishError::NotConfigured)?;

        let body = CreatePageRequest {
            access_token,
            title,
            author_name: author,
            content: paragraphs(content),
        };

        let json = serde_json::to_string(&body)
            .map_err(|error| PublishError::Http(format!("{error:?}")))?;

        let request = Request::post(format!("{}/createPage", self.base_url))
            .header("Content-Type", "application/json")
            .body(json)
            .map_err(|error| PublishError::Http(format!("{error:?}")))?;

        let mut response = http_client::client()
            .send_async(request)
            .await
            .map_err(|error| PublishError::Http(format!("{error:?}")))?;

        let mut bytes = Vec::new();
        response
            .body_mut()
            .read_to_end(&mut bytes)
            .await
            .map_err(|error| PublishError::Http(format!("{error:?}")))?;

        let parsed: CreatePageResponse = serde_json::from_slice(&bytes)
            .map_err(|error| PublishError::Api(format!("{error:?}")))?;

        match parsed {
            CreatePageResponse {
                ok: true,
                result: Some(page),
                ..
            } => Ok(page.url),
            CreatePageResponse { error, .. } => Err(PublishError::Api(
                error.unwrap_or_else(|| "unknown error".to_string()),
            )),
        }
    }
}

impl LongformPublisher for TelegraphPublisher {
    fn publish<'a>(
        &'a self,
        title: &'a str,
        author: Option<&'a str>,
        content: &'a str,
    ) -> BoxFuture<'a, Result<String, PublishError>> {
        Box::pin(self.create_page(title, author, content))
    }
}

fn paragraphs(content: &str) -> Vec<Node> {
    content
        .split("\n\n")
        .map(|paragraph| paragraph.trim())
        .filter(|paragraph| !paragraph.is_empty())
        .map(|paragraph| Node::Element {
            tag: "p",
            children: vec![Node::Text(paragraph.to_string())],
        })
        .collect()
}

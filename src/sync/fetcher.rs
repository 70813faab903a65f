use crate::http_client;
use crate::models::{CacheValidators, Feed};
use futures::AsyncReadExt;
use isahc::Request;
use thiserror::Error;

const USER_AGENT: &str = concat!("feedgram/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("transient fetch failure: {0}")]
    Transient(String),
    #[error("permanent fetch failure: {0}")]
    Permanent(String),
}

#[derive(Debug)]
pub enum FetchOutcome {
    NotModified,
    Fetched {
        bytes: Vec<u8>,
        validators: CacheValidators,
    },
}

/// Fetches a feed document, sending the stored cache validators as
/// conditional-request headers. Timeout and proxy routing come from the
/// shared client configuration.
pub async fn fetch_feed(feed: &Feed) -> Result<FetchOutcome, FetchError> {
    let client = http_client::client_for(&feed.link);

    let mut builder = Request::get(feed.link.as_str()).header("User-Agent", USER_AGENT);

    if let Some(etag) = &feed.validators.etag {
        builder = builder.header("If-None-Match", etag.as_str());
    }
    if let Some(last_modified) = &feed.validators.last_modified {
        builder = builder.header("If-Modified-Since", last_modified.as_str());
    }

    let request = builder
        .body(())
        .map_err(|error| FetchError::Transient(format!("{error:?}")))?;

    let mut response = client
        .send_async(request)
        .await
        .map_err(|error| FetchError::Transient(format!("{error:?}")))?;

    let status = response.status();

    match status.as_u16() {
        304 => Ok(FetchOutcome::NotModified),
        200..=299 => {
            let validators = CacheValidators {
                etag: header_value(&response, "etag"),
                last_modified: header_value(&response, "last-modified"),
            };

            let mut bytes = Vec::new();
            response
                .body_mut()
                .read_to_end(&mut bytes)
                .await
                .map_err(|error| FetchError::Transient(format!("{error:?}")))?;

            Ok(FetchOutcome::Fetched { bytes, validators })
        }
        404 | 410 | 451 => Err(FetchError::Permanent(format!("HTTP {}", status))),
        _ => Err(FetchError::Transient(format!("HTTP {}", status))),
    }
}

fn header_value<T>(response: &isahc::Response<T>, name: &str) -> Option<String> {
    response
        .headers()
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.to_string())
}

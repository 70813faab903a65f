use crate::config::Config;
use url::Url;

const TRACKING_PREFIXES: [&str; 3] = ["utm_", "fbclid", "gclid"];

/// Pure `url -> url` transforms applied during rendering. Both fall back to
/// the identity transform when the input cannot be parsed.
#[derive(Debug, Clone, Default)]
pub struct UrlTransforms {
    pub image_relay: Option<String>,
    pub strip_tracking: bool,
}

impl UrlTransforms {
    pub fn from_env() -> Self {
        UrlTransforms {
            image_relay: Config::image_relay_url(),
            strip_tracking: true,
        }
    }

    /// Removes tracking query parameters from an entry link.
    pub fn transform_link(&self, link: &str) -> String {
        if !self.strip_tracking {
            return link.to_string();
        }

        let mut parsed = match Url::parse(link) {
            Ok(parsed) => parsed,
            Err(_) => return link.to_string(),
        };

        let kept: Vec<(String, String)> = parsed
            .query_pairs()
            .filter(|(name, _)| {
                !TRACKING_PREFIXES
                    .iter()
                    .any(|prefix| name.starts_with(prefix))
            })
            .map(|(name, value)| (name.into_owned(), value.into_owned()))
            .collect();

        if kept.is_empty() {
            parsed.set_query(None);
        } else {
            let query = kept
                .iter()
                .map(|(name, value)| {
                    format!(
                        "{}={}",
                        urlencode(name),
                        urlencode(value)
                    )
                })
                .collect::<Vec<String>>()
                .join("&");
            parsed.set_query(Some(&query));
        }

        parsed.to_string()
    }

    /// Routes a media URL through the configured relay, when one is set.
    pub fn transform_media(&self, media_url: &str) -> String {
        match &self.image_relay {
            None => media_url.to_string(),
            Some(relay) => format!("{}{}", relay, urlencode(media_url)),
        }
    }
}

fn urlencode(value: &str) -> String {
    url::form_urlencoded::byte_serialize(value.as_bytes()).collect()
}

use crate::models::{Entry, Feed};
use crate::storage;
use chrono::{DateTime, Utc};
use feed_rs::parser;
use sha2::{Digest, Sha256};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("malformed feed document: {0}")]
    Malformed(String),
}

#[derive(Debug)]
pub struct ParsedFeed {
    pub title: Option<String>,
    pub entries: Vec<Entry>,
    /// True when this document yielded duplicate or empty entry ids. The
    /// caller flags the feed so fingerprints fall back to content hashes.
    pub guid_unstable: bool,
}

/// Parses RSS/Atom/JSON bytes into normalized entries, preserving document
/// order. Entries without a link are skipped individually; a document that
/// cannot be parsed at all fails as a whole.
pub fn parse_feed(feed: &Feed, bytes: &[u8]) -> Result<ParsedFeed, ParseError> {
    let parsed = parser::parse(bytes).map_err(|error| ParseError::Malformed(format!("{error:?}")))?;

    let guid_unstable = feed.guid_unstable || ids_are_unstable(&parsed.entries);

    let entries = parsed
        .entries
        .into_iter()
        .filter_map(|item| {
            let link = item.links.first()?.href.clone();
            let title = item
                .title
                .map_or_else(|| "".to_string(), |text| text.content);
            let publication_date = parse_time(item.published, item.updated);

            let fingerprint = if guid_unstable || item.id.is_empty() {
                content_fingerprint(&title, &link, &publication_date)
            } else {
                item.id.clone()
            };

            let content = item
                .content
                .and_then(|content| content.body)
                .or_else(|| item.summary.map(|text| text.content));

            let author = match item
                .authors
                .into_iter()
                .map(|person| person.name)
                .collect::<Vec<String>>()
                .join(", ")
            {
                author if author.is_empty() => None,
                author => Some(author),
            };

            let media = item
                .media
                .into_iter()
                .flat_map(|object| object.content)
                .filter_map(|content| content.url)
                .map(|url| url.to_string())
                .collect();

            Some(Entry {
                feed_id: feed.id,
                fingerprint,
                title,
                link,
                author,
                content,
                media,
                publication_date,
            })
        })
        .collect::<Vec<Entry>>();

    Ok(ParsedFeed {
        title: parsed.title.map(|text| text.content),
        entries,
        guid_unstable,
    })
}

/// Feed-declared ids are distrusted when a single document reuses an id or
/// omits one. The resulting flag is sticky for the feed's lifetime, which
/// keeps fingerprint derivation deterministic from the first detection on.
fn ids_are_unstable(entries: &[feed_rs::model::Entry]) -> bool {
    let mut seen = std::collections::HashSet::new();

    entries.iter().any(|entry| {
        let id = entry.id.trim();
        id.is_empty() || !seen.insert(id)
    })
}

fn content_fingerprint(title: &str, link: &str, publication_date: &DateTime<Utc>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(title.as_bytes());
    hasher.update(b"\n");
    hasher.update(link.as_bytes());
    hasher.update(b"\n");
    hasher.update(publication_date.to_rfc3339().as_bytes());

    hasher
        .finalize()
        .iter()
        .map(|byte| format!("{:02x}", byte))
        .collect()
}

fn parse_time(published: Option<DateTime<Utc>>, updated: Option<DateTime<Utc>>) -> DateTime<Utc> {
    published
        .or(updated)
        .unwrap_or_else(storage::current_time)
}

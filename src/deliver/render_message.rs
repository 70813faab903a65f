use crate::urls::UrlTransforms;
use chrono::offset::FixedOffset;
use chrono::prelude::*;
use chrono::DateTime;
use chrono::Utc;
use handlebars::handlebars_helper;
use handlebars::to_json;
use handlebars::Handlebars;
use handlebars::JsonValue;
use htmlescape::decode_html;
use serde_json::value::Map;
use thiserror::Error;
use typed_builder::TypedBuilder as Builder;

const UNICODE_EMPTY_CHARS: [char; 5] = ['\u{200B}', '\u{200C}', '\u{200D}', '\u{2060}', '\u{FEFF}'];
const HTML_SPACE: &str = "&#32;";

const FEED_TITLE: &str = "feed_title";
const FEED_LINK: &str = "feed_link";
const ENTRY_TITLE: &str = "entry_title";
const ENTRY_DATE: &str = "entry_date";
const ENTRY_LINK: &str = "entry_link";
const ENTRY_DESCRIPTION: &str = "entry_description";
const ENTRY_MEDIA: &str = "entry_media";

const SUBSTRING_HELPER: &str = "substring";
const BOLD_HELPER: &str = "bold";
const ITALIC_HELPER: &str = "italic";

const DEFAULT_TEMPLATE: &str = "{{feed_title}}<br><br>{{entry_title}}<br><br>{{entry_description}}<br><br>{{entry_date}}<br><br>{{entry_link}}<br><br>";

const EMPTY_MESSAGE_PLACEHOLDER: &str = "According to your template the message is empty. Empty messages can not be sent, so you are seeing this placeholder instead.";
const READ_MORE: &str = "Read more: ";

handlebars_helper!(substring: |string: String, length: usize| truncate(&string, length));
handlebars_helper!(bold: |string: String| format!("<b>{}</b>", string));
handlebars_helper!(italic: |string: String| format!("<i>{}</i>", string));

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("failed to render template")]
    Template,
}

/// The outcome of rendering one entry for one destination. Overflow is not
/// an error: the caller publishes the full content externally and asks for
/// a summary referencing the returned URL.
#[derive(Debug, PartialEq, Eq)]
pub enum Rendered {
    Message(String),
    Overflow { full_content: String },
}

/// Renders one entry into the constrained message dialect. A pure function
/// of its inputs; retryable and testable with golden values.
#[derive(Builder, Clone)]
pub struct MessageRenderer {
    #[builder(setter(into), default)]
    feed_title: Option<String>,
    #[builder(setter(into), default)]
    feed_link: Option<String>,
    #[builder(setter(into), default)]
    entry_title: Option<String>,
    #[builder(setter(into), default)]
    entry_date: Option<DateTime<Utc>>,
    #[builder(setter(into), default)]
    entry_link: Option<String>,
    #[builder(setter(into), default)]
    entry_description: Option<String>,
    #[builder(default)]
    entry_media: Vec<String>,
    #[builder(setter(into), default)]
    template: Option<String>,
    #[builder(setter(into), default)]
    offset: Option<i32>,
    #[builder(default = 4000)]
    max_chars: usize,
    #[builder(default)]
    transforms: UrlTransforms,
}

impl MessageRenderer {
    pub fn render(&self) -> Result<Rendered, RenderError> {
        let rendered = self.render_text()?;

        if char_count(&rendered) <= self.max_chars {
            return Ok(Rendered::Message(rendered));
        }

        Ok(Rendered::Overflow {
            full_content: self.description_text().unwrap_or(rendered),
        })
    }

    /// Builds a summary that always fits the length limit, linking the
    /// long-form page that hosts the full content.
    pub fn render_summary(&self, longform_url: &str) -> String {
        let read_more = format!("{}{}", READ_MORE, longform_url);
        let mut budget = self.max_chars.saturating_sub(char_count(&read_more));
        let mut parts: Vec<String> = Vec::new();

        if let Some(title) = self.entry_title.as_deref().map(remove_html) {
            if !title.is_empty() && budget > 5 {
                let title = truncate(&title, budget - 2);
                budget -= char_count(&title) + 2;
                parts.push(title);
            }
        }

        if let Some(lead) = self.description_text() {
            if !lead.is_empty() && budget > 5 {
                parts.push(truncate(&lead, budget - 2));
            }
        }

        parts.push(read_more);

        truncate(&parts.join("\n\n"), self.max_chars)
    }

    fn render_text(&self) -> Result<String, RenderError> {
        let template = self
            .template
            .clone()
            .map(|template| self.clean_template(template))
            .unwrap_or_else(|| DEFAULT_TEMPLATE.to_string());

        let mut data = Map::new();

        self.maybe_set_value(
            &mut data,
            FEED_TITLE,
            &self.feed_title.as_deref().map(remove_html),
        );
        self.maybe_set_value(
            &mut data,
            ENTRY_TITLE,
            &self.entry_title.as_deref().map(remove_html),
        );
        self.maybe_set_value(&mut data, ENTRY_DATE, &self.date());
        self.maybe_set_value(&mut data, FEED_LINK, &self.feed_link);
        self.maybe_set_value(
            &mut data,
            ENTRY_LINK,
            &self
                .entry_link
                .as_deref()
                .map(|link| self.transforms.transform_link(link)),
        );
        self.maybe_set_value(&mut data, ENTRY_DESCRIPTION, &self.description_text());
        self.maybe_set_value(
            &mut data,
            ENTRY_MEDIA,
            &self
                .entry_media
                .first()
                .map(|url| self.transforms.transform_media(url)),
        );

        let mut reg = Handlebars::new();
        reg.register_helper(SUBSTRING_HELPER, Box::new(substring));
        reg.register_helper(BOLD_HELPER, Box::new(bold));
        reg.register_helper(ITALIC_HELPER, Box::new(italic));

        let template_without_html = remove_html(&template);
        match reg.render_template(&template_without_html, &data) {
            Err(error) => {
                log::error!("Failed to render template {:?}", error);
                Err(RenderError::Template)
            }
            Ok(result) => Ok(clean_rendered(&result)),
        }
    }

    fn description_text(&self) -> Option<String> {
        self.entry_description
            .as_deref()
            .map(remove_html)
            .map(|text| text.trim().to_string())
    }

    fn clean_template(&self, template: String) -> String {
        template.replace('\n', "<br>")
    }

    fn date(&self) -> Option<String> {
        let date = self.entry_date.as_ref()?;

        let time_offset = self
            .offset
            .and_then(|minutes| {
                if minutes >= 0 {
                    FixedOffset::east_opt(minutes * 60)
                } else {
                    FixedOffset::west_opt(-minutes * 60)
                }
            })
            .unwrap_or_else(|| Utc.fix());

        Some(format!("{}", date.with_timezone(&time_offset)))
    }

    fn maybe_set_value(
        &self,
        map: &mut Map<String, JsonValue>,
        key: &str,
        value_option: &Option<String>,
    ) {
        if let Some(value) = value_option {
            map.insert(key.to_string(), to_json(value));
        }
    }
}

fn clean_rendered(s: &str) -> String {
    let unescaped = match decode_html(s) {
        Ok(unescaped) => unescaped,
        Err(_) => s.to_string(),
    };

    let without_empty_chars = remove_empty_characters(&unescaped);
    let result = without_empty_chars.trim().to_string();

    if result.is_empty() {
        EMPTY_MESSAGE_PLACEHOLDER.to_string()
    } else {
        result
    }
}

fn char_count(s: &str) -> usize {
    s.chars().count()
}

/// Truncates to at most `max_chars` characters, ellipsis included.
fn truncate(s: &str, max_chars: usize) -> String {
    if char_count(s) <= max_chars {
        return s.trim().to_string();
    }

    let cut = max_chars.saturating_sub(3);
    let mut result: String = s.chars().take(cut).collect();
    result.push_str("...");

    result.trim().to_string()
}

fn remove_empty_characters(string: &str) -> String {
    let mut result = string.to_string();
    for character in UNICODE_EMPTY_CHARS {
        result = result.replace(character, "");
    }

    result.replace(HTML_SPACE, "")
}

fn remove_html(string_with_maybe_html: &str) -> String {
    // html2text emits CRLF line breaks
    nanohtml2text::html2text(string_with_maybe_html).replace("\r\n", "\n")
}

use std::env;
use std::str::FromStr;

pub struct Config {}

impl Config {
    pub fn telegram_bot_token() -> String {
        Self::read_var("TELEGRAM_BOT_TOKEN")
    }

    pub fn telegram_base_url() -> String {
        Self::read_var_with_default("TELEGRAM_BASE_URL", "https://api.telegram.org/bot")
    }

    pub fn owner_telegram_id() -> Option<i64> {
        Self::read_var_option("OWNER_TELEGRAM_ID")
    }

    pub fn request_timeout_in_seconds() -> u64 {
        Self::read_var_with_default("REQUEST_TIMEOUT", "10")
            .parse()
            .unwrap_or(10)
    }

    pub fn poll_interval_in_seconds() -> u64 {
        Self::read_var_with_default("POLL_INTERVAL_SECONDS", "300")
            .parse()
            .unwrap_or(300)
    }

    pub fn concurrent_poll_limit() -> usize {
        Self::read_var_with_default("CONCURRENT_POLL_LIMIT", "10")
            .parse()
            .unwrap_or(10)
    }

    pub fn schedule_backoff_max_multiplier() -> u32 {
        Self::read_var_with_default("SCHEDULE_BACKOFF_MAX_MULTIPLIER", "16")
            .parse()
            .unwrap_or(16)
    }

    pub fn sync_retry_limit() -> u32 {
        Self::read_var_with_default("SYNC_RETRY_LIMIT", "10")
            .parse()
            .unwrap_or(10)
    }

    pub fn stale_feed_limit_in_hours() -> i64 {
        Self::read_var_with_default("STALE_FEED_LIMIT_HOURS", "48")
            .parse()
            .unwrap_or(48)
    }

    pub fn max_message_chars() -> usize {
        Self::read_var_with_default("MAX_MESSAGE_CHARS", "4000")
            .parse()
            .unwrap_or(4000)
    }

    pub fn delivery_max_attempts() -> u32 {
        Self::read_var_with_default("DELIVERY_MAX_ATTEMPTS", "5")
            .parse()
            .unwrap_or(5)
    }

    pub fn delivery_backoff_base_in_seconds() -> u64 {
        Self::read_var_with_default("DELIVERY_BACKOFF_BASE_SECONDS", "1")
            .parse()
            .unwrap_or(1)
    }

    pub fn delivery_backoff_multiplier() -> u32 {
        Self::read_var_with_default("DELIVERY_BACKOFF_MULTIPLIER", "2")
            .parse()
            .unwrap_or(2)
    }

    pub fn dedup_max_entries_per_feed() -> usize {
        Self::read_var_with_default("DEDUP_MAX_ENTRIES_PER_FEED", "5000")
            .parse()
            .unwrap_or(5000)
    }

    pub fn dedup_max_age_in_days() -> i64 {
        Self::read_var_with_default("DEDUP_MAX_AGE_DAYS", "90")
            .parse()
            .unwrap_or(90)
    }

    pub fn proxy_url() -> Option<String> {
        Self::read_var_option("PROXY_URL")
    }

    pub fn proxy_bypass_hosts() -> Vec<String> {
        match Self::read_var_option::<String>("PROXY_BYPASS_HOSTS") {
            None => vec![],
            Some(hosts) => hosts
                .split(',')
                .map(|host| host.trim().to_string())
                .filter(|host| !host.is_empty())
                .collect(),
        }
    }

    pub fn prefer_ipv6() -> bool {
        Self::read_var_with_default("PREFER_IPV6", "false")
            .parse()
            .unwrap_or(false)
    }

    pub fn image_relay_url() -> Option<String> {
        Self::read_var_option("IMAGE_RELAY_URL")
    }

    pub fn telegraph_base_url() -> String {
        Self::read_var_with_default("TELEGRAPH_BASE_URL", "https://api.telegra.ph")
    }

    pub fn telegraph_access_token() -> Option<String> {
        Self::read_var_option("TELEGRAPH_ACCESS_TOKEN")
    }

    pub fn feed_urls() -> Vec<String> {
        match Self::read_var_option::<String>("FEED_URLS") {
            None => vec![],
            Some(urls) => urls
                .split(',')
                .map(|url| url.trim().to_string())
                .filter(|url| !url.is_empty())
                .collect(),
        }
    }

    pub fn subscriber_chat_id() -> Option<i64> {
        Self::read_var_option("SUBSCRIBER_CHAT_ID")
    }

    fn read_var_with_default(name: &str, default_value: &str) -> String {
        env::var(name).unwrap_or_else(|_| default_value.to_string())
    }

    fn read_var(name: &str) -> String {
        env::var(name).unwrap_or_else(|_| panic!("{} must be set", name))
    }

    fn read_var_option<T: FromStr>(name: &str) -> Option<T> {
        match env::var(name) {
            Ok(value) => value.parse().ok(),
            Err(_) => None,
        }
    }
}

use crate::config::Config;
use isahc::config::IpVersion;
use isahc::config::RedirectPolicy;
use isahc::prelude::*;
use isahc::HttpClient;
use std::sync::OnceLock;
use std::time::Duration;
use url::Url;

static DIRECT_CLIENT: OnceLock<HttpClient> = OnceLock::new();
static PROXIED_CLIENT: OnceLock<Option<HttpClient>> = OnceLock::new();

pub fn client() -> &'static HttpClient {
    DIRECT_CLIENT.get_or_init(|| init_client(None))
}

/// Picks the client for a target URL. A proxied client is used when a proxy
/// is configured and the target host does not match the bypass list.
pub fn client_for(url: &str) -> &'static HttpClient {
    let proxied = PROXIED_CLIENT.get_or_init(|| {
        Config::proxy_url().map(|proxy_url| init_client(Some(proxy_url)))
    });

    match proxied {
        Some(proxied_client) if should_proxy(url, &Config::proxy_bypass_hosts()) => proxied_client,
        _ => client(),
    }
}

pub fn should_proxy(url: &str, bypass_hosts: &[String]) -> bool {
    let host = match Url::parse(url) {
        Ok(parsed) => match parsed.host_str() {
            Some(host) => host.to_string(),
            None => return true,
        },
        Err(_) => return true,
    };

    !bypass_hosts
        .iter()
        .any(|bypass| host == *bypass || host.ends_with(&format!(".{bypass}")))
}

fn init_client(proxy_url: Option<String>) -> HttpClient {
    let mut builder = HttpClient::builder()
        .redirect_policy(RedirectPolicy::Limit(10))
        .timeout(request_timeout_seconds());

    if Config::prefer_ipv6() {
        builder = builder.ip_version(IpVersion::V6);
    }

    if let Some(proxy_url) = proxy_url {
        match proxy_url.parse() {
            Ok(uri) => builder = builder.proxy(Some(uri)),
            Err(error) => log::error!("Invalid proxy url {proxy_url}: {error:?}"),
        }
    }

    builder.build().unwrap()
}

fn request_timeout_seconds() -> Duration {
    let secs = Config::request_timeout_in_seconds();

    Duration::from_secs(secs)
}

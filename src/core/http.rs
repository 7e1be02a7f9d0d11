use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue, ACCEPT_ENCODING, CACHE_CONTROL, PRAGMA};
use reqwest::{Client, Url};

const APP_USER_AGENT: &str = concat!("HellasLauncher/", env!("CARGO_PKG_VERSION"));
const CONNECT_TIMEOUT: Duration = Duration::from_secs(20);

pub fn build_http_client() -> Result<Client, reqwest::Error> {
    let mut default_headers = HeaderMap::new();
    // Content-Length must describe the bytes we hash and write.
    default_headers.insert(ACCEPT_ENCODING, HeaderValue::from_static("identity"));

    Client::builder()
        .user_agent(APP_USER_AGENT)
        .default_headers(default_headers)
        .connect_timeout(CONNECT_TIMEOUT)
        .build()
}

/// Headers that ask intermediaries for a fresh copy.
pub fn no_cache_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    headers.insert(PRAGMA, HeaderValue::from_static("no-cache"));
    headers
}

/// Append a timestamp query parameter so CDN caches cannot serve a stale feed.
pub fn cache_busted(url: &str) -> String {
    let stamp = chrono::Utc::now().timestamp_millis();
    match Url::parse(url) {
        Ok(mut parsed) => {
            parsed.query_pairs_mut().append_pair("_", &stamp.to_string());
            parsed.to_string()
        }
        Err(_) => url.to_string(),
    }
}

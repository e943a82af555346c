//! Space-weather JSON document over HTTP
//!
//! The feed is one document that the publisher overwrites in place. It is
//! exposed as a single partition (`current`) with a single item named after
//! the URL's last path segment.

use async_trait::async_trait;
use reqwest::header::{HeaderMap, ETAG, LAST_MODIFIED};
use reqwest::StatusCode;
use std::sync::Mutex;
use std::time::Duration;
use tracing::debug;
use wxdb_common::checksum::sha256_hex;

use super::{RemoteError, RemoteErrorKind, RemoteItem, RemoteSource};

pub const DEFAULT_SPACE_WEATHER_URL: &str =
    "http://ipg.geospace.ru/services/current-space-weather.json";

/// The only partition the feed has
pub const CURRENT_PARTITION: &str = "current";

const USER_AGENT: &str = concat!("wxdb/", env!("CARGO_PKG_VERSION"));
const REQUEST_TIMEOUT_SECS: u64 = 30;

/// HTTP-backed [`RemoteSource`]
pub struct HttpFeed {
    url: String,
    item_name: String,
    client: reqwest::Client,
    /// Body downloaded while computing a content-hash token, reused by `fetch`
    cached_body: Mutex<Option<Vec<u8>>>,
}

impl HttpFeed {
    pub fn new(url: impl Into<String>) -> Result<Self, RemoteError> {
        let url = url.into();
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(|e| RemoteError::new(RemoteErrorKind::Rejected, e.to_string()))?;

        Ok(Self {
            item_name: item_name_from_url(&url),
            url,
            client,
            cached_body: Mutex::new(None),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn item(&self) -> RemoteItem {
        RemoteItem::new(CURRENT_PARTITION, self.item_name.clone())
    }

    fn check_item(&self, item: &RemoteItem) -> Result<(), RemoteError> {
        if item.partition == CURRENT_PARTITION && item.name == self.item_name {
            Ok(())
        } else {
            Err(RemoteError::new(
                RemoteErrorKind::NotFound,
                format!("{} is not served by {}", item.path(), self.url),
            ))
        }
    }

    fn cache_body(&self, body: Option<Vec<u8>>) {
        match self.cached_body.lock() {
            Ok(mut slot) => *slot = body,
            Err(poisoned) => *poisoned.into_inner() = body,
        }
    }

    fn take_cached_body(&self) -> Option<Vec<u8>> {
        match self.cached_body.lock() {
            Ok(mut slot) => slot.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        }
    }

    async fn get_body(&self) -> Result<Vec<u8>, RemoteError> {
        let response = self.client.get(&self.url).send().await.map_err(network_error)?;
        let status = response.status();
        if !status.is_success() {
            return Err(status_error(status, &self.url));
        }
        let body = response.bytes().await.map_err(network_error)?;
        Ok(body.to_vec())
    }
}

fn item_name_from_url(url: &str) -> String {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    match path.trim_end_matches('/').rsplit('/').next() {
        Some(name) if !name.is_empty() && !name.contains(':') => name.to_string(),
        _ => "feed.json".to_string(),
    }
}

/// `ETag` wins over `Last-Modified`
fn token_from_headers(headers: &HeaderMap) -> Option<String> {
    [ETAG, LAST_MODIFIED].iter().find_map(|name| {
        headers
            .get(name)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(str::to_string)
    })
}

fn network_error(error: reqwest::Error) -> RemoteError {
    RemoteError::new(RemoteErrorKind::Connection, error.to_string())
}

fn status_error(status: StatusCode, url: &str) -> RemoteError {
    let kind = match status {
        StatusCode::TOO_MANY_REQUESTS | StatusCode::SERVICE_UNAVAILABLE => {
            RemoteErrorKind::ConnectionLimit
        },
        StatusCode::NOT_FOUND | StatusCode::GONE => RemoteErrorKind::NotFound,
        s if s.is_server_error() => RemoteErrorKind::Connection,
        _ => RemoteErrorKind::Rejected,
    };
    RemoteError::new(kind, format!("HTTP {} from {}", status, url))
}

#[async_trait]
impl RemoteSource for HttpFeed {
    fn describe(&self) -> String {
        self.url.clone()
    }

    fn base_dir(&self) -> &str {
        &self.url
    }

    async fn connect(&self) -> Result<(), RemoteError> {
        Ok(())
    }

    async fn disconnect(&self) {
        self.cache_body(None);
    }

    async fn list_partitions(&self) -> Result<Vec<String>, RemoteError> {
        Ok(vec![CURRENT_PARTITION.to_string()])
    }

    async fn list_items(&self, partition: &str) -> Result<Vec<String>, RemoteError> {
        if partition == CURRENT_PARTITION {
            Ok(vec![self.item_name.clone()])
        } else {
            Ok(Vec::new())
        }
    }

    async fn change_token(&self, item: &RemoteItem) -> Result<String, RemoteError> {
        self.check_item(item)?;

        let response = self.client.head(&self.url).send().await.map_err(network_error)?;
        let status = response.status();
        if status.is_success() {
            if let Some(token) = token_from_headers(response.headers()) {
                return Ok(token);
            }
        } else if status != StatusCode::METHOD_NOT_ALLOWED {
            return Err(status_error(status, &self.url));
        }

        // No validator headers: the content itself is the token
        debug!(url = %self.url, "No ETag or Last-Modified, hashing body");
        let body = self.get_body().await?;
        let token = format!("sha256:{}", sha256_hex(&body));
        self.cache_body(Some(body));
        Ok(token)
    }

    async fn fetch(&self, item: &RemoteItem) -> Result<Vec<u8>, RemoteError> {
        self.check_item(item)?;
        match self.take_cached_body() {
            Some(body) => Ok(body),
            None => self.get_body().await,
        }
    }
}

use crate::index::{DEFAULT_DATE_PATTERN, DEFAULT_INDEX_PREFIX};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Host value that asks for the machine's hostname to be looked up.
pub const AUTO_HOST: &str = "auto";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppenderConfig {
    /// Backend base URLs, tried in order
    pub urls: Vec<String>,

    /// Index name prefix
    pub index: String,

    /// strftime pattern for the daily index suffix
    pub date_pattern: String,

    #[serde(with = "humantime_serde")]
    pub flush_interval: Duration,

    /// Buffered documents that trigger an early flush
    pub batch_size: usize,

    /// Capacity of the in-memory buffer
    pub max_buffered: usize,

    pub overflow: OverflowStrategy,

    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,

    #[serde(with = "humantime_serde")]
    pub connect_timeout: Duration,

    /// Resubmit retryable rejected items once before reporting them
    pub retry_partial_failures: bool,

    pub username: Option<String>,
    pub password: Option<String>,

    /// Static `host` field; "auto" resolves the local hostname
    pub host: Option<String>,

    /// Static `application` field
    pub application: Option<String>,
}

impl Default for AppenderConfig {
    fn default() -> Self {
        Self {
            urls: vec!["http://localhost:9200".to_string()],
            index: DEFAULT_INDEX_PREFIX.to_string(),
            date_pattern: DEFAULT_DATE_PATTERN.to_string(),
            flush_interval: Duration::from_secs(1),
            batch_size: 300,
            max_buffered: 10_000,
            overflow: OverflowStrategy::DropOldest,
            request_timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(5),
            retry_partial_failures: true,
            username: None,
            password: None,
            host: None,
            application: None,
        }
    }
}

impl AppenderConfig {
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.urls = vec![url.into()];
        self
    }

    /// The configured host, with "auto" resolved through the OS hostname.
    pub fn resolved_host(&self) -> Option<String> {
        match self.host.as_deref() {
            Some(AUTO_HOST) => hostname::get()
                .ok()
                .and_then(|h| h.to_str().map(|s| s.to_string())),
            Some(host) => Some(host.to_string()),
            None => None,
        }
    }
}

/// What the buffer does with a new document when it is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowStrategy {
    /// Evict the oldest buffered document to make room
    DropOldest,
    /// Refuse the incoming document
    DropNewest,
}

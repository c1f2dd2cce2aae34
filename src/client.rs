use crate::config::types::AppenderConfig;
use crate::document::{BulkDocument, DocumentBody};
use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("connection failed: {0}")]
    Connect(String),

    #[error("request timed out")]
    Timeout,

    #[error("HTTP error: {0}")]
    Http(#[source] reqwest::Error),

    #[error("backend returned error status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("failed to encode bulk request: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("failed to decode bulk response: {0}")]
    Decode(String),

    #[error("invalid client configuration: {0}")]
    Config(String),
}

impl TransportError {
    /// Whether the same request may succeed if sent again later.
    pub fn is_retryable(&self) -> bool {
        match self {
            TransportError::Connect(_) | TransportError::Timeout | TransportError::Http(_) => true,
            TransportError::Status { status, .. } => is_retryable_status(*status),
            TransportError::Encode(_) | TransportError::Decode(_) | TransportError::Config(_) => {
                false
            }
        }
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            TransportError::Timeout
        } else if e.is_connect() {
            TransportError::Connect(e.to_string())
        } else if e.is_decode() {
            TransportError::Decode(e.to_string())
        } else if e.is_builder() {
            TransportError::Config(e.to_string())
        } else {
            TransportError::Http(e)
        }
    }
}

pub(crate) fn is_retryable_status(status: u16) -> bool {
    status == 429 || status >= 500
}

/// `{"index": {"_index": "..."}}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IndexAction {
    pub index: IndexTarget,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IndexTarget {
    #[serde(rename = "_index")]
    pub index: String,
}

/// One action/document pair of a bulk request.
#[derive(Debug, Clone, PartialEq)]
pub struct BulkEntry {
    pub action: IndexAction,
    pub body: DocumentBody,
}

/// An ordered bulk request: action line, then document body, per document.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct BulkRequest {
    entries: Vec<BulkEntry>,
}

impl BulkRequest {
    pub fn from_documents(docs: &[BulkDocument]) -> Self {
        let entries = docs
            .iter()
            .map(|doc| BulkEntry {
                action: IndexAction {
                    index: IndexTarget {
                        index: doc.index_name().to_string(),
                    },
                },
                body: doc.body().clone(),
            })
            .collect();
        Self { entries }
    }

    pub fn entries(&self) -> &[BulkEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The request body as alternating JSON values, two per document.
    pub fn lines(&self) -> Result<Vec<serde_json::Value>, serde_json::Error> {
        let mut lines = Vec::with_capacity(self.entries.len() * 2);
        for entry in &self.entries {
            lines.push(serde_json::to_value(&entry.action)?);
            lines.push(serde_json::to_value(&entry.body)?);
        }
        Ok(lines)
    }

    /// Newline-delimited JSON as the `_bulk` endpoint expects, with trailing newline.
    pub fn to_ndjson(&self) -> Result<String, serde_json::Error> {
        let mut out = String::new();
        for entry in &self.entries {
            out.push_str(&serde_json::to_string(&entry.action)?);
            out.push('\n');
            out.push_str(&serde_json::to_string(&entry.body)?);
            out.push('\n');
        }
        Ok(out)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct BulkResponse {
    #[serde(default)]
    pub took: u64,
    #[serde(default)]
    pub errors: bool,
    #[serde(default)]
    pub items: Vec<BulkResponseItem>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BulkResponseItem {
    #[serde(alias = "create")]
    pub index: ItemStatus,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ItemStatus {
    #[serde(rename = "_index", default)]
    pub index: String,
    pub status: u16,
    #[serde(default)]
    pub error: Option<serde_json::Value>,
}

impl ItemStatus {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status) && self.error.is_none()
    }

    pub fn is_retryable(&self) -> bool {
        is_retryable_status(self.status)
    }

    /// Human-readable rejection reason from the item's error object.
    pub fn reason(&self) -> String {
        match &self.error {
            Some(serde_json::Value::Object(err)) => {
                let kind = err.get("type").and_then(|v| v.as_str()).unwrap_or("error");
                match err.get("reason").and_then(|v| v.as_str()) {
                    Some(reason) => format!("{}: {}", kind, reason),
                    None => kind.to_string(),
                }
            }
            Some(serde_json::Value::String(reason)) => reason.clone(),
            Some(other) => other.to_string(),
            None => format!("status {}", self.status),
        }
    }
}

impl BulkResponse {
    /// A response accepting every document of `request`.
    pub fn accepted(request: &BulkRequest) -> Self {
        Self {
            took: 0,
            errors: false,
            items: request
                .entries()
                .iter()
                .map(|entry| BulkResponseItem {
                    index: ItemStatus {
                        index: entry.action.index.index.clone(),
                        status: 201,
                        error: None,
                    },
                })
                .collect(),
        }
    }

    /// Positions (in request order) and statuses of rejected items.
    pub fn failed_items(&self) -> Vec<(usize, &ItemStatus)> {
        self.items
            .iter()
            .enumerate()
            .filter(|(_, item)| !item.index.is_success())
            .map(|(i, item)| (i, &item.index))
            .collect()
    }

    /// Positions of a request of `submitted` documents that have no item
    /// status in this response. Their outcome is unknown.
    pub fn missing_items(&self, submitted: usize) -> std::ops::Range<usize> {
        self.items.len().min(submitted)..submitted
    }
}

/// The backend's single bulk-write operation.
///
/// Implementations must bound the call with a timeout and report connection
/// problems as `TransportError`, separately from per-item rejections carried
/// in the `BulkResponse`.
#[async_trait]
pub trait BulkClient: Send + Sync {
    async fn bulk_write(&self, request: &BulkRequest) -> Result<BulkResponse, TransportError>;
}

/// `BulkClient` over HTTP against the `_bulk` endpoint.
#[derive(Debug)]
pub struct HttpBulkClient {
    client: Client,
    urls: Vec<String>,
    username: Option<String>,
    password: Option<String>,
}

impl HttpBulkClient {
    pub fn new(config: &AppenderConfig) -> Result<Self, TransportError> {
        if config.urls.is_empty() {
            return Err(TransportError::Config("no backend URLs configured".to_string()));
        }

        let client = Client::builder()
            .timeout(config.request_timeout)
            .connect_timeout(config.connect_timeout)
            .build()?;

        info!(urls = ?config.urls, "Bulk client initialized");

        Ok(Self {
            client,
            urls: config.urls.clone(),
            username: config.username.clone(),
            password: config.password.clone(),
        })
    }

    pub fn bulk_url(base: &str) -> String {
        format!("{}/_bulk", base.trim_end_matches('/'))
    }

    async fn send_to(&self, base: &str, body: String) -> Result<BulkResponse, TransportError> {
        let mut req = self
            .client
            .post(Self::bulk_url(base))
            .header(CONTENT_TYPE, "application/x-ndjson")
            .body(body);

        if let Some(username) = &self.username {
            req = req.basic_auth(username, self.password.as_ref());
        }

        let response = req.send().await?;
        let status = response.status();

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TransportError::Status {
                status: status.as_u16(),
                body,
            });
        }

        Ok(response.json().await?)
    }
}

#[async_trait]
impl BulkClient for HttpBulkClient {
    async fn bulk_write(&self, request: &BulkRequest) -> Result<BulkResponse, TransportError> {
        let body = request.to_ndjson()?;
        let mut last_error = None;

        // Fail over to the next URL only when the current one cannot be reached
        for base in &self.urls {
            match self.send_to(base, body.clone()).await {
                Ok(response) => {
                    debug!(url = %base, documents = request.len(), took_ms = response.took, "Bulk request accepted");
                    return Ok(response);
                }
                Err(e @ TransportError::Connect(_)) => {
                    warn!(url = %base, error = %e, "Backend unreachable, trying next URL");
                    last_error = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_error.unwrap_or_else(|| TransportError::Config("no backend URLs configured".to_string())))
    }
}

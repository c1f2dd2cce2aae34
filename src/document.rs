use crate::event::{Event, Payload, PayloadValue};
use crate::exception::{encode_exception, EncodedException};
use crate::index::IndexNamer;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};
use thiserror::Error;
use tracing::warn;

/// Key of the marker object that replaces a payload which failed to encode.
pub const ENCODING_ERROR_KEY: &str = "encoding_error";

#[derive(Debug, Error, PartialEq)]
pub enum EncodingError {
    #[error("payload field '{key}' holds non-finite number {value}")]
    NonFiniteNumber { key: String, value: f64 },
}

/// Document body in the shape the backend indexes.
///
/// Optional fields are omitted from the JSON entirely when absent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentBody {
    pub level: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub application: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exception: Option<EncodedException>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Map<String, Value>>,
}

/// One serialized event together with its destination index.
#[derive(Debug, Clone, PartialEq)]
pub struct BulkDocument {
    index_name: String,
    body: DocumentBody,
}

impl BulkDocument {
    pub fn new(index_name: impl Into<String>, body: DocumentBody) -> Self {
        Self {
            index_name: index_name.into(),
            body,
        }
    }

    pub fn index_name(&self) -> &str {
        &self.index_name
    }

    pub fn body(&self) -> &DocumentBody {
        &self.body
    }

    /// The bulk action line that precedes this document: `{"index": {"_index": ...}}`.
    pub fn action(&self) -> Value {
        serde_json::json!({ "index": { "_index": self.index_name } })
    }
}

/// Renders events into bulk documents.
#[derive(Debug, Clone, Default)]
pub struct DocumentSerializer {
    namer: IndexNamer,
    host: Option<String>,
    application: Option<String>,
}

impl DocumentSerializer {
    pub fn new(namer: IndexNamer) -> Self {
        Self {
            namer,
            host: None,
            application: None,
        }
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    pub fn with_application(mut self, application: impl Into<String>) -> Self {
        self.application = Some(application.into());
        self
    }

    pub fn serialize(&self, event: &Event) -> BulkDocument {
        let index_name = self.namer.index_name(&event.timestamp());

        let payload = match event.payload() {
            Some(payload) if !payload.is_empty() => Some(match encode_payload(payload) {
                Ok(map) => map,
                Err(e) => {
                    warn!(index = %index_name, error = %e, "Replacing unencodable payload with marker");
                    encoding_error_marker(&e)
                }
            }),
            _ => None,
        };

        let body = DocumentBody {
            level: event.level().to_string(),
            message: event.message().to_string(),
            host: self.host.clone(),
            application: self.application.clone(),
            exception: event.exception().map(encode_exception),
            payload,
        };

        BulkDocument::new(index_name, body)
    }
}

/// Convert a payload into a JSON object, failing on values JSON cannot carry.
pub fn encode_payload(payload: &Payload) -> Result<Map<String, Value>, EncodingError> {
    payload
        .iter()
        .map(|(key, value)| Ok((key.clone(), encode_value(key, value)?)))
        .collect()
}

fn encode_value(key: &str, value: &PayloadValue) -> Result<Value, EncodingError> {
    Ok(match value {
        PayloadValue::Null => Value::Null,
        PayloadValue::Bool(b) => Value::Bool(*b),
        PayloadValue::Int(i) => Value::Number((*i).into()),
        PayloadValue::UInt(u) => Value::Number((*u).into()),
        PayloadValue::Float(f) => Number::from_f64(*f)
            .map(Value::Number)
            .ok_or_else(|| EncodingError::NonFiniteNumber {
                key: key.to_string(),
                value: *f,
            })?,
        PayloadValue::String(s) => Value::String(s.clone()),
        PayloadValue::List(items) => Value::Array(
            items
                .iter()
                .map(|item| encode_value(key, item))
                .collect::<Result<_, _>>()?,
        ),
        PayloadValue::Map(map) => Value::Object(
            map.iter()
                .map(|(k, v)| Ok((k.clone(), encode_value(&format!("{}.{}", key, k), v)?)))
                .collect::<Result<_, EncodingError>>()?,
        ),
    })
}

fn encoding_error_marker(err: &EncodingError) -> Map<String, Value> {
    let mut marker = Map::new();
    marker.insert(ENCODING_ERROR_KEY.to_string(), Value::String(err.to_string()));
    marker
}

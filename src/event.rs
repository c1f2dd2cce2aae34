use crate::exception::ExceptionCapture;
use chrono::{DateTime, Local};
use std::collections::BTreeMap;

/// Free-form structured context attached to a log call.
pub type Payload = BTreeMap<String, PayloadValue>;

/// A dynamically typed payload value.
///
/// Mirrors the JSON data model, except that floats are kept as raw `f64` so
/// that values JSON cannot represent (NaN, infinities) can be detected at
/// serialization time instead of being silently coerced.
#[derive(Debug, Clone, PartialEq)]
pub enum PayloadValue {
    Null,
    Bool(bool),
    Int(i64),
    /// Unsigned integers above `i64::MAX`
    UInt(u64),
    Float(f64),
    String(String),
    List(Vec<PayloadValue>),
    Map(BTreeMap<String, PayloadValue>),
}

impl From<bool> for PayloadValue {
    fn from(value: bool) -> Self {
        PayloadValue::Bool(value)
    }
}

impl From<i64> for PayloadValue {
    fn from(value: i64) -> Self {
        PayloadValue::Int(value)
    }
}

impl From<i32> for PayloadValue {
    fn from(value: i32) -> Self {
        PayloadValue::Int(value.into())
    }
}

impl From<u32> for PayloadValue {
    fn from(value: u32) -> Self {
        PayloadValue::Int(value.into())
    }
}

impl From<u64> for PayloadValue {
    fn from(value: u64) -> Self {
        match i64::try_from(value) {
            Ok(i) => PayloadValue::Int(i),
            Err(_) => PayloadValue::UInt(value),
        }
    }
}

impl From<f64> for PayloadValue {
    fn from(value: f64) -> Self {
        PayloadValue::Float(value)
    }
}

impl From<&str> for PayloadValue {
    fn from(value: &str) -> Self {
        PayloadValue::String(value.to_string())
    }
}

impl From<String> for PayloadValue {
    fn from(value: String) -> Self {
        PayloadValue::String(value)
    }
}

impl<T: Into<PayloadValue>> From<Vec<T>> for PayloadValue {
    fn from(values: Vec<T>) -> Self {
        PayloadValue::List(values.into_iter().map(Into::into).collect())
    }
}

impl From<BTreeMap<String, PayloadValue>> for PayloadValue {
    fn from(map: BTreeMap<String, PayloadValue>) -> Self {
        PayloadValue::Map(map)
    }
}

impl From<serde_json::Value> for PayloadValue {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => PayloadValue::Null,
            serde_json::Value::Bool(b) => PayloadValue::Bool(b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    PayloadValue::Int(i)
                } else if let Some(u) = n.as_u64() {
                    PayloadValue::UInt(u)
                } else {
                    PayloadValue::Float(n.as_f64().unwrap_or(f64::NAN))
                }
            }
            serde_json::Value::String(s) => PayloadValue::String(s),
            serde_json::Value::Array(items) => {
                PayloadValue::List(items.into_iter().map(PayloadValue::from).collect())
            }
            serde_json::Value::Object(map) => PayloadValue::Map(
                map.into_iter()
                    .map(|(k, v)| (k, PayloadValue::from(v)))
                    .collect(),
            ),
        }
    }
}

/// One log occurrence as handed over by the logging pipeline.
///
/// The timestamp is fixed when the event is created; builders only attach
/// the optional exception and payload.
#[derive(Debug, Clone)]
pub struct Event {
    level: String,
    message: String,
    timestamp: DateTime<Local>,
    exception: Option<ExceptionCapture>,
    payload: Option<Payload>,
}

impl Event {
    /// Create an event stamped with the current local time.
    pub fn new(level: impl Into<String>, message: impl Into<String>) -> Self {
        Self::at(level, message, Local::now())
    }

    /// Create an event with an explicit timestamp.
    pub fn at(
        level: impl Into<String>,
        message: impl Into<String>,
        timestamp: DateTime<Local>,
    ) -> Self {
        Self {
            level: level.into(),
            message: message.into(),
            timestamp,
            exception: None,
            payload: None,
        }
    }

    pub fn with_exception(mut self, exception: ExceptionCapture) -> Self {
        self.exception = Some(exception);
        self
    }

    pub fn with_payload(mut self, payload: Payload) -> Self {
        self.payload = Some(payload);
        self
    }

    pub fn level(&self) -> &str {
        &self.level
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn timestamp(&self) -> DateTime<Local> {
        self.timestamp
    }

    pub fn exception(&self) -> Option<&ExceptionCapture> {
        self.exception.as_ref()
    }

    pub fn payload(&self) -> Option<&Payload> {
        self.payload.as_ref()
    }
}

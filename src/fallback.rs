use crate::document::{BulkDocument, DocumentBody};
use serde::Serialize;
use std::io::Write;
use std::sync::{Mutex, PoisonError};

/// A document that left the shipper without being delivered.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeliveryFailure {
    pub index_name: String,
    pub body: DocumentBody,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    pub reason: String,
}

impl DeliveryFailure {
    pub fn new(doc: &BulkDocument, status: Option<u16>, reason: impl Into<String>) -> Self {
        Self {
            index_name: doc.index_name().to_string(),
            body: doc.body().clone(),
            status,
            reason: reason.into(),
        }
    }
}

/// Local, non-networked destination for documents that could not be shipped.
pub trait FallbackSink: Send + Sync {
    fn report(&self, failure: &DeliveryFailure);
}

/// Writes each failure to stderr as one JSON line.
#[derive(Debug, Default, Clone, Copy)]
pub struct StderrFallback;

impl FallbackSink for StderrFallback {
    fn report(&self, failure: &DeliveryFailure) {
        let line = match serde_json::to_string(failure) {
            Ok(line) => line,
            Err(e) => format!(
                "{{\"index_name\":{:?},\"reason\":{:?}}}",
                failure.index_name,
                format!("{} (body not encodable: {})", failure.reason, e)
            ),
        };
        let mut stderr = std::io::stderr().lock();
        let _ = writeln!(stderr, "{}", line);
    }
}

/// Keeps failures in memory; for tests and embedding applications that
/// want to inspect undelivered documents.
#[derive(Debug, Default)]
pub struct RecordingFallback {
    failures: Mutex<Vec<DeliveryFailure>>,
}

impl RecordingFallback {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failures(&self) -> Vec<DeliveryFailure> {
        self.failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn len(&self) -> usize {
        self.failures.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl FallbackSink for RecordingFallback {
    fn report(&self, failure: &DeliveryFailure) {
        self.failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(failure.clone());
    }
}

//! Bulk submission of drained documents.
//!
//! Delivery policy:
//! - a fully accepted response completes the batch;
//! - rejected items with a retryable status (429, 5xx) are resubmitted once,
//!   everything still rejected afterwards goes to the fallback sink;
//! - a retryable failure of the bulk call itself holds the batch back for the
//!   next flush, and documents that fail a second time are dropped to the
//!   fallback sink.

use crate::client::{BulkClient, BulkRequest, BulkResponse, TransportError};
use crate::document::BulkDocument;
use crate::fallback::{DeliveryFailure, FallbackSink};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, warn};

const MISSING_ITEM_REASON: &str = "no item status in bulk response";

/// A document the backend refused, after any retry.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("document for index '{index_name}' rejected: {reason}")]
pub struct PartialRejectionError {
    pub index_name: String,
    pub status: Option<u16>,
    pub reason: String,
}

#[derive(Debug, Error)]
pub enum ShippingError {
    #[error("bulk request failed, {dropped} documents dropped: {source}")]
    Transport {
        dropped: usize,
        #[source]
        source: TransportError,
    },

    #[error("{} documents rejected by the backend", .rejections.len())]
    Rejected {
        rejections: Vec<PartialRejectionError>,
    },
}

/// Outcome counts of one flush.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FlushReport {
    /// Documents sent in the primary bulk request
    pub submitted: usize,
    pub delivered: usize,
    /// Documents held back for the next flush
    pub requeued: usize,
    /// Documents handed to the fallback sink
    pub dropped: usize,
}

impl FlushReport {
    fn merge(self, later: FlushReport) -> FlushReport {
        FlushReport {
            submitted: self.submitted + later.submitted,
            delivered: self.delivered + later.delivered,
            requeued: later.requeued,
            dropped: self.dropped + later.dropped,
        }
    }
}

pub struct BulkShipper {
    client: Arc<dyn BulkClient>,
    fallback: Arc<dyn FallbackSink>,
    retry_partial_failures: bool,
    /// Batch held back after a hard failure, shipped ahead of the next drain
    requeued: Vec<BulkDocument>,
}

impl BulkShipper {
    pub fn new(client: Arc<dyn BulkClient>, fallback: Arc<dyn FallbackSink>) -> Self {
        Self {
            client,
            fallback,
            retry_partial_failures: true,
            requeued: Vec::new(),
        }
    }

    pub fn with_partial_retry(mut self, enabled: bool) -> Self {
        self.retry_partial_failures = enabled;
        self
    }

    /// Number of documents waiting for their second attempt.
    pub fn requeued(&self) -> usize {
        self.requeued.len()
    }

    /// Give up the held-back batch without shipping it.
    pub fn take_requeued(&mut self) -> Vec<BulkDocument> {
        std::mem::take(&mut self.requeued)
    }

    /// Ship previously requeued documents followed by `drained`, in one request.
    pub async fn flush(&mut self, drained: Vec<BulkDocument>) -> Result<FlushReport, ShippingError> {
        let mut batch = std::mem::take(&mut self.requeued);
        let second_attempts = batch.len();
        batch.extend(drained);

        if batch.is_empty() {
            return Ok(FlushReport::default());
        }

        let mut report = FlushReport {
            submitted: batch.len(),
            ..Default::default()
        };

        let request = BulkRequest::from_documents(&batch);
        match self.client.bulk_write(&request).await {
            Ok(response) => self.handle_response(&batch, &response, report).await,
            Err(e) if e.is_retryable() => {
                // `batch` keeps the second attempts, `fresh` gets one more chance
                let fresh = batch.split_off(second_attempts);
                report.requeued = fresh.len();
                report.dropped = batch.len();
                self.requeued = fresh;

                if batch.is_empty() {
                    warn!(
                        documents = report.requeued,
                        error = %e,
                        "Bulk request failed, batch requeued for next flush"
                    );
                    return Ok(report);
                }

                error!(
                    dropped = report.dropped,
                    requeued = report.requeued,
                    error = %e,
                    "Bulk request failed again, dropping requeued documents"
                );
                self.drop_all(&batch, &e);
                Err(ShippingError::Transport {
                    dropped: batch.len(),
                    source: e,
                })
            }
            Err(e) => {
                error!(
                    documents = batch.len(),
                    error = %e,
                    "Bulk request failed permanently, dropping batch"
                );
                self.drop_all(&batch, &e);
                Err(ShippingError::Transport {
                    dropped: batch.len(),
                    source: e,
                })
            }
        }
    }

    /// Final flush before shutdown.
    ///
    /// A batch requeued by a hard failure has no later flush to ride on, so
    /// it is retried immediately, once.
    pub async fn finish(&mut self, drained: Vec<BulkDocument>) -> Result<FlushReport, ShippingError> {
        let first = self.flush(drained).await;
        if self.requeued.is_empty() {
            return first;
        }

        let second = self.flush(Vec::new()).await;
        match (first, second) {
            (Ok(first), Ok(second)) => Ok(first.merge(second)),
            (Err(e), Ok(_)) | (Ok(_), Err(e)) => Err(e),
            (Err(first), Err(second)) => {
                error!(error = %second, "Final retry failed as well");
                Err(first)
            }
        }
    }

    async fn handle_response(
        &self,
        batch: &[BulkDocument],
        response: &BulkResponse,
        mut report: FlushReport,
    ) -> Result<FlushReport, ShippingError> {
        let mut rejections = Vec::new();
        let mut retry = Vec::new();
        let mut failed = 0;

        for (pos, status) in response.failed_items() {
            let Some(doc) = batch.get(pos) else {
                continue;
            };
            failed += 1;
            if self.retry_partial_failures && status.is_retryable() {
                retry.push(doc.clone());
            } else {
                rejections.push(self.reject(doc, Some(status.status), status.reason()));
            }
        }

        // No status means no proof of delivery
        for pos in response.missing_items(batch.len()) {
            failed += 1;
            rejections.push(self.reject(&batch[pos], None, MISSING_ITEM_REASON.to_string()));
        }

        if response.errors && failed == 0 {
            warn!("Bulk response flagged errors but every item succeeded");
        }

        report.delivered = batch.len() - failed;

        if !retry.is_empty() {
            let (delivered, mut still_rejected) = self.retry_rejected(retry).await;
            report.delivered += delivered;
            rejections.append(&mut still_rejected);
        }

        report.dropped = rejections.len();

        if rejections.is_empty() {
            debug!(
                documents = report.submitted,
                delivered = report.delivered,
                "Bulk request delivered"
            );
            Ok(report)
        } else {
            error!(
                delivered = report.delivered,
                rejected = rejections.len(),
                "Backend rejected documents"
            );
            Err(ShippingError::Rejected { rejections })
        }
    }

    /// One retry pass over rejected documents. Returns the number delivered
    /// and the rejections that remain.
    async fn retry_rejected(&self, docs: Vec<BulkDocument>) -> (usize, Vec<PartialRejectionError>) {
        warn!(documents = docs.len(), "Retrying rejected documents once");

        let request = BulkRequest::from_documents(&docs);
        match self.client.bulk_write(&request).await {
            Ok(response) => {
                let mut rejections: Vec<_> = response
                    .failed_items()
                    .into_iter()
                    .filter_map(|(pos, status)| {
                        docs.get(pos)
                            .map(|doc| self.reject(doc, Some(status.status), status.reason()))
                    })
                    .collect();
                for pos in response.missing_items(docs.len()) {
                    rejections.push(self.reject(&docs[pos], None, MISSING_ITEM_REASON.to_string()));
                }
                (docs.len() - rejections.len(), rejections)
            }
            Err(e) => {
                let reason = format!("retry failed: {}", e);
                let rejections = docs
                    .iter()
                    .map(|doc| self.reject(doc, None, reason.clone()))
                    .collect();
                (0, rejections)
            }
        }
    }

    fn reject(&self, doc: &BulkDocument, status: Option<u16>, reason: String) -> PartialRejectionError {
        self.fallback
            .report(&DeliveryFailure::new(doc, status, reason.clone()));
        PartialRejectionError {
            index_name: doc.index_name().to_string(),
            status,
            reason,
        }
    }

    fn drop_all(&self, docs: &[BulkDocument], err: &TransportError) {
        let status = match err {
            TransportError::Status { status, .. } => Some(*status),
            _ => None,
        };
        let reason = err.to_string();
        for doc in docs {
            self.fallback
                .report(&DeliveryFailure::new(doc, status, reason.clone()));
        }
    }
}

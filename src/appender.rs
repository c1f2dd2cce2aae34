use crate::buffer::{BatchBuffer, BufferError, BufferStats};
use crate::client::{BulkClient, HttpBulkClient, TransportError};
use crate::config::parse::{validate_config, ConfigError};
use crate::config::types::AppenderConfig;
use crate::document::DocumentSerializer;
use crate::event::Event;
use crate::fallback::{DeliveryFailure, FallbackSink, StderrFallback};
use crate::index::{IndexError, IndexNamer};
use crate::shipper::{BulkShipper, FlushReport, ShippingError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{watch, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("event level is empty")]
    EmptyLevel,

    #[error("event message is empty")]
    EmptyMessage,
}

#[derive(Debug, Error)]
pub enum AppenderError {
    #[error("invalid event: {0}")]
    Validation(#[from] ValidationError),

    #[error("appender is closed")]
    Closed,

    #[error("shipping failed: {0}")]
    Shipping(#[from] ShippingError),

    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    #[error("index error: {0}")]
    Index(#[from] IndexError),

    #[error("client error: {0}")]
    Client(#[from] TransportError),
}

/// Entry point for the logging pipeline.
///
/// `log` serializes and buffers an event and returns immediately. A
/// background worker flushes the buffer every `flush_interval`, or earlier
/// once `batch_size` documents are waiting. `close` performs the final
/// synchronous flush.
///
/// Construction spawns the worker, so it must happen inside a Tokio runtime.
pub struct Appender {
    serializer: DocumentSerializer,
    buffer: Arc<BatchBuffer>,
    shipper: Arc<AsyncMutex<BulkShipper>>,
    fallback: Arc<dyn FallbackSink>,
    closed: AtomicBool,
    shutdown_tx: watch::Sender<bool>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Appender {
    /// Appender shipping over HTTP with failures reported on stderr.
    pub fn new(config: &AppenderConfig) -> Result<Self, AppenderError> {
        validate_config(config)?;
        let client = Arc::new(HttpBulkClient::new(config)?);
        Self::with_client(config, client, Arc::new(StderrFallback))
    }

    /// Appender with an explicit backend client and fallback sink.
    pub fn with_client(
        config: &AppenderConfig,
        client: Arc<dyn BulkClient>,
        fallback: Arc<dyn FallbackSink>,
    ) -> Result<Self, AppenderError> {
        validate_config(config)?;

        let namer = IndexNamer::new(config.index.clone()).with_date_pattern(config.date_pattern.clone())?;
        let mut serializer = DocumentSerializer::new(namer);
        if let Some(host) = config.resolved_host() {
            serializer = serializer.with_host(host);
        }
        if let Some(application) = &config.application {
            serializer = serializer.with_application(application.clone());
        }

        let buffer = Arc::new(BatchBuffer::new(
            config.max_buffered,
            config.batch_size,
            config.overflow,
        ));
        let shipper = Arc::new(AsyncMutex::new(
            BulkShipper::new(client, fallback.clone())
                .with_partial_retry(config.retry_partial_failures),
        ));

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let worker = tokio::spawn(run_flush_worker(
            Arc::clone(&buffer),
            Arc::clone(&shipper),
            config.flush_interval,
            shutdown_rx,
        ));

        info!(
            index = %config.index,
            batch_size = config.batch_size,
            flush_interval_ms = config.flush_interval.as_millis() as u64,
            "Appender started"
        );

        Ok(Self {
            serializer,
            buffer,
            shipper,
            fallback,
            closed: AtomicBool::new(false),
            shutdown_tx,
            worker: Mutex::new(Some(worker)),
        })
    }

    /// Validate, serialize and buffer one event. Never waits for delivery.
    pub fn log(&self, event: Event) -> Result<(), AppenderError> {
        validate_event(&event)?;

        let doc = self.serializer.serialize(&event);
        match self.buffer.append(doc) {
            Ok(None) => Ok(()),
            Ok(Some(overflow)) => {
                self.fallback
                    .report(&DeliveryFailure::new(&overflow, None, "buffer full"));
                Ok(())
            }
            Err(BufferError::Closed) => Err(AppenderError::Closed),
        }
    }

    /// Drain and ship everything buffered so far, waiting for the result.
    pub async fn flush(&self) -> Result<FlushReport, AppenderError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(AppenderError::Closed);
        }
        Ok(flush_once(&self.buffer, &self.shipper).await?)
    }

    /// Stop the flush worker and ship whatever is left.
    ///
    /// Only the first call does any work; later calls return `Ok(())` at once.
    pub async fn close(&self) -> Result<(), AppenderError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        // Refuse new documents first so the final drain sees everything
        self.buffer.close();
        let _ = self.shutdown_tx.send(true);

        let worker = self
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(worker) = worker {
            if let Err(e) = worker.await {
                warn!(error = %e, "Flush worker terminated abnormally");
            }
        }

        let mut shipper = self.shipper.lock().await;
        let drained = self.buffer.drain();
        let report = shipper.finish(drained).await?;

        info!(
            delivered = report.delivered,
            dropped = report.dropped,
            "Appender closed"
        );
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn stats(&self) -> BufferStats {
        self.buffer.stats()
    }
}

impl Drop for Appender {
    fn drop(&mut self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        // Without close() there is no way to ship from here; hand everything
        // still held to the fallback instead of losing it. Documents held back
        // by the shipper are older than anything in the buffer.
        self.buffer.close();
        let _ = self.shutdown_tx.send(true);

        let mut pending = match self.shipper.try_lock() {
            Ok(mut shipper) => shipper.take_requeued(),
            Err(_) => {
                warn!("Flush in progress while dropping appender, its batch cannot be reported");
                Vec::new()
            }
        };
        pending.extend(self.buffer.drain());

        if !pending.is_empty() {
            warn!(documents = pending.len(), "Appender dropped without close");
            for doc in &pending {
                self.fallback.report(&DeliveryFailure::new(
                    doc,
                    None,
                    "appender dropped without close",
                ));
            }
        }
    }
}

fn validate_event(event: &Event) -> Result<(), ValidationError> {
    if event.level().trim().is_empty() {
        return Err(ValidationError::EmptyLevel);
    }
    if event.message().trim().is_empty() {
        return Err(ValidationError::EmptyMessage);
    }
    Ok(())
}

/// Drain under the shipper lock so at most one flush is in flight and
/// drains reach the backend in order.
async fn flush_once(
    buffer: &BatchBuffer,
    shipper: &AsyncMutex<BulkShipper>,
) -> Result<FlushReport, ShippingError> {
    let mut shipper = shipper.lock().await;
    let drained = buffer.drain();
    shipper.flush(drained).await
}

async fn run_flush_worker(
    buffer: Arc<BatchBuffer>,
    shipper: Arc<AsyncMutex<BulkShipper>>,
    interval: Duration,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    debug!("Flush worker started");

    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = buffer.flush_requested() => {}
            _ = shutdown_rx.changed() => break,
        }

        match flush_once(&buffer, &shipper).await {
            Ok(report) if report.submitted > 0 => {
                debug!(
                    delivered = report.delivered,
                    requeued = report.requeued,
                    "Periodic flush complete"
                );
            }
            Ok(_) => {}
            Err(e) => {
                // Undelivered documents already went to the fallback sink
                error!(error = %e, "Flush failed");
            }
        }
    }

    debug!("Flush worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{BulkRequest, BulkResponse};
    use crate::fallback::RecordingFallback;
    use async_trait::async_trait;
    use chrono::{Local, TimeZone};
    use std::sync::atomic::AtomicUsize;

    #[derive(Default)]
    struct CountingClient {
        requests: Mutex<Vec<BulkRequest>>,
    }

    #[async_trait]
    impl BulkClient for CountingClient {
        async fn bulk_write(&self, request: &BulkRequest) -> Result<BulkResponse, TransportError> {
            self.requests.lock().unwrap().push(request.clone());
            Ok(BulkResponse::accepted(request))
        }
    }

    fn quiet_config() -> AppenderConfig {
        // Long interval and large batch so only explicit flushes ship
        AppenderConfig {
            flush_interval: Duration::from_secs(3600),
            batch_size: 1000,
            ..Default::default()
        }
    }

    #[test]
    fn test_validate_event() {
        assert_eq!(validate_event(&Event::new("info", "ok")), Ok(()));
        assert_eq!(
            validate_event(&Event::new("", "msg")),
            Err(ValidationError::EmptyLevel)
        );
        assert_eq!(
            validate_event(&Event::new("info", "")),
            Err(ValidationError::EmptyMessage)
        );
    }

    #[test]
    fn test_whitespace_only_fields_are_empty() {
        assert_eq!(
            validate_event(&Event::new(" \t", "msg")),
            Err(ValidationError::EmptyLevel)
        );
        assert_eq!(
            validate_event(&Event::new("info", "  \n")),
            Err(ValidationError::EmptyMessage)
        );
        assert_eq!(validate_event(&Event::new("info", " padded ")), Ok(()));
    }

    #[tokio::test]
    async fn test_invalid_event_never_enters_buffer() {
        let client = Arc::new(CountingClient::default());
        let appender =
            Appender::with_client(&quiet_config(), client, Arc::new(RecordingFallback::new()))
                .unwrap();

        let err = appender.log(Event::new("info", "")).unwrap_err();
        assert!(matches!(err, AppenderError::Validation(ValidationError::EmptyMessage)));
        assert_eq!(appender.stats().buffered, 0);
        appender.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_log_buffers_until_flush() {
        let client = Arc::new(CountingClient::default());
        let appender = Appender::with_client(
            &quiet_config(),
            client.clone(),
            Arc::new(RecordingFallback::new()),
        )
        .unwrap();

        let ts = Local.with_ymd_and_hms(2024, 3, 7, 10, 0, 0).unwrap();
        appender.log(Event::at("info", "hello", ts)).unwrap();
        assert_eq!(appender.stats().buffered, 1);

        let report = appender.flush().await.unwrap();
        assert_eq!(report.delivered, 1);
        assert_eq!(appender.stats().buffered, 0);

        let requests = client.requests.lock().unwrap().clone();
        assert_eq!(requests.len(), 1);
        assert_eq!(
            requests[0].entries()[0].action.index.index,
            "semantic_logger-2024.03.07"
        );
        drop(requests);

        appender.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_log_after_close_is_rejected() {
        let client = Arc::new(CountingClient::default());
        let appender =
            Appender::with_client(&quiet_config(), client, Arc::new(RecordingFallback::new()))
                .unwrap();

        appender.close().await.unwrap();
        assert!(appender.is_closed());
        assert!(matches!(
            appender.log(Event::new("info", "late")),
            Err(AppenderError::Closed)
        ));
        assert!(matches!(appender.flush().await, Err(AppenderError::Closed)));
    }

    #[tokio::test]
    async fn test_overflow_is_reported_to_fallback() {
        let config = AppenderConfig {
            batch_size: 2,
            max_buffered: 2,
            flush_interval: Duration::from_secs(3600),
            ..Default::default()
        };
        let fallback = Arc::new(RecordingFallback::new());
        // Hold the shipper lock so the size-triggered flush cannot drain
        let client = Arc::new(CountingClient::default());
        let appender = Appender::with_client(&config, client, fallback.clone()).unwrap();
        let guard = appender.shipper.lock().await;

        for m in ["a", "b", "c"] {
            appender.log(Event::new("info", m)).unwrap();
        }
        drop(guard);

        let failures = fallback.failures();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].body.message, "a");
        assert_eq!(failures[0].reason, "buffer full");
        assert_eq!(appender.stats().dropped, 1);

        appender.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_drop_without_close_reports_pending() {
        let fallback = Arc::new(RecordingFallback::new());
        let appender = Appender::with_client(
            &quiet_config(),
            Arc::new(CountingClient::default()),
            fallback.clone(),
        )
        .unwrap();

        appender.log(Event::new("warn", "unsent")).unwrap();
        drop(appender);

        let failures = fallback.failures();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].body.message, "unsent");
    }

    /// Times out on the first request, accepts everything after.
    #[derive(Default)]
    struct FirstCallTimesOut {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl BulkClient for FirstCallTimesOut {
        async fn bulk_write(&self, request: &BulkRequest) -> Result<BulkResponse, TransportError> {
            if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                return Err(TransportError::Timeout);
            }
            Ok(BulkResponse::accepted(request))
        }
    }

    #[tokio::test]
    async fn test_drop_without_close_reports_held_back_batch() {
        let fallback = Arc::new(RecordingFallback::new());
        let appender = Appender::with_client(
            &quiet_config(),
            Arc::new(FirstCallTimesOut::default()),
            fallback.clone(),
        )
        .unwrap();

        appender.log(Event::new("info", "held")).unwrap();
        let report = appender.flush().await.unwrap();
        assert_eq!(report.requeued, 1);
        assert_eq!(appender.stats().buffered, 0);

        appender.log(Event::new("info", "buffered")).unwrap();
        drop(appender);

        let failures = fallback.failures();
        let messages: Vec<&str> = failures.iter().map(|f| f.body.message.as_str()).collect();
        assert_eq!(messages, vec!["held", "buffered"]);
        assert!(failures
            .iter()
            .all(|f| f.reason == "appender dropped without close"));
    }
}

use crate::config::types::OverflowStrategy;
use crate::document::BulkDocument;
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};
use thiserror::Error;
use tokio::sync::Notify;

/// Bounded FIFO of documents waiting for the next flush.
///
/// Appends never wait on a flush: crossing the flush threshold only stores a
/// wake-up for the flush worker. Repeated wake-ups before the worker runs
/// coalesce into one.
pub struct BatchBuffer {
    capacity: usize,
    flush_threshold: usize,
    strategy: OverflowStrategy,
    state: Mutex<BufferState>,
    flush_signal: Notify,
}

#[derive(Default)]
struct BufferState {
    documents: VecDeque<BulkDocument>,
    closed: bool,
    appended: u64,
    dropped: u64,
}

impl BatchBuffer {
    pub fn new(capacity: usize, flush_threshold: usize, strategy: OverflowStrategy) -> Self {
        Self {
            capacity: capacity.max(1),
            flush_threshold: flush_threshold.max(1),
            strategy,
            state: Mutex::new(BufferState::default()),
            flush_signal: Notify::new(),
        }
    }

    /// Add a document to the back of the buffer.
    ///
    /// Returns the document that had to be given up when the buffer was full:
    /// the oldest one under `DropOldest`, the incoming one under `DropNewest`.
    pub fn append(&self, doc: BulkDocument) -> Result<Option<BulkDocument>, BufferError> {
        let (overflow, len) = {
            let mut state = self.lock();
            if state.closed {
                return Err(BufferError::Closed);
            }

            let overflow = if state.documents.len() >= self.capacity {
                state.dropped += 1;
                match self.strategy {
                    OverflowStrategy::DropOldest => {
                        let evicted = state.documents.pop_front();
                        state.documents.push_back(doc);
                        state.appended += 1;
                        evicted
                    }
                    OverflowStrategy::DropNewest => Some(doc),
                }
            } else {
                state.documents.push_back(doc);
                state.appended += 1;
                None
            };

            (overflow, state.documents.len())
        };

        if overflow.is_some() {
            tracing::warn!(
                capacity = self.capacity,
                strategy = ?self.strategy,
                "Dropping document due to buffer full"
            );
        }

        if len >= self.flush_threshold {
            self.flush_signal.notify_one();
        }

        Ok(overflow)
    }

    /// Remove and return every buffered document, oldest first.
    pub fn drain(&self) -> Vec<BulkDocument> {
        let mut state = self.lock();
        std::mem::take(&mut state.documents).into()
    }

    /// Stop accepting documents. Already buffered documents stay until drained.
    pub fn close(&self) {
        self.lock().closed = true;
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Resolves once the flush threshold has been crossed since the last wait.
    pub async fn flush_requested(&self) {
        self.flush_signal.notified().await;
    }

    pub fn len(&self) -> usize {
        self.lock().documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> BufferStats {
        let state = self.lock();
        BufferStats {
            buffered: state.documents.len(),
            capacity: self.capacity,
            flush_threshold: self.flush_threshold,
            appended: state.appended,
            dropped: state.dropped,
        }
    }

    fn lock(&self) -> MutexGuard<'_, BufferState> {
        // The state stays consistent across a panicking holder, so keep going
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferStats {
    pub buffered: usize,
    pub capacity: usize,
    pub flush_threshold: usize,
    pub appended: u64,
    pub dropped: u64,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum BufferError {
    #[error("buffer is closed")]
    Closed,
}

#![allow(dead_code)]

use async_trait::async_trait;
use logship::client::{BulkClient, BulkRequest, BulkResponse, TransportError};
use std::collections::VecDeque;
use std::sync::Mutex;

/// In-memory backend that records every request and replies from a script.
///
/// Once the script runs out every item is accepted.
#[derive(Default)]
pub struct MockBackend {
    requests: Mutex<Vec<BulkRequest>>,
    script: Mutex<VecDeque<Reply>>,
}

enum Reply {
    /// Per-item statuses laid over an all-accepted response
    Statuses(Vec<u16>),
    Response(BulkResponse),
    Error(TransportError),
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn then_statuses(self, statuses: Vec<u16>) -> Self {
        self.script.lock().unwrap().push_back(Reply::Statuses(statuses));
        self
    }

    pub fn then_response(self, response: BulkResponse) -> Self {
        self.script.lock().unwrap().push_back(Reply::Response(response));
        self
    }

    pub fn then_error(self, error: TransportError) -> Self {
        self.script.lock().unwrap().push_back(Reply::Error(error));
        self
    }

    pub fn requests(&self) -> Vec<BulkRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn messages(&self) -> Vec<Vec<String>> {
        self.requests()
            .iter()
            .map(|r| r.entries().iter().map(|e| e.body.message.clone()).collect())
            .collect()
    }
}

#[async_trait]
impl BulkClient for MockBackend {
    async fn bulk_write(&self, request: &BulkRequest) -> Result<BulkResponse, TransportError> {
        self.requests.lock().unwrap().push(request.clone());

        let next = self.script.lock().unwrap().pop_front();
        match next {
            None => Ok(BulkResponse::accepted(request)),
            Some(Reply::Error(e)) => Err(e),
            Some(Reply::Response(response)) => Ok(response),
            Some(Reply::Statuses(statuses)) => {
                let mut response = BulkResponse::accepted(request);
                for (item, status) in response.items.iter_mut().zip(statuses) {
                    item.index.status = status;
                    if status >= 300 {
                        item.index.error = Some(serde_json::json!({
                            "type": "rejected",
                            "reason": format!("status {}", status)
                        }));
                    }
                }
                response.errors = response.items.iter().any(|i| !i.index.is_success());
                Ok(response)
            }
        }
    }
}

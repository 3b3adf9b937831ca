//! Replays canned responses and records every request
//!
//! Used to exercise adapter request building, signing and error mapping
//! without network access.

use crate::error::TransportError;
use crate::transport::{RestRequest, RestResponse, RestTransport};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;

#[derive(Default)]
pub struct ScriptedTransport {
    responses: Mutex<VecDeque<Result<RestResponse, TransportError>>>,
    requests: Mutex<Vec<RestRequest>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a response with the given status and JSON body
    pub fn push(&self, status: u16, body: impl Into<String>) -> &Self {
        self.responses
            .lock()
            .push_back(Ok(RestResponse::new(status, body)));
        self
    }

    /// Queue a transport failure
    pub fn push_error(&self, error: TransportError) -> &Self {
        self.responses.lock().push_back(Err(error));
        self
    }

    /// Requests sent so far, oldest first
    pub fn requests(&self) -> Vec<RestRequest> {
        self.requests.lock().clone()
    }

    pub fn remaining(&self) -> usize {
        self.responses.lock().len()
    }
}

#[async_trait]
impl RestTransport for ScriptedTransport {
    async fn send(&self, request: RestRequest) -> Result<RestResponse, TransportError> {
        self.requests.lock().push(request);
        self.responses
            .lock()
            .pop_front()
            .unwrap_or_else(|| Err(TransportError::Network("no scripted response".into())))
    }
}

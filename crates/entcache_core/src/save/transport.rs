//! Save transport abstraction.

use super::{SaveFailure, SaveRequest, SaveResponse};
use parking_lot::Mutex;
use std::collections::VecDeque;

/// Sends save requests to the data service.
///
/// This trait abstracts the network layer so that HTTP adapters, in-memory
/// servers and scripted mocks can be used interchangeably.
pub trait SaveTransport: Send + Sync {
    /// Saves the request, returning the server's view of the saved entities.
    fn save_changes(&self, request: &SaveRequest) -> Result<SaveResponse, SaveFailure>;
}

/// A scripted transport for testing.
///
/// Responses are returned in the order they were queued; every request is
/// recorded.
#[derive(Debug, Default)]
pub struct MockSaveTransport {
    responses: Mutex<VecDeque<Result<SaveResponse, SaveFailure>>>,
    requests: Mutex<Vec<SaveRequest>>,
}

impl MockSaveTransport {
    /// Creates a transport with no scripted responses.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a successful response.
    pub fn push_response(&self, response: SaveResponse) {
        self.responses.lock().push_back(Ok(response));
    }

    /// Queues a failure.
    pub fn push_failure(&self, failure: SaveFailure) {
        self.responses.lock().push_back(Err(failure));
    }

    /// Number of requests received.
    pub fn call_count(&self) -> usize {
        self.requests.lock().len()
    }

    /// Requests received so far.
    pub fn requests(&self) -> Vec<SaveRequest> {
        self.requests.lock().clone()
    }
}

impl SaveTransport for MockSaveTransport {
    fn save_changes(&self, request: &SaveRequest) -> Result<SaveResponse, SaveFailure> {
        self.requests.lock().push(request.clone());
        self.responses
            .lock()
            .pop_front()
            .unwrap_or_else(|| Err(SaveFailure::new("no mock save response queued")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> SaveRequest {
        SaveRequest {
            resource_name: "SaveChanges".into(),
            tag: None,
            entities: Vec::new(),
        }
    }

    #[test]
    fn scripted_responses_in_order() {
        let transport = MockSaveTransport::new();
        transport.push_response(SaveResponse::default());
        transport.push_failure(SaveFailure::new("boom"));

        assert!(transport.save_changes(&request()).is_ok());
        let err = transport.save_changes(&request()).unwrap_err();
        assert_eq!(err.message, "boom");
        assert_eq!(transport.call_count(), 2);
    }

    #[test]
    fn unscripted_call_fails() {
        let transport = MockSaveTransport::new();
        assert!(transport.save_changes(&request()).is_err());
        assert_eq!(transport.requests().len(), 1);
    }
}

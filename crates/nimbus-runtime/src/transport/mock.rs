//! Scriptable in-memory transport for tests.

use super::{CloudTransport, Page};
use crate::error::ProviderError;
use async_trait::async_trait;
use nimbus_core::{OperationRequest, Parameters};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

type Handler = Arc<dyn Fn(&OperationRequest, Option<&str>) -> Result<Page, ProviderError> + Send + Sync>;

/// A call the mock received.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedCall {
    pub service: String,
    pub operation: String,
    pub region: String,
    pub parameters: Parameters,
    pub cursor: Option<String>,
}

#[derive(Default)]
struct State {
    queues: HashMap<(String, String), VecDeque<Result<Page, ProviderError>>>,
    handlers: HashMap<(String, String), Handler>,
    calls: Vec<RecordedCall>,
}

/// Replays scripted responses per `(service, operation)`.
///
/// Queued responses are consumed first; once a queue is empty the handler for
/// the operation (if any) answers. Anything else fails with `UnscriptedCall`.
#[derive(Default, Clone)]
pub struct MockTransport {
    state: Arc<Mutex<State>>,
}

fn key(service: &str, operation: &str) -> (String, String) {
    (service.to_ascii_lowercase(), nimbus_core::to_snake_case(operation))
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue one response.
    pub fn push(&self, service: &str, operation: &str, response: Result<Page, ProviderError>) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state
            .queues
            .entry(key(service, operation))
            .or_default()
            .push_back(response);
    }

    /// Queue a successful page.
    pub fn push_page(&self, service: &str, operation: &str, page: Page) {
        self.push(service, operation, Ok(page));
    }

    /// Queue a failure.
    pub fn push_error(&self, service: &str, operation: &str, error: ProviderError) {
        self.push(service, operation, Err(error));
    }

    /// Answer every call to `(service, operation)` with `handler`.
    pub fn on<F>(&self, service: &str, operation: &str, handler: F)
    where
        F: Fn(&OperationRequest, Option<&str>) -> Result<Page, ProviderError> + Send + Sync + 'static,
    {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.handlers.insert(key(service, operation), Arc::new(handler));
    }

    /// Every call received so far, in order.
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .calls
            .clone()
    }

    /// Number of calls received for `(service, operation)`.
    pub fn call_count(&self, service: &str, operation: &str) -> usize {
        let (service, operation) = key(service, operation);
        self.calls()
            .iter()
            .filter(|c| c.service == service && c.operation == operation)
            .count()
    }
}

#[async_trait]
impl CloudTransport for MockTransport {
    async fn call(
        &self,
        request: &OperationRequest,
        cursor: Option<&str>,
    ) -> Result<Page, ProviderError> {
        let handler = {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            state.calls.push(RecordedCall {
                service: request.service().to_string(),
                operation: request.operation().to_string(),
                region: request.region().to_string(),
                parameters: request.parameters().clone(),
                cursor: cursor.map(str::to_string),
            });
            let k = key(request.service(), request.operation());
            if let Some(response) = state.queues.get_mut(&k).and_then(VecDeque::pop_front) {
                return response;
            }
            state.handlers.get(&k).cloned()
        };
        match handler {
            Some(handler) => handler(request, cursor),
            None => Err(ProviderError::new(
                "UnscriptedCall",
                format!("no response scripted for {}", request.qualified_name()),
            )),
        }
    }
}

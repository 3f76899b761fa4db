//! LLM Backend trait and implementations.
//!
//! This module defines the abstraction layer every provider adapter
//! implements: a streaming call over the neutral message history that yields
//! [`ProviderEvent`]s, plus a scripted mock implementation for testing.

use std::collections::VecDeque;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::Stream;
use parking_lot::Mutex;

use crate::error::{LlmError, Result};
use crate::types::{Message, ToolDefinition};

// ─────────────────────────────────────────────────────────────────────────────
// Shared Retry Logic
// ─────────────────────────────────────────────────────────────────────────────

/// Execute an async operation with exponential backoff retry.
///
/// Retries only on transient errors (network failures, rate limits).
/// Non-retryable errors are returned immediately. Adapters use this to open
/// the streaming connection; once a stream is flowing it is never retried.
pub async fn with_retry<F, Fut, T>(
    max_retries: u32,
    initial_backoff: Duration,
    backend_name: &str,
    mut f: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    let mut backoff = initial_backoff;
    let mut attempt = 0;

    loop {
        match f().await {
            Ok(result) => return Ok(result),
            Err(e) if !e.is_retryable() || attempt >= max_retries => return Err(e),
            Err(e) => {
                let wait = e.retry_after().unwrap_or(backoff);
                attempt += 1;
                tracing::warn!(
                    backend = backend_name,
                    attempt = attempt,
                    max_retries = max_retries,
                    backoff_ms = wait.as_millis() as u64,
                    error = %e,
                    "Request failed, retrying"
                );
                tokio::time::sleep(wait).await;
                backoff *= 2;
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Streaming Types
// ─────────────────────────────────────────────────────────────────────────────

/// A streaming response from an LLM backend.
pub type ResponseStream = Pin<Box<dyn Stream<Item = Result<ProviderEvent>> + Send + 'static>>;

/// Provider-neutral events emitted while a model turn streams.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderEvent {
    /// Text produced by the model, forwarded as soon as it arrives.
    Content(String),
    /// A fragment of a tool call at a given position index.
    ///
    /// Any piece may be absent; present pieces are appended to the call
    /// accumulated for `index`.
    ToolCallDelta {
        index: usize,
        id: Option<String>,
        name: Option<String>,
        arguments: Option<String>,
    },
    /// A token usage report; reports within a turn are additive.
    Usage(u64),
}

impl ProviderEvent {
    /// Text content event.
    pub fn content(text: impl Into<String>) -> Self {
        Self::Content(text.into())
    }

    /// A fragment introducing a call with its id and name.
    pub fn tool_call_start(index: usize, id: impl Into<String>, name: impl Into<String>) -> Self {
        Self::ToolCallDelta {
            index,
            id: Some(id.into()),
            name: Some(name.into()),
            arguments: None,
        }
    }

    /// A fragment carrying only argument text.
    pub fn tool_call_arguments(index: usize, arguments: impl Into<String>) -> Self {
        Self::ToolCallDelta {
            index,
            id: None,
            name: None,
            arguments: Some(arguments.into()),
        }
    }

    /// A complete call in a single fragment.
    pub fn tool_call(
        index: usize,
        id: impl Into<String>,
        name: impl Into<String>,
        arguments: impl Into<String>,
    ) -> Self {
        Self::ToolCallDelta {
            index,
            id: Some(id.into()),
            name: Some(name.into()),
            arguments: Some(arguments.into()),
        }
    }
}

/// Rough token estimate of four characters per token.
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count() / 4
}

// ─────────────────────────────────────────────────────────────────────────────
// LLM Backend Trait
// ─────────────────────────────────────────────────────────────────────────────

/// Trait for LLM provider adapters.
///
/// An adapter translates the neutral history and tool catalog into the
/// provider's request shape and normalizes the provider's streaming response
/// into [`ProviderEvent`]s. Adapters that cannot express tool calling accept
/// the catalog and ignore it.
#[async_trait]
pub trait LlmBackend: Send + Sync {
    /// Get the name of this backend.
    fn name(&self) -> &str;

    /// Start a streaming model turn.
    ///
    /// Errors returned here happened before any output was produced (auth,
    /// rate limit, unreachable host). Errors after that arrive as `Err` items
    /// and terminate the stream.
    async fn stream(
        &self,
        history: &[Message],
        model: &str,
        tools: &[ToolDefinition],
    ) -> Result<ResponseStream>;

    /// Count tokens in `text` the way this provider would.
    fn count_tokens(&self, text: &str) -> usize {
        estimate_tokens(text)
    }
}

/// A backend that can be shared across threads.
pub type SharedBackend = Arc<dyn LlmBackend>;

// ─────────────────────────────────────────────────────────────────────────────
// Mock Backend
// ─────────────────────────────────────────────────────────────────────────────

/// A request received by [`MockBackend`].
#[derive(Debug, Clone)]
pub struct MockRequest {
    pub history: Vec<Message>,
    pub model: String,
    pub tools: Vec<ToolDefinition>,
}

#[derive(Debug)]
enum MockTurn {
    /// Yield the events, then optionally fail mid-stream.
    Events(Vec<ProviderEvent>, Option<LlmError>),
    /// Fail before the stream starts.
    Reject(LlmError),
    /// Yield the events, then never finish.
    Stall(Vec<ProviderEvent>),
}

/// A mock backend for testing purposes.
///
/// Each call to [`LlmBackend::stream`] consumes the next scripted turn, which
/// makes agent-loop tests deterministic. Requests are logged so tests can
/// inspect the history each turn was given.
#[derive(Debug)]
pub struct MockBackend {
    name: String,
    turns: Mutex<VecDeque<MockTurn>>,
    request_log: Mutex<Vec<MockRequest>>,
}

impl MockBackend {
    /// Create a mock backend with one event list per model turn.
    ///
    /// If more turns are requested than scripted, `stream` returns an error.
    pub fn new(turns: Vec<Vec<ProviderEvent>>) -> Self {
        Self {
            name: "mock".to_string(),
            turns: Mutex::new(
                turns
                    .into_iter()
                    .map(|events| MockTurn::Events(events, None))
                    .collect(),
            ),
            request_log: Mutex::new(Vec::new()),
        }
    }

    /// Create a mock backend with a single text response.
    pub fn with_text(text: impl Into<String>) -> Self {
        Self::new(vec![vec![ProviderEvent::content(text)]])
    }

    /// Append a turn that fails before streaming starts.
    pub fn then_reject(self, error: LlmError) -> Self {
        self.turns.lock().push_back(MockTurn::Reject(error));
        self
    }

    /// Append a turn that yields `events` and then fails mid-stream.
    pub fn then_fail(self, events: Vec<ProviderEvent>, error: LlmError) -> Self {
        self.turns
            .lock()
            .push_back(MockTurn::Events(events, Some(error)));
        self
    }

    /// Append a turn that yields `events` and then stays open forever.
    pub fn then_stall(self, events: Vec<ProviderEvent>) -> Self {
        self.turns.lock().push_back(MockTurn::Stall(events));
        self
    }

    /// Append a normal turn.
    pub fn then(self, events: Vec<ProviderEvent>) -> Self {
        self.turns.lock().push_back(MockTurn::Events(events, None));
        self
    }

    /// Get all requests that were made to this backend.
    pub fn requests(&self) -> Vec<MockRequest> {
        self.request_log.lock().clone()
    }

    /// Get the number of requests made.
    pub fn request_count(&self) -> usize {
        self.request_log.lock().len()
    }
}

#[async_trait]
impl LlmBackend for MockBackend {
    fn name(&self) -> &str {
        &self.name
    }

    async fn stream(
        &self,
        history: &[Message],
        model: &str,
        tools: &[ToolDefinition],
    ) -> Result<ResponseStream> {
        self.request_log.lock().push(MockRequest {
            history: history.to_vec(),
            model: model.to_string(),
            tools: tools.to_vec(),
        });

        let turn = self.turns.lock().pop_front().ok_or_else(|| {
            LlmError::Backend("MockBackend: no more responses available".to_string())
        })?;

        match turn {
            MockTurn::Reject(error) => Err(error),
            MockTurn::Events(events, error) => {
                let items = events.into_iter().map(Ok).chain(error.map(Err));
                Ok(Box::pin(futures::stream::iter(items.collect::<Vec<_>>())))
            }
            MockTurn::Stall(events) => {
                use futures::StreamExt;
                let items = futures::stream::iter(events.into_iter().map(Ok));
                Ok(Box::pin(items.chain(futures::stream::pending())))
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use std::sync::atomic::{AtomicU32, Ordering};

    async fn collect(stream: ResponseStream) -> Vec<Result<ProviderEvent>> {
        stream.collect().await
    }

    #[tokio::test]
    async fn test_mock_backend_single_response() {
        let backend = MockBackend::with_text("Hello!");

        let stream = backend
            .stream(&[Message::user("Hi")], "test-model", &[])
            .await
            .unwrap();
        let events = collect(stream).await;

        assert_eq!(events.len(), 1);
        assert_eq!(
            events[0].as_ref().unwrap(),
            &ProviderEvent::Content("Hello!".to_string())
        );
        assert_eq!(backend.request_count(), 1);
        assert_eq!(backend.requests()[0].model, "test-model");
    }

    #[tokio::test]
    async fn test_mock_backend_multiple_turns() {
        let backend = MockBackend::new(vec![
            vec![ProviderEvent::tool_call(0, "call_1", "lookup", "{}")],
            vec![ProviderEvent::content("Second")],
        ]);

        let first = collect(backend.stream(&[], "m", &[]).await.unwrap()).await;
        let second = collect(backend.stream(&[], "m", &[]).await.unwrap()).await;

        assert!(matches!(
            first[0].as_ref().unwrap(),
            ProviderEvent::ToolCallDelta { index: 0, .. }
        ));
        assert_eq!(
            second[0].as_ref().unwrap(),
            &ProviderEvent::content("Second")
        );
        assert_eq!(backend.request_count(), 2);
    }

    #[tokio::test]
    async fn test_mock_backend_exhausted() {
        let backend = MockBackend::new(vec![]);
        let result = backend.stream(&[Message::user("Hi")], "m", &[]).await;
        assert!(result.is_err());
        assert_eq!(backend.request_count(), 1);
    }

    #[tokio::test]
    async fn test_mock_backend_mid_stream_failure() {
        let backend = MockBackend::new(vec![]).then_fail(
            vec![ProviderEvent::content("partial")],
            LlmError::Network("reset".to_string()),
        );

        let events = collect(backend.stream(&[], "m", &[]).await.unwrap()).await;
        assert_eq!(events.len(), 2);
        assert!(events[0].is_ok());
        assert!(matches!(events[1], Err(LlmError::Network(_))));
    }

    #[tokio::test]
    async fn test_mock_backend_reject() {
        let backend = MockBackend::new(vec![]).then_reject(LlmError::Auth("bad key".to_string()));
        let result = backend.stream(&[], "m", &[]).await;
        assert!(matches!(result, Err(LlmError::Auth(_))));
    }

    #[tokio::test]
    async fn test_with_retry_recovers_from_transient_error() {
        let counter = AtomicU32::new(0);
        let attempts = &counter;
        let result = with_retry(3, Duration::from_millis(1), "test", move || async move {
            if attempts.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(LlmError::Network("flaky".to_string()))
            } else {
                Ok(42)
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_with_retry_gives_up_on_non_retryable() {
        let counter = AtomicU32::new(0);
        let attempts = &counter;
        let result: Result<()> = with_retry(3, Duration::from_millis(1), "test", move || async move {
            attempts.fetch_add(1, Ordering::SeqCst);
            Err(LlmError::Auth("nope".to_string()))
        })
        .await;

        assert!(matches!(result, Err(LlmError::Auth(_))));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_with_retry_exhausts() {
        let counter = AtomicU32::new(0);
        let attempts = &counter;
        let result: Result<()> = with_retry(2, Duration::from_millis(1), "test", move || async move {
            attempts.fetch_add(1, Ordering::SeqCst);
            Err(LlmError::Network("down".to_string()))
        })
        .await;

        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_estimate_tokens() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("abcdefgh"), 2);
    }
}

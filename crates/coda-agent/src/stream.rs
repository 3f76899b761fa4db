//! The agent loop.
//!
//! One turn streams a model response, forwards text as it arrives, collects
//! tool-call fragments, runs the requested tools and calls the model again
//! with the extended history. It stops when a response carries no tool calls
//! or the iteration limit is reached.
//!
//! Everything the caller needs to observe is yielded as an [`AgentEvent`],
//! including the messages that must be persisted, in the order they were
//! produced.

use std::pin::Pin;
use std::sync::Arc;

use coda_llm::{Message, ProviderEvent, SharedBackend, ToolCall, ToolStatus};
use futures::{Stream, StreamExt};
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;

use crate::assembler::ToolCallAssembler;
use crate::error::{AgentError, Result};
use crate::tool::{ToolRegistry, result_status};

/// Default bound on model calls per turn.
pub const DEFAULT_MAX_ITERATIONS: u32 = 10;

// ─────────────────────────────────────────────────────────────────────────────
// Agent Events
// ─────────────────────────────────────────────────────────────────────────────

/// Events produced by the agent loop.
#[derive(Debug, Clone, PartialEq)]
pub enum AgentEvent {
    /// Model text, forwarded as soon as it arrives.
    Content(String),
    /// Progress note about tool use.
    Thought(String),
    /// A token usage report from the provider. Reports are additive.
    Usage(u64),
    /// A message appended to the history that must be stored before the
    /// stream is polled again.
    Persist(Message),
    /// The model answered without calling tools. Always the last event of a
    /// successful turn.
    Done,
}

/// A boxed stream of agent events.
pub type AgentStream = Pin<Box<dyn Stream<Item = Result<AgentEvent>> + Send + 'static>>;

// ─────────────────────────────────────────────────────────────────────────────
// Agent Loop
// ─────────────────────────────────────────────────────────────────────────────

/// Drives one turn against a backend and a tool registry.
#[derive(Clone)]
pub struct AgentLoop {
    backend: SharedBackend,
    tools: Arc<ToolRegistry>,
    model: String,
    max_iterations: u32,
    cancellation: CancellationToken,
}

impl AgentLoop {
    pub fn new(backend: SharedBackend, tools: Arc<ToolRegistry>, model: impl Into<String>) -> Self {
        Self {
            backend,
            tools,
            model: model.into(),
            max_iterations: DEFAULT_MAX_ITERATIONS,
            cancellation: CancellationToken::new(),
        }
    }

    /// Bound the number of model calls in one turn.
    pub fn with_max_iterations(mut self, max_iterations: u32) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    /// Stop the turn when `token` is cancelled.
    ///
    /// Cancellation drops the provider stream at once. A tool call already
    /// running is awaited and its result is still yielded for persistence.
    /// No further tool or model call starts, and calls that never ran are
    /// answered with a `Cancelled` error result.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    /// Run the turn over `history`.
    ///
    /// Provider failures end the stream with an `Err` item. Tool failures are
    /// reported to the model and never end the turn.
    pub fn run(self, history: Vec<Message>) -> AgentStream {
        let Self {
            backend,
            tools,
            model,
            max_iterations,
            cancellation,
        } = self;
        let catalog = tools.list_callable_tools();

        Box::pin(async_stream::stream! {
            let mut history = history;
            let mut iterations: u32 = 0;

            loop {
                if cancellation.is_cancelled() {
                    yield Err(AgentError::Cancelled);
                    return;
                }
                if iterations >= max_iterations {
                    tracing::warn!(model = %model, max_iterations, "Iteration limit reached");
                    yield Err(AgentError::MaxIterations(max_iterations));
                    return;
                }
                iterations += 1;
                tracing::debug!(
                    model = %model,
                    iteration = iterations,
                    messages = history.len(),
                    "Calling model"
                );

                let opened = tokio::select! {
                    biased;
                    _ = cancellation.cancelled() => None,
                    result = backend.stream(&history, &model, &catalog) => Some(result),
                };
                let mut provider = match opened {
                    None => {
                        yield Err(AgentError::Cancelled);
                        return;
                    }
                    Some(Err(e)) => {
                        yield Err(e.into());
                        return;
                    }
                    Some(Ok(stream)) => stream,
                };

                let mut assembler = ToolCallAssembler::new();
                loop {
                    let next = tokio::select! {
                        biased;
                        _ = cancellation.cancelled() => None,
                        item = provider.next() => Some(item),
                    };
                    let event = match next {
                        None => {
                            tracing::debug!(iteration = iterations, "Turn cancelled mid-stream");
                            yield Err(AgentError::Cancelled);
                            return;
                        }
                        Some(None) => break,
                        Some(Some(Err(e))) => {
                            yield Err(e.into());
                            return;
                        }
                        Some(Some(Ok(event))) => event,
                    };

                    match event {
                        ProviderEvent::Content(text) => {
                            if !text.is_empty() {
                                yield Ok(AgentEvent::Content(text));
                            }
                        }
                        ProviderEvent::ToolCallDelta { index, id, name, arguments } => {
                            assembler.push(index, id.as_deref(), name.as_deref(), arguments.as_deref());
                        }
                        ProviderEvent::Usage(tokens) => {
                            yield Ok(AgentEvent::Usage(tokens));
                        }
                    }
                }
                drop(provider);

                if assembler.is_empty() {
                    tracing::debug!(iterations, "Turn complete");
                    yield Ok(AgentEvent::Done);
                    return;
                }

                tracing::debug!(iteration = iterations, calls = assembler.len(), "Model requested tools");
                let calls = assembler.finish();
                yield Ok(AgentEvent::Thought("Using tools...".to_string()));

                let request = Message::assistant_tool_calls(calls.clone());
                history.push(request.clone());
                yield Ok(AgentEvent::Persist(request));

                let mut pending = calls.into_iter();
                while let Some(call) = pending.next() {
                    if cancellation.is_cancelled() {
                        // Every call id in the stored request must get an answer.
                        for skipped in std::iter::once(call).chain(pending) {
                            tracing::debug!(tool = %skipped.name, "Tool call cancelled before start");
                            yield Ok(AgentEvent::Persist(cancelled_result(&skipped)));
                        }
                        yield Err(AgentError::Cancelled);
                        return;
                    }

                    let arguments = match serde_json::from_str::<Value>(&call.arguments) {
                        Ok(arguments) => arguments,
                        Err(e) => {
                            let error = format!("Error parsing arguments for tool '{}': {}", call.name, e);
                            tracing::warn!(tool = %call.name, error = %e, "Unparsable tool arguments");
                            let message = Message::tool_result(
                                &call.id,
                                json!({ "error": error }).to_string(),
                                ToolStatus::Error,
                            );
                            yield Ok(AgentEvent::Thought(error));
                            history.push(message.clone());
                            yield Ok(AgentEvent::Persist(message));
                            continue;
                        }
                    };

                    yield Ok(AgentEvent::Thought(format!("Calling `{}`...", call.name)));
                    let result = tools.invoke(&call.name, arguments).await;
                    let (message, note) = tool_message(&call, &result);

                    history.push(message.clone());
                    yield Ok(AgentEvent::Persist(message));
                    yield Ok(AgentEvent::Thought(note));
                }
            }
        })
    }
}

fn cancelled_result(call: &ToolCall) -> Message {
    Message::tool_result(
        &call.id,
        json!({ "error": "Cancelled" }).to_string(),
        ToolStatus::Error,
    )
}

/// The tool message answering `call`, and the progress note that follows it.
fn tool_message(call: &ToolCall, result: &Value) -> (Message, String) {
    let status = result_status(result);
    let note = match status {
        ToolStatus::Error => {
            let error = match result.get("error") {
                Some(Value::String(s)) => s.clone(),
                Some(other) => other.to_string(),
                None => String::new(),
            };
            format!("Error in `{}`: {}", call.name, error)
        }
        ToolStatus::Success => format!("`{}` output received.", call.name),
    };
    (
        Message::tool_result(&call.id, result.to_string(), status),
        note,
    )
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

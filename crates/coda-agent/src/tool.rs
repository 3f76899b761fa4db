//! Tool trait and registry.
//!
//! Tools are external functions the model can call mid-conversation. Each one
//! declares a JSON Schema for its arguments and executes asynchronously.
//! [`ToolRegistry::invoke`] never fails: every fault is turned into a result
//! object carrying an `error` key so the model can see what went wrong.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use coda_llm::{ToolDefinition, ToolStatus};
use serde_json::{Value, json};
use thiserror::Error;

/// Maximum description length sent to the model, in characters.
pub const MAX_DESCRIPTION_CHARS: usize = 1024;

// ─────────────────────────────────────────────────────────────────────────────
// Tool Errors
// ─────────────────────────────────────────────────────────────────────────────

/// Faults raised while executing a tool.
///
/// These never leave the registry; see [`ToolRegistry::invoke`].
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ToolError {
    #[error("Tool '{0}' not found.")]
    NotFound(String),

    /// The tool endpoint answered with a non-2xx status.
    #[error("HTTP Error {status}")]
    Http { status: u16, body: String },

    #[error("{0}")]
    Network(String),

    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("invalid JSON response: {0}")]
    MalformedResponse(String),
}

impl ToolError {
    /// The result object the model sees for this fault.
    pub fn to_result(&self) -> Value {
        match self {
            Self::NotFound(_) => json!({ "error": self.to_string() }),
            Self::Http { body, .. } => json!({
                "error": self.to_string(),
                "details": body,
            }),
            other => json!({ "error": format!("Execution failed: {other}") }),
        }
    }
}

/// Classify a tool result: an object with an `error` key is a failure.
pub fn result_status(result: &Value) -> ToolStatus {
    if result.get("error").is_some() {
        ToolStatus::Error
    } else {
        ToolStatus::Success
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tool Trait
// ─────────────────────────────────────────────────────────────────────────────

/// A function the model can call.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Unique name the model uses to call this tool.
    fn name(&self) -> &str;

    /// Human-readable description of what the tool does.
    fn description(&self) -> &str;

    /// JSON Schema for the tool's arguments.
    fn parameters(&self) -> Value;

    /// Execute the tool with parsed arguments.
    ///
    /// One call, no retries. The returned value is handed to the model as-is.
    async fn execute(&self, arguments: Value) -> std::result::Result<Value, ToolError>;
}

// ─────────────────────────────────────────────────────────────────────────────
// Tool Registry
// ─────────────────────────────────────────────────────────────────────────────

/// The set of tools available to the agent.
///
/// Built once at startup and then shared read-only behind an `Arc`.
#[derive(Default, Clone)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool, replacing any tool with the same name.
    pub fn register<T: Tool + 'static>(&mut self, tool: T) {
        self.register_arc(Arc::new(tool));
    }

    /// Register a tool from an Arc.
    pub fn register_arc(&mut self, tool: Arc<dyn Tool>) {
        let name = tool.name().to_string();
        if self.tools.insert(name.clone(), tool).is_some() {
            tracing::warn!(tool = %name, "Replacing previously registered tool");
        }
    }

    /// Get a tool by name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// All tool names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<_> = self.tools.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// The catalog handed to the model, sorted by name.
    ///
    /// Descriptions are cut to [`MAX_DESCRIPTION_CHARS`] characters.
    pub fn list_callable_tools(&self) -> Vec<ToolDefinition> {
        self.names()
            .into_iter()
            .filter_map(|name| self.tools.get(name))
            .map(|tool| {
                ToolDefinition::new(
                    tool.name(),
                    truncate_chars(tool.description(), MAX_DESCRIPTION_CHARS),
                    tool.parameters(),
                )
            })
            .collect()
    }

    /// Invoke a tool by name.
    ///
    /// Always returns a result object. Unknown tools and execution faults
    /// come back as `{"error": ...}` values.
    pub async fn invoke(&self, name: &str, arguments: Value) -> Value {
        let Some(tool) = self.get(name) else {
            tracing::warn!(tool = %name, "Model called an unknown tool");
            return ToolError::NotFound(name.to_string()).to_result();
        };

        tracing::info!(tool = %name, "Executing tool");
        match tool.execute(arguments).await {
            Ok(result) => result,
            Err(e) => {
                tracing::warn!(tool = %name, error = %e, "Tool execution failed");
                e.to_result()
            }
        }
    }
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tools", &self.names())
            .finish()
    }
}

fn truncate_chars(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Mock Tool
// ─────────────────────────────────────────────────────────────────────────────

/// A mock tool for testing.
///
/// Returns a configurable response and records every call.
#[cfg(test)]
#[derive(Debug)]
pub struct MockTool {
    name: String,
    description: String,
    parameters: Value,
    response: std::sync::Mutex<std::result::Result<Value, ToolError>>,
    delay: Option<Duration>,
    calls: std::sync::Mutex<Vec<Value>>,
}

#[cfg(test)]
impl MockTool {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: "A mock tool for testing".to_string(),
            parameters: json!({"type": "object", "properties": {}}),
            response: std::sync::Mutex::new(Ok(json!({"ok": true}))),
            delay: None,
            calls: std::sync::Mutex::new(Vec::new()),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_response(self, response: Value) -> Self {
        *self.response.lock().unwrap() = Ok(response);
        self
    }

    pub fn with_error(self, error: ToolError) -> Self {
        *self.response.lock().unwrap() = Err(error);
        self
    }

    /// Sleep before answering.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> Vec<Value> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[cfg(test)]
#[async_trait]
impl Tool for MockTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn parameters(&self) -> Value {
        self.parameters.clone()
    }

    async fn execute(&self, arguments: Value) -> std::result::Result<Value, ToolError> {
        self.calls.lock().unwrap().push(arguments);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.response.lock().unwrap().clone()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

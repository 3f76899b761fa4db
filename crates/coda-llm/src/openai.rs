//! OpenAI-compatible chat completions adapter.
//!
//! This is the only adapter with tool support. It sends the complete neutral
//! history, tool calls and tool results included, advertises the catalog, and
//! forwards streamed tool-call fragments as they arrive. Any server that
//! speaks the `/chat/completions` dialect can sit behind it.

use std::collections::VecDeque;
use std::sync::OnceLock;
use std::time::Duration;

use async_trait::async_trait;
use eventsource_stream::Event;
use reqwest::Client;
use tiktoken_rs::CoreBPE;

use crate::backend::{LlmBackend, ProviderEvent, ResponseStream, estimate_tokens, with_retry};
use crate::error::{LlmError, Result};
use crate::http;
use crate::sse::{self, Flow, FrameHandler};
use crate::types::{Message, ToolDefinition};

/// Public OpenAI endpoint.
pub const DEFAULT_OPENAI_BASE: &str = "https://api.openai.com/v1";

/// Sampling temperature used by every adapter.
pub const DEFAULT_TEMPERATURE: f32 = 0.7;

/// Settings for [`OpenAiBackend`].
#[derive(Debug, Clone)]
pub struct OpenAiConfig {
    /// Bearer token. Local compatible servers often need none.
    pub api_key: Option<String>,
    pub base_url: String,
    pub timeout: Duration,
    pub temperature: f32,
    /// Retries while opening the stream. A stream that has started is never retried.
    pub max_retries: u32,
    pub retry_backoff: Duration,
    /// Reported by [`LlmBackend::name`] and in logs.
    pub name: String,
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: DEFAULT_OPENAI_BASE.to_string(),
            timeout: http::REQUEST_TIMEOUT,
            temperature: DEFAULT_TEMPERATURE,
            max_retries: http::MAX_RETRIES,
            retry_backoff: http::RETRY_BACKOFF,
            name: "openai".to_string(),
        }
    }
}

impl OpenAiConfig {
    /// OpenAI proper with the given key.
    pub fn openai(api_key: impl Into<String>) -> Self {
        Self::default().with_api_key(api_key)
    }

    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }
}

pub struct OpenAiBackend {
    client: Client,
    config: OpenAiConfig,
}

impl OpenAiBackend {
    pub fn new(config: OpenAiConfig) -> Result<Self> {
        Ok(Self {
            client: http::build_client(config.timeout)?,
            config,
        })
    }

    fn completions_endpoint(&self) -> String {
        http::endpoint(&self.config.base_url, "chat/completions")
    }

    fn build_request<'a>(
        &self,
        history: &'a [Message],
        model: &'a str,
        tools: &'a [ToolDefinition],
    ) -> ChatRequest<'a> {
        let advertised: Vec<_> = tools.iter().map(FunctionTool::from).collect();
        ChatRequest {
            model,
            messages: history.iter().map(ChatMessage::from).collect(),
            temperature: self.config.temperature,
            stream: true,
            stream_options: StreamOptions {
                include_usage: true,
            },
            tool_choice: (!advertised.is_empty()).then_some("auto"),
            tools: advertised,
        }
    }
}

#[async_trait]
impl LlmBackend for OpenAiBackend {
    fn name(&self) -> &str {
        &self.config.name
    }

    async fn stream(
        &self,
        history: &[Message],
        model: &str,
        tools: &[ToolDefinition],
    ) -> Result<ResponseStream> {
        let body = self.build_request(history, model, tools);
        tracing::debug!(
            backend = %self.config.name,
            model,
            messages = body.messages.len(),
            tools = body.tools.len(),
            "openai: opening stream"
        );

        let response = with_retry(
            self.config.max_retries,
            self.config.retry_backoff,
            &self.config.name,
            || {
                let mut request = self.client.post(self.completions_endpoint()).json(&body);
                if let Some(key) = &self.config.api_key {
                    request = request.bearer_auth(key);
                }
                http::send(request)
            },
        )
        .await?;

        Ok(sse::event_stream(response.bytes_stream(), CompletionChunks))
    }

    fn count_tokens(&self, text: &str) -> usize {
        match cl100k() {
            Some(bpe) => bpe.encode_with_special_tokens(text).len(),
            None => estimate_tokens(text),
        }
    }
}

/// The `cl100k_base` encoder, loaded on first use. `None` if loading failed.
fn cl100k() -> Option<&'static CoreBPE> {
    static ENCODER: OnceLock<Option<CoreBPE>> = OnceLock::new();
    ENCODER
        .get_or_init(|| {
            tiktoken_rs::cl100k_base()
                .inspect_err(|e| tracing::warn!(error = %e, "cl100k_base unavailable, estimating tokens"))
                .ok()
        })
        .as_ref()
}

// ─────────────────────────────────────────────────────────────────────────────
// Request Body
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, serde::Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    stream: bool,
    stream_options: StreamOptions,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<FunctionTool<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<&'static str>,
}

#[derive(Debug, serde::Serialize)]
struct StreamOptions {
    include_usage: bool,
}

/// The neutral message shape already matches the wire format except for the
/// nested `function` object on tool calls and the absent `status` field.
#[derive(Debug, serde::Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<CallRef<'a>>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<&'a str>,
}

impl<'a> From<&'a Message> for ChatMessage<'a> {
    fn from(message: &'a Message) -> Self {
        Self {
            role: message.role.as_str(),
            content: message.content.as_deref(),
            tool_calls: message.tool_calls.as_ref().map(|calls| {
                calls
                    .iter()
                    .map(|call| CallRef {
                        id: &call.id,
                        kind: "function",
                        function: FunctionCall {
                            name: &call.name,
                            arguments: &call.arguments,
                        },
                    })
                    .collect()
            }),
            tool_call_id: message.tool_call_id.as_deref(),
        }
    }
}

#[derive(Debug, serde::Serialize)]
struct CallRef<'a> {
    id: &'a str,
    #[serde(rename = "type")]
    kind: &'static str,
    function: FunctionCall<'a>,
}

#[derive(Debug, serde::Serialize)]
struct FunctionCall<'a> {
    name: &'a str,
    arguments: &'a str,
}

#[derive(Debug, serde::Serialize)]
struct FunctionTool<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    function: FunctionSpec<'a>,
}

#[derive(Debug, serde::Serialize)]
struct FunctionSpec<'a> {
    name: &'a str,
    description: &'a str,
    parameters: &'a serde_json::Value,
}

impl<'a> From<&'a ToolDefinition> for FunctionTool<'a> {
    fn from(tool: &'a ToolDefinition) -> Self {
        Self {
            kind: "function",
            function: FunctionSpec {
                name: &tool.name,
                description: &tool.description,
                parameters: &tool.parameters,
            },
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Streamed Chunks
// ─────────────────────────────────────────────────────────────────────────────

/// Turns `chat.completion.chunk` payloads into provider events. `[DONE]`
/// ends the stream, an `error` payload fails it, and payloads that fail to
/// parse are skipped.
struct CompletionChunks;

impl FrameHandler for CompletionChunks {
    fn on_frame(&mut self, event: Event, out: &mut VecDeque<ProviderEvent>) -> Flow {
        if event.data == "[DONE]" {
            return Flow::Stop;
        }
        match serde_json::from_str::<chunk::Chunk>(&event.data) {
            Ok(parsed) => {
                if let Some(message) = parsed.failure() {
                    tracing::warn!(error = %message, "openai: provider reported a mid-stream error");
                    return Flow::Fail(LlmError::Backend(message));
                }
                out.extend(parsed.into_events());
            }
            Err(e) => tracing::debug!(error = %e, "openai: skipping unparseable chunk"),
        }
        Flow::Continue
    }
}

mod chunk {
    use crate::backend::ProviderEvent;

    #[derive(serde::Deserialize)]
    pub struct Chunk {
        #[serde(default)]
        choices: Vec<Choice>,
        usage: Option<Usage>,
        /// Either `{"message": ..}` or a bare string, depending on the server.
        error: Option<serde_json::Value>,
    }

    #[derive(serde::Deserialize)]
    struct Choice {
        delta: Option<Delta>,
    }

    #[derive(serde::Deserialize)]
    struct Delta {
        content: Option<String>,
        #[serde(default)]
        tool_calls: Vec<CallFragment>,
    }

    #[derive(serde::Deserialize)]
    struct CallFragment {
        index: Option<usize>,
        id: Option<String>,
        function: Option<FunctionFragment>,
    }

    #[derive(Default, serde::Deserialize)]
    struct FunctionFragment {
        name: Option<String>,
        arguments: Option<String>,
    }

    #[derive(serde::Deserialize)]
    struct Usage {
        total_tokens: u64,
    }

    impl Chunk {
        pub fn failure(&self) -> Option<String> {
            let error = self.error.as_ref().filter(|e| !e.is_null())?;
            let message = error
                .get("message")
                .and_then(|m| m.as_str())
                .or_else(|| error.as_str())
                .unwrap_or("stream failed without a message");
            Some(message.to_string())
        }

        /// Text first, then tool-call fragments, then usage. Only the first
        /// choice is read since requests never ask for more than one.
        pub fn into_events(self) -> Vec<ProviderEvent> {
            let mut events = Vec::new();
            let delta = self.choices.into_iter().next().and_then(|c| c.delta);

            if let Some(delta) = delta {
                if let Some(text) = delta.content.filter(|t| !t.is_empty()) {
                    events.push(ProviderEvent::Content(text));
                }
                for (position, fragment) in delta.tool_calls.into_iter().enumerate() {
                    let function = fragment.function.unwrap_or_default();
                    events.push(ProviderEvent::ToolCallDelta {
                        index: fragment.index.unwrap_or(position),
                        id: fragment.id,
                        name: function.name,
                        arguments: function.arguments,
                    });
                }
            }
            if let Some(usage) = self.usage {
                events.push(ProviderEvent::Usage(usage.total_tokens));
            }
            events
        }
    }
}

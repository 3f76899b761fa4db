//! Anthropic Messages API adapter.
//!
//! Text only. The tool catalog is accepted and ignored, and tool traffic
//! already in the history is flattened into plain user and assistant turns.

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use eventsource_stream::Event;
use reqwest::Client;

use crate::backend::{LlmBackend, ProviderEvent, ResponseStream, with_retry};
use crate::error::{LlmError, Result};
use crate::http;
use crate::openai::DEFAULT_TEMPERATURE;
use crate::sse::{self, Flow, FrameHandler};
use crate::types::{Message, Role, ToolDefinition};

const API_BASE: &str = "https://api.anthropic.com";
const API_VERSION: &str = "2023-06-01";

/// Settings for [`AnthropicBackend`].
#[derive(Debug, Clone)]
pub struct AnthropicConfig {
    pub api_key: String,
    pub base_url: String,
    /// Value of the `anthropic-version` header.
    pub api_version: String,
    pub timeout: Duration,
    /// Output token cap sent with every request.
    pub max_tokens: u32,
    pub max_retries: u32,
    pub retry_backoff: Duration,
}

impl AnthropicConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: API_BASE.to_string(),
            api_version: API_VERSION.to_string(),
            timeout: http::REQUEST_TIMEOUT,
            max_tokens: 4096,
            max_retries: http::MAX_RETRIES,
            retry_backoff: http::RETRY_BACKOFF,
        }
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
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

pub struct AnthropicBackend {
    client: Client,
    config: AnthropicConfig,
}

impl AnthropicBackend {
    pub fn new(config: AnthropicConfig) -> Result<Self> {
        Ok(Self {
            client: http::build_client(config.timeout)?,
            config,
        })
    }

    fn messages_endpoint(&self) -> String {
        http::endpoint(&self.config.base_url, "v1/messages")
    }

    fn build_request(&self, history: &[Message], model: &str) -> MessagesRequest {
        let (system, messages) = split_history(history);
        MessagesRequest {
            model: model.to_string(),
            system,
            messages,
            max_tokens: self.config.max_tokens,
            temperature: DEFAULT_TEMPERATURE,
            stream: true,
        }
    }
}

/// Lift system messages into the top-level `system` field and make the rest
/// alternate.
///
/// Tool results are sent as user text. Assistant messages that only carry
/// tool calls have no text and disappear. Neighbouring turns with the same
/// role are joined with a blank line.
fn split_history(history: &[Message]) -> (Option<String>, Vec<Turn>) {
    let mut system = Vec::new();
    let mut turns: Vec<Turn> = Vec::new();

    for message in history {
        let text = message.text();
        let role = match message.role {
            Role::System => {
                system.push(text);
                continue;
            }
            Role::Assistant => "assistant",
            Role::User | Role::Tool => "user",
        };
        if text.is_empty() {
            continue;
        }
        if let Some(last) = turns.last_mut().filter(|t| t.role == role) {
            last.content.push_str("\n\n");
            last.content.push_str(text);
        } else {
            turns.push(Turn {
                role,
                content: text.to_string(),
            });
        }
    }

    let system = if system.is_empty() {
        None
    } else {
        Some(system.join("\n\n"))
    };
    (system, turns)
}

#[async_trait]
impl LlmBackend for AnthropicBackend {
    fn name(&self) -> &str {
        "anthropic"
    }

    async fn stream(
        &self,
        history: &[Message],
        model: &str,
        tools: &[ToolDefinition],
    ) -> Result<ResponseStream> {
        let body = self.build_request(history, model);
        tracing::debug!(
            model,
            turns = body.messages.len(),
            has_system = body.system.is_some(),
            ignored_tools = tools.len(),
            "anthropic: opening stream"
        );

        let response = with_retry(
            self.config.max_retries,
            self.config.retry_backoff,
            self.name(),
            || {
                http::send(
                    self.client
                        .post(self.messages_endpoint())
                        .header("x-api-key", &self.config.api_key)
                        .header("anthropic-version", &self.config.api_version)
                        .json(&body),
                )
            },
        )
        .await?;

        Ok(sse::event_stream(response.bytes_stream(), MessagesEvents))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Wire Format
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, serde::Serialize)]
struct MessagesRequest {
    model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    messages: Vec<Turn>,
    max_tokens: u32,
    temperature: f32,
    stream: bool,
}

#[derive(Debug, serde::Serialize)]
struct Turn {
    role: &'static str,
    content: String,
}

/// Streamed event payloads. Only the fields the adapter reads are declared.
mod wire {
    #[derive(serde::Deserialize)]
    pub struct Start {
        pub message: StartMessage,
    }

    #[derive(serde::Deserialize)]
    pub struct StartMessage {
        #[serde(default)]
        pub usage: Usage,
    }

    #[derive(Default, serde::Deserialize)]
    pub struct Usage {
        #[serde(default)]
        pub input_tokens: u64,
        #[serde(default)]
        pub output_tokens: u64,
    }

    #[derive(serde::Deserialize)]
    pub struct BlockDelta {
        pub delta: Delta,
    }

    #[derive(serde::Deserialize)]
    #[serde(tag = "type", rename_all = "snake_case")]
    pub enum Delta {
        TextDelta { text: String },
        #[serde(other)]
        Other,
    }

    #[derive(serde::Deserialize)]
    pub struct MessageDelta {
        #[serde(default)]
        pub usage: Usage,
    }

    #[derive(serde::Deserialize)]
    pub struct Failure {
        pub error: FailureDetail,
    }

    #[derive(serde::Deserialize)]
    pub struct FailureDetail {
        pub message: String,
    }
}

/// Maps named Messages API events onto provider events.
///
/// `message_start` reports input tokens and `message_delta` reports output
/// tokens; since usage reports are additive the two sum to the turn total.
struct MessagesEvents;

impl FrameHandler for MessagesEvents {
    fn on_frame(&mut self, event: Event, out: &mut VecDeque<ProviderEvent>) -> Flow {
        let data = event.data.as_str();

        match event.event.as_str() {
            "message_start" => {
                if let Ok(start) = serde_json::from_str::<wire::Start>(data) {
                    out.push_back(ProviderEvent::Usage(start.message.usage.input_tokens));
                }
            }
            "content_block_delta" => {
                if let Ok(wire::BlockDelta {
                    delta: wire::Delta::TextDelta { text },
                }) = serde_json::from_str(data)
                    && !text.is_empty()
                {
                    out.push_back(ProviderEvent::Content(text));
                }
            }
            "message_delta" => {
                if let Ok(delta) = serde_json::from_str::<wire::MessageDelta>(data) {
                    out.push_back(ProviderEvent::Usage(delta.usage.output_tokens));
                }
            }
            "message_stop" => return Flow::Stop,
            "error" => {
                let message = serde_json::from_str::<wire::Failure>(data)
                    .map(|f| f.error.message)
                    .unwrap_or_else(|_| format!("unreadable stream error: {data}"));
                return Flow::Fail(LlmError::Backend(message));
            }
            _ => {}
        }
        Flow::Continue
    }
}

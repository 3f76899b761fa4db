//! Google Gemini adapter over `streamGenerateContent?alt=sse`.
//!
//! Text only, like the Anthropic adapter: tools are ignored and tool traffic
//! in the history is sent as plain text.

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use eventsource_stream::Event;
use reqwest::Client;

use crate::backend::{LlmBackend, ProviderEvent, ResponseStream, with_retry};
use crate::error::Result;
use crate::http;
use crate::openai::DEFAULT_TEMPERATURE;
use crate::sse::{self, Flow, FrameHandler};
use crate::types::{Message, Role, ToolDefinition};

const API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Settings for [`GeminiBackend`].
#[derive(Debug, Clone)]
pub struct GeminiConfig {
    /// Sent as the `x-goog-api-key` header.
    pub api_key: String,
    pub base_url: String,
    pub timeout: Duration,
    pub max_retries: u32,
    pub retry_backoff: Duration,
}

impl GeminiConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: API_BASE.to_string(),
            timeout: http::REQUEST_TIMEOUT,
            max_retries: http::MAX_RETRIES,
            retry_backoff: http::RETRY_BACKOFF,
        }
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }
}

pub struct GeminiBackend {
    client: Client,
    config: GeminiConfig,
}

impl GeminiBackend {
    pub fn new(config: GeminiConfig) -> Result<Self> {
        Ok(Self {
            client: http::build_client(config.timeout)?,
            config,
        })
    }

    fn stream_endpoint(&self, model: &str) -> String {
        http::endpoint(
            &self.config.base_url,
            &format!("models/{model}:streamGenerateContent?alt=sse"),
        )
    }
}

/// Gemini calls the assistant `model`, takes system text separately and
/// wants each turn as a list of parts. Consecutive turns with the same role
/// share one content entry.
fn generate_request(history: &[Message]) -> GenerateRequest {
    let mut instruction = Vec::new();
    let mut contents: Vec<Content> = Vec::new();

    for message in history {
        let part = Part {
            text: message.text().to_string(),
        };
        let role = match message.role {
            Role::System => {
                instruction.push(part);
                continue;
            }
            Role::Assistant => "model",
            Role::User | Role::Tool => "user",
        };
        if part.text.is_empty() {
            continue;
        }
        match contents.last_mut() {
            Some(last) if last.role == role => last.parts.push(part),
            _ => contents.push(Content {
                role,
                parts: vec![part],
            }),
        }
    }

    GenerateRequest {
        system_instruction: (!instruction.is_empty()).then_some(Instruction { parts: instruction }),
        contents,
        generation_config: GenerationConfig {
            temperature: DEFAULT_TEMPERATURE,
        },
    }
}

#[async_trait]
impl LlmBackend for GeminiBackend {
    fn name(&self) -> &str {
        "gemini"
    }

    async fn stream(
        &self,
        history: &[Message],
        model: &str,
        tools: &[ToolDefinition],
    ) -> Result<ResponseStream> {
        let body = generate_request(history);
        let url = self.stream_endpoint(model);
        tracing::debug!(
            model,
            contents = body.contents.len(),
            ignored_tools = tools.len(),
            "gemini: opening stream"
        );

        let response = with_retry(
            self.config.max_retries,
            self.config.retry_backoff,
            self.name(),
            || {
                http::send(
                    self.client
                        .post(&url)
                        .header("x-goog-api-key", &self.config.api_key)
                        .json(&body),
                )
            },
        )
        .await?;

        Ok(sse::event_stream(response.bytes_stream(), Candidates::default()))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Wire Format
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, serde::Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<Instruction>,
    contents: Vec<Content>,
    generation_config: GenerationConfig,
}

#[derive(Debug, serde::Serialize)]
struct Instruction {
    parts: Vec<Part>,
}

#[derive(Debug, serde::Serialize)]
struct Content {
    role: &'static str,
    parts: Vec<Part>,
}

#[derive(Debug, serde::Serialize, serde::Deserialize)]
struct Part {
    #[serde(default)]
    text: String,
}

#[derive(Debug, serde::Serialize)]
struct GenerationConfig {
    temperature: f32,
}

#[derive(serde::Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResponseChunk {
    #[serde(default)]
    candidates: Vec<Candidate>,
    usage_metadata: Option<UsageMetadata>,
}

#[derive(serde::Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(serde::Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(serde::Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata {
    #[serde(default)]
    total_token_count: u64,
}

/// Collects candidate text. Gemini repeats a cumulative usage total on every
/// chunk, so only the last one seen is reported, when the stream ends.
#[derive(Default)]
struct Candidates {
    total_tokens: Option<u64>,
}

impl FrameHandler for Candidates {
    fn on_frame(&mut self, event: Event, out: &mut VecDeque<ProviderEvent>) -> Flow {
        let chunk = match serde_json::from_str::<ResponseChunk>(&event.data) {
            Ok(chunk) => chunk,
            Err(e) => {
                tracing::debug!(error = %e, "gemini: skipping unparseable chunk");
                return Flow::Continue;
            }
        };

        let texts = chunk
            .candidates
            .into_iter()
            .filter_map(|c| c.content)
            .flat_map(|c| c.parts)
            .map(|p| p.text)
            .filter(|t| !t.is_empty());
        out.extend(texts.map(ProviderEvent::Content));

        if let Some(usage) = chunk.usage_metadata {
            self.total_tokens = Some(usage.total_token_count);
        }
        Flow::Continue
    }

    fn on_end(&mut self, out: &mut VecDeque<ProviderEvent>) {
        if let Some(total) = self.total_tokens.take() {
            out.push_back(ProviderEvent::Usage(total));
        }
    }
}

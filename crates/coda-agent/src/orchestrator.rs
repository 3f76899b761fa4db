//! Session orchestration.
//!
//! The [`SessionOrchestrator`] turns one chat request into a stream of
//! transport events. It resolves the backend and the session, compacts the
//! working history when it has grown too long, runs the [`AgentLoop`] and
//! stores every message the loop produces before polling it again.
//!
//! Event order for a successful turn:
//!
//! ```text
//! session_id → [thought…] → (content | thought | token_usage)* →
//!     execution_time + decision_count → message_id → [DONE]
//! ```
//!
//! A failed turn ends with a single `error` event and no sentinel. Content
//! already streamed is not retracted.
//!
//! Clients send only the new messages of a turn; the stored transcript is
//! the source of truth for history. Messages resent by a client are stored
//! again.

use std::pin::Pin;
use std::sync::Arc;
use std::time::Instant;

use coda_llm::{ApiKeys, LlmClient, Message, SharedBackend};
use coda_session::{MessageId, SessionId, SharedStore, StoredMessage};
use futures::{Stream, StreamExt};
use serde::Serialize;
use serde_json::json;
use tokio_util::sync::CancellationToken;

use crate::compaction::{CompactorConfig, ContextCompactor};
use crate::error::Result;
use crate::prompt::DEFAULT_SYSTEM_PROMPT;
use crate::stream::{AgentEvent, AgentLoop, DEFAULT_MAX_ITERATIONS};
use crate::tool::ToolRegistry;

/// Title used when a new session starts without messages.
pub const DEFAULT_TITLE: &str = "New Chat";

const TITLE_MAX_CHARS: usize = 50;

// ─────────────────────────────────────────────────────────────────────────────
// Requests and Events
// ─────────────────────────────────────────────────────────────────────────────

/// One chat request.
#[derive(Debug, Clone, Default)]
pub struct ChatTurn {
    /// Existing session to continue. A new session is created when absent.
    pub session_id: Option<SessionId>,
    /// New messages for this turn.
    pub messages: Vec<Message>,
    /// Model identifier; also selects the provider.
    pub model: String,
    /// Per-request API keys.
    pub api_keys: ApiKeys,
}

impl ChatTurn {
    pub fn new(model: impl Into<String>, messages: Vec<Message>) -> Self {
        Self {
            model: model.into(),
            messages,
            ..Default::default()
        }
    }

    pub fn with_session(mut self, session_id: SessionId) -> Self {
        self.session_id = Some(session_id);
        self
    }

    pub fn with_api_keys(mut self, api_keys: ApiKeys) -> Self {
        self.api_keys = api_keys;
        self
    }
}

/// Events sent to the client, one JSON object each.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum TurnEvent {
    SessionId { session_id: SessionId },
    Thought { thought: String },
    Content { content: String },
    TokenUsage { token_usage: u64 },
    Metrics { execution_time: f64, decision_count: u32 },
    MessageId { message_id: MessageId },
    Error { error: String },
    /// Terminal sentinel of a successful turn.
    #[serde(skip)]
    Done,
}

impl TurnEvent {
    /// The `[DONE]` sentinel text.
    pub const SENTINEL: &'static str = "[DONE]";

    fn thought(text: impl Into<String>) -> Self {
        Self::Thought {
            thought: text.into(),
        }
    }

    fn error(err: impl std::fmt::Display) -> Self {
        Self::Error {
            error: err.to_string(),
        }
    }

    /// Payload of the SSE `data:` line for this event.
    pub fn to_data(&self) -> String {
        match self {
            Self::Done => Self::SENTINEL.to_string(),
            other => serde_json::to_string(other).unwrap_or_else(|e| {
                json!({ "error": format!("Failed to encode event: {e}") }).to_string()
            }),
        }
    }

    /// Whether this event ends the stream.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Error { .. })
    }
}

/// A boxed stream of transport events.
pub type TurnStream = Pin<Box<dyn Stream<Item = TurnEvent> + Send + 'static>>;

// ─────────────────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Configuration for the session orchestrator.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// System prompt placed first in every model request.
    pub system_prompt: String,
    /// Bound on model calls per turn.
    pub max_iterations: u32,
    pub compaction: CompactorConfig,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            max_iterations: DEFAULT_MAX_ITERATIONS,
            compaction: CompactorConfig::default(),
        }
    }
}

impl OrchestratorConfig {
    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    pub fn with_max_iterations(mut self, max_iterations: u32) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    pub fn with_compaction(mut self, compaction: CompactorConfig) -> Self {
        self.compaction = compaction;
        self
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Orchestrator
// ─────────────────────────────────────────────────────────────────────────────

/// Runs chat turns against shared, read-only collaborators.
#[derive(Clone)]
pub struct SessionOrchestrator {
    client: Arc<LlmClient>,
    store: SharedStore,
    tools: Arc<ToolRegistry>,
    compactor: ContextCompactor,
    system_prompt: Arc<str>,
    max_iterations: u32,
}

impl SessionOrchestrator {
    pub fn new(
        client: Arc<LlmClient>,
        store: SharedStore,
        tools: Arc<ToolRegistry>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            client,
            store,
            tools,
            compactor: ContextCompactor::new(config.compaction),
            system_prompt: Arc::from(config.system_prompt),
            max_iterations: config.max_iterations,
        }
    }

    pub fn store(&self) -> &SharedStore {
        &self.store
    }

    pub fn tools(&self) -> &Arc<ToolRegistry> {
        &self.tools
    }

    pub fn client(&self) -> &Arc<LlmClient> {
        &self.client
    }

    /// Start a turn.
    ///
    /// Resolves the backend and the session and stores the request messages
    /// before returning, so an unknown session or a missing API key fails
    /// here rather than inside the stream. Everything after that is reported
    /// through the returned stream.
    pub async fn start_turn(
        &self,
        turn: ChatTurn,
        cancellation: CancellationToken,
    ) -> Result<TurnStream> {
        let backend = self.client.backend_for_model(&turn.model, &turn.api_keys)?;

        let session_id = match turn.session_id {
            Some(id) => {
                self.store.get_session(id).await?;
                id
            }
            None => {
                let title = session_title(&turn.messages);
                let id = self.store.create_session(&title).await?;
                tracing::info!(session_id = %id, title = %title, "Created session");
                id
            }
        };

        for message in &turn.messages {
            self.store
                .append_message(session_id, StoredMessage::new(message.clone()))
                .await?;
        }

        tracing::info!(
            session_id = %session_id,
            model = %turn.model,
            backend = backend.name(),
            new_messages = turn.messages.len(),
            "Starting turn"
        );

        let run = TurnRun {
            orchestrator: self.clone(),
            backend,
            session_id,
            model: turn.model,
            api_keys: turn.api_keys,
            cancellation,
        };
        Ok(run.into_stream())
    }
}

/// State for one running turn.
struct TurnRun {
    orchestrator: SessionOrchestrator,
    backend: SharedBackend,
    session_id: SessionId,
    model: String,
    api_keys: ApiKeys,
    cancellation: CancellationToken,
}

impl TurnRun {
    fn into_stream(self) -> TurnStream {
        Box::pin(async_stream::stream! {
            let TurnRun { orchestrator, backend, session_id, model, api_keys, cancellation } = self;
            let store = orchestrator.store.clone();
            let started = Instant::now();

            yield TurnEvent::SessionId { session_id };

            // Working history and running summary
            let record = match store.get_session(session_id).await {
                Ok(record) => record,
                Err(e) => {
                    yield fail(session_id, e);
                    return;
                }
            };
            let mut summary = record.summary;
            let mut history = match store.load_history(session_id).await {
                Ok(history) => history,
                Err(e) => {
                    yield fail(session_id, e);
                    return;
                }
            };

            let compactor = &orchestrator.compactor;
            if compactor.needs_compaction(history.len()) {
                yield TurnEvent::thought("Summarizing conversation history...");

                let summarizer = match orchestrator
                    .client
                    .backend_for_model(compactor.model(), &api_keys)
                {
                    Ok(backend) => backend,
                    Err(e) => {
                        yield fail(session_id, e);
                        return;
                    }
                };
                let compaction = match compactor
                    .compact(&summarizer, &history, summary.as_deref())
                    .await
                {
                    Ok(compaction) => compaction,
                    Err(e) => {
                        yield fail(session_id, e);
                        return;
                    }
                };

                if let Some(compaction) = compaction {
                    let keep = compaction.retained.len();
                    let stored = async {
                        store.update_summary(session_id, &compaction.summary).await?;
                        store.retain_recent(session_id, keep).await
                    }
                    .await;
                    if let Err(e) = stored {
                        yield fail(session_id, e);
                        return;
                    }

                    tracing::info!(
                        session_id = %session_id,
                        compacted = compaction.compacted,
                        retained = keep,
                        "Context summary updated"
                    );
                    summary = Some(compaction.summary);
                    history = compaction.retained;
                    yield TurnEvent::thought("Context summary updated.");
                }
            }

            // Prompt
            let mut prompt = Vec::with_capacity(history.len() + 2);
            prompt.push(Message::system(orchestrator.system_prompt.as_ref()));
            if let Some(summary) = summary.as_deref().filter(|s| !s.is_empty()) {
                prompt.push(Message::system(format!("PREVIOUS CONVERSATION SUMMARY:\n{summary}")));
            }
            prompt.extend(history);

            let mut agent = AgentLoop::new(backend, Arc::clone(&orchestrator.tools), model)
                .with_max_iterations(orchestrator.max_iterations)
                .with_cancellation(cancellation)
                .run(prompt);

            let mut response = String::new();
            let mut thoughts: Vec<String> = Vec::new();
            let mut total_tokens: u64 = 0;
            let mut decision_count: u32 = 0;

            while let Some(event) = agent.next().await {
                match event {
                    Ok(AgentEvent::Content(text)) => {
                        response.push_str(&text);
                        yield TurnEvent::Content { content: text };
                    }
                    Ok(AgentEvent::Thought(text)) => {
                        thoughts.push(text.clone());
                        yield TurnEvent::Thought { thought: text };
                    }
                    Ok(AgentEvent::Usage(tokens)) => {
                        total_tokens += tokens;
                        yield TurnEvent::TokenUsage { token_usage: tokens };
                    }
                    Ok(AgentEvent::Persist(message)) => {
                        decision_count += message.tool_call_count() as u32;
                        if let Err(e) = store.append_message(session_id, message.into()).await {
                            yield fail(session_id, e);
                            return;
                        }
                    }
                    Ok(AgentEvent::Done) => break,
                    Err(e) => {
                        yield fail(session_id, e);
                        return;
                    }
                }
            }

            let execution_time = started.elapsed().as_secs_f64();
            yield TurnEvent::Metrics { execution_time, decision_count };

            let mut record = StoredMessage::new(Message::assistant(response))
                .with_token_count(total_tokens)
                .with_execution_time(execution_time)
                .with_decision_count(decision_count);
            if !thoughts.is_empty() {
                record = record.with_feedback(json!({ "thoughts": thoughts.join("\n") }));
            }
            let message_id = match store.append_message(session_id, record).await {
                Ok(id) => id,
                Err(e) => {
                    yield fail(session_id, e);
                    return;
                }
            };

            tracing::info!(
                session_id = %session_id,
                tokens = total_tokens,
                decisions = decision_count,
                seconds = execution_time,
                "Turn complete"
            );
            yield TurnEvent::MessageId { message_id };
            yield TurnEvent::Done;
        })
    }
}

fn fail(session_id: SessionId, err: impl std::fmt::Display) -> TurnEvent {
    tracing::error!(session_id = %session_id, error = %err, "Turn failed");
    TurnEvent::error(err)
}

/// Session title from the first message: its text, cut to 50 characters
/// with a trailing `...` when longer.
pub fn session_title(messages: &[Message]) -> String {
    let Some(first) = messages.first() else {
        return DEFAULT_TITLE.to_string();
    };
    let text = first.text();
    match text.char_indices().nth(TITLE_MAX_CHARS) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tool::MockTool;
    use coda_llm::{LlmError, MockBackend, ProviderEvent, Role, ToolStatus};
    use coda_session::{MemoryStore, SessionStore};

    struct Harness {
        backend: Arc<MockBackend>,
        store: Arc<MemoryStore>,
        orchestrator: SessionOrchestrator,
    }

    fn harness(backend: MockBackend, tools: ToolRegistry) -> Harness {
        harness_with(backend, tools, OrchestratorConfig::default())
    }

    fn harness_with(backend: MockBackend, tools: ToolRegistry, config: OrchestratorConfig) -> Harness {
        let backend = Arc::new(backend);
        let store = Arc::new(MemoryStore::new());
        let orchestrator = SessionOrchestrator::new(
            Arc::new(LlmClient::from_backend(backend.clone())),
            store.clone(),
            Arc::new(tools),
            config.with_system_prompt("SYSTEM"),
        );
        Harness {
            backend,
            store,
            orchestrator,
        }
    }

    async fn run(h: &Harness, turn: ChatTurn) -> Vec<TurnEvent> {
        h.orchestrator
            .start_turn(turn, CancellationToken::new())
            .await
            .unwrap()
            .collect()
            .await
    }

    fn session_of(events: &[TurnEvent]) -> SessionId {
        match &events[0] {
            TurnEvent::SessionId { session_id } => *session_id,
            other => panic!("expected session id first, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_plain_turn_event_order() {
        let h = harness(
            MockBackend::new(vec![vec![
                ProviderEvent::content("Hi "),
                ProviderEvent::content("there"),
                ProviderEvent::Usage(7),
            ]]),
            ToolRegistry::new(),
        );

        let events = run(&h, ChatTurn::new("gpt-4o", vec![Message::user("hello")])).await;
        let id = session_of(&events);

        assert_eq!(events[1], TurnEvent::Content { content: "Hi ".into() });
        assert_eq!(events[2], TurnEvent::Content { content: "there".into() });
        assert_eq!(events[3], TurnEvent::TokenUsage { token_usage: 7 });
        assert!(matches!(events[4], TurnEvent::Metrics { decision_count: 0, .. }));
        let TurnEvent::MessageId { message_id } = &events[5] else {
            panic!("expected message id, got {:?}", events[5]);
        };
        assert_eq!(events[6], TurnEvent::Done);
        assert_eq!(events.len(), 7);

        let transcript = h.store.load_transcript(id).await.unwrap();
        assert_eq!(transcript.len(), 2);
        assert_eq!(transcript[0].message, Message::user("hello"));
        let last = &transcript[1];
        assert_eq!(last.id, *message_id);
        assert_eq!(last.message, Message::assistant("Hi there"));
        assert_eq!(last.token_count, Some(7));
        assert_eq!(last.decision_count, Some(0));
        assert!(last.execution_time.is_some());
        assert!(last.feedback.is_none());

        let request = &h.backend.requests()[0];
        assert_eq!(request.history[0], Message::system("SYSTEM"));
        assert_eq!(request.history[1], Message::user("hello"));
    }

    #[tokio::test]
    async fn test_tool_turn_persists_in_emission_order() {
        let mut tools = ToolRegistry::new();
        tools.register(MockTool::new("linear_sum_assignment").with_response(json!({"objective": 42})));
        let h = harness(
            MockBackend::new(vec![
                vec![
                    ProviderEvent::tool_call_start(0, "call_1", "linear_sum_assignment"),
                    ProviderEvent::tool_call_arguments(0, r#"{"cost_matrix":[[1]]}"#),
                    ProviderEvent::Usage(20),
                ],
                vec![ProviderEvent::content("Objective is 42."), ProviderEvent::Usage(30)],
            ]),
            tools,
        );

        let events = run(&h, ChatTurn::new("gpt-4o", vec![Message::user("assign")])).await;
        let id = session_of(&events);

        assert!(events.iter().any(|e| matches!(e, TurnEvent::Metrics { decision_count: 1, .. })));
        assert_eq!(events.last(), Some(&TurnEvent::Done));

        let transcript = h.store.load_transcript(id).await.unwrap();
        let roles: Vec<_> = transcript.iter().map(|m| m.message.role).collect();
        assert_eq!(
            roles,
            vec![Role::User, Role::Assistant, Role::Tool, Role::Assistant]
        );
        assert_eq!(transcript[2].message.status, Some(ToolStatus::Success));

        let last = &transcript[3];
        assert_eq!(last.message.text(), "Objective is 42.");
        assert_eq!(last.token_count, Some(50));
        assert_eq!(last.decision_count, Some(1));
        assert_eq!(
            last.feedback,
            Some(json!({
                "thoughts": "Using tools...\nCalling `linear_sum_assignment`...\n`linear_sum_assignment` output received."
            }))
        );
    }

    #[tokio::test]
    async fn test_session_titles() {
        let h = harness(
            MockBackend::new(vec![
                vec![ProviderEvent::content("a")],
                vec![ProviderEvent::content("b")],
                vec![ProviderEvent::content("c")],
            ]),
            ToolRegistry::new(),
        );

        let long = "x".repeat(60);
        let id = session_of(&run(&h, ChatTurn::new("gpt-4o", vec![Message::user(long)])).await);
        let title = h.store.get_session(id).await.unwrap().title;
        assert_eq!(title, format!("{}...", "x".repeat(50)));

        let id = session_of(&run(&h, ChatTurn::new("gpt-4o", vec![Message::user("Short question")])).await);
        assert_eq!(h.store.get_session(id).await.unwrap().title, "Short question");

        let id = session_of(&run(&h, ChatTurn::new("gpt-4o", vec![])).await);
        assert_eq!(h.store.get_session(id).await.unwrap().title, "New Chat");
    }

    #[test]
    fn test_title_exactly_fifty_chars() {
        let text = "y".repeat(50);
        assert_eq!(session_title(&[Message::user(text.clone())]), text);
    }

    #[tokio::test]
    async fn test_unknown_session_fails_before_streaming() {
        let h = harness(MockBackend::with_text("unused"), ToolRegistry::new());
        let turn = ChatTurn::new("gpt-4o", vec![Message::user("hi")]).with_session(SessionId::new());

        let result = h.orchestrator.start_turn(turn, CancellationToken::new()).await;
        assert!(matches!(result, Err(ref e) if e.is_not_found()));
        assert!(h.store.is_empty());
        assert_eq!(h.backend.request_count(), 0);
    }

    #[tokio::test]
    async fn test_continuing_session_uses_stored_history_and_summary() {
        let h = harness(
            MockBackend::new(vec![vec![ProviderEvent::content("second answer")]]),
            ToolRegistry::new(),
        );
        let id = h.store.create_session("t").await.unwrap();
        h.store.append_message(id, Message::user("first").into()).await.unwrap();
        h.store.append_message(id, Message::assistant("first answer").into()).await.unwrap();
        h.store.update_summary(id, "earlier context").await.unwrap();

        let events = run(
            &h,
            ChatTurn::new("gpt-4o", vec![Message::user("second")]).with_session(id),
        )
        .await;
        assert_eq!(session_of(&events), id);

        let history = &h.backend.requests()[0].history;
        assert_eq!(history.len(), 5);
        assert_eq!(history[1], Message::system("PREVIOUS CONVERSATION SUMMARY:\nearlier context"));
        assert_eq!(history[4], Message::user("second"));
        assert_eq!(h.store.load_transcript(id).await.unwrap().len(), 4);
    }

    #[tokio::test]
    async fn test_compaction_before_model_call() {
        let h = harness(
            MockBackend::new(vec![
                vec![ProviderEvent::content("Summary of fifteen messages")],
                vec![ProviderEvent::content("answer")],
            ]),
            ToolRegistry::new(),
        );
        let id = h.store.create_session("long").await.unwrap();
        for i in 0..24 {
            h.store
                .append_message(id, Message::user(format!("m{i}")).into())
                .await
                .unwrap();
        }

        let events = run(
            &h,
            ChatTurn::new("gpt-4o", vec![Message::user("m24")]).with_session(id),
        )
        .await;

        assert_eq!(events[1], TurnEvent::thought("Summarizing conversation history..."));
        assert_eq!(events[2], TurnEvent::thought("Context summary updated."));
        assert_eq!(events.last(), Some(&TurnEvent::Done));

        let record = h.store.get_session(id).await.unwrap();
        assert_eq!(record.summary.as_deref(), Some("Summary of fifteen messages"));
        assert_eq!(record.compacted_through, 15);

        let requests = h.backend.requests();
        assert_eq!(requests[0].model, "gpt-4o");
        assert!(requests[0].history[1].text().contains("User: m14\n"));
        let prompt = &requests[1].history;
        assert_eq!(prompt.len(), 12);
        assert_eq!(
            prompt[1],
            Message::system("PREVIOUS CONVERSATION SUMMARY:\nSummary of fifteen messages")
        );
        assert_eq!(prompt[2].text(), "m15");
        assert_eq!(prompt[11].text(), "m24");

        // Working history: 10 retained plus the final answer
        assert_eq!(h.store.load_history(id).await.unwrap().len(), 11);

        // Compaction thoughts are not part of the stored feedback
        let transcript = h.store.load_transcript(id).await.unwrap();
        assert!(transcript.last().unwrap().feedback.is_none());
    }

    #[tokio::test]
    async fn test_compaction_failure_aborts_turn() {
        let config = OrchestratorConfig::default().with_compaction(CompactorConfig {
            threshold: 2,
            keep_recent: 1,
            model: "gpt-4o".into(),
        });
        let h = harness_with(
            MockBackend::new(vec![])
                .then_reject(LlmError::Backend("summarizer down".into()))
                .then(vec![ProviderEvent::content("never")]),
            ToolRegistry::new(),
            config,
        );

        let events = run(
            &h,
            ChatTurn::new("gpt-4o", vec![Message::user("a"), Message::user("b"), Message::user("c")]),
        )
        .await;

        assert!(matches!(events.last(), Some(TurnEvent::Error { .. })));
        assert!(!events.contains(&TurnEvent::Done));
        assert_eq!(h.backend.request_count(), 1);
        let id = session_of(&events);
        assert!(h.store.get_session(id).await.unwrap().summary.is_none());
    }

    #[tokio::test]
    async fn test_provider_error_ends_without_sentinel() {
        let h = harness(
            MockBackend::new(vec![]).then_fail(
                vec![ProviderEvent::content("partial")],
                LlmError::Network("connection reset".into()),
            ),
            ToolRegistry::new(),
        );

        let events = run(&h, ChatTurn::new("gpt-4o", vec![Message::user("hi")])).await;
        assert_eq!(events[1], TurnEvent::Content { content: "partial".into() });
        let TurnEvent::Error { error } = &events[2] else {
            panic!("expected error, got {:?}", events[2]);
        };
        assert!(error.contains("connection reset"));
        assert_eq!(events.len(), 3);
    }

    #[test]
    fn test_event_data_encoding() {
        assert_eq!(TurnEvent::Done.to_data(), "[DONE]");
        assert_eq!(
            TurnEvent::thought("Using tools...").to_data(),
            r#"{"thought":"Using tools..."}"#
        );
        assert_eq!(
            TurnEvent::TokenUsage { token_usage: 5 }.to_data(),
            r#"{"token_usage":5}"#
        );
        let metrics = TurnEvent::Metrics { execution_time: 1.5, decision_count: 2 }.to_data();
        assert_eq!(metrics, r#"{"execution_time":1.5,"decision_count":2}"#);
        assert!(TurnEvent::error("boom").is_terminal());
    }
}

//! Context compaction.
//!
//! When a session's working history grows past a threshold, the
//! [`ContextCompactor`] folds everything except the most recent messages into
//! the running summary. The summary is regenerated from the previous summary
//! plus the newly dropped messages, so nothing summarized earlier is lost.

use coda_llm::{Message, ProviderEvent, Role, SharedBackend};
use futures::StreamExt;

use crate::error::{AgentError, Result};

// ─────────────────────────────────────────────────────────────────────────────
// Constants
// ─────────────────────────────────────────────────────────────────────────────

/// Working-history size above which compaction runs.
pub const DEFAULT_THRESHOLD: usize = 20;

/// Messages kept verbatim after compaction.
pub const DEFAULT_KEEP_RECENT: usize = 10;

/// Model used to write summaries.
pub const DEFAULT_SUMMARY_MODEL: &str = "gpt-4o";

const SUMMARIZER_SYSTEM_PROMPT: &str = "You are a helpful assistant that summarizes conversations.";

const SUMMARY_INSTRUCTIONS: &str = "You are an expert summarizer. Condense the following \
conversation history into a concise summary. Preserve key facts, decisions, and tool outputs.";

// ─────────────────────────────────────────────────────────────────────────────
// Types
// ─────────────────────────────────────────────────────────────────────────────

/// Configuration for context compaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompactorConfig {
    /// Compact when the working history holds more than this many messages.
    pub threshold: usize,
    /// Number of recent messages preserved verbatim.
    pub keep_recent: usize,
    /// Model used for summarization.
    pub model: String,
}

impl Default for CompactorConfig {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_THRESHOLD,
            keep_recent: DEFAULT_KEEP_RECENT,
            model: DEFAULT_SUMMARY_MODEL.to_string(),
        }
    }
}

/// Outcome of a compaction.
#[derive(Debug, Clone, PartialEq)]
pub struct Compaction {
    /// The new running summary.
    pub summary: String,
    /// Messages that stay in the working history.
    pub retained: Vec<Message>,
    /// Number of messages folded into the summary.
    pub compacted: usize,
}

// ─────────────────────────────────────────────────────────────────────────────
// Compactor
// ─────────────────────────────────────────────────────────────────────────────

/// Summarizes older history into a running summary.
#[derive(Debug, Clone, Default)]
pub struct ContextCompactor {
    config: CompactorConfig,
}

impl ContextCompactor {
    pub fn new(config: CompactorConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &CompactorConfig {
        &self.config
    }

    /// Model the summary request should be routed to.
    pub fn model(&self) -> &str {
        &self.config.model
    }

    /// Whether a working history of `len` messages should be compacted.
    pub fn needs_compaction(&self, len: usize) -> bool {
        len > self.config.threshold
    }

    /// Compact `history` if it is over the threshold.
    ///
    /// Returns `None` without calling the model when no compaction is
    /// needed. A failed or empty summary is an error; the caller must not
    /// continue with the uncompacted history.
    pub async fn compact(
        &self,
        backend: &SharedBackend,
        history: &[Message],
        current_summary: Option<&str>,
    ) -> Result<Option<Compaction>> {
        if !self.needs_compaction(history.len()) {
            return Ok(None);
        }

        let split = split_point(history, self.config.keep_recent);
        let (older, recent) = history.split_at(split);

        tracing::info!(
            compacted = older.len(),
            retained = recent.len(),
            model = %self.config.model,
            "Compacting conversation history"
        );

        let summary = self.summarize(backend, older, current_summary).await?;
        if summary.is_empty() && !older.is_empty() {
            return Err(AgentError::compaction("summarizer returned an empty summary"));
        }

        Ok(Some(Compaction {
            summary,
            retained: recent.to_vec(),
            compacted: older.len(),
        }))
    }

    async fn summarize(
        &self,
        backend: &SharedBackend,
        messages: &[Message],
        current_summary: Option<&str>,
    ) -> Result<String> {
        let request = vec![
            Message::system(SUMMARIZER_SYSTEM_PROMPT),
            Message::user(summary_prompt(messages, current_summary)),
        ];

        let mut stream = backend
            .stream(&request, &self.config.model, &[])
            .await
            .map_err(|e| AgentError::compaction(format!("summary request failed: {e}")))?;

        let mut summary = String::new();
        while let Some(event) = stream.next().await {
            match event {
                Ok(ProviderEvent::Content(text)) => summary.push_str(&text),
                Ok(_) => {}
                Err(e) => {
                    return Err(AgentError::compaction(format!("summary stream failed: {e}")));
                }
            }
        }

        Ok(summary.trim().to_string())
    }
}

/// Index of the first retained message. Tool results never open the
/// retained window, since their assistant call would be summarized away.
fn split_point(history: &[Message], keep_recent: usize) -> usize {
    let start = history.len().saturating_sub(keep_recent);
    history[start..]
        .iter()
        .position(|m| m.role != Role::Tool)
        .map_or(history.len(), |offset| start + offset)
}

/// Plain-text transcript, one `Role: content` line per message.
pub fn transcript(messages: &[Message]) -> String {
    messages
        .iter()
        .map(|m| {
            let content = m.content.as_deref().filter(|c| !c.is_empty());
            format!("{}: {}\n", m.role.label(), content.unwrap_or("[Tool Operations]"))
        })
        .collect()
}

fn summary_prompt(messages: &[Message], current_summary: Option<&str>) -> String {
    let mut prompt = SUMMARY_INSTRUCTIONS.to_string();
    match current_summary.filter(|s| !s.is_empty()) {
        Some(existing) => {
            prompt.push_str("\n\nExisting Summary:\n");
            prompt.push_str(existing);
            prompt.push_str(
                "\n\nThe following new messages have occurred since the last summary. \
                 Update the summary to include them:",
            );
        }
        None => prompt.push_str("\n\nConversation History:"),
    }
    prompt.push('\n');
    prompt.push_str(&transcript(messages));
    prompt.push_str("\n\nSummary:");
    prompt
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

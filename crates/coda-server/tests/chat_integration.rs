//! Chat stream integration tests against a running server.

mod common;

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use coda_agent::{Tool, ToolError, ToolRegistry};
use coda_llm::{MockBackend, ProviderEvent, Role};
use coda_session::{SessionId, SessionStore};
use serde_json::{Value, json};

use common::{TestServer, json_events};

/// A solver that takes a while to answer.
struct SlowSolver;

#[async_trait]
impl Tool for SlowSolver {
    fn name(&self) -> &str {
        "slow_solver"
    }

    fn description(&self) -> &str {
        "Solves slowly"
    }

    fn parameters(&self) -> Value {
        json!({"type": "object", "properties": {}})
    }

    async fn execute(&self, _arguments: Value) -> Result<Value, ToolError> {
        tokio::time::sleep(Duration::from_millis(300)).await;
        Ok(json!({"status": "OPTIMAL"}))
    }
}

#[tokio::test]
async fn test_chat_stream_round_trip() -> Result<()> {
    let server = TestServer::start_with_text("Hello from the agent!").await?;

    let lines = server
        .chat(json!({"messages": [{"role": "user", "content": "Hello"}]}))
        .await?;
    assert_eq!(lines.last().map(String::as_str), Some("[DONE]"));

    let events = json_events(&lines);
    let session_id = events[0]["session_id"].as_str().expect("session_id first");
    assert!(events.iter().any(|e| e["content"] == "Hello from the agent!"));
    assert!(events.iter().any(|e| e.get("execution_time").is_some()));

    // The session is listed with its title and transcript.
    let list: Value = server.get("/api/v1/sessions").send().await?.json().await?;
    assert_eq!(list["total"], 1);
    assert_eq!(list["sessions"][0]["title"], "Hello");

    let detail: Value = server
        .get(&format!("/api/v1/sessions/{session_id}"))
        .send()
        .await?
        .json()
        .await?;
    let messages = detail["messages"].as_array().expect("messages");
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0]["role"], "user");
    assert_eq!(messages[1]["content"], "Hello from the agent!");

    Ok(())
}

#[tokio::test]
async fn test_continue_session() -> Result<()> {
    let backend = MockBackend::with_text("First").then(vec![ProviderEvent::content("Second")]);
    let server = TestServer::start(backend, ToolRegistry::new()).await?;

    let first = json_events(
        &server
            .chat(json!({"messages": [{"role": "user", "content": "one"}]}))
            .await?,
    );
    let session_id = first[0]["session_id"].as_str().expect("session_id").to_string();

    let second = json_events(
        &server
            .chat(json!({
                "session_id": session_id,
                "messages": [{"role": "user", "content": "two"}]
            }))
            .await?,
    );
    assert_eq!(second[0]["session_id"], session_id.as_str());

    // The second model call sees the whole conversation after the system prompt.
    let requests = server.backend.requests();
    let history = &requests[1].history;
    assert_eq!(history[0].role, Role::System);
    let texts: Vec<&str> = history[1..].iter().map(|m| m.text()).collect();
    assert_eq!(texts, vec!["one", "First", "two"]);

    Ok(())
}

#[tokio::test]
async fn test_unknown_session_returns_404() -> Result<()> {
    let server = TestServer::start_with_text("unused").await?;

    let resp = server
        .post("/api/v1/chat/stream")
        .json(&json!({
            "session_id": SessionId::new().to_string(),
            "messages": [{"role": "user", "content": "Hi"}]
        }))
        .send()
        .await?;

    assert_eq!(resp.status(), reqwest::StatusCode::NOT_FOUND);
    let body: Value = resp.json().await?;
    assert_eq!(body["code"], "not_found");
    assert_eq!(server.backend.request_count(), 0);

    Ok(())
}

#[tokio::test]
async fn test_empty_messages_returns_400() -> Result<()> {
    let server = TestServer::start_with_text("unused").await?;

    let resp = server
        .post("/api/v1/chat/stream")
        .json(&json!({"messages": []}))
        .send()
        .await?;

    assert_eq!(resp.status(), reqwest::StatusCode::BAD_REQUEST);
    assert!(server.store.is_empty());

    Ok(())
}

#[tokio::test]
async fn test_tool_turn_over_http() -> Result<()> {
    let backend = MockBackend::new(vec![
        vec![ProviderEvent::tool_call(0, "call_1", "slow_solver", "{}")],
        vec![ProviderEvent::content("The plan is optimal.")],
    ]);
    let mut tools = ToolRegistry::new();
    tools.register(SlowSolver);
    let server = TestServer::start(backend, tools).await?;

    let lines = server
        .chat(json!({"messages": [{"role": "user", "content": "solve it"}]}))
        .await?;
    let events = json_events(&lines);

    let thoughts: Vec<&str> = events.iter().filter_map(|e| e["thought"].as_str()).collect();
    assert_eq!(
        thoughts,
        vec![
            "Using tools...",
            "Calling `slow_solver`...",
            "`slow_solver` output received."
        ]
    );
    let metrics = events
        .iter()
        .find(|e| e.get("decision_count").is_some())
        .expect("metrics event");
    assert_eq!(metrics["decision_count"], 1);
    assert_eq!(lines.last().map(String::as_str), Some("[DONE]"));

    Ok(())
}

#[tokio::test]
async fn test_disconnect_keeps_in_flight_tool_result() -> Result<()> {
    let backend = MockBackend::new(vec![
        vec![ProviderEvent::tool_call(0, "call_1", "slow_solver", "{}")],
        vec![ProviderEvent::content("unused")],
    ]);
    let mut tools = ToolRegistry::new();
    tools.register(SlowSolver);
    let server = TestServer::start(backend, tools).await?;

    let mut resp = server
        .post("/api/v1/chat/stream")
        .json(&json!({"messages": [{"role": "user", "content": "solve it"}]}))
        .send()
        .await?;

    // Read until the tool starts, then hang up.
    let mut seen = String::new();
    while !seen.contains("Calling `slow_solver`") {
        let Some(chunk) = resp.chunk().await? else {
            anyhow::bail!("stream ended before the tool call");
        };
        seen.push_str(&String::from_utf8_lossy(&chunk));
    }
    drop(resp);

    let sessions = server.store.list_sessions().await?;
    let session_id = sessions[0].id;

    // The tool result is stored once the call finishes.
    let stored = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let transcript = server.store.load_transcript(session_id).await?;
            if transcript.iter().any(|m| m.message.role == Role::Tool) {
                return anyhow::Ok(transcript);
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
    })
    .await??;

    let tool_message = stored
        .iter()
        .find(|m| m.message.role == Role::Tool)
        .expect("tool message");
    assert_eq!(tool_message.message.tool_call_id.as_deref(), Some("call_1"));
    assert!(tool_message.message.text().contains("OPTIMAL"));

    Ok(())
}

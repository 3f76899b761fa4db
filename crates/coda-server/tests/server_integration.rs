//! Server surface integration tests.

mod common;

use anyhow::Result;
use serde_json::Value;

use common::TestServer;

#[tokio::test]
async fn test_health() -> Result<()> {
    let server = TestServer::start_with_text("unused").await?;

    let body: Value = server.get("/health").send().await?.json().await?;
    assert_eq!(body["status"], "ok");
    assert!(body["version"].is_string());

    Ok(())
}

#[tokio::test]
async fn test_empty_session_list() -> Result<()> {
    let server = TestServer::start_with_text("unused").await?;

    let body: Value = server.get("/api/v1/sessions").send().await?.json().await?;
    assert_eq!(body["total"], 0);
    assert!(body["sessions"].as_array().is_some_and(|s| s.is_empty()));

    Ok(())
}

#[tokio::test]
async fn test_unknown_session_detail_is_404() -> Result<()> {
    let server = TestServer::start_with_text("unused").await?;

    let resp = server
        .get("/api/v1/sessions/00000000-0000-0000-0000-000000000000")
        .send()
        .await?;
    assert_eq!(resp.status(), reqwest::StatusCode::NOT_FOUND);

    Ok(())
}

#[tokio::test]
async fn test_empty_tool_catalog() -> Result<()> {
    let server = TestServer::start_with_text("unused").await?;

    let body: Value = server.get("/api/v1/tools").send().await?.json().await?;
    assert_eq!(body["tools"], serde_json::json!([]));

    Ok(())
}

#[tokio::test]
async fn test_sse_content_type() -> Result<()> {
    let server = TestServer::start_with_text("hi").await?;

    let resp = server
        .post("/api/v1/chat/stream")
        .json(&serde_json::json!({"messages": [{"role": "user", "content": "Hi"}]}))
        .send()
        .await?;
    assert_eq!(
        resp.headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok()),
        Some("text/event-stream")
    );

    Ok(())
}

#[tokio::test]
async fn test_rate_fork_and_delete_session() -> Result<()> {
    let server = TestServer::start_with_text("Use three trucks.").await?;

    let lines = server
        .chat(serde_json::json!({"messages": [{"role": "user", "content": "Plan routes"}]}))
        .await?;
    let events = common::json_events(&lines);
    let session_id = events[0]["session_id"].as_str().expect("session_id").to_string();
    let message_id = events
        .iter()
        .find_map(|e| e["message_id"].as_str())
        .expect("message_id")
        .to_string();

    let rated: Value = server
        .post(&format!("/api/v1/messages/{message_id}/feedback"))
        .json(&serde_json::json!({"score": 1, "comment": "good plan"}))
        .send()
        .await?
        .json()
        .await?;
    assert_eq!(rated["status"], "success");
    assert_eq!(rated["feedback"]["score"], 1);

    let fork: Value = server
        .post(&format!("/api/v1/sessions/{session_id}/fork"))
        .json(&serde_json::json!({}))
        .send()
        .await?
        .json()
        .await?;
    assert_eq!(fork["title"], "Fork of Plan routes");
    let fork_id = fork["id"].as_str().expect("fork id");

    let detail: Value = server
        .get(&format!("/api/v1/sessions/{fork_id}"))
        .send()
        .await?
        .json()
        .await?;
    let messages = detail["messages"].as_array().expect("messages");
    assert_eq!(messages.len(), 2);
    assert!(messages[1].get("feedback").is_none());

    let url = format!("{}/api/v1/sessions/{session_id}", server.base_url());
    let resp = server.client.delete(&url).send().await?;
    assert_eq!(resp.status(), reqwest::StatusCode::NO_CONTENT);
    let resp = server.get(&format!("/api/v1/sessions/{session_id}")).send().await?;
    assert_eq!(resp.status(), reqwest::StatusCode::NOT_FOUND);

    let list: Value = server.get("/api/v1/sessions").send().await?.json().await?;
    assert_eq!(list["total"], 1);

    Ok(())
}

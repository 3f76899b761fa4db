//! Spins up a real server on an ephemeral port for the integration tests.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use reqwest::Client;
use serde_json::Value;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio::time::timeout;

use coda_agent::{OrchestratorConfig, SessionOrchestrator, ToolRegistry};
use coda_llm::{LlmClient, MockBackend};
use coda_server::{AppState, Server, ServerConfig};
use coda_session::MemoryStore;

/// Server task plus handles on its model and store.
pub struct TestServer {
    pub addr: SocketAddr,
    pub client: Client,
    /// The scripted model behind the server.
    pub backend: Arc<MockBackend>,
    /// The server's session store.
    pub store: Arc<MemoryStore>,
    _handle: JoinHandle<()>,
}

impl TestServer {
    /// Start a server whose model answers once with `text`.
    pub async fn start_with_text(text: &str) -> Result<Self> {
        Self::start(MockBackend::with_text(text), ToolRegistry::new()).await
    }

    /// Start a server with a scripted backend and a tool registry.
    pub async fn start(backend: MockBackend, tools: ToolRegistry) -> Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let backend = Arc::new(backend);
        let store = Arc::new(MemoryStore::new());

        let orchestrator = SessionOrchestrator::new(
            Arc::new(LlmClient::from_backend(backend.clone())),
            store.clone(),
            Arc::new(tools),
            OrchestratorConfig::default().with_system_prompt("You are a test agent."),
        );
        let config = ServerConfig::new().with_bind_address(addr);

        let server = Server::new(AppState::new(orchestrator, config));
        let handle = tokio::spawn(async move {
            let _ = server.serve(listener).await;
        });

        let client = Client::new();
        wait_for_server(&client, addr).await?;

        Ok(Self {
            addr,
            client,
            backend,
            store,
            _handle: handle,
        })
    }

    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn get(&self, path: &str) -> reqwest::RequestBuilder {
        self.client.get(format!("{}{}", self.base_url(), path))
    }

    pub fn post(&self, path: &str) -> reqwest::RequestBuilder {
        self.client.post(format!("{}{}", self.base_url(), path))
    }

    /// Send a chat request and collect the `data:` payloads of the stream.
    pub async fn chat(&self, body: Value) -> Result<Vec<String>> {
        let resp = self.post("/api/v1/chat/stream").json(&body).send().await?;
        anyhow::ensure!(resp.status().is_success(), "chat failed: {}", resp.status());
        Ok(data_lines(&resp.text().await?))
    }
}

/// `data:` payloads of an SSE body, in order.
pub fn data_lines(body: &str) -> Vec<String> {
    body.lines()
        .filter_map(|l| l.strip_prefix("data: ").or_else(|| l.strip_prefix("data:")))
        .map(|l| l.to_string())
        .collect()
}

/// Parse every payload except the `[DONE]` sentinel.
pub fn json_events(lines: &[String]) -> Vec<Value> {
    lines
        .iter()
        .filter(|l| l.as_str() != "[DONE]")
        .filter_map(|l| serde_json::from_str(l).ok())
        .collect()
}

async fn wait_for_server(client: &Client, addr: SocketAddr) -> Result<()> {
    let url = format!("http://{addr}/health");
    let ready = async {
        while !client
            .get(&url)
            .send()
            .await
            .is_ok_and(|r| r.status().is_success())
        {
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
    };
    timeout(Duration::from_secs(5), ready)
        .await
        .map_err(|_| anyhow::anyhow!("server at {addr} never became healthy"))
}

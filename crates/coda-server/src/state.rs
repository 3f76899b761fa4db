//! Application state shared across handlers.

use std::sync::Arc;

use coda_agent::{SessionOrchestrator, ToolRegistry};
use coda_session::SharedStore;

use crate::config::ServerConfig;

/// Application state shared across all handlers.
///
/// Everything here is read-only after startup; per-request state lives in
/// the turn stream.
#[derive(Clone)]
pub struct AppState {
    /// Runs chat turns.
    pub orchestrator: SessionOrchestrator,

    /// Server configuration.
    pub config: Arc<ServerConfig>,
}

impl AppState {
    pub fn new(orchestrator: SessionOrchestrator, config: ServerConfig) -> Self {
        Self {
            orchestrator,
            config: Arc::new(config),
        }
    }

    pub fn store(&self) -> &SharedStore {
        self.orchestrator.store()
    }

    pub fn tools(&self) -> &Arc<ToolRegistry> {
        self.orchestrator.tools()
    }
}

#[cfg(test)]
pub(crate) fn test_state(
    backend: Arc<coda_llm::MockBackend>,
) -> (AppState, Arc<coda_session::MemoryStore>) {
    use coda_agent::OrchestratorConfig;
    use coda_llm::LlmClient;

    let store = Arc::new(coda_session::MemoryStore::new());
    let orchestrator = SessionOrchestrator::new(
        Arc::new(LlmClient::from_backend(backend)),
        store.clone(),
        Arc::new(ToolRegistry::new()),
        OrchestratorConfig::default().with_system_prompt("SYSTEM"),
    );
    (AppState::new(orchestrator, ServerConfig::default()), store)
}

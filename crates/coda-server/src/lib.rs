//! HTTP server for Coda.
//!
//! Exposes the session orchestrator over HTTP:
//!
//! - `POST /api/v1/chat/stream`: run a turn, streamed as Server-Sent Events
//! - `GET /api/v1/sessions`, `GET|DELETE /api/v1/sessions/{id}`: stored sessions
//! - `POST /api/v1/sessions/{id}/fork`: copy a session, optionally up to a message
//! - `POST /api/v1/messages/{id}/feedback`: rate an answer
//! - `GET /api/v1/tools`: the callable tool catalog
//! - `GET /health`
//!
//! # Example
//!
//! ```ignore
//! use coda_server::{AppState, Server, ServerConfig};
//!
//! let config = ServerConfig::new().with_bind_address("127.0.0.1:8080".parse()?);
//! let server = Server::new(AppState::new(orchestrator, config));
//! server.run().await?;
//! ```

pub mod config;
pub mod error;
pub mod routes;
pub mod state;

pub use config::{DEFAULT_CHAT_MODEL, ServerConfig};
pub use error::{ErrorResponse, Result, ServerError};
pub use routes::ChatRequest;
pub use state::AppState;

use std::net::SocketAddr;

use axum::Router;
use axum::http::{HeaderValue, Method};
use tokio::net::TcpListener;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

/// The Coda HTTP server.
pub struct Server {
    state: AppState,
}

impl Server {
    pub fn new(state: AppState) -> Self {
        Self { state }
    }

    /// Health at the root, the API under `/api/v1`, then CORS and request tracing.
    pub fn router(&self) -> Router {
        let mut router = Router::new()
            .merge(routes::health_routes())
            .nest("/api/v1", self.api_routes())
            .with_state(self.state.clone());

        if let Some(cors) = cors_layer(&self.state.config.cors_origins) {
            router = router.layer(cors);
        }

        router.layer(TraceLayer::new_for_http())
    }

    fn api_routes(&self) -> Router<AppState> {
        use axum::routing::{get, post};

        Router::new()
            .route("/chat/stream", post(routes::chat_stream_handler))
            .route("/sessions", get(routes::list_sessions_handler))
            .route(
                "/sessions/{id}",
                get(routes::get_session_handler).delete(routes::delete_session_handler),
            )
            .route("/sessions/{id}/fork", post(routes::fork_session_handler))
            .route("/messages/{id}/feedback", post(routes::feedback_handler))
            .route("/tools", get(routes::list_tools_handler))
    }

    /// Serve on the configured address until the process exits.
    pub async fn run(self) -> Result<()> {
        let addr = self.bind_address();
        self.run_on(addr).await
    }

    /// Serve on `addr` instead of the configured address.
    pub async fn run_on(self, addr: SocketAddr) -> Result<()> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| ServerError::Internal(format!("cannot bind {addr}: {e}")))?;
        self.serve(listener).await
    }

    /// Serve on an already bound listener.
    pub async fn serve(self, listener: TcpListener) -> Result<()> {
        if let Ok(addr) = listener.local_addr() {
            info!(%addr, "listening");
        }
        axum::serve(listener, self.router())
            .await
            .map_err(|e| ServerError::Internal(format!("server stopped: {e}")))
    }

    pub fn bind_address(&self) -> SocketAddr {
        self.state.config.bind_address
    }
}

/// CORS layer for the configured origins. `None` when no origins are set.
fn cors_layer(origins: &[String]) -> Option<CorsLayer> {
    if origins.is_empty() {
        return None;
    }

    let allow_origin = if origins.iter().any(|o| o == "*") {
        AllowOrigin::from(Any)
    } else {
        let parsed: Vec<HeaderValue> = origins
            .iter()
            .filter_map(|origin| match origin.parse::<HeaderValue>() {
                Ok(value) => Some(value),
                Err(_) => {
                    tracing::warn!(origin = %origin, "Ignoring invalid CORS origin");
                    None
                }
            })
            .collect();
        AllowOrigin::list(parsed)
    };

    info!(?origins, "CORS enabled");
    Some(
        CorsLayer::new()
            .allow_origin(allow_origin)
            .allow_methods([Method::GET, Method::POST, Method::DELETE])
            .allow_headers(Any),
    )
}

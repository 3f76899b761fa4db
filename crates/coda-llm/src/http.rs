//! HTTP plumbing common to the provider adapters.

use std::time::Duration;

use reqwest::{Client, RequestBuilder, Response, header};

use crate::error::{LlmError, Result};

pub(crate) const REQUEST_TIMEOUT: Duration = Duration::from_secs(300);
pub(crate) const MAX_RETRIES: u32 = 3;
pub(crate) const RETRY_BACKOFF: Duration = Duration::from_millis(500);

pub(crate) fn build_client(timeout: Duration) -> Result<Client> {
    Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| LlmError::Internal(format!("HTTP client setup failed: {e}")))
}

/// Join a configured base URL and an API path, tolerating a trailing slash.
pub(crate) fn endpoint(base: &str, path: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), path.trim_start_matches('/'))
}

/// Send a JSON request and turn any non-success status into an [`LlmError`].
pub(crate) async fn send(request: RequestBuilder) -> Result<Response> {
    let response = request
        .header(header::CONTENT_TYPE, "application/json")
        .send()
        .await?;
    if response.status().is_success() {
        return Ok(response);
    }

    let status = response.status();
    let retry_after = response
        .headers()
        .get(header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned);
    let body = response.text().await.unwrap_or_default();
    Err(LlmError::from_status(
        status,
        error_message(&body),
        &body,
        retry_after.as_deref(),
    ))
}

/// All three providers wrap failures as `{"error": {"message": ...}}`.
fn error_message(body: &str) -> Option<String> {
    #[derive(serde::Deserialize)]
    struct Envelope {
        error: Detail,
    }
    #[derive(serde::Deserialize)]
    struct Detail {
        message: String,
    }

    serde_json::from_str::<Envelope>(body)
        .ok()
        .map(|e| e.error.message)
}

//! Failures raised while talking to a model provider.

use std::time::Duration;

use reqwest::StatusCode;
use thiserror::Error;

/// Result alias for provider calls.
pub type Result<T> = std::result::Result<T, LlmError>;

/// Everything that can go wrong between building a request and draining
/// its stream.
#[derive(Debug, Error)]
pub enum LlmError {
    /// The provider answered with an error status or an error event.
    #[error("Provider error: {0}")]
    Backend(String),

    /// Transport failure. Worth retrying.
    #[error("Network failure: {0}")]
    Network(String),

    /// Missing key, bad base URL and similar setup problems.
    #[error("Provider misconfigured: {0}")]
    Config(String),

    /// HTTP 429. `retry_after` carries the provider's hint when it sent one.
    #[error("Rate limited by provider: {message}{}", wait_hint(.retry_after))]
    RateLimited {
        message: String,
        retry_after: Option<Duration>,
    },

    /// The key was rejected.
    #[error("Credentials rejected: {0}")]
    Auth(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

fn wait_hint(retry_after: &Option<Duration>) -> String {
    match retry_after {
        Some(wait) => format!(" (retry in {}s)", wait.as_secs()),
        None => String::new(),
    }
}

impl LlmError {
    /// Rate limit error without a wait hint.
    pub fn rate_limited(message: impl Into<String>) -> Self {
        Self::RateLimited {
            message: message.into(),
            retry_after: None,
        }
    }

    /// Provider-requested wait, if any.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after, .. } => *retry_after,
            _ => None,
        }
    }

    /// Transport failures and rate limits are retried; everything else is final.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Network(_) | Self::RateLimited { .. })
    }

    /// Classify a non-success HTTP response.
    ///
    /// `message` is the provider's own error text when the body parsed as a
    /// structured error. Unstructured bodies are reported raw with the status.
    pub fn from_status(
        status: StatusCode,
        message: Option<String>,
        body: &str,
        retry_after: Option<&str>,
    ) -> Self {
        let Some(message) = message else {
            return Self::Backend(format!("HTTP {status}: {body}"));
        };
        match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Self::Auth(message),
            StatusCode::TOO_MANY_REQUESTS => Self::RateLimited {
                message,
                retry_after: retry_after.and_then(seconds_header),
            },
            s if s.is_server_error() => Self::Backend(format!("{} from provider: {message}", s.as_u16())),
            _ => Self::Backend(message),
        }
    }
}

/// `Retry-After` in its delta-seconds form. HTTP-date values are ignored.
fn seconds_header(value: &str) -> Option<Duration> {
    value.trim().parse().ok().map(Duration::from_secs)
}

impl From<reqwest::Error> for LlmError {
    fn from(err: reqwest::Error) -> Self {
        let kind = if err.is_timeout() {
            "timed out"
        } else if err.is_connect() {
            "could not connect"
        } else {
            "request failed"
        };
        Self::Network(format!("{kind}: {err}"))
    }
}

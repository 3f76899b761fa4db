//! HTTP tools described by OpenAPI documents.
//!
//! The tools directory holds one subdirectory per tool:
//!
//! ```text
//! tools/
//!   linear_sum_assignment/
//!     schema.json      OpenAPI document, first POST operation is the tool
//!   min_cost_flow/
//!     schema.json
//! ```
//!
//! The directory name becomes the tool name. Arguments are POSTed as JSON to
//! `servers[0].url` + the operation path and the JSON response is returned to
//! the model.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{Value, json};

use crate::error::{AgentError, Result};
use crate::tool::{Tool, ToolError, ToolRegistry};

/// Default per-call timeout for HTTP tools.
pub const DEFAULT_TOOL_TIMEOUT: Duration = Duration::from_secs(60);

const SCHEMA_FILE: &str = "schema.json";

// ─────────────────────────────────────────────────────────────────────────────
// HTTP Tool
// ─────────────────────────────────────────────────────────────────────────────

/// A tool reached over HTTP POST.
#[derive(Debug, Clone)]
pub struct HttpTool {
    name: String,
    description: String,
    parameters: Value,
    url: String,
    timeout: Duration,
    client: Client,
}

impl HttpTool {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: Value,
        url: impl Into<String>,
        client: Client,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
            url: url.into(),
            timeout: DEFAULT_TOOL_TIMEOUT,
            client,
        }
    }

    /// Set the per-call timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Build a tool from an OpenAPI document.
    ///
    /// Uses the first path, in document order, with a `post` operation.
    /// Fails with a reason when the document has no server URL or no POST
    /// operation.
    pub fn from_openapi(
        name: &str,
        spec: &Value,
        client: Client,
    ) -> std::result::Result<Self, String> {
        let base_url = spec
            .pointer("/servers/0/url")
            .and_then(Value::as_str)
            .filter(|url| !url.is_empty())
            .ok_or("no server URL")?;

        let (path, operation) = spec
            .get("paths")
            .and_then(Value::as_object)
            .into_iter()
            .flatten()
            .find_map(|(path, item)| {
                item.as_object()?
                    .iter()
                    .find(|(method, _)| method.eq_ignore_ascii_case("post"))
                    .map(|(_, op)| (path, op))
            })
            .ok_or("no POST operation")?;

        let description = ["description", "summary"]
            .iter()
            .find_map(|key| operation.get(*key).and_then(Value::as_str))
            .filter(|d| !d.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| format!("Execute {name}"));

        let parameters = request_schema(spec, operation);

        Ok(Self::new(
            name,
            description,
            parameters,
            format!("{base_url}{path}"),
            client,
        ))
    }

    /// Endpoint the arguments are POSTed to.
    pub fn url(&self) -> &str {
        &self.url
    }
}

/// The `application/json` request body schema, with a top-level `$ref`
/// resolved against `components.schemas`.
fn request_schema(spec: &Value, operation: &Value) -> Value {
    let mut schema = operation
        .pointer("/requestBody/content/application~1json/schema")
        .cloned()
        .unwrap_or_else(|| json!({}));

    if let Some(reference) = schema.get("$ref").and_then(Value::as_str) {
        let target = reference.rsplit('/').next().unwrap_or_default();
        schema = spec
            .pointer(&format!("/components/schemas/{target}"))
            .cloned()
            .unwrap_or_else(|| json!({}));
    }

    if let Some(obj) = schema.as_object_mut()
        && obj.contains_key("properties")
        && !obj.contains_key("type")
    {
        obj.insert("type".to_string(), json!("object"));
    }
    schema
}

#[async_trait]
impl Tool for HttpTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn parameters(&self) -> Value {
        self.parameters.clone()
    }

    async fn execute(&self, arguments: Value) -> std::result::Result<Value, ToolError> {
        tracing::debug!(tool = %self.name, url = %self.url, "POST tool request");

        let response = self
            .client
            .post(&self.url)
            .json(&arguments)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ToolError::Http {
                status: status.as_u16(),
                body,
            });
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| self.transport_error(e))?;
        serde_json::from_slice(&body).map_err(|e| ToolError::MalformedResponse(e.to_string()))
    }
}

impl HttpTool {
    fn transport_error(&self, e: reqwest::Error) -> ToolError {
        if e.is_timeout() {
            ToolError::Timeout(self.timeout)
        } else {
            ToolError::Network(e.to_string())
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Directory Loading
// ─────────────────────────────────────────────────────────────────────────────

/// Build the shared HTTP client used by every tool.
pub fn tool_client() -> Result<Client> {
    Client::builder()
        .build()
        .map_err(|e| AgentError::tool(format!("Failed to build HTTP client: {e}")))
}

/// Load every tool under `dir` into a registry.
///
/// Broken tool directories are skipped with a warning. A missing directory
/// yields an empty registry.
pub fn load_tools_dir(dir: &Path, timeout: Duration) -> Result<ToolRegistry> {
    let mut registry = ToolRegistry::new();

    if !dir.is_dir() {
        tracing::warn!(dir = %dir.display(), "Tools directory not found");
        return Ok(registry);
    }

    let client = tool_client()?;
    let entries = std::fs::read_dir(dir)
        .map_err(|e| AgentError::tool(format!("Failed to read {}: {e}", dir.display())))?;

    let mut tool_dirs: Vec<_> = entries
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| path.join(SCHEMA_FILE).is_file())
        .collect();
    tool_dirs.sort();

    for tool_dir in tool_dirs {
        let Some(name) = tool_dir.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        match load_tool(name, &tool_dir.join(SCHEMA_FILE), client.clone()) {
            Ok(tool) => {
                let tool = tool.with_timeout(timeout);
                tracing::debug!(tool = %name, url = %tool.url(), "Registered tool");
                registry.register(tool);
            }
            Err(reason) => {
                tracing::warn!(tool = %name, reason = %reason, "Skipping tool");
            }
        }
    }

    tracing::info!(count = registry.len(), dir = %dir.display(), "Loaded tools");
    Ok(registry)
}

fn load_tool(name: &str, schema_path: &Path, client: Client) -> std::result::Result<HttpTool, String> {
    let data = std::fs::read_to_string(schema_path).map_err(|e| e.to_string())?;
    let spec: Value = serde_json::from_str(&data).map_err(|e| e.to_string())?;
    HttpTool::from_openapi(name, &spec, client)
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

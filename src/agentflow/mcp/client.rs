//! JSON-RPC client for one MCP server over streamable HTTP.
//!
//! Protocol revision `2025-06-18`. Every request carries the protocol
//! version header, the configured auth headers, and — once `initialize`
//! has returned one — the server's session id. Responses may come back as
//! plain JSON or as a `text/event-stream` body; the SSE branch takes the
//! first `data:` line carrying a `result` or `error`.
//!
//! State machine: `disconnected → connecting → active → {error, disconnected}`.
//! A failed connect closes the HTTP client, clears the session and tool
//! list, and leaves the client disconnected.

use std::error::Error;
use std::fmt;
use std::time::Duration;

use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

use super::{McpServerConfig, McpToolCallResult, McpToolInfo, ServerStatus};

/// MCP wire protocol revision spoken by this client.
pub const MCP_PROTOCOL_VERSION: &str = "2025-06-18";

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Errors from the MCP transport and protocol layers.
#[derive(Debug, Clone)]
pub enum McpError {
    /// Operation attempted while the client is not connected.
    NotConnected,
    /// Network-level failure.
    Transport(String),
    /// Non-success HTTP status.
    Http { status: u16 },
    /// JSON-RPC `error` object or malformed envelope.
    Protocol(String),
}

impl fmt::Display for McpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            McpError::NotConnected => write!(f, "MCP client not connected"),
            McpError::Transport(msg) => write!(f, "MCP transport error: {}", msg),
            McpError::Http { status } => write!(f, "MCP server returned HTTP {}", status),
            McpError::Protocol(msg) => write!(f, "MCP error: {}", msg),
        }
    }
}

impl Error for McpError {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConnectionState {
    Disconnected,
    Connecting,
    Active,
    Errored,
}

struct Inner {
    http: Option<reqwest::Client>,
    session_id: Option<String>,
    state: ConnectionState,
}

/// One connection to one MCP server.
///
/// Requests are serialized per client (the connection mutex is held across
/// each round trip) to preserve session semantics.
pub struct McpClient {
    config: McpServerConfig,
    inner: Mutex<Inner>,
    tools: RwLock<Vec<McpToolInfo>>,
}

impl McpClient {
    pub fn new(config: McpServerConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(Inner {
                http: None,
                session_id: None,
                state: ConnectionState::Disconnected,
            }),
            tools: RwLock::new(Vec::new()),
        }
    }

    pub fn server_id(&self) -> &str {
        &self.config.id
    }

    pub fn server_name(&self) -> &str {
        &self.config.name
    }

    pub fn template(&self) -> Option<&str> {
        self.config.template.as_deref()
    }

    pub async fn is_connected(&self) -> bool {
        self.inner.lock().await.state == ConnectionState::Active
    }

    /// Connection status in repository terms.
    pub async fn status(&self) -> ServerStatus {
        match self.inner.lock().await.state {
            ConnectionState::Active => ServerStatus::Active,
            ConnectionState::Errored => ServerStatus::Error,
            _ => ServerStatus::Disconnected,
        }
    }

    /// Connect, initialize the session, and discover tools.
    pub async fn connect(&self) -> Result<(), McpError> {
        log::info!(
            "mcp_server_connecting server={} url={}",
            self.config.name,
            self.config.url
        );

        let mut inner = self.inner.lock().await;
        inner.state = ConnectionState::Connecting;
        inner.http = Some(
            reqwest::Client::builder()
                .timeout(REQUEST_TIMEOUT)
                .connect_timeout(CONNECT_TIMEOUT)
                .build()
                .map_err(|e| McpError::Transport(e.to_string()))?,
        );

        let connected = async {
            let init_result = self
                .send_request_locked(
                    &mut inner,
                    "initialize",
                    serde_json::json!({
                        "protocolVersion": MCP_PROTOCOL_VERSION,
                        "capabilities": {},
                        "clientInfo": {
                            "name": "agentflow",
                            "version": env!("CARGO_PKG_VERSION"),
                        },
                    }),
                )
                .await?;

            inner.session_id = init_result
                .get("sessionId")
                .and_then(|s| s.as_str())
                .map(|s| s.to_string());

            self.send_notification_locked(&inner, "notifications/initialized", serde_json::json!({}))
                .await?;

            let tools_result = self
                .send_request_locked(&mut inner, "tools/list", serde_json::json!({}))
                .await?;
            let discovered: Vec<McpToolInfo> = tools_result
                .get("tools")
                .and_then(|t| t.as_array())
                .map(|arr| {
                    arr.iter()
                        .filter_map(|tool| {
                            Some(McpToolInfo {
                                name: tool.get("name")?.as_str()?.to_string(),
                                description: tool
                                    .get("description")
                                    .and_then(|d| d.as_str())
                                    .map(|d| d.to_string()),
                                input_schema: tool
                                    .get("inputSchema")
                                    .cloned()
                                    .unwrap_or_else(|| serde_json::json!({})),
                                server_id: self.config.id.clone(),
                            })
                        })
                        .collect()
                })
                .unwrap_or_default();

            Ok::<Vec<McpToolInfo>, McpError>(discovered)
        }
        .await;

        match connected {
            Ok(discovered) => {
                inner.state = ConnectionState::Active;
                drop(inner);
                let count = discovered.len();
                *self.tools.write().await = discovered;
                log::info!(
                    "mcp_server_connected server={} tools_count={}",
                    self.config.name,
                    count
                );
                Ok(())
            }
            Err(e) => {
                log::error!(
                    "mcp_server_connection_failed server={} error={}",
                    self.config.name,
                    e
                );
                inner.http = None;
                inner.session_id = None;
                inner.state = ConnectionState::Disconnected;
                drop(inner);
                self.tools.write().await.clear();
                Err(e)
            }
        }
    }

    /// Close the connection and clear all discovered state.
    pub async fn disconnect(&self) {
        let mut inner = self.inner.lock().await;
        inner.http = None;
        inner.session_id = None;
        inner.state = ConnectionState::Disconnected;
        drop(inner);
        self.tools.write().await.clear();
        log::info!("mcp_server_disconnected server={}", self.config.name);
    }

    /// Snapshot of the tools discovered at connect time.
    pub async fn list_tools(&self) -> Vec<McpToolInfo> {
        self.tools.read().await.clone()
    }

    /// Call a tool by its unqualified name. Failures come back inside the
    /// result; only programming errors escape as `Err`.
    pub async fn call_tool(
        &self,
        name: &str,
        arguments: serde_json::Value,
    ) -> McpToolCallResult {
        let start = std::time::Instant::now();
        log::info!(
            "mcp_tool_call_started server={} tool={}",
            self.config.name,
            name
        );

        let mut inner = self.inner.lock().await;
        let response = self
            .send_request_locked(
                &mut inner,
                "tools/call",
                serde_json::json!({"name": name, "arguments": arguments}),
            )
            .await;
        drop(inner);

        let duration_ms = start.elapsed().as_secs_f64() * 1000.0;

        match response {
            Ok(result) => {
                let content = Self::extract_content(&result);
                log::info!(
                    "mcp_tool_call_completed server={} tool={} duration_ms={:.1}",
                    self.config.name,
                    name,
                    duration_ms
                );
                McpToolCallResult {
                    success: true,
                    content,
                    error: None,
                    duration_ms,
                }
            }
            Err(e) => {
                log::error!(
                    "mcp_tool_call_failed server={} tool={} error={} duration_ms={:.1}",
                    self.config.name,
                    name,
                    e,
                    duration_ms
                );
                McpToolCallResult {
                    success: false,
                    content: serde_json::Value::Null,
                    error: Some(e.to_string()),
                    duration_ms,
                }
            }
        }
    }

    /// Join text content blocks with newlines; non-text content is
    /// returned as-is.
    fn extract_content(result: &serde_json::Value) -> serde_json::Value {
        let Some(blocks) = result.get("content").and_then(|c| c.as_array()) else {
            return result.get("content").cloned().unwrap_or(serde_json::Value::Null);
        };

        let texts: Vec<&str> = blocks
            .iter()
            .filter(|b| b.get("type").and_then(|t| t.as_str()) == Some("text"))
            .filter_map(|b| b.get("text").and_then(|t| t.as_str()))
            .collect();

        if texts.is_empty() {
            serde_json::json!(blocks)
        } else {
            serde_json::json!(texts.join("\n"))
        }
    }

    fn request_headers(&self, session_id: Option<&str>) -> Vec<(String, String)> {
        let mut headers = vec![
            ("Content-Type".to_string(), "application/json".to_string()),
            (
                "Accept".to_string(),
                "application/json, text/event-stream".to_string(),
            ),
            (
                "MCP-Protocol-Version".to_string(),
                MCP_PROTOCOL_VERSION.to_string(),
            ),
        ];
        for (name, value) in &self.config.headers {
            headers.push((name.clone(), value.clone()));
        }
        if let Some(session) = session_id {
            headers.push(("Mcp-Session-Id".to_string(), session.to_string()));
        }
        headers
    }

    async fn send_request_locked(
        &self,
        inner: &mut Inner,
        method: &str,
        params: serde_json::Value,
    ) -> Result<serde_json::Value, McpError> {
        let http = inner.http.as_ref().ok_or(McpError::NotConnected)?;

        let payload = serde_json::json!({
            "jsonrpc": "2.0",
            "id": Uuid::new_v4().to_string(),
            "method": method,
            "params": params,
        });

        let mut request = http.post(&self.config.url).json(&payload);
        for (name, value) in self.request_headers(inner.session_id.as_deref()) {
            request = request.header(name, value);
        }

        let response = request
            .send()
            .await
            .map_err(|e| McpError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(McpError::Http {
                status: status.as_u16(),
            });
        }

        let content_type = response
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();
        let body = response
            .text()
            .await
            .map_err(|e| McpError::Transport(e.to_string()))?;

        if content_type.starts_with("text/event-stream") {
            return Self::parse_sse_body(&body);
        }

        let envelope: serde_json::Value =
            serde_json::from_str(&body).map_err(|e| McpError::Protocol(e.to_string()))?;
        Self::unwrap_envelope(envelope)
    }

    async fn send_notification_locked(
        &self,
        inner: &Inner,
        method: &str,
        params: serde_json::Value,
    ) -> Result<(), McpError> {
        let http = inner.http.as_ref().ok_or(McpError::NotConnected)?;

        // Notifications carry no id and expect no response body.
        let payload = serde_json::json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
        });

        let mut request = http.post(&self.config.url).json(&payload);
        for (name, value) in self.request_headers(inner.session_id.as_deref()) {
            request = request.header(name, value);
        }

        let response = request
            .send()
            .await
            .map_err(|e| McpError::Transport(e.to_string()))?;

        match response.status().as_u16() {
            200 | 202 => Ok(()),
            status => Err(McpError::Http { status }),
        }
    }

    /// SSE bodies are line-delimited; the first `data:` line carrying a
    /// `result` or `error` decides the call.
    fn parse_sse_body(body: &str) -> Result<serde_json::Value, McpError> {
        for line in body.lines() {
            let Some(payload) = line.strip_prefix("data: ") else {
                continue;
            };
            let Ok(data) = serde_json::from_str::<serde_json::Value>(payload) else {
                continue;
            };
            if data.get("result").is_some() || data.get("error").is_some() {
                return Self::unwrap_envelope(data);
            }
        }
        Ok(serde_json::json!({}))
    }

    fn unwrap_envelope(envelope: serde_json::Value) -> Result<serde_json::Value, McpError> {
        if let Some(error) = envelope.get("error") {
            let message = error
                .get("message")
                .and_then(|m| m.as_str())
                .map(|m| m.to_string())
                .unwrap_or_else(|| error.to_string());
            return Err(McpError::Protocol(message));
        }
        Ok(envelope.get("result").cloned().unwrap_or(serde_json::json!({})))
    }
}

//! MCP (Model Context Protocol) subsystem.
//!
//! Connects to remote tool servers over the streamable-HTTP transport
//! (JSON-RPC 2.0, optionally server-sent-event responses), discovers their
//! tools, and exposes them to the engine as first-class registry tools
//! named `"<server_id>:<tool_name>"`.
//!
//! - [`client`]: one JSON-RPC connection to one server.
//! - [`manager`]: the process-wide pool of clients; sole writer of
//!   MCP-owned registry entries.
//! - [`adapter`]: converts MCP input schemas to registry tool definitions.

pub mod adapter;
pub mod client;
pub mod manager;

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use adapter::McpToolAdapter;
pub use client::{McpClient, McpError};
pub use manager::McpManager;

/// MCP server connection status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServerStatus {
    Active,
    Error,
    Disconnected,
}

/// Connection configuration for one MCP server.
///
/// `headers` carries every credential-derived header; credentials never
/// appear in persisted records, only a `secret_ref` pointing at the secret
/// store (see [`McpServerInstance`]).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpServerConfig {
    pub id: String,
    pub name: String,
    pub url: String,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    /// Catalog template id this instance was created from, if any.
    #[serde(default)]
    pub template: Option<String>,
}

/// A user's configured MCP server instance, as persisted. Credentials
/// live in the secret store behind `secret_ref`; `headers_config` only
/// carries non-secret header settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpServerInstance {
    pub id: String,
    #[serde(default)]
    pub user_id: String,
    pub name: String,
    #[serde(default)]
    pub template: Option<String>,
    pub url: String,
    pub status: ServerStatus,
    /// Secret-store key for this server's credentials.
    pub secret_ref: String,
    #[serde(default)]
    pub oauth_token_ref: Option<String>,
    #[serde(default)]
    pub headers_config: HashMap<String, String>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub last_used_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub error_message: Option<String>,
}

/// Credential field specification on a catalog template.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CredentialSpec {
    pub name: String,
    pub description: String,
    #[serde(default = "default_sensitive")]
    pub sensitive: bool,
    /// HTTP header the credential is sent as over streamable HTTP.
    #[serde(default)]
    pub header_name: Option<String>,
}

fn default_sensitive() -> bool {
    true
}

/// Catalog template describing a known MCP server type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpServerTemplate {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub url_template: Option<String>,
    #[serde(default = "default_auth_type")]
    pub auth_type: String,
    #[serde(default)]
    pub token_guide_url: Option<String>,
    #[serde(default)]
    pub scopes: Vec<String>,
    #[serde(default)]
    pub credentials_required: Vec<CredentialSpec>,
    #[serde(default)]
    pub credentials_optional: Vec<CredentialSpec>,
    /// Tool names the template advertises, for display before connecting.
    #[serde(default)]
    pub tools: Vec<String>,
}

fn default_auth_type() -> String {
    "oauth_token".to_string()
}

/// A tool discovered on an MCP server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpToolInfo {
    /// Unqualified name as the server reports it.
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub input_schema: serde_json::Value,
    /// Which server provides this tool.
    pub server_id: String,
}

/// Result of one `tools/call`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpToolCallResult {
    pub success: bool,
    #[serde(default)]
    pub content: serde_json::Value,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub duration_ms: f64,
}

//! Crate-wide error taxonomy.
//!
//! Tool-call failures never surface as errors: they are reported back to the
//! LLM as failed [`ToolResult`](crate::tool_protocol::ToolResult)s so the
//! model can route around them. Only configuration problems, safety
//! violations, exhausted transport retries, and genuinely fatal conditions
//! cross the workflow boundary as [`AgentError`].

use std::error::Error;
use std::fmt;

/// Error kinds surfaced by the execution engine.
#[derive(Debug, Clone)]
pub enum AgentError {
    /// Bindings inconsistent with the agent kind, unknown provider, or
    /// missing credentials. Never retried.
    ConfigInvalid(String),
    /// Input safety gate hit; the invocation terminates with a refusal.
    InputUnsafe(Vec<String>),
    /// Output safety gate hit; the produced content is withheld.
    OutputUnsafe(Vec<String>),
    /// Requested tool is not in the registry after MCP resolution.
    ToolUnknown(String),
    /// Tool body raised or arguments failed to bind.
    ToolExecutionError { tool: String, message: String },
    /// Circuit open or loop threshold exceeded for a child agent.
    ChildAgentUnavailable { agent_id: String, reason: String },
    /// Network-level failure talking to an LLM, MCP server, or knowledge
    /// store. Retried by the activity layer; fatal once retries exhaust.
    Transport(String),
    /// Per-activity or per-invocation deadline exceeded.
    Timeout(String),
    /// Tool loop cap reached.
    MaxIterations(u32),
    /// Tool-call arguments were not valid JSON. Treated as empty args by
    /// the gateway; carried here only for diagnostics.
    SchemaParse(String),
    /// Any uncaught failure in the workflow body.
    Fatal(String),
}

impl AgentError {
    /// Whether the activity layer may retry the failed operation.
    pub fn is_retryable(&self) -> bool {
        matches!(self, AgentError::Transport(_) | AgentError::Timeout(_))
    }

    /// Short machine-readable kind tag used in logs and error events.
    pub fn kind(&self) -> &'static str {
        match self {
            AgentError::ConfigInvalid(_) => "config_invalid",
            AgentError::InputUnsafe(_) => "input_unsafe",
            AgentError::OutputUnsafe(_) => "output_unsafe",
            AgentError::ToolUnknown(_) => "tool_unknown",
            AgentError::ToolExecutionError { .. } => "tool_execution_error",
            AgentError::ChildAgentUnavailable { .. } => "child_agent_unavailable",
            AgentError::Transport(_) => "transport",
            AgentError::Timeout(_) => "timeout",
            AgentError::MaxIterations(_) => "max_iterations",
            AgentError::SchemaParse(_) => "schema_parse",
            AgentError::Fatal(_) => "fatal",
        }
    }
}

impl fmt::Display for AgentError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AgentError::ConfigInvalid(msg) => write!(f, "Invalid configuration: {}", msg),
            AgentError::InputUnsafe(violations) => {
                write!(f, "Input safety violation: {}", violations.join("; "))
            }
            AgentError::OutputUnsafe(violations) => {
                write!(f, "Output safety violation: {}", violations.join("; "))
            }
            AgentError::ToolUnknown(name) => write!(f, "Tool not found: {}", name),
            AgentError::ToolExecutionError { tool, message } => {
                write!(f, "Tool '{}' failed: {}", tool, message)
            }
            AgentError::ChildAgentUnavailable { agent_id, reason } => {
                write!(f, "Agent {} unavailable: {}", agent_id, reason)
            }
            AgentError::Transport(msg) => write!(f, "Transport error: {}", msg),
            AgentError::Timeout(what) => write!(f, "Timed out: {}", what),
            AgentError::MaxIterations(n) => write!(f, "Maximum iterations reached ({})", n),
            AgentError::SchemaParse(msg) => write!(f, "Tool-call argument parse error: {}", msg),
            AgentError::Fatal(msg) => write!(f, "Fatal workflow error: {}", msg),
        }
    }
}

impl Error for AgentError {}

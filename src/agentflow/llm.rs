//! Provider-agnostic LLM gateway.
//!
//! The engine talks to every chat-completion provider through the
//! [`LlmProvider`] trait and the lightweight data types in this module.
//! Concrete adapters live in [`clients`](crate::agentflow::clients); the
//! [`LlmClient`] factory picks one from an [`LlmBinding`].
//!
//! Two wire dialects are normalized here:
//!
//! - *OpenAI-style*: system is a regular message; tool results are `tool`
//!   messages addressed by `tool_call_id`; tool-call arguments travel as
//!   JSON strings and are parsed defensively.
//! - *Anthropic-style*: system is a side channel; tool results are
//!   `tool_result` blocks inside a user message; tool calls are `tool_use`
//!   blocks on the assistant message.
//!
//! # Example
//!
//! ```rust,no_run
//! use agentflow::config::LlmBinding;
//! use agentflow::llm::{ChatMessage, ChatRole, CompletionOptions, LlmClient};
//!
//! # async {
//! let binding = LlmBinding::default();
//! let provider = LlmClient::get_provider(&binding)?;
//! let response = provider
//!     .complete(
//!         &[ChatMessage::text(ChatRole::User, "Who are you?")],
//!         &CompletionOptions::default(),
//!     )
//!     .await?;
//! println!("{}", response.content);
//! # Ok::<(), Box<dyn std::error::Error + Send + Sync>>(())
//! # };
//! ```

use std::error::Error;
use std::fmt;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::stream::Stream;

use crate::agentflow::clients::anthropic::AnthropicProvider;
use crate::agentflow::clients::openai::OpenAiProvider;
use crate::agentflow::config::LlmBinding;
use crate::agentflow::error::AgentError;

/// Message roles understood by the gateway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatRole {
    System,
    User,
    Assistant,
    /// A tool-result message correlating with a prior assistant
    /// [`ToolCall`] by id.
    Tool,
}

impl ChatRole {
    /// Wire tag for the OpenAI dialect.
    pub fn as_str(&self) -> &'static str {
        match self {
            ChatRole::System => "system",
            ChatRole::User => "user",
            ChatRole::Assistant => "assistant",
            ChatRole::Tool => "tool",
        }
    }

    /// Parse from a persisted history role; unknown strings fall back to
    /// `User` so stale histories cannot poison a request.
    pub fn parse(role: &str) -> Self {
        match role {
            "system" => ChatRole::System,
            "assistant" => ChatRole::Assistant,
            "tool" => ChatRole::Tool,
            _ => ChatRole::User,
        }
    }
}

/// A single tool call requested by the LLM.
#[derive(Debug, Clone)]
pub struct ToolCall {
    /// Provider-assigned id, unique per assistant turn.
    pub id: String,
    /// Tool name exactly as presented in the request schema (sanitized form).
    pub name: String,
    /// Parsed arguments; malformed argument JSON becomes an empty object.
    pub arguments: serde_json::Value,
}

/// Provider-agnostic tool schema sent along with a chat request.
///
/// `parameters` must be a JSON Schema object with `type: "object"`,
/// `properties`, and `required`; array-typed properties always carry `items`.
#[derive(Debug, Clone)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

/// How the provider should treat the supplied tools.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ToolChoice {
    /// Provider default: the model decides.
    #[default]
    Auto,
    /// Force *some* tool call (Anthropic: `any`).
    Required,
    /// Do not call tools; the tools array is omitted from the request.
    None,
    /// Force the named tool.
    Tool(String),
}

/// Prompt/completion token accounting for one call.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

/// A chat message in gateway form.
#[derive(Debug, Clone)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
    /// Set when `role == Tool`: the id of the call this result answers.
    pub tool_call_id: Option<String>,
    /// Pending calls on an assistant message; empty otherwise.
    pub tool_calls: Vec<ToolCall>,
}

impl ChatMessage {
    /// Plain text message with no tool payload.
    pub fn text(role: ChatRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            tool_call_id: None,
            tool_calls: Vec::new(),
        }
    }

    /// Assistant message carrying the given pending tool calls.
    pub fn assistant_with_calls(content: impl Into<String>, tool_calls: Vec<ToolCall>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
            tool_call_id: None,
            tool_calls,
        }
    }

    /// Tool-result message answering `call_id`.
    pub fn tool_result(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Tool,
            content: content.into(),
            tool_call_id: Some(call_id.into()),
            tool_calls: Vec::new(),
        }
    }
}

/// Per-call overrides and tool wiring.
#[derive(Debug, Clone, Default)]
pub struct CompletionOptions {
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    pub stop_sequences: Option<Vec<String>>,
    pub tools: Option<Vec<ToolSchema>>,
    pub tool_choice: ToolChoice,
}

/// Normalized completion result.
///
/// `finish_reason` is one of `stop`, `length`, `tool_calls`,
/// `content_filter`; Anthropic stop reasons are mapped onto the same set.
#[derive(Debug, Clone)]
pub struct LlmResponse {
    pub content: String,
    pub model: String,
    pub usage: TokenUsage,
    pub finish_reason: String,
    pub tool_calls: Vec<ToolCall>,
}

/// Stream of incremental content chunks.
pub type ChunkStream =
    Pin<Box<dyn Stream<Item = Result<String, Box<dyn Error + Send + Sync>>> + Send>>;

/// Gateway errors. Missing credentials are configuration errors; HTTP 5xx
/// and connection failures are transport errors the activity layer retries.
#[derive(Debug, Clone)]
pub enum LlmError {
    MissingCredentials(String),
    Transport(String),
    /// Non-success HTTP status from the provider.
    Http { status: u16, body: String },
    /// Response body did not match the expected shape.
    Parse(String),
}

impl LlmError {
    pub fn is_retryable(&self) -> bool {
        match self {
            LlmError::Transport(_) => true,
            LlmError::Http { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }
}

impl fmt::Display for LlmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LlmError::MissingCredentials(what) => write!(f, "Missing credentials: {}", what),
            LlmError::Transport(msg) => write!(f, "LLM transport error: {}", msg),
            LlmError::Http { status, body } => write!(f, "LLM HTTP {}: {}", status, body),
            LlmError::Parse(msg) => write!(f, "LLM response parse error: {}", msg),
        }
    }
}

impl Error for LlmError {}

impl From<LlmError> for AgentError {
    fn from(err: LlmError) -> Self {
        match err {
            LlmError::MissingCredentials(what) => AgentError::ConfigInvalid(what),
            LlmError::Transport(msg) => AgentError::Transport(msg),
            LlmError::Http { status, body } if status >= 500 || status == 429 => {
                AgentError::Transport(format!("HTTP {}: {}", status, body))
            }
            LlmError::Http { status, body } => {
                AgentError::Fatal(format!("LLM rejected request (HTTP {}): {}", status, body))
            }
            LlmError::Parse(msg) => AgentError::Fatal(msg),
        }
    }
}

/// Trait-driven abstraction for a concrete chat-completion provider.
///
/// Implementations must be `Send + Sync` so one provider instance can be
/// shared across concurrent invocations.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Full request/response chat completion, with native tool calling when
    /// `options.tools` is present.
    async fn complete(
        &self,
        messages: &[ChatMessage],
        options: &CompletionOptions,
    ) -> Result<LlmResponse, LlmError>;

    /// Streaming completion yielding content deltas. Tool calling over the
    /// streaming path is out of scope; implementations may ignore tools.
    async fn stream(
        &self,
        messages: &[ChatMessage],
        options: &CompletionOptions,
    ) -> Result<ChunkStream, LlmError>;

    /// Identifier of the upstream model, e.g. `"gpt-4-turbo"`.
    fn model_name(&self) -> &str;
}

/// Factory for provider adapters.
///
/// Knows the built-in provider names; `azure` and `ollama` ride on the
/// OpenAI-compatible adapter with a custom base URL.
pub struct LlmClient;

impl LlmClient {
    /// Build a provider for the binding. Unknown provider names and missing
    /// API keys are configuration errors, never retried.
    pub fn get_provider(binding: &LlmBinding) -> Result<Arc<dyn LlmProvider>, AgentError> {
        match binding.provider.to_lowercase().as_str() {
            "openai" | "azure" => {
                let key = std::env::var("OPENAI_API_KEY").map_err(|_| {
                    AgentError::ConfigInvalid(
                        "OPENAI_API_KEY not set in the environment".to_string(),
                    )
                })?;
                Ok(Arc::new(OpenAiProvider::new(&key, binding)))
            }
            "ollama" => {
                // Local servers authenticate with a placeholder key.
                let base = binding
                    .api_base
                    .clone()
                    .unwrap_or_else(|| "http://localhost:11434/v1".to_string());
                let mut local = binding.clone();
                local.api_base = Some(base);
                Ok(Arc::new(OpenAiProvider::new("ollama", &local)))
            }
            "anthropic" => {
                let key = std::env::var("ANTHROPIC_API_KEY").map_err(|_| {
                    AgentError::ConfigInvalid(
                        "ANTHROPIC_API_KEY not set in the environment".to_string(),
                    )
                })?;
                Ok(Arc::new(AnthropicProvider::new(&key, binding)))
            }
            other => Err(AgentError::ConfigInvalid(format!(
                "Unsupported LLM provider: {}. Supported providers: openai, anthropic, azure, ollama",
                other
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_parse_round_trip() {
        for role in ["system", "user", "assistant", "tool"] {
            assert_eq!(ChatRole::parse(role).as_str(), role);
        }
        // Unknown roles degrade to user.
        assert_eq!(ChatRole::parse("function"), ChatRole::User);
    }

    #[test]
    fn test_message_constructors() {
        let msg = ChatMessage::tool_result("call_1", "42");
        assert_eq!(msg.role, ChatRole::Tool);
        assert_eq!(msg.tool_call_id.as_deref(), Some("call_1"));

        let call = ToolCall {
            id: "call_2".into(),
            name: "calculator".into(),
            arguments: serde_json::json!({"expression": "2+2"}),
        };
        let msg = ChatMessage::assistant_with_calls("", vec![call]);
        assert_eq!(msg.tool_calls.len(), 1);
    }

    #[test]
    fn test_llm_error_retry_classification() {
        assert!(LlmError::Transport("reset".into()).is_retryable());
        assert!(LlmError::Http { status: 503, body: String::new() }.is_retryable());
        assert!(LlmError::Http { status: 429, body: String::new() }.is_retryable());
        assert!(!LlmError::Http { status: 400, body: String::new() }.is_retryable());
        assert!(!LlmError::MissingCredentials("key".into()).is_retryable());
    }

    #[test]
    fn test_unknown_provider_is_config_invalid() {
        let binding = LlmBinding {
            provider: "mystery".into(),
            ..LlmBinding::default()
        };
        match LlmClient::get_provider(&binding) {
            Err(AgentError::ConfigInvalid(msg)) => assert!(msg.contains("mystery")),
            other => panic!("expected ConfigInvalid, got {:?}", other.map(|_| ())),
        }
    }
}

//! Stream event types for agent execution progress.
//!
//! The projector in [`streaming`](crate::agentflow::streaming) turns one
//! invocation into a totally ordered sequence of these events, ending in
//! exactly one of `complete` or `error`. Payload shapes are part of the
//! wire contract with SSE consumers; no event type outside this set is
//! ever emitted.

use serde::{Deserialize, Serialize};

/// Types of streaming events during agent execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamEventType {
    Thinking,

    Retrieving,
    Retrieved,

    ToolStart,
    ToolEnd,

    McpStart,
    McpEnd,

    SkillStart,
    SkillEnd,

    Generating,
    Chunk,

    Complete,
    Error,

    MessageSaved,
}

/// One streaming event: a type plus a small JSON payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamEvent {
    #[serde(rename = "type")]
    pub event_type: StreamEventType,
    #[serde(default)]
    pub data: serde_json::Value,
}

impl StreamEvent {
    /// Server-sent-event shape: `{"event": ..., "data": {...}}`.
    pub fn to_sse(&self) -> serde_json::Value {
        serde_json::json!({
            "event": self.event_type,
            "data": self.data,
        })
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self.event_type,
            StreamEventType::Complete | StreamEventType::Error
        )
    }
}

pub fn thinking_event(step: Option<&str>) -> StreamEvent {
    let mut data = serde_json::Map::new();
    if let Some(step) = step {
        data.insert("step".to_string(), serde_json::json!(step));
    }
    StreamEvent {
        event_type: StreamEventType::Thinking,
        data: serde_json::Value::Object(data),
    }
}

pub fn retrieving_event(knowledge_base_name: &str, query_preview: Option<&str>) -> StreamEvent {
    let mut data = serde_json::Map::new();
    data.insert(
        "knowledge_base_name".to_string(),
        serde_json::json!(knowledge_base_name),
    );
    if let Some(preview) = query_preview {
        let preview: String = preview.chars().take(100).collect();
        data.insert("query_preview".to_string(), serde_json::json!(preview));
    }
    StreamEvent {
        event_type: StreamEventType::Retrieving,
        data: serde_json::Value::Object(data),
    }
}

pub fn retrieved_event(document_count: usize, chunks_used: usize) -> StreamEvent {
    StreamEvent {
        event_type: StreamEventType::Retrieved,
        data: serde_json::json!({
            "document_count": document_count,
            "chunks_used": chunks_used,
        }),
    }
}

pub fn tool_start_event(
    tool_name: &str,
    tool_id: Option<&str>,
    args_preview: Option<&str>,
) -> StreamEvent {
    let mut data = serde_json::Map::new();
    data.insert("tool_name".to_string(), serde_json::json!(tool_name));
    if let Some(id) = tool_id {
        data.insert("tool_id".to_string(), serde_json::json!(id));
    }
    if let Some(preview) = args_preview {
        let preview: String = preview.chars().take(200).collect();
        data.insert("args_preview".to_string(), serde_json::json!(preview));
    }
    StreamEvent {
        event_type: StreamEventType::ToolStart,
        data: serde_json::Value::Object(data),
    }
}

pub fn tool_end_event(tool_name: &str, success: bool, result_preview: Option<&str>) -> StreamEvent {
    let mut data = serde_json::Map::new();
    data.insert("tool_name".to_string(), serde_json::json!(tool_name));
    data.insert("success".to_string(), serde_json::json!(success));
    if let Some(preview) = result_preview {
        let preview: String = preview.chars().take(200).collect();
        data.insert("result_preview".to_string(), serde_json::json!(preview));
    }
    StreamEvent {
        event_type: StreamEventType::ToolEnd,
        data: serde_json::Value::Object(data),
    }
}

pub fn mcp_start_event(server_name: &str, tool_name: &str) -> StreamEvent {
    StreamEvent {
        event_type: StreamEventType::McpStart,
        data: serde_json::json!({
            "server_name": server_name,
            "tool_name": tool_name,
        }),
    }
}

pub fn mcp_end_event(server_name: &str, tool_name: &str, success: bool) -> StreamEvent {
    StreamEvent {
        event_type: StreamEventType::McpEnd,
        data: serde_json::json!({
            "server_name": server_name,
            "tool_name": tool_name,
            "success": success,
        }),
    }
}

pub fn skill_start_event(skill_name: &str, skill_id: &str) -> StreamEvent {
    StreamEvent {
        event_type: StreamEventType::SkillStart,
        data: serde_json::json!({
            "skill_name": skill_name,
            "skill_id": skill_id,
        }),
    }
}

pub fn skill_end_event(skill_name: &str, skill_id: &str) -> StreamEvent {
    StreamEvent {
        event_type: StreamEventType::SkillEnd,
        data: serde_json::json!({
            "skill_name": skill_name,
            "skill_id": skill_id,
        }),
    }
}

pub fn generating_event() -> StreamEvent {
    StreamEvent {
        event_type: StreamEventType::Generating,
        data: serde_json::json!({}),
    }
}

pub fn chunk_event(content: &str, token_count: Option<u64>) -> StreamEvent {
    let mut data = serde_json::Map::new();
    data.insert("content".to_string(), serde_json::json!(content));
    if let Some(count) = token_count {
        data.insert("token_count".to_string(), serde_json::json!(count));
    }
    StreamEvent {
        event_type: StreamEventType::Chunk,
        data: serde_json::Value::Object(data),
    }
}

pub fn complete_event(
    message_id: &str,
    execution_id: Option<&str>,
    total_tokens: Option<u64>,
) -> StreamEvent {
    let mut data = serde_json::Map::new();
    data.insert("message_id".to_string(), serde_json::json!(message_id));
    if let Some(id) = execution_id {
        data.insert("execution_id".to_string(), serde_json::json!(id));
    }
    if let Some(tokens) = total_tokens {
        data.insert("total_tokens".to_string(), serde_json::json!(tokens));
    }
    StreamEvent {
        event_type: StreamEventType::Complete,
        data: serde_json::Value::Object(data),
    }
}

pub fn error_event(error: &str, error_type: Option<&str>, recoverable: bool) -> StreamEvent {
    let mut data = serde_json::Map::new();
    data.insert("error".to_string(), serde_json::json!(error));
    data.insert("recoverable".to_string(), serde_json::json!(recoverable));
    if let Some(kind) = error_type {
        data.insert("error_type".to_string(), serde_json::json!(kind));
    }
    StreamEvent {
        event_type: StreamEventType::Error,
        data: serde_json::Value::Object(data),
    }
}

pub fn message_saved_event(role: &str, message_id: Option<&str>) -> StreamEvent {
    let mut data = serde_json::Map::new();
    data.insert("role".to_string(), serde_json::json!(role));
    if let Some(id) = message_id {
        data.insert("message_id".to_string(), serde_json::json!(id));
    }
    StreamEvent {
        event_type: StreamEventType::MessageSaved,
        data: serde_json::Value::Object(data),
    }
}

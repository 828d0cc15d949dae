//! Anthropic-dialect provider adapter.
//!
//! Differences from the OpenAI dialect handled here:
//!
//! - the system prompt is a top-level `system` field, never a message;
//! - tool results are `tool_result` blocks inside a **user** message;
//! - tool calls arrive as `tool_use` blocks inside the assistant message,
//!   with arguments already parsed;
//! - `tool_choice=required` maps to `{"type":"any"}`, a specific tool to
//!   `{"type":"tool","name":...}`, and `none` omits the tools array;
//! - stop reasons are normalized onto the gateway set (`end_turn`→`stop`,
//!   `max_tokens`→`length`, `tool_use`→`tool_calls`).

use async_trait::async_trait;

use crate::agentflow::clients::common::{get_shared_http_client, post_json, sse_content_stream};
use crate::agentflow::config::LlmBinding;
use crate::agentflow::llm::{
    ChatMessage, ChatRole, ChunkStream, CompletionOptions, LlmError, LlmProvider, LlmResponse,
    TokenUsage, ToolCall, ToolChoice,
};

const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Client wrapper for Anthropic's Messages API.
pub struct AnthropicProvider {
    api_key: String,
    base_url: String,
    binding: LlmBinding,
}

impl AnthropicProvider {
    pub fn new(api_key: &str, binding: &LlmBinding) -> Self {
        Self {
            api_key: api_key.to_string(),
            base_url: binding
                .api_base
                .clone()
                .unwrap_or_else(|| "https://api.anthropic.com/v1".to_string()),
            binding: binding.clone(),
        }
    }

    /// Split gateway messages into the side-channel system prompt and the
    /// Anthropic messages array.
    fn wire_messages(messages: &[ChatMessage]) -> (String, Vec<serde_json::Value>) {
        let mut system_prompt = String::new();
        let mut formatted = Vec::new();

        for msg in messages {
            match msg.role {
                ChatRole::System => {
                    system_prompt = msg.content.clone();
                }
                ChatRole::Tool => {
                    formatted.push(serde_json::json!({
                        "role": "user",
                        "content": [{
                            "type": "tool_result",
                            "tool_use_id": msg.tool_call_id.clone().unwrap_or_default(),
                            "content": msg.content,
                        }],
                    }));
                }
                ChatRole::Assistant if !msg.tool_calls.is_empty() => {
                    let mut blocks = Vec::new();
                    if !msg.content.is_empty() {
                        blocks.push(serde_json::json!({"type": "text", "text": msg.content}));
                    }
                    for tc in &msg.tool_calls {
                        blocks.push(serde_json::json!({
                            "type": "tool_use",
                            "id": tc.id,
                            "name": tc.name,
                            "input": tc.arguments,
                        }));
                    }
                    formatted.push(serde_json::json!({
                        "role": "assistant",
                        "content": blocks,
                    }));
                }
                _ => {
                    formatted.push(serde_json::json!({
                        "role": msg.role.as_str(),
                        "content": msg.content,
                    }));
                }
            }
        }

        (system_prompt, formatted)
    }

    fn build_body(&self, messages: &[ChatMessage], options: &CompletionOptions) -> serde_json::Value {
        let (system_prompt, formatted) = Self::wire_messages(messages);

        let mut body = serde_json::json!({
            "model": self.binding.model,
            "messages": formatted,
            "max_tokens": options.max_tokens.unwrap_or(self.binding.max_tokens),
            "temperature": options.temperature.unwrap_or(self.binding.temperature),
        });

        if !system_prompt.is_empty() {
            body["system"] = serde_json::json!(system_prompt);
        }

        let stops = options
            .stop_sequences
            .clone()
            .unwrap_or_else(|| self.binding.stop_sequences.clone());
        if !stops.is_empty() {
            body["stop_sequences"] = serde_json::json!(stops);
        }

        if let Some(tools) = &options.tools {
            if !tools.is_empty() && options.tool_choice != ToolChoice::None {
                let wire_tools: Vec<serde_json::Value> = tools
                    .iter()
                    .map(|t| {
                        serde_json::json!({
                            "name": t.name,
                            "description": t.description,
                            "input_schema": t.parameters,
                        })
                    })
                    .collect();
                body["tools"] = serde_json::json!(wire_tools);
                match &options.tool_choice {
                    ToolChoice::Auto => {}
                    ToolChoice::Required => {
                        body["tool_choice"] = serde_json::json!({"type": "any"});
                    }
                    ToolChoice::Tool(name) => {
                        body["tool_choice"] = serde_json::json!({"type": "tool", "name": name});
                    }
                    ToolChoice::None => unreachable!(),
                }
            }
        }

        body
    }

    fn normalize_stop_reason(reason: &str) -> String {
        match reason {
            "end_turn" | "stop_sequence" => "stop".to_string(),
            "max_tokens" => "length".to_string(),
            "tool_use" => "tool_calls".to_string(),
            other => other.to_string(),
        }
    }

    fn parse_response(text: &str) -> Result<LlmResponse, LlmError> {
        let parsed: serde_json::Value =
            serde_json::from_str(text).map_err(|e| LlmError::Parse(e.to_string()))?;

        let mut content = String::new();
        let mut tool_calls = Vec::new();

        if let Some(blocks) = parsed.get("content").and_then(|c| c.as_array()) {
            for block in blocks {
                match block.get("type").and_then(|t| t.as_str()) {
                    Some("text") => {
                        if let Some(text) = block.get("text").and_then(|t| t.as_str()) {
                            content.push_str(text);
                        }
                    }
                    Some("tool_use") => {
                        tool_calls.push(ToolCall {
                            id: block
                                .get("id")
                                .and_then(|i| i.as_str())
                                .unwrap_or_default()
                                .to_string(),
                            name: block
                                .get("name")
                                .and_then(|n| n.as_str())
                                .unwrap_or_default()
                                .to_string(),
                            arguments: block
                                .get("input")
                                .filter(|i| i.is_object())
                                .cloned()
                                .unwrap_or_else(|| serde_json::json!({})),
                        });
                    }
                    _ => {}
                }
            }
        }

        let usage = parsed
            .get("usage")
            .map(|u| {
                let input = u.get("input_tokens").and_then(|v| v.as_u64()).unwrap_or(0);
                let output = u.get("output_tokens").and_then(|v| v.as_u64()).unwrap_or(0);
                TokenUsage {
                    prompt_tokens: input,
                    completion_tokens: output,
                    total_tokens: input + output,
                }
            })
            .unwrap_or_default();

        let stop_reason = parsed
            .get("stop_reason")
            .and_then(|r| r.as_str())
            .unwrap_or("end_turn");

        Ok(LlmResponse {
            content,
            model: parsed
                .get("model")
                .and_then(|m| m.as_str())
                .unwrap_or("")
                .to_string(),
            usage,
            finish_reason: Self::normalize_stop_reason(stop_reason),
            tool_calls,
        })
    }
}

#[async_trait]
impl LlmProvider for AnthropicProvider {
    async fn complete(
        &self,
        messages: &[ChatMessage],
        options: &CompletionOptions,
    ) -> Result<LlmResponse, LlmError> {
        let body = self.build_body(messages, options);
        let url = format!("{}/messages", self.base_url.trim_end_matches('/'));

        let (status, text) = post_json(
            &url,
            &[
                ("x-api-key", self.api_key.clone()),
                ("anthropic-version", ANTHROPIC_VERSION.to_string()),
            ],
            &body,
        )
        .await?;

        if status >= 400 {
            log::error!("anthropic completion failed: HTTP {} from {}", status, url);
            return Err(LlmError::Http { status, body: text });
        }

        Self::parse_response(&text)
    }

    async fn stream(
        &self,
        messages: &[ChatMessage],
        options: &CompletionOptions,
    ) -> Result<ChunkStream, LlmError> {
        let mut body = self.build_body(messages, options);
        body["stream"] = serde_json::json!(true);
        let url = format!("{}/messages", self.base_url.trim_end_matches('/'));

        let response = get_shared_http_client()
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&body)
            .send()
            .await
            .map_err(|e| LlmError::Transport(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let text = response.text().await.unwrap_or_default();
            return Err(LlmError::Http { status, body: text });
        }

        Ok(sse_content_stream(response, |value| {
            // content_block_delta events carry the incremental text.
            if value.get("type")?.as_str()? != "content_block_delta" {
                return None;
            }
            value
                .get("delta")?
                .get("text")?
                .as_str()
                .map(|s| s.to_string())
        }))
    }

    fn model_name(&self) -> &str {
        &self.binding.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agentflow::llm::ToolSchema;

    fn provider() -> AnthropicProvider {
        AnthropicProvider::new(
            "test-key",
            &LlmBinding {
                provider: "anthropic".into(),
                model: "claude-sonnet-4-0".into(),
                ..LlmBinding::default()
            },
        )
    }

    #[test]
    fn test_system_is_a_side_channel() {
        let messages = [
            ChatMessage::text(ChatRole::System, "You are terse."),
            ChatMessage::text(ChatRole::User, "hi"),
        ];
        let body = provider().build_body(&messages, &CompletionOptions::default());
        assert_eq!(body["system"], "You are terse.");
        assert_eq!(body["messages"].as_array().unwrap().len(), 1);
        assert_eq!(body["messages"][0]["role"], "user");
    }

    #[test]
    fn test_tool_result_is_user_block() {
        let messages = [ChatMessage::tool_result("toolu_1", "42")];
        let (_, wire) = AnthropicProvider::wire_messages(&messages);
        assert_eq!(wire[0]["role"], "user");
        assert_eq!(wire[0]["content"][0]["type"], "tool_result");
        assert_eq!(wire[0]["content"][0]["tool_use_id"], "toolu_1");
    }

    #[test]
    fn test_tool_choice_required_maps_to_any() {
        let tools = Some(vec![ToolSchema {
            name: "lookup".into(),
            description: "d".into(),
            parameters: serde_json::json!({"type": "object", "properties": {}, "required": []}),
        }]);
        let messages = [ChatMessage::text(ChatRole::User, "hi")];

        let body = provider().build_body(
            &messages,
            &CompletionOptions {
                tools: tools.clone(),
                tool_choice: ToolChoice::Required,
                ..Default::default()
            },
        );
        assert_eq!(body["tool_choice"]["type"], "any");

        let body = provider().build_body(
            &messages,
            &CompletionOptions {
                tools,
                tool_choice: ToolChoice::None,
                ..Default::default()
            },
        );
        assert!(body.get("tools").is_none());
        assert!(body.get("tool_choice").is_none());
    }

    #[test]
    fn test_parse_response_extracts_blocks() {
        let text = serde_json::json!({
            "model": "claude-sonnet-4-0",
            "stop_reason": "tool_use",
            "content": [
                {"type": "text", "text": "Let me check."},
                {"type": "tool_use", "id": "toolu_1", "name": "lookup", "input": {"q": "rust"}},
            ],
            "usage": {"input_tokens": 10, "output_tokens": 4},
        })
        .to_string();

        let response = AnthropicProvider::parse_response(&text).unwrap();
        assert_eq!(response.content, "Let me check.");
        assert_eq!(response.finish_reason, "tool_calls");
        assert_eq!(response.tool_calls[0].name, "lookup");
        assert_eq!(response.usage.total_tokens, 14);
    }

    #[test]
    fn test_stop_reason_normalization() {
        assert_eq!(AnthropicProvider::normalize_stop_reason("end_turn"), "stop");
        assert_eq!(AnthropicProvider::normalize_stop_reason("max_tokens"), "length");
        assert_eq!(AnthropicProvider::normalize_stop_reason("tool_use"), "tool_calls");
        assert_eq!(AnthropicProvider::normalize_stop_reason("stop_sequence"), "stop");
    }
}

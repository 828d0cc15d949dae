//! OpenAI-dialect provider adapter.
//!
//! Posts to `{base_url}/chat/completions` with a bearer token. Azure and
//! Ollama deployments that expose the OpenAI-compatible surface reuse this
//! adapter through a custom base URL.
//!
//! # Message serialisation
//!
//! | [`ChatRole`] | Wire representation |
//! |---|---|
//! | `System` | `{"role":"system","content":"..."}` |
//! | `User` | `{"role":"user","content":"..."}` |
//! | `Assistant` with tool calls | `{"role":"assistant","content":null,"tool_calls":[...]}` |
//! | `Assistant` without | `{"role":"assistant","content":"..."}` |
//! | `Tool` | `{"role":"tool","tool_call_id":"<id>","content":"..."}` |

use async_trait::async_trait;

use crate::agentflow::clients::common::{
    get_shared_http_client, parse_arguments, post_json, sse_content_stream,
};
use crate::agentflow::config::LlmBinding;
use crate::agentflow::llm::{
    ChatMessage, ChatRole, ChunkStream, CompletionOptions, LlmError, LlmProvider, LlmResponse,
    TokenUsage, ToolCall, ToolChoice,
};

/// Client wrapper for OpenAI-compatible chat-completion endpoints.
pub struct OpenAiProvider {
    api_key: String,
    base_url: String,
    binding: LlmBinding,
}

impl OpenAiProvider {
    /// Create a provider from an API key and binding. The binding's
    /// `api_base` overrides the default `https://api.openai.com/v1`.
    pub fn new(api_key: &str, binding: &LlmBinding) -> Self {
        Self {
            api_key: api_key.to_string(),
            base_url: binding
                .api_base
                .clone()
                .unwrap_or_else(|| "https://api.openai.com/v1".to_string()),
            binding: binding.clone(),
        }
    }

    fn wire_messages(messages: &[ChatMessage]) -> Vec<serde_json::Value> {
        messages
            .iter()
            .map(|msg| match msg.role {
                ChatRole::Tool => serde_json::json!({
                    "role": "tool",
                    "tool_call_id": msg.tool_call_id.clone().unwrap_or_default(),
                    "content": msg.content,
                }),
                ChatRole::Assistant if !msg.tool_calls.is_empty() => {
                    let tool_calls: Vec<serde_json::Value> = msg
                        .tool_calls
                        .iter()
                        .map(|tc| {
                            serde_json::json!({
                                "id": tc.id,
                                "type": "function",
                                "function": {
                                    "name": tc.name,
                                    "arguments": serde_json::to_string(&tc.arguments)
                                        .unwrap_or_else(|_| "{}".to_string()),
                                },
                            })
                        })
                        .collect();
                    serde_json::json!({
                        "role": "assistant",
                        "content": if msg.content.is_empty() {
                            serde_json::Value::Null
                        } else {
                            serde_json::Value::String(msg.content.clone())
                        },
                        "tool_calls": tool_calls,
                    })
                }
                _ => serde_json::json!({
                    "role": msg.role.as_str(),
                    "content": msg.content,
                }),
            })
            .collect()
    }

    fn build_body(&self, messages: &[ChatMessage], options: &CompletionOptions) -> serde_json::Value {
        let mut body = serde_json::json!({
            "model": self.binding.model,
            "messages": Self::wire_messages(messages),
            "temperature": options.temperature.unwrap_or(self.binding.temperature),
            "max_tokens": options.max_tokens.unwrap_or(self.binding.max_tokens),
        });

        let stops = options
            .stop_sequences
            .clone()
            .unwrap_or_else(|| self.binding.stop_sequences.clone());
        if !stops.is_empty() {
            body["stop"] = serde_json::json!(stops);
        }
        if self.binding.frequency_penalty != 0.0 {
            body["frequency_penalty"] = serde_json::json!(self.binding.frequency_penalty);
        }
        if self.binding.presence_penalty != 0.0 {
            body["presence_penalty"] = serde_json::json!(self.binding.presence_penalty);
        }
        if (self.binding.top_p - 1.0).abs() > f32::EPSILON {
            body["top_p"] = serde_json::json!(self.binding.top_p);
        }

        // ToolChoice::None means the tools array is omitted entirely.
        if let Some(tools) = &options.tools {
            if !tools.is_empty() && options.tool_choice != ToolChoice::None {
                let wire_tools: Vec<serde_json::Value> = tools
                    .iter()
                    .map(|t| {
                        serde_json::json!({
                            "type": "function",
                            "function": {
                                "name": t.name,
                                "description": t.description,
                                "parameters": t.parameters,
                            },
                        })
                    })
                    .collect();
                body["tools"] = serde_json::json!(wire_tools);
                match &options.tool_choice {
                    ToolChoice::Auto => {}
                    ToolChoice::Required => {
                        body["tool_choice"] = serde_json::json!("required");
                    }
                    ToolChoice::Tool(name) => {
                        body["tool_choice"] = serde_json::json!({
                            "type": "function",
                            "function": {"name": name},
                        });
                    }
                    ToolChoice::None => unreachable!(),
                }
            }
        }

        body
    }

    fn parse_response(text: &str) -> Result<LlmResponse, LlmError> {
        let parsed: serde_json::Value =
            serde_json::from_str(text).map_err(|e| LlmError::Parse(e.to_string()))?;

        let choice = parsed
            .get("choices")
            .and_then(|c| c.get(0))
            .ok_or_else(|| LlmError::Parse("no choices in response".to_string()))?;
        let message = choice
            .get("message")
            .ok_or_else(|| LlmError::Parse("choice missing message".to_string()))?;

        let content = message
            .get("content")
            .and_then(|c| c.as_str())
            .unwrap_or("")
            .to_string();

        let tool_calls: Vec<ToolCall> = message
            .get("tool_calls")
            .and_then(|tc| tc.as_array())
            .map(|arr| {
                arr.iter()
                    .filter_map(|tc| {
                        let id = tc.get("id")?.as_str()?.to_string();
                        let func = tc.get("function")?;
                        let name = func.get("name")?.as_str()?.to_string();
                        let raw_args = func.get("arguments").and_then(|a| a.as_str()).unwrap_or("{}");
                        Some(ToolCall {
                            id,
                            name,
                            arguments: parse_arguments(raw_args),
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();

        let usage = parsed
            .get("usage")
            .map(|u| {
                let prompt = u.get("prompt_tokens").and_then(|v| v.as_u64()).unwrap_or(0);
                let completion = u
                    .get("completion_tokens")
                    .and_then(|v| v.as_u64())
                    .unwrap_or(0);
                TokenUsage {
                    prompt_tokens: prompt,
                    completion_tokens: completion,
                    total_tokens: prompt + completion,
                }
            })
            .unwrap_or_default();

        Ok(LlmResponse {
            content,
            model: parsed
                .get("model")
                .and_then(|m| m.as_str())
                .unwrap_or("")
                .to_string(),
            usage,
            finish_reason: choice
                .get("finish_reason")
                .and_then(|r| r.as_str())
                .unwrap_or("stop")
                .to_string(),
            tool_calls,
        })
    }
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
    async fn complete(
        &self,
        messages: &[ChatMessage],
        options: &CompletionOptions,
    ) -> Result<LlmResponse, LlmError> {
        let body = self.build_body(messages, options);
        let url = format!("{}/chat/completions", self.base_url.trim_end_matches('/'));

        let (status, text) = post_json(
            &url,
            &[("Authorization", format!("Bearer {}", self.api_key))],
            &body,
        )
        .await?;

        if status >= 400 {
            log::error!("openai completion failed: HTTP {} from {}", status, url);
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
        let url = format!("{}/chat/completions", self.base_url.trim_end_matches('/'));

        let response = get_shared_http_client()
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
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
            value
                .get("choices")?
                .get(0)?
                .get("delta")?
                .get("content")?
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

    fn provider() -> OpenAiProvider {
        OpenAiProvider::new("test-key", &LlmBinding::default())
    }

    #[test]
    fn test_tool_result_serialisation() {
        let messages = vec![
            ChatMessage::assistant_with_calls(
                "",
                vec![ToolCall {
                    id: "call_1".into(),
                    name: "calculator".into(),
                    arguments: serde_json::json!({"expression": "2+2"}),
                }],
            ),
            ChatMessage::tool_result("call_1", "4"),
        ];
        let wire = OpenAiProvider::wire_messages(&messages);

        assert_eq!(wire[0]["role"], "assistant");
        assert!(wire[0]["content"].is_null());
        assert_eq!(wire[0]["tool_calls"][0]["function"]["name"], "calculator");
        // Arguments travel as a JSON string in this dialect.
        assert!(wire[0]["tool_calls"][0]["function"]["arguments"].is_string());

        assert_eq!(wire[1]["role"], "tool");
        assert_eq!(wire[1]["tool_call_id"], "call_1");
    }

    #[test]
    fn test_tool_choice_mapping() {
        let tools = Some(vec![ToolSchema {
            name: "calculator".into(),
            description: "math".into(),
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
        assert_eq!(body["tool_choice"], "required");

        let body = provider().build_body(
            &messages,
            &CompletionOptions {
                tools: tools.clone(),
                tool_choice: ToolChoice::Tool("calculator".into()),
                ..Default::default()
            },
        );
        assert_eq!(body["tool_choice"]["function"]["name"], "calculator");

        // None omits the tools array entirely.
        let body = provider().build_body(
            &messages,
            &CompletionOptions {
                tools,
                tool_choice: ToolChoice::None,
                ..Default::default()
            },
        );
        assert!(body.get("tools").is_none());
    }

    #[test]
    fn test_parse_response_with_tool_calls() {
        let text = serde_json::json!({
            "model": "gpt-4-turbo",
            "choices": [{
                "finish_reason": "tool_calls",
                "message": {
                    "content": null,
                    "tool_calls": [{
                        "id": "call_9",
                        "type": "function",
                        "function": {"name": "lookup", "arguments": "{\"q\": \"rust\"}"},
                    }],
                },
            }],
            "usage": {"prompt_tokens": 12, "completion_tokens": 3},
        })
        .to_string();

        let response = OpenAiProvider::parse_response(&text).unwrap();
        assert_eq!(response.finish_reason, "tool_calls");
        assert_eq!(response.tool_calls.len(), 1);
        assert_eq!(response.tool_calls[0].arguments["q"], "rust");
        assert_eq!(response.usage.total_tokens, 15);
    }

    #[test]
    fn test_parse_response_malformed_arguments_become_empty() {
        let text = serde_json::json!({
            "choices": [{
                "finish_reason": "tool_calls",
                "message": {
                    "content": "",
                    "tool_calls": [{
                        "id": "call_1",
                        "function": {"name": "lookup", "arguments": "{broken"},
                    }],
                },
            }],
        })
        .to_string();

        let response = OpenAiProvider::parse_response(&text).unwrap();
        assert_eq!(response.tool_calls[0].arguments, serde_json::json!({}));
    }
}

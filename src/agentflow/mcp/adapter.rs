//! Registry adapter for MCP tools.
//!
//! Wraps one discovered MCP tool as a registry [`Tool`] named
//! `"<server_id>:<tool_name>"`, converting the server's JSON input schema
//! into the registry parameter shape.

use std::error::Error;
use std::sync::Arc;

use async_trait::async_trait;

use crate::agentflow::tool_protocol::{
    Tool, ToolDefinition, ToolParameter, ToolParameterType, ToolResult,
};

use super::{McpClient, McpToolInfo};

/// Adapts an MCP tool to the registry [`Tool`] interface.
pub struct McpToolAdapter {
    client: Arc<McpClient>,
    info: McpToolInfo,
    definition: ToolDefinition,
}

impl McpToolAdapter {
    pub fn new(client: Arc<McpClient>, info: McpToolInfo) -> Self {
        let definition = Self::create_definition(&info);
        Self {
            client,
            info,
            definition,
        }
    }

    /// The original MCP tool name, without the server prefix.
    pub fn mcp_tool_name(&self) -> &str {
        &self.info.name
    }

    pub fn server_id(&self) -> &str {
        &self.info.server_id
    }

    fn create_definition(info: &McpToolInfo) -> ToolDefinition {
        let name = format!("{}:{}", info.server_id, info.name);
        let description = info
            .description
            .clone()
            .unwrap_or_else(|| format!("MCP tool: {}", info.name));

        let mut definition = ToolDefinition::new(name, description);
        for param in Self::parse_json_schema(&info.input_schema) {
            definition = definition.with_parameter(param);
        }
        definition
    }

    /// Map JSON Schema properties into registry parameters:
    /// `integer`/`number` → number, the rest copied verbatim, with enum,
    /// default and array item schemas carried through.
    fn parse_json_schema(schema: &serde_json::Value) -> Vec<ToolParameter> {
        let Some(properties) = schema.get("properties").and_then(|p| p.as_object()) else {
            return Vec::new();
        };

        let required: Vec<&str> = schema
            .get("required")
            .and_then(|r| r.as_array())
            .map(|arr| arr.iter().filter_map(|v| v.as_str()).collect())
            .unwrap_or_default();

        let mut parameters = Vec::new();
        for (name, prop) in properties {
            let type_str = prop.get("type").and_then(|t| t.as_str()).unwrap_or("string");
            let param_type = match type_str {
                "integer" | "number" => ToolParameterType::Number,
                "boolean" => ToolParameterType::Boolean,
                "array" => ToolParameterType::Array,
                "object" => ToolParameterType::Object,
                _ => ToolParameterType::String,
            };

            let mut param = ToolParameter::new(
                name.clone(),
                param_type,
                prop.get("description")
                    .and_then(|d| d.as_str())
                    .map(|d| d.to_string())
                    .unwrap_or_else(|| format!("Parameter: {}", name)),
            );
            if !required.contains(&name.as_str()) {
                param = param.optional();
            }
            if let Some(default) = prop.get("default") {
                param.default = Some(default.clone());
            }
            if let Some(values) = prop.get("enum").and_then(|e| e.as_array()) {
                param = param.with_enum(values.clone());
            }
            if param_type == ToolParameterType::Array {
                param = param.with_items(
                    prop.get("items")
                        .cloned()
                        .unwrap_or_else(|| serde_json::json!({"type": "string"})),
                );
            }
            parameters.push(param);
        }

        // Deterministic order for schema generation.
        parameters.sort_by(|a, b| a.name.cmp(&b.name));
        parameters
    }
}

#[async_trait]
impl Tool for McpToolAdapter {
    fn definition(&self) -> ToolDefinition {
        self.definition.clone()
    }

    async fn execute(
        &self,
        arguments: serde_json::Value,
    ) -> Result<ToolResult, Box<dyn Error + Send + Sync>> {
        let result = self.client.call_tool(&self.info.name, arguments).await;

        if result.success {
            Ok(ToolResult::success(result.content))
        } else {
            Ok(ToolResult::failure(
                result.error.unwrap_or_else(|| "Unknown MCP error".to_string()),
            ))
        }
    }
}

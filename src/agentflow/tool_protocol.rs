//! Tool abstraction layer.
//!
//! A [`Tool`] pairs a declarative [`ToolDefinition`] with an async executor
//! over JSON arguments. The process-wide [`ToolRegistry`] maps canonical
//! names to tools and produces the provider-native schemas the LLM gateway
//! sends out.
//!
//! # Naming
//!
//! Canonical tool names may contain colons (`srv_abc:list_events`,
//! `agent:researcher`). Providers only accept `^[a-zA-Z0-9_-]+$`, so
//! schemas always carry the sanitized form (`:` → `__`) and the invoker
//! maps back to the canonical name before dispatch.
//!
//! Two canonical prefixes are dispatched specially by the activity layer,
//! not the registry: `agent:<id>` routes to child-agent execution and
//! `mcp:<template>:<tool>` is resolved to the connected server running that
//! template.
//!
//! # Example
//!
//! ```rust,no_run
//! use agentflow::tool_protocol::{ToolRegistry, sanitize_tool_name};
//!
//! assert_eq!(sanitize_tool_name("srv_abc:list_events"), "srv_abc__list_events");
//!
//! # async {
//! let registry = ToolRegistry::shared();
//! let names = registry.read().await.tool_names();
//! # };
//! ```

use std::collections::HashMap;
use std::error::Error;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

/// Result of a tool execution. Failures are data, not errors: they flow
/// back to the LLM so it can route around a broken tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    pub success: bool,
    pub output: serde_json::Value,
    pub error: Option<String>,
}

impl ToolResult {
    /// Convenience constructor for successful execution.
    pub fn success(output: serde_json::Value) -> Self {
        Self {
            success: true,
            output,
            error: None,
        }
    }

    /// Convenience constructor for failed execution.
    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            output: serde_json::Value::Null,
            error: Some(error.into()),
        }
    }
}

/// JSON-schema-like parameter types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolParameterType {
    String,
    Number,
    Boolean,
    Array,
    Object,
}

impl ToolParameterType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ToolParameterType::String => "string",
            ToolParameterType::Number => "number",
            ToolParameterType::Boolean => "boolean",
            ToolParameterType::Array => "array",
            ToolParameterType::Object => "object",
        }
    }
}

/// One declared parameter of a tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolParameter {
    pub name: String,
    #[serde(rename = "type")]
    pub param_type: ToolParameterType,
    pub description: String,
    #[serde(default = "default_required")]
    pub required: bool,
    #[serde(default)]
    pub default: Option<serde_json::Value>,
    #[serde(default)]
    pub enum_values: Option<Vec<serde_json::Value>>,
    /// Item schema for array parameters; defaults to `{"type":"string"}`
    /// when absent.
    #[serde(default)]
    pub items: Option<serde_json::Value>,
}

fn default_required() -> bool {
    true
}

impl ToolParameter {
    pub fn new(
        name: impl Into<String>,
        param_type: ToolParameterType,
        description: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            param_type,
            description: description.into(),
            required: true,
            default: None,
            enum_values: None,
            items: None,
        }
    }

    /// Mark the parameter optional.
    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }

    /// Restrict values to the given set.
    pub fn with_enum(mut self, values: Vec<serde_json::Value>) -> Self {
        self.enum_values = Some(values);
        self
    }

    /// Declare the item schema for an array parameter.
    pub fn with_items(mut self, items: serde_json::Value) -> Self {
        self.items = Some(items);
        self
    }
}

/// Declarative description of a tool for LLM function calling.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// Canonical name; may contain `:` (see module docs).
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub parameters: Vec<ToolParameter>,
}

impl ToolDefinition {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters: Vec::new(),
        }
    }

    /// Append a parameter (builder pattern).
    pub fn with_parameter(mut self, param: ToolParameter) -> Self {
        self.parameters.push(param);
        self
    }

    /// Inner JSON Schema for the parameters: always `type: object` with
    /// `properties` and `required`; array properties always carry `items`.
    pub fn parameters_schema(&self) -> serde_json::Value {
        let mut properties = serde_json::Map::new();
        let mut required = Vec::new();

        for param in &self.parameters {
            let mut prop = serde_json::Map::new();
            prop.insert(
                "type".to_string(),
                serde_json::json!(param.param_type.as_str()),
            );
            prop.insert(
                "description".to_string(),
                serde_json::json!(param.description),
            );
            if let Some(values) = &param.enum_values {
                prop.insert("enum".to_string(), serde_json::json!(values));
            }
            if param.param_type == ToolParameterType::Array {
                prop.insert(
                    "items".to_string(),
                    param
                        .items
                        .clone()
                        .unwrap_or_else(|| serde_json::json!({"type": "string"})),
                );
            }
            if let Some(default) = &param.default {
                prop.insert("default".to_string(), default.clone());
            }
            properties.insert(param.name.clone(), serde_json::Value::Object(prop));

            if param.required {
                required.push(serde_json::json!(param.name));
            }
        }

        serde_json::json!({
            "type": "object",
            "properties": properties,
            "required": required,
        })
    }

    /// Full OpenAI function-call shape with the sanitized name.
    pub fn to_openai_format(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "function",
            "function": {
                "name": sanitize_tool_name(&self.name),
                "description": self.description,
                "parameters": self.parameters_schema(),
            },
        })
    }
}

/// Convert a canonical tool name to the provider-accepted form.
///
/// Providers require `^[a-zA-Z0-9_-]+$`; colons become double underscores.
pub fn sanitize_tool_name(name: &str) -> String {
    name.replace(':', "__")
}

/// Invert [`sanitize_tool_name`].
pub fn unsanitize_tool_name(name: &str) -> String {
    name.replace("__", ":")
}

/// Convert definitions into gateway schemas, returning the schemas plus
/// the sanitized → canonical name map the invoker uses for dispatch.
pub fn build_tool_schemas(
    definitions: &[ToolDefinition],
) -> (Vec<crate::agentflow::llm::ToolSchema>, HashMap<String, String>) {
    let mut name_map = HashMap::new();
    let mut schemas = Vec::new();

    for definition in definitions {
        let sanitized = sanitize_tool_name(&definition.name);
        name_map.insert(sanitized.clone(), definition.name.clone());
        schemas.push(crate::agentflow::llm::ToolSchema {
            name: sanitized,
            description: definition.description.clone(),
            parameters: definition.parameters_schema(),
        });
    }

    (schemas, name_map)
}

/// A tool callable by agents.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Static definition (name, description, parameters).
    fn definition(&self) -> ToolDefinition;

    /// Execute with JSON arguments. Application-level failures should be
    /// returned as `ToolResult::failure`; `Err` is reserved for unexpected
    /// breakage and is converted to a failed result by the registry.
    async fn execute(
        &self,
        arguments: serde_json::Value,
    ) -> Result<ToolResult, Box<dyn Error + Send + Sync>>;

    /// Canonical name, taken from the definition.
    fn name(&self) -> String {
        self.definition().name
    }
}

/// Shared handle to the process-wide registry.
pub type SharedToolRegistry = Arc<RwLock<ToolRegistry>>;

/// Process-wide mapping of canonical name → tool.
///
/// Reads dominate; the registry lives behind an `RwLock` and the MCP
/// manager is the sole writer for MCP-owned entries.
#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    /// Fresh registry behind the shared lock type used across the engine.
    pub fn shared() -> SharedToolRegistry {
        Arc::new(RwLock::new(Self::new()))
    }

    /// Insert or replace a tool under its canonical name.
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.name(), tool);
    }

    /// Remove a tool by name. Returns whether anything was removed.
    pub fn unregister(&mut self, name: &str) -> bool {
        self.tools.remove(name).is_some()
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// Registered canonical names, sorted for stable output.
    pub fn tool_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }

    /// Definitions for the named subset, skipping unknown names. `None`
    /// returns every registered definition.
    pub fn definitions(&self, names: Option<&[String]>) -> Vec<ToolDefinition> {
        match names {
            None => {
                let mut defs: Vec<ToolDefinition> =
                    self.tools.values().map(|t| t.definition()).collect();
                defs.sort_by(|a, b| a.name.cmp(&b.name));
                defs
            }
            Some(names) => names
                .iter()
                .filter_map(|n| self.tools.get(n).map(|t| t.definition()))
                .collect(),
        }
    }

    /// Execute a tool by canonical name. Unknown names and executor panics
    /// come back as failed results, never as errors.
    pub async fn execute(&self, name: &str, arguments: serde_json::Value) -> ToolResult {
        let Some(tool) = self.tools.get(name).cloned() else {
            return ToolResult::failure(format!("Tool not found: {}", name));
        };

        match tool.execute(arguments).await {
            Ok(result) => result,
            Err(e) => {
                log::warn!("tool '{}' raised: {}", name, e);
                ToolResult::failure(format!("Tool execution failed: {}", e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn definition(&self) -> ToolDefinition {
            ToolDefinition::new("echo", "Echoes its arguments").with_parameter(
                ToolParameter::new("text", ToolParameterType::String, "Text to echo"),
            )
        }

        async fn execute(
            &self,
            arguments: serde_json::Value,
        ) -> Result<ToolResult, Box<dyn Error + Send + Sync>> {
            Ok(ToolResult::success(arguments))
        }
    }

    struct BrokenTool;

    #[async_trait]
    impl Tool for BrokenTool {
        fn definition(&self) -> ToolDefinition {
            ToolDefinition::new("broken", "Always raises")
        }

        async fn execute(
            &self,
            _arguments: serde_json::Value,
        ) -> Result<ToolResult, Box<dyn Error + Send + Sync>> {
            Err("internal failure".into())
        }
    }

    #[test]
    fn test_sanitize_round_trip() {
        for name in ["calculator", "srv_abc:list_events", "agent:researcher", "mcp:cal:list"] {
            let sanitized = sanitize_tool_name(name);
            assert!(sanitized
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-'));
            assert_eq!(unsanitize_tool_name(&sanitized), name);
        }
    }

    #[test]
    fn test_openai_schema_soundness() {
        let def = ToolDefinition::new("srv_abc:list_events", "Lists events")
            .with_parameter(ToolParameter::new(
                "calendar",
                ToolParameterType::String,
                "Calendar id",
            ))
            .with_parameter(
                ToolParameter::new("attendees", ToolParameterType::Array, "Attendee emails")
                    .optional(),
            );

        let schema = def.to_openai_format();
        let func = &schema["function"];
        assert_eq!(func["name"], "srv_abc__list_events");

        let params = &func["parameters"];
        assert_eq!(params["type"], "object");
        // Every required name exists in properties.
        for required in params["required"].as_array().unwrap() {
            let name = required.as_str().unwrap();
            assert!(params["properties"].get(name).is_some());
        }
        // Array-typed properties always carry items.
        assert_eq!(
            params["properties"]["attendees"]["items"],
            serde_json::json!({"type": "string"})
        );
        assert!(!params["required"]
            .as_array()
            .unwrap()
            .contains(&serde_json::json!("attendees")));
    }

    #[tokio::test]
    async fn test_register_execute_unregister() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(EchoTool));

        assert!(registry.contains("echo"));
        let result = registry
            .execute("echo", serde_json::json!({"text": "hi"}))
            .await;
        assert!(result.success);
        assert_eq!(result.output["text"], "hi");

        assert!(registry.unregister("echo"));
        assert!(!registry.unregister("echo"));
        let result = registry.execute("echo", serde_json::json!({})).await;
        assert!(!result.success);
        assert!(result.error.unwrap().contains("Tool not found"));
    }

    #[tokio::test]
    async fn test_executor_error_becomes_failed_result() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(BrokenTool));

        let result = registry.execute("broken", serde_json::json!({})).await;
        assert!(!result.success);
        assert!(result.error.unwrap().contains("internal failure"));
    }

    #[test]
    fn test_definitions_subset_skips_unknown() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(EchoTool));

        let defs = registry.definitions(Some(&["echo".to_string(), "missing".to_string()]));
        assert_eq!(defs.len(), 1);
        assert_eq!(defs[0].name, "echo");
    }
}

//! Current date/time tool.

use std::error::Error;

use async_trait::async_trait;
use chrono::Utc;

use crate::agentflow::tool_protocol::{
    Tool, ToolDefinition, ToolParameter, ToolParameterType, ToolResult,
};

/// Returns the current UTC date/time, optionally formatted with a chrono
/// format string.
pub struct DateTimeTool;

#[async_trait]
impl Tool for DateTimeTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition::new(
            "datetime",
            "Returns the current date and time in UTC.",
        )
        .with_parameter(
            ToolParameter::new(
                "format",
                ToolParameterType::String,
                "Optional strftime-style format, e.g. \"%Y-%m-%d\"",
            )
            .optional(),
        )
    }

    async fn execute(
        &self,
        arguments: serde_json::Value,
    ) -> Result<ToolResult, Box<dyn Error + Send + Sync>> {
        let now = Utc::now();
        let formatted = match arguments.get("format").and_then(|f| f.as_str()) {
            Some(format) => now.format(format).to_string(),
            None => now.to_rfc3339(),
        };

        Ok(ToolResult::success(serde_json::json!({
            "datetime": formatted,
            "timestamp": now.timestamp(),
        })))
    }
}

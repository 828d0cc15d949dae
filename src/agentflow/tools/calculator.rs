//! Expression calculator tool.

use std::error::Error;

use async_trait::async_trait;

use crate::agentflow::tool_protocol::{
    Tool, ToolDefinition, ToolParameter, ToolParameterType, ToolResult,
};

/// Evaluates arithmetic expressions with `evalexpr`.
///
/// Supports the usual operators plus `min`/`max`/`floor`/`round` builtins.
/// Expression errors come back as failed results, not errors.
pub struct CalculatorTool;

#[async_trait]
impl Tool for CalculatorTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition::new(
            "calculator",
            "Evaluates a mathematical expression and returns the numeric result.",
        )
        .with_parameter(ToolParameter::new(
            "expression",
            ToolParameterType::String,
            "The expression to evaluate, e.g. \"(2 + 3) * 4\"",
        ))
    }

    async fn execute(
        &self,
        arguments: serde_json::Value,
    ) -> Result<ToolResult, Box<dyn Error + Send + Sync>> {
        let Some(expression) = arguments.get("expression").and_then(|e| e.as_str()) else {
            return Ok(ToolResult::failure("Missing required parameter: expression"));
        };

        match evalexpr::eval(expression) {
            Ok(value) => {
                let result = match value {
                    evalexpr::Value::Int(i) => serde_json::json!(i),
                    evalexpr::Value::Float(f) => serde_json::json!(f),
                    evalexpr::Value::Boolean(b) => serde_json::json!(b),
                    other => serde_json::json!(other.to_string()),
                };
                Ok(ToolResult::success(serde_json::json!({
                    "expression": expression,
                    "result": result,
                })))
            }
            Err(e) => Ok(ToolResult::failure(format!(
                "Could not evaluate '{}': {}",
                expression, e
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_basic_arithmetic() {
        let result = CalculatorTool
            .execute(serde_json::json!({"expression": "(2 + 3) * 4"}))
            .await
            .unwrap();
        assert!(result.success);
        assert_eq!(result.output["result"], 20);
    }

    #[tokio::test]
    async fn test_invalid_expression_fails_softly() {
        let result = CalculatorTool
            .execute(serde_json::json!({"expression": "2 +* 3"}))
            .await
            .unwrap();
        assert!(!result.success);
    }

    #[tokio::test]
    async fn test_missing_argument() {
        let result = CalculatorTool.execute(serde_json::json!({})).await.unwrap();
        assert!(!result.success);
        assert!(result.error.unwrap().contains("expression"));
    }
}

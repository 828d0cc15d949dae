//! Child agents as callable tools.
//!
//! [`agent_tool_definition`] builds the `agent:<id>` tool schema an
//! orchestrator presents to its LLM. Execution does not go through the
//! registry: the activity layer recognizes the `agent:` prefix and routes
//! to [`Activities::execute_agent_as_tool`](crate::agentflow::activities::Activities::execute_agent_as_tool)
//! so child invocations get the full control loop (safety gates, retries,
//! depth guards) instead of a bare function call.

use crate::agentflow::config::AgentConfig;
use crate::agentflow::tool_protocol::{
    ToolDefinition, ToolParameter, ToolParameterType,
};

/// Canonical prefix for agent tools.
pub const AGENT_TOOL_PREFIX: &str = "agent:";

/// Build the tool definition for invoking the given agent.
///
/// Every agent tool takes the same two parameters: a required `query` and
/// an optional free-form `context` string.
pub fn agent_tool_definition(config: &AgentConfig, description_override: Option<&str>) -> ToolDefinition {
    let mut description = match description_override {
        Some(text) => text.to_string(),
        None if !config.description.is_empty() => config.description.clone(),
        None => format!("Execute agent: {}", config.name),
    };
    if !config.role.title.is_empty() {
        description.push_str(&format!(" Role: {}.", config.role.title));
    }

    ToolDefinition::new(format!("{}{}", AGENT_TOOL_PREFIX, config.id), description)
        .with_parameter(ToolParameter::new(
            "query",
            ToolParameterType::String,
            "The input/query to send to the agent",
        ))
        .with_parameter(
            ToolParameter::new(
                "context",
                ToolParameterType::String,
                "Optional additional context to provide to the agent",
            )
            .optional(),
        )
}

/// Extract the agent id from an `agent:<id>` tool name, if it is one.
pub fn parse_agent_tool_name(tool_name: &str) -> Option<&str> {
    tool_name.strip_prefix(AGENT_TOOL_PREFIX)
}

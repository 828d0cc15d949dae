//! Builtin tools.
//!
//! Small, dependency-light tools shipped with the engine so that tool-lane
//! agents work out of the box. Production deployments register their own
//! domain tools alongside these.

pub mod calculator;
pub mod datetime;

use crate::agentflow::tool_protocol::SharedToolRegistry;
use std::sync::Arc;

/// Register every builtin tool with the given registry.
pub async fn register_builtin_tools(registry: &SharedToolRegistry) {
    let mut guard = registry.write().await;
    guard.register(Arc::new(calculator::CalculatorTool));
    guard.register(Arc::new(datetime::DateTimeTool));
}

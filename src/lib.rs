// src/lib.rs

// Import the top-level `agentflow` module.
pub mod agentflow;

// Re-exporting key items for easier external access.
pub use agentflow::activities::Activities;
pub use agentflow::config::{AgentConfig, AgentKind, AgentResponse, InvocationContext};
pub use agentflow::error::AgentError;
pub use agentflow::llm::{ChatMessage, ChatRole, LlmProvider};
pub use agentflow::mcp::McpManager;
pub use agentflow::storage::FileAgentRepository;
pub use agentflow::streaming::StreamingProjector;
pub use agentflow::tool_protocol::ToolRegistry;
pub use agentflow::workflow::AgentWorkflow;

// Flattened module paths so callers write `agentflow::workflow::...`
// instead of `agentflow::agentflow::workflow::...`.
pub use agentflow::{
    activities, agent_tool, aggregators, clients, confidence, config, error, event, knowledge,
    llm, mcp, orchestrator, retry, safety, storage, streaming, tool_protocol, tools, validators,
    workflow,
};

/// Initialise env_logger once, for binaries and tests that want log output.
pub fn init_logger() {
    let _ = env_logger::builder().is_test(cfg!(test)).try_init();
}

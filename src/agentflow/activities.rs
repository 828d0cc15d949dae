//! Durability-friendly activity layer.
//!
//! Every side effect of the control loop goes through one [`Activities`]
//! method: LLM completions, safety checks, retrieval, tool execution (with
//! `agent:` / `mcp:` prefix dispatch), validators, and child-agent runs.
//! Each method has deterministic inputs/outputs, carries its own timeout,
//! and transient failures are retried with the configured policy — the
//! workflow body on top stays free of I/O, clocks, and randomness.
//!
//! The bundle is built once per worker process and shared:
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use agentflow::activities::Activities;
//! use agentflow::knowledge::StaticKnowledgeBase;
//! use agentflow::mcp::McpManager;
//! use agentflow::storage::FileAgentRepository;
//! use agentflow::tool_protocol::ToolRegistry;
//!
//! let registry = ToolRegistry::shared();
//! let activities = Arc::new(Activities::new(
//!     registry.clone(),
//!     Arc::new(McpManager::new(registry)),
//!     Arc::new(StaticKnowledgeBase::new()),
//!     Arc::new(FileAgentRepository::new("agents").unwrap()),
//! ));
//! ```

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use regex::Regex;
use tokio::sync::Mutex;

use crate::agentflow::agent_tool::parse_agent_tool_name;
use crate::agentflow::config::{
    AgentConfig, HistoryMessage, InvocationContext, KnowledgeBinding, LlmBinding,
};
use crate::agentflow::error::AgentError;
use crate::agentflow::knowledge::{KnowledgeBase, RetrievedDocument};
use crate::agentflow::llm::{
    ChatMessage, CompletionOptions, LlmClient, LlmProvider, LlmResponse,
};
use crate::agentflow::mcp::McpManager;
use crate::agentflow::retry::RetryPolicy;
use crate::agentflow::safety::{self, SafetyCheckInput, SafetyCheckOutput};
use crate::agentflow::storage::AgentRepository;
use crate::agentflow::tool_protocol::{SharedToolRegistry, ToolDefinition};
use crate::agentflow::validators::{
    self, ActionValidatorInput, ActionValidatorOutput, HallucinationCheckerInput,
    HallucinationCheckerOutput, LoopDetectorInput, LoopDetectorOutput, SanitizerOutput,
    DEFAULT_VALIDATOR_MODEL,
};
use crate::agentflow::workflow::AgentWorkflow;

const LLM_TIMEOUT: Duration = Duration::from_secs(120);
const KNOWLEDGE_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_TOOL_TIMEOUT: Duration = Duration::from_secs(30);
const CHILD_AGENT_TIMEOUT: Duration = Duration::from_secs(300);

/// Input for one tool execution, including the nesting context needed when
/// the tool is a child agent.
#[derive(Debug, Clone)]
pub struct ToolExecutionInput {
    pub tool_name: String,
    pub arguments: serde_json::Value,
    pub user_id: String,
    pub session_id: String,
    pub conversation_history: Vec<HistoryMessage>,
    pub request_id: Option<String>,
    pub workflow_id: Option<String>,
    /// Per-binding override of the default 30 s tool timeout.
    pub timeout_seconds: Option<u64>,
    pub current_depth: u32,
    pub max_depth: u32,
}

impl ToolExecutionInput {
    /// Minimal input for a plain (non-agent) tool call.
    pub fn simple(tool_name: impl Into<String>, arguments: serde_json::Value) -> Self {
        Self {
            tool_name: tool_name.into(),
            arguments,
            user_id: String::new(),
            session_id: String::new(),
            conversation_history: Vec::new(),
            request_id: None,
            workflow_id: None,
            timeout_seconds: None,
            current_depth: 0,
            max_depth: 3,
        }
    }
}

/// Outcome of one tool execution, reported back to the LLM.
#[derive(Debug, Clone)]
pub struct ToolExecutionOutput {
    pub success: bool,
    pub output: serde_json::Value,
    pub tool_name: String,
    pub error: Option<String>,
    /// Child confidence when the tool was an agent.
    pub child_confidence: Option<f64>,
}

/// Output of the knowledge retrieval activity.
#[derive(Debug, Clone)]
pub struct RetrieveOutput {
    pub documents: Vec<RetrievedDocument>,
    pub query: String,
}

/// Outcome of running the simple-agent lane.
#[derive(Debug, Clone)]
pub struct SimpleAgentOutput {
    pub content: String,
    pub confidence: f64,
    pub match_type: &'static str,
}

/// Process-wide service bundle behind the workflow.
pub struct Activities {
    registry: SharedToolRegistry,
    mcp: Arc<McpManager>,
    knowledge: Arc<dyn KnowledgeBase>,
    agents: Arc<dyn AgentRepository>,
    retry: RetryPolicy,
    provider_cache: Mutex<HashMap<String, Arc<dyn LlmProvider>>>,
    /// Test seam: overrides every provider lookup when set.
    provider_override: Option<Arc<dyn LlmProvider>>,
    /// Validator model binding; small and deterministic by default.
    validator_binding: LlmBinding,
}

impl Activities {
    pub fn new(
        registry: SharedToolRegistry,
        mcp: Arc<McpManager>,
        knowledge: Arc<dyn KnowledgeBase>,
        agents: Arc<dyn AgentRepository>,
    ) -> Self {
        Self {
            registry,
            mcp,
            knowledge,
            agents,
            retry: RetryPolicy::default(),
            provider_cache: Mutex::new(HashMap::new()),
            provider_override: None,
            validator_binding: LlmBinding {
                model: DEFAULT_VALIDATOR_MODEL.to_string(),
                temperature: 0.0,
                max_tokens: 512,
                ..LlmBinding::default()
            },
        }
    }

    /// Route every LLM call (main and validator) through the given
    /// provider. Used by tests and local mock deployments.
    pub fn with_provider_override(mut self, provider: Arc<dyn LlmProvider>) -> Self {
        self.provider_override = Some(provider);
        self
    }

    /// Override the retry policy (builder pattern).
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn registry(&self) -> &SharedToolRegistry {
        &self.registry
    }

    pub fn mcp(&self) -> &Arc<McpManager> {
        &self.mcp
    }

    pub fn agents(&self) -> &Arc<dyn AgentRepository> {
        &self.agents
    }

    async fn provider_for(&self, binding: &LlmBinding) -> Result<Arc<dyn LlmProvider>, AgentError> {
        if let Some(provider) = &self.provider_override {
            return Ok(Arc::clone(provider));
        }

        let key = format!(
            "{}|{}|{}",
            binding.provider,
            binding.model,
            binding.api_base.as_deref().unwrap_or("")
        );
        let mut cache = self.provider_cache.lock().await;
        if let Some(provider) = cache.get(&key) {
            return Ok(Arc::clone(provider));
        }
        let provider = LlmClient::get_provider(binding)?;
        cache.insert(key, Arc::clone(&provider));
        Ok(provider)
    }

    async fn validator_provider(&self) -> Result<Arc<dyn LlmProvider>, AgentError> {
        self.provider_for(&self.validator_binding.clone()).await
    }

    // -- LLM ---------------------------------------------------------------

    /// One chat completion with retry and a 120 s deadline.
    pub async fn llm_completion(
        &self,
        binding: &LlmBinding,
        messages: &[ChatMessage],
        options: &CompletionOptions,
    ) -> Result<LlmResponse, AgentError> {
        let provider = self.provider_for(binding).await?;
        log::info!(
            "llm_completion provider={} model={} tools={}",
            binding.provider,
            binding.model,
            options.tools.as_ref().map_or(0, |t| t.len())
        );

        self.retry
            .run("llm_completion", || {
                let provider = Arc::clone(&provider);
                async move {
                    match tokio::time::timeout(LLM_TIMEOUT, provider.complete(messages, options))
                        .await
                    {
                        Ok(Ok(response)) => Ok(response),
                        Ok(Err(e)) if e.is_retryable() => Err(AgentError::Transport(e.to_string())),
                        Ok(Err(e)) => Err(e.into()),
                        Err(_) => Err(AgentError::Timeout("llm_completion".to_string())),
                    }
                }
            })
            .await
    }

    // -- Safety ------------------------------------------------------------

    pub fn check_input_safety(&self, input: &SafetyCheckInput) -> SafetyCheckOutput {
        safety::check_input(input)
    }

    pub fn check_output_safety(&self, input: &SafetyCheckInput) -> SafetyCheckOutput {
        safety::check_output(input)
    }

    // -- Knowledge ---------------------------------------------------------

    /// Top-k retrieval with retry and a 30 s deadline.
    pub async fn retrieve_knowledge(
        &self,
        binding: &KnowledgeBinding,
        query: &str,
    ) -> Result<RetrieveOutput, AgentError> {
        log::info!(
            "retrieve_knowledge collection={} top_k={}",
            binding.collection_name,
            binding.top_k
        );

        let documents = self
            .retry
            .run("retrieve_knowledge", || async {
                match tokio::time::timeout(
                    KNOWLEDGE_TIMEOUT,
                    self.knowledge.search(
                        &binding.collection_name,
                        query,
                        binding.top_k,
                        Some(binding.similarity_threshold),
                    ),
                )
                .await
                {
                    Ok(Ok(documents)) => Ok(documents),
                    Ok(Err(e)) => Err(AgentError::Transport(e.to_string())),
                    Err(_) => Err(AgentError::Timeout("retrieve_knowledge".to_string())),
                }
            })
            .await?;

        log::info!("retrieved {} documents", documents.len());
        Ok(RetrieveOutput {
            documents,
            query: query.to_string(),
        })
    }

    // -- Tools -------------------------------------------------------------

    /// Rewrite `mcp:<template>:<tool>` to `<server_id>:<tool>` against the
    /// currently connected servers. Unresolvable names pass through and
    /// fail at lookup with a clear message.
    pub async fn resolve_mcp_tool_name(&self, tool_name: &str) -> String {
        let Some(rest) = tool_name.strip_prefix("mcp:") else {
            return tool_name.to_string();
        };
        let Some((template, mcp_tool)) = rest.split_once(':') else {
            log::warn!("invalid MCP tool format: {}", tool_name);
            return tool_name.to_string();
        };

        match self.mcp.resolve_template(template).await {
            Some(server_id) => {
                let resolved = format!("{}:{}", server_id, mcp_tool);
                log::info!("resolved MCP tool: {} -> {}", tool_name, resolved);
                resolved
            }
            None => {
                log::warn!("no connected MCP server for template '{}'", template);
                tool_name.to_string()
            }
        }
    }

    /// Definitions for the given tool ids: agent-prefixed ids resolve to
    /// agent tool schemas, `mcp:` ids are rewritten, the rest come from
    /// the registry.
    pub async fn get_tool_definitions(&self, tool_ids: &[String]) -> Vec<ToolDefinition> {
        let mut resolved_names = Vec::new();
        let mut definitions = Vec::new();

        for tool_id in tool_ids {
            if let Some(agent_id) = parse_agent_tool_name(tool_id) {
                match self.agents.get(agent_id).await {
                    Ok(Some(config)) => definitions
                        .push(crate::agentflow::agent_tool::agent_tool_definition(&config, None)),
                    _ => log::warn!("agent tool references unknown agent: {}", agent_id),
                }
                continue;
            }
            resolved_names.push(self.resolve_mcp_tool_name(tool_id).await);
        }

        let registry = self.registry.read().await;
        definitions.extend(registry.definitions(Some(&resolved_names)));
        definitions
    }

    /// Execute one tool call, dispatching by prefix. Never errors: every
    /// failure is data for the LLM.
    pub async fn execute_tool(self: &Arc<Self>, input: ToolExecutionInput) -> ToolExecutionOutput {
        log::info!("executing tool: {}", input.tool_name);

        if parse_agent_tool_name(&input.tool_name).is_some() {
            return self.execute_agent_tool(input).await;
        }

        let resolved = self.resolve_mcp_tool_name(&input.tool_name).await;

        // Take the tool handle and release the registry lock before the
        // (potentially slow) execution.
        let tool = {
            let registry = self.registry.read().await;
            match registry.get(&resolved) {
                Some(tool) => tool,
                None => {
                    let available = registry.tool_names();
                    log::error!(
                        "tool {} (resolved: {}) not found; available: {:?}",
                        input.tool_name,
                        resolved,
                        available
                    );
                    return ToolExecutionOutput {
                        success: false,
                        output: serde_json::Value::Null,
                        tool_name: input.tool_name,
                        error: Some(format!(
                            "Tool not found: {}. Available tools: {}",
                            resolved,
                            available.join(", ")
                        )),
                        child_confidence: None,
                    };
                }
            }
        };

        let timeout = input
            .timeout_seconds
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_TOOL_TIMEOUT);

        match tokio::time::timeout(timeout, tool.execute(input.arguments.clone())).await {
            Ok(Ok(result)) => {
                if result.success {
                    log::info!("tool {} completed successfully", resolved);
                } else {
                    log::warn!("tool {} failed: {:?}", resolved, result.error);
                }
                ToolExecutionOutput {
                    success: result.success,
                    output: result.output,
                    tool_name: input.tool_name,
                    error: result.error,
                    child_confidence: None,
                }
            }
            Ok(Err(e)) => {
                log::warn!("tool '{}' raised: {}", resolved, e);
                ToolExecutionOutput {
                    success: false,
                    output: serde_json::Value::Null,
                    tool_name: input.tool_name,
                    error: Some(format!("Tool execution failed: {}", e)),
                    child_confidence: None,
                }
            }
            Err(_) => ToolExecutionOutput {
                success: false,
                output: serde_json::Value::Null,
                tool_name: input.tool_name.clone(),
                error: Some(format!(
                    "Tool timed out after {} seconds",
                    timeout.as_secs()
                )),
                child_confidence: None,
            },
        }
    }

    async fn execute_agent_tool(self: &Arc<Self>, input: ToolExecutionInput) -> ToolExecutionOutput {
        let agent_id = parse_agent_tool_name(&input.tool_name)
            .expect("caller checked the agent prefix")
            .to_string();

        let query = input
            .arguments
            .get("query")
            .and_then(|q| q.as_str())
            .unwrap_or_default()
            .to_string();
        let additional_context = input
            .arguments
            .get("context")
            .and_then(|c| c.as_str())
            .unwrap_or_default()
            .to_string();

        if query.is_empty() {
            return ToolExecutionOutput {
                success: false,
                output: serde_json::Value::Null,
                tool_name: input.tool_name,
                error: Some("Query parameter is required".to_string()),
                child_confidence: None,
            };
        }

        let result = self
            .execute_agent_as_tool(
                &agent_id,
                &query,
                &additional_context,
                &input,
            )
            .await;

        match result {
            Ok((content, confidence)) => ToolExecutionOutput {
                success: true,
                output: serde_json::json!(content),
                tool_name: input.tool_name,
                error: None,
                child_confidence: Some(confidence),
            },
            Err(e) => ToolExecutionOutput {
                success: false,
                output: serde_json::Value::Null,
                tool_name: input.tool_name,
                error: Some(e.to_string()),
                child_confidence: Some(0.0),
            },
        }
    }

    /// Run a child agent end to end as a tool call, with depth guarding
    /// and a 300 s deadline. Returns `(content, confidence)`.
    ///
    /// Manually boxed (rather than `async fn`) to break the async
    /// recursion cycle (workflow → activities → child workflow) for the
    /// compiler's Send inference.
    pub fn execute_agent_as_tool<'a>(
        self: &'a Arc<Self>,
        agent_id: &'a str,
        query: &'a str,
        additional_context: &'a str,
        input: &'a ToolExecutionInput,
    ) -> std::pin::Pin<
        Box<dyn std::future::Future<Output = Result<(String, f64), AgentError>> + Send + 'a>,
    > {
        Box::pin(async move {
            if input.current_depth >= input.max_depth {
                return Err(AgentError::ChildAgentUnavailable {
                    agent_id: agent_id.to_string(),
                    reason: format!("max nesting depth {} reached", input.max_depth),
                });
            }

            let config = self
                .agents
                .get(agent_id)
                .await
                .map_err(|e| AgentError::Transport(e.to_string()))?
                .ok_or_else(|| {
                    AgentError::ConfigInvalid(format!("Agent config not found: {}", agent_id))
                })?;

            let user_input = if additional_context.is_empty() {
                query.to_string()
            } else {
                format!("{}\n\nContext: {}", query, additional_context)
            };

            let mut metadata = HashMap::new();
            metadata.insert(
                "invocation_depth".to_string(),
                serde_json::json!(input.current_depth + 1),
            );

            let context = InvocationContext {
                user_input,
                session_id: input.session_id.clone(),
                user_id: input.user_id.clone(),
                conversation_history: input.conversation_history.clone(),
                request_id: input.request_id.clone(),
                workflow_id: input.workflow_id.clone(),
                metadata,
            };

            let workflow = AgentWorkflow::new(Arc::clone(self));
            // Boxed to break the async recursion cycle (workflow → activities
            // → child workflow).
            let execution: std::pin::Pin<
                Box<
                    dyn std::future::Future<
                            Output = Result<crate::agentflow::config::AgentResponse, AgentError>,
                        > + Send
                        + '_,
                >,
            > = Box::pin(workflow.execute_at_depth(&config, &context, input.current_depth + 1));
            let response = tokio::time::timeout(CHILD_AGENT_TIMEOUT, execution)
                .await
                .map_err(|_| AgentError::Timeout(format!("child agent {}", agent_id)))??;

            log::info!(
                "child_agent_executed agent_id={} confidence={:.2}",
                agent_id,
                response.confidence
            );
            Ok((response.content, response.confidence))
        })
    }

    // -- Simple agent lane -------------------------------------------------

    /// Rule-based pattern matching for [`AgentKind::Simple`] agents.
    pub fn execute_simple_agent(&self, config: &AgentConfig, user_input: &str) -> SimpleAgentOutput {
        let input = user_input.to_lowercase();
        let input = input.trim();

        // Example inputs compile to patterns with `*` as a wildcard.
        for example in &config.examples {
            let pattern = regex::escape(&example.input).replace(r"\*", ".*");
            match Regex::new(&format!("(?i){}", pattern)) {
                Ok(re) => {
                    if re.is_match(input) {
                        return SimpleAgentOutput {
                            content: example.output.clone(),
                            confidence: 1.0,
                            match_type: "pattern",
                        };
                    }
                }
                Err(e) => log::warn!("unusable example pattern '{}': {}", example.input, e),
            }
        }

        // Rules of the shape "keyword: response".
        for rule in &config.instructions.rules {
            if let Some((keyword, response)) = rule.split_once(':') {
                if input.contains(&keyword.trim().to_lowercase()) {
                    return SimpleAgentOutput {
                        content: response.trim().to_string(),
                        confidence: 0.8,
                        match_type: "keyword",
                    };
                }
            }
        }

        SimpleAgentOutput {
            content: format!("I can help you with: {}", config.goal.objective),
            confidence: 0.5,
            match_type: "default",
        }
    }

    // -- Validators ----------------------------------------------------------

    pub async fn validate_action(
        &self,
        input: &ActionValidatorInput,
    ) -> Result<ActionValidatorOutput, AgentError> {
        let provider = self.validator_provider().await?;
        validators::validate_action(provider.as_ref(), input)
            .await
            .map_err(|e| AgentError::Transport(e.to_string()))
    }

    pub async fn detect_loop(
        &self,
        input: &LoopDetectorInput,
    ) -> Result<LoopDetectorOutput, AgentError> {
        let provider = self.validator_provider().await?;
        validators::detect_loop(provider.as_ref(), input)
            .await
            .map_err(|e| AgentError::Transport(e.to_string()))
    }

    pub async fn check_hallucination(
        &self,
        input: &HallucinationCheckerInput,
    ) -> Result<HallucinationCheckerOutput, AgentError> {
        let provider = self.validator_provider().await?;
        validators::check_hallucination(provider.as_ref(), input)
            .await
            .map_err(|e| AgentError::Transport(e.to_string()))
    }

    pub async fn sanitize_input(&self, user_input: &str) -> Result<SanitizerOutput, AgentError> {
        let provider = self.validator_provider().await?;
        validators::sanitize_input(provider.as_ref(), user_input)
            .await
            .map_err(|e| AgentError::Transport(e.to_string()))
    }

    /// Rule-based scrub for external tool output. Returns the (possibly
    /// wrapped) content and whether it was flagged.
    pub fn sanitize_tool_result(&self, content: &str) -> (String, bool) {
        validators::sanitize_tool_result(content)
    }

    /// Whether the tool is external (MCP or unknown provenance) and its
    /// results should be sanitized before feeding back to the LLM.
    pub fn is_external_tool(&self, tool_name: &str) -> bool {
        // Server-qualified and template-qualified names are external;
        // builtin and agent tools are not.
        tool_name.contains(':') && parse_agent_tool_name(tool_name).is_none()
    }
}

/// Verify the configuration is executable. Checked before any lane runs;
/// violations surface as [`AgentError::ConfigInvalid`] and are never
/// retried.
pub fn validate_config(config: &AgentConfig) -> Result<(), AgentError> {
    let errors = config.validate();
    if errors.is_empty() {
        Ok(())
    } else {
        Err(AgentError::ConfigInvalid(errors.join("; ")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agentflow::config::AgentKind;
    use crate::agentflow::knowledge::StaticKnowledgeBase;
    use crate::agentflow::storage::FileAgentRepository;
    use crate::agentflow::tool_protocol::ToolRegistry;

    fn activities() -> Arc<Activities> {
        let registry = ToolRegistry::shared();
        let dir = tempfile::tempdir().unwrap();
        Arc::new(Activities::new(
            registry.clone(),
            Arc::new(McpManager::new(registry)),
            Arc::new(StaticKnowledgeBase::new()),
            Arc::new(FileAgentRepository::new(dir.path()).unwrap()),
        ))
    }

    #[tokio::test]
    async fn test_execute_unknown_tool_reports_not_found() {
        let activities = activities();
        let output = activities
            .execute_tool(ToolExecutionInput::simple("nope", serde_json::json!({})))
            .await;
        assert!(!output.success);
        assert!(output.error.unwrap().contains("Tool not found"));
    }

    #[tokio::test]
    async fn test_mcp_prefix_unresolved_passes_through() {
        let activities = activities();
        let resolved = activities
            .resolve_mcp_tool_name("mcp:google-calendar:list_events")
            .await;
        assert_eq!(resolved, "mcp:google-calendar:list_events");

        // Non-mcp names are untouched.
        assert_eq!(activities.resolve_mcp_tool_name("calculator").await, "calculator");
    }

    #[tokio::test]
    async fn test_agent_tool_requires_query() {
        let activities = activities();
        let output = activities
            .execute_tool(ToolExecutionInput::simple(
                "agent:child",
                serde_json::json!({"context": "no query"}),
            ))
            .await;
        assert!(!output.success);
        assert!(output.error.unwrap().contains("Query parameter is required"));
    }

    #[tokio::test]
    async fn test_depth_guard_blocks_deep_nesting() {
        let activities = activities();
        let mut input = ToolExecutionInput::simple(
            "agent:child",
            serde_json::json!({"query": "hello"}),
        );
        input.current_depth = 3;
        input.max_depth = 3;

        let output = activities.execute_tool(input).await;
        assert!(!output.success);
        assert!(output.error.unwrap().contains("max nesting depth"));
    }

    #[test]
    fn test_simple_agent_pattern_beats_keyword() {
        let activities = activities();
        let mut config = AgentConfig::new("s", "Simple", AgentKind::Simple)
            .with_example("hello*", "hi there")
            .with_goal("greeting people");
        config
            .instructions
            .rules
            .push("hello: keyword response".to_string());

        let output = activities.execute_simple_agent(&config, "Hello!");
        assert_eq!(output.content, "hi there");
        assert_eq!(output.confidence, 1.0);
        assert_eq!(output.match_type, "pattern");
    }

    #[test]
    fn test_simple_agent_keyword_then_default() {
        let activities = activities();
        let mut config =
            AgentConfig::new("s", "Simple", AgentKind::Simple).with_goal("scheduling meetings");
        config
            .instructions
            .rules
            .push("refund: Please contact billing.".to_string());

        let output = activities.execute_simple_agent(&config, "I want a REFUND now");
        assert_eq!(output.content, "Please contact billing.");
        assert_eq!(output.confidence, 0.8);
        assert_eq!(output.match_type, "keyword");

        let output = activities.execute_simple_agent(&config, "unrelated");
        assert_eq!(output.content, "I can help you with: scheduling meetings");
        assert_eq!(output.confidence, 0.5);
        assert_eq!(output.match_type, "default");
    }

    #[test]
    fn test_external_tool_detection() {
        let activities = activities();
        assert!(activities.is_external_tool("srv_abc:list_events"));
        assert!(activities.is_external_tool("mcp:calendar:list"));
        assert!(!activities.is_external_tool("calculator"));
        assert!(!activities.is_external_tool("agent:researcher"));
    }
}

//! Agent configuration model.
//!
//! An [`AgentConfig`] is the immutable description of an agent: its kind,
//! persona, and the bindings (LLM, knowledge, tools, routing, orchestration,
//! safety, governance) that the control loop consults at execution time.
//! Configurations are stored as JSON by the repositories in
//! [`storage`](crate::agentflow::storage) and read as a snapshot per
//! invocation — later writes never affect in-flight work.
//!
//! The kind determines which bindings are mandatory; [`AgentConfig::validate`]
//! reports every violation so callers can surface all of them at once.
//!
//! # Example
//!
//! ```rust
//! use agentflow::config::{AgentConfig, AgentKind};
//!
//! let config = AgentConfig::new("greeter", "Greeter", AgentKind::Simple)
//!     .with_goal("greeting visitors");
//! assert!(config.validate().is_empty());
//! ```

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The seven agent kinds, each mapping to one lane of the control loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentKind {
    /// Rule-based pattern matching, no LLM.
    Simple,
    /// Single LLM call.
    Llm,
    /// Knowledge retrieval followed by an LLM call.
    Rag,
    /// LLM + tool-calling loop.
    Tool,
    /// Retrieval + LLM + tool-calling loop.
    Full,
    /// Classification call that routes to a target agent.
    Router,
    /// Coordinates child agents as callable tools.
    Orchestrator,
}

impl AgentKind {
    /// Stable string tag used in persisted records and logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentKind::Simple => "simple",
            AgentKind::Llm => "llm",
            AgentKind::Rag => "rag",
            AgentKind::Tool => "tool",
            AgentKind::Full => "full",
            AgentKind::Router => "router",
            AgentKind::Orchestrator => "orchestrator",
        }
    }
}

/// WHO the agent is.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentRole {
    /// Role title, e.g. "Senior Data Analyst".
    pub title: String,
    #[serde(default)]
    pub expertise: Vec<String>,
    #[serde(default)]
    pub personality: Vec<String>,
    /// professional, casual, technical, ...
    #[serde(default = "default_communication_style")]
    pub communication_style: String,
}

fn default_communication_style() -> String {
    "professional".to_string()
}

/// WHAT the agent achieves.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentGoal {
    pub objective: String,
    #[serde(default)]
    pub constraints: Vec<String>,
    #[serde(default)]
    pub success_indicators: Vec<String>,
}

/// HOW the agent operates.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentInstructions {
    #[serde(default)]
    pub steps: Vec<String>,
    /// For [`AgentKind::Simple`], rules of the shape `"keyword: response"`
    /// are treated as keyword lookups.
    #[serde(default)]
    pub rules: Vec<String>,
    #[serde(default)]
    pub prohibited: Vec<String>,
    #[serde(default)]
    pub output_format: Option<String>,
}

/// Few-shot example. For [`AgentKind::Simple`], `input` doubles as a match
/// pattern where `*` is a wildcard.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentExample {
    pub input: String,
    pub output: String,
    #[serde(default)]
    pub explanation: Option<String>,
}

/// LLM provider binding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmBinding {
    /// openai, anthropic, azure, ollama.
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_top_p")]
    pub top_p: f32,
    #[serde(default)]
    pub frequency_penalty: f32,
    #[serde(default)]
    pub presence_penalty: f32,
    #[serde(default)]
    pub stop_sequences: Vec<String>,
    /// Custom endpoint base; covers Azure/Ollama-style OpenAI-compatible hosts.
    #[serde(default)]
    pub api_base: Option<String>,
}

fn default_provider() -> String {
    "openai".to_string()
}

fn default_model() -> String {
    "gpt-4-turbo".to_string()
}

fn default_temperature() -> f32 {
    0.7
}

fn default_max_tokens() -> u32 {
    4096
}

fn default_top_p() -> f32 {
    1.0
}

impl Default for LlmBinding {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            top_p: default_top_p(),
            frequency_penalty: 0.0,
            presence_penalty: 0.0,
            stop_sequences: Vec::new(),
            api_base: None,
        }
    }
}

/// Knowledge base / retrieval binding. Passed through opaquely to the
/// knowledge client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeBinding {
    #[serde(default = "default_true")]
    pub enabled: bool,
    pub collection_name: String,
    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,
    #[serde(default = "default_provider")]
    pub embedding_provider: String,
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f64,
    #[serde(default)]
    pub rerank: bool,
    #[serde(default)]
    pub rerank_model: Option<String>,
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,
    #[serde(default = "default_true")]
    pub include_metadata: bool,
}

fn default_true() -> bool {
    true
}

fn default_embedding_model() -> String {
    "text-embedding-3-small".to_string()
}

fn default_top_k() -> usize {
    5
}

fn default_similarity_threshold() -> f64 {
    0.7
}

fn default_chunk_overlap() -> usize {
    50
}

/// Tool binding: references a registry tool by id with execution knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolBinding {
    pub tool_id: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub requires_confirmation: bool,
    #[serde(default = "default_tool_timeout")]
    pub timeout_seconds: u64,
    #[serde(default = "default_retry_count")]
    pub retry_count: u32,
    #[serde(default)]
    pub config: HashMap<String, serde_json::Value>,
}

fn default_tool_timeout() -> u64 {
    30
}

fn default_retry_count() -> u32 {
    1
}

/// How an orchestrator decides which child agents to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrchestratorMode {
    /// The LLM decides at runtime via agent tools.
    LlmDriven,
    /// Follow a predefined step graph.
    Workflow,
    /// Explicit routing rules first, LLM fallback.
    Hybrid,
}

/// Strategies for aggregating multi-agent results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AggregationStrategy {
    First,
    All,
    Vote,
    Merge,
    Best,
}

/// Reference to a child agent available to an orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentReference {
    pub agent_id: String,
    #[serde(default)]
    pub alias: Option<String>,
    /// Overrides the child's own description when presenting the agent tool.
    #[serde(default)]
    pub description: Option<String>,
}

/// Pattern condition for a hybrid-mode routing rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoutingCondition {
    Contains,
    StartsWith,
    EndsWith,
    Regex,
    Exact,
}

/// A single deterministic routing rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingRule {
    pub id: String,
    #[serde(default = "default_routing_condition")]
    pub condition: RoutingCondition,
    pub pattern: String,
    pub target_agent: String,
    #[serde(default)]
    pub priority: i32,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_routing_condition() -> RoutingCondition {
    RoutingCondition::Contains
}

/// Rule set for hybrid orchestration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingRules {
    #[serde(default)]
    pub rules: Vec<RoutingRule>,
    #[serde(default = "default_true")]
    pub fallback_to_llm: bool,
    #[serde(default)]
    pub default_agent: Option<String>,
    #[serde(default)]
    pub case_sensitive: bool,
}

impl Default for RoutingRules {
    fn default() -> Self {
        Self {
            rules: Vec::new(),
            fallback_to_llm: true,
            default_agent: None,
            case_sensitive: false,
        }
    }
}

impl RoutingRules {
    /// Enabled rules sorted by priority, highest first.
    pub fn sorted_rules(&self) -> Vec<&RoutingRule> {
        let mut rules: Vec<&RoutingRule> = self.rules.iter().filter(|r| r.enabled).collect();
        rules.sort_by(|a, b| b.priority.cmp(&a.priority));
        rules
    }
}

/// Orchestrator-specific binding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorBinding {
    #[serde(default = "default_orchestrator_mode")]
    pub mode: OrchestratorMode,
    #[serde(default)]
    pub available_agents: Vec<AgentReference>,
    /// Step graph for workflow/hybrid modes, serialized as JSON.
    #[serde(default)]
    pub workflow_definition: Option<serde_json::Value>,
    #[serde(default = "default_aggregation")]
    pub default_aggregation: AggregationStrategy,
    #[serde(default = "default_max_parallel")]
    pub max_parallel: usize,
    #[serde(default = "default_max_depth")]
    pub max_depth: u32,
    #[serde(default)]
    pub allow_self_reference: bool,
    #[serde(default)]
    pub routing_rules: Option<RoutingRules>,
    /// Consecutive calls to the same child before its tool is withheld.
    #[serde(default = "default_max_same_agent_calls")]
    pub max_same_agent_calls: u32,
    #[serde(default = "default_orchestrator_iterations")]
    pub max_iterations: u32,
}

fn default_orchestrator_mode() -> OrchestratorMode {
    OrchestratorMode::LlmDriven
}

fn default_aggregation() -> AggregationStrategy {
    AggregationStrategy::All
}

fn default_max_parallel() -> usize {
    5
}

fn default_max_depth() -> u32 {
    3
}

fn default_max_same_agent_calls() -> u32 {
    3
}

fn default_orchestrator_iterations() -> u32 {
    15
}

impl Default for OrchestratorBinding {
    fn default() -> Self {
        Self {
            mode: default_orchestrator_mode(),
            available_agents: Vec::new(),
            workflow_definition: None,
            default_aggregation: default_aggregation(),
            max_parallel: default_max_parallel(),
            max_depth: default_max_depth(),
            allow_self_reference: false,
            routing_rules: None,
            max_same_agent_calls: default_max_same_agent_calls(),
            max_iterations: default_orchestrator_iterations(),
        }
    }
}

/// Safety check level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SafetyLevel {
    Low,
    Standard,
    High,
    Maximum,
}

/// Safety binding applied around every lane.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SafetyBinding {
    #[serde(default = "default_safety_level")]
    pub level: SafetyLevel,
    #[serde(default)]
    pub blocked_topics: Vec<String>,
    /// Regex patterns; invalid patterns are logged and skipped.
    #[serde(default)]
    pub blocked_patterns: Vec<String>,
    #[serde(default = "default_true")]
    pub content_filtering: bool,
    #[serde(default = "default_true")]
    pub pii_detection: bool,
    #[serde(default = "default_true")]
    pub hallucination_check: bool,
    #[serde(default = "default_safety_iterations")]
    pub max_iterations: u32,
    /// Per-invocation soft ceiling in seconds.
    #[serde(default = "default_invocation_timeout")]
    pub timeout_seconds: u64,
    #[serde(default = "default_input_max_length")]
    pub input_max_length: usize,
    #[serde(default = "default_true")]
    pub block_code_execution: bool,
}

fn default_safety_level() -> SafetyLevel {
    SafetyLevel::Standard
}

fn default_safety_iterations() -> u32 {
    10
}

fn default_invocation_timeout() -> u64 {
    300
}

fn default_input_max_length() -> usize {
    10_000
}

impl Default for SafetyBinding {
    fn default() -> Self {
        Self {
            level: default_safety_level(),
            blocked_topics: Vec::new(),
            blocked_patterns: Vec::new(),
            content_filtering: true,
            pii_detection: true,
            hallucination_check: true,
            max_iterations: default_safety_iterations(),
            timeout_seconds: default_invocation_timeout(),
            input_max_length: default_input_max_length(),
            block_code_execution: true,
        }
    }
}

/// Governance binding: audit, confirmation, rate and cost ceilings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GovernanceBinding {
    #[serde(default = "default_true")]
    pub audit_logging: bool,
    #[serde(default)]
    pub require_confirmation_for: Vec<String>,
    #[serde(default = "default_data_classifications")]
    pub allowed_data_classifications: Vec<String>,
    #[serde(default = "default_rate_limit")]
    pub rate_limit_per_minute: u32,
    #[serde(default = "default_cost_limit")]
    pub cost_limit_per_request: f64,
}

fn default_data_classifications() -> Vec<String> {
    vec!["public".to_string(), "internal".to_string()]
}

fn default_rate_limit() -> u32 {
    60
}

fn default_cost_limit() -> f64 {
    1.0
}

impl Default for GovernanceBinding {
    fn default() -> Self {
        Self {
            audit_logging: true,
            require_confirmation_for: Vec::new(),
            allowed_data_classifications: default_data_classifications(),
            rate_limit_per_minute: default_rate_limit(),
            cost_limit_per_request: default_cost_limit(),
        }
    }
}

/// Complete agent configuration. One snapshot of this struct drives one
/// invocation end to end.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_version")]
    pub version: String,

    pub kind: AgentKind,

    #[serde(default)]
    pub role: AgentRole,
    #[serde(default)]
    pub goal: AgentGoal,
    #[serde(default)]
    pub instructions: AgentInstructions,
    #[serde(default)]
    pub examples: Vec<AgentExample>,

    #[serde(default)]
    pub llm: Option<LlmBinding>,
    #[serde(default)]
    pub knowledge: Option<KnowledgeBinding>,
    #[serde(default)]
    pub tools: Vec<ToolBinding>,
    /// Intent → agent id mapping for [`AgentKind::Router`]. The `"default"`
    /// key, when present, is the fallback target.
    #[serde(default)]
    pub routing_table: Option<HashMap<String, String>>,
    #[serde(default)]
    pub orchestrator: Option<OrchestratorBinding>,

    #[serde(default)]
    pub safety: SafetyBinding,
    #[serde(default)]
    pub governance: GovernanceBinding,

    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub created_by: Option<String>,
    #[serde(default = "default_true")]
    pub is_active: bool,
    #[serde(default)]
    pub tags: Vec<String>,
}

fn default_version() -> String {
    "1.0.0".to_string()
}

impl AgentConfig {
    /// Create a minimal configuration of the given kind.
    pub fn new(id: impl Into<String>, name: impl Into<String>, kind: AgentKind) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: String::new(),
            version: default_version(),
            kind,
            role: AgentRole::default(),
            goal: AgentGoal::default(),
            instructions: AgentInstructions::default(),
            examples: Vec::new(),
            llm: None,
            knowledge: None,
            tools: Vec::new(),
            routing_table: None,
            orchestrator: None,
            safety: SafetyBinding::default(),
            governance: GovernanceBinding::default(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
            created_by: None,
            is_active: true,
            tags: Vec::new(),
        }
    }

    /// Attach an LLM binding (builder pattern).
    pub fn with_llm(mut self, llm: LlmBinding) -> Self {
        self.llm = Some(llm);
        self
    }

    /// Attach a knowledge binding.
    pub fn with_knowledge(mut self, knowledge: KnowledgeBinding) -> Self {
        self.knowledge = Some(knowledge);
        self
    }

    /// Append a tool binding.
    pub fn with_tool(mut self, tool: ToolBinding) -> Self {
        self.tools.push(tool);
        self
    }

    /// Set the role title.
    pub fn with_role_title(mut self, title: impl Into<String>) -> Self {
        self.role.title = title.into();
        self
    }

    /// Set the goal objective.
    pub fn with_goal(mut self, objective: impl Into<String>) -> Self {
        self.goal.objective = objective.into();
        self
    }

    /// Append a few-shot example.
    pub fn with_example(mut self, input: impl Into<String>, output: impl Into<String>) -> Self {
        self.examples.push(AgentExample {
            input: input.into(),
            output: output.into(),
            explanation: None,
        });
        self
    }

    /// Set the routing table (router kind).
    pub fn with_routing_table(mut self, table: HashMap<String, String>) -> Self {
        self.routing_table = Some(table);
        self
    }

    /// Set the orchestrator binding.
    pub fn with_orchestrator(mut self, binding: OrchestratorBinding) -> Self {
        self.orchestrator = Some(binding);
        self
    }

    /// Tool ids with `enabled = true`, in binding order.
    pub fn enabled_tools(&self) -> Vec<String> {
        self.tools
            .iter()
            .filter(|t| t.enabled)
            .map(|t| t.tool_id.clone())
            .collect()
    }

    /// Check that the bindings required by [`AgentConfig::kind`] are present.
    /// Returns one message per violation; an empty vec means the config is
    /// executable.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        let llm_required = matches!(
            self.kind,
            AgentKind::Llm
                | AgentKind::Rag
                | AgentKind::Tool
                | AgentKind::Full
                | AgentKind::Router
                | AgentKind::Orchestrator
        );
        if llm_required && self.llm.is_none() {
            errors.push(format!("{} requires an llm binding", self.kind.as_str()));
        }

        if matches!(self.kind, AgentKind::Rag | AgentKind::Full) && self.knowledge.is_none() {
            errors.push(format!(
                "{} requires a knowledge binding",
                self.kind.as_str()
            ));
        }

        if matches!(self.kind, AgentKind::Tool | AgentKind::Full) && self.tools.is_empty() {
            errors.push(format!(
                "{} requires at least one tool binding",
                self.kind.as_str()
            ));
        }

        if self.kind == AgentKind::Router
            && self.routing_table.as_ref().map_or(true, |t| t.is_empty())
        {
            errors.push("router requires a routing_table".to_string());
        }

        if self.kind == AgentKind::Orchestrator && self.orchestrator.is_none() {
            errors.push("orchestrator requires an orchestrator binding".to_string());
        }

        errors
    }

    /// Build the system prompt from the persona sections. Tools are NOT
    /// listed here; they reach the LLM through native function calling.
    pub fn build_system_prompt(&self) -> String {
        let mut parts: Vec<String> = Vec::new();

        parts.push(format!("## ROLE\nYou are {}.", self.role.title));
        if !self.role.expertise.is_empty() {
            parts.push(format!("Your expertise: {}.", self.role.expertise.join(", ")));
        }
        if !self.role.personality.is_empty() {
            parts.push(format!(
                "Your personality: {}.",
                self.role.personality.join(", ")
            ));
        }
        parts.push(format!(
            "Communication style: {}.",
            self.role.communication_style
        ));

        parts.push(format!("\n## GOAL\n{}", self.goal.objective));
        if !self.goal.constraints.is_empty() {
            parts.push("\nConstraints:".to_string());
            for constraint in &self.goal.constraints {
                parts.push(format!("- {}", constraint));
            }
        }

        if !self.instructions.steps.is_empty() {
            parts.push("\n## INSTRUCTIONS".to_string());
            for (i, step) in self.instructions.steps.iter().enumerate() {
                parts.push(format!("{}. {}", i + 1, step));
            }
        }

        if !self.instructions.rules.is_empty() {
            parts.push("\n## RULES".to_string());
            for rule in &self.instructions.rules {
                parts.push(format!("- {}", rule));
            }
        }

        if !self.instructions.prohibited.is_empty() {
            parts.push("\n## PROHIBITED".to_string());
            for prohibited in &self.instructions.prohibited {
                parts.push(format!("- DO NOT: {}", prohibited));
            }
        }

        if let Some(format) = &self.instructions.output_format {
            parts.push(format!("\n## OUTPUT FORMAT\n{}", format));
        }

        if !self.examples.is_empty() {
            parts.push("\n## EXAMPLES".to_string());
            for example in self.examples.iter().take(3) {
                parts.push(format!("\nInput: {}", example.input));
                parts.push(format!("Output: {}", example.output));
            }
        }

        parts.join("\n")
    }
}

/// Runtime context passed into one invocation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InvocationContext {
    pub user_input: String,
    pub session_id: String,
    pub user_id: String,
    #[serde(default)]
    pub conversation_history: Vec<HistoryMessage>,
    #[serde(default)]
    pub request_id: Option<String>,
    #[serde(default)]
    pub workflow_id: Option<String>,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

/// One prior turn of the conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryMessage {
    pub role: String,
    pub content: String,
}

/// Final result of one invocation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentResponse {
    pub content: String,
    pub confidence: f64,
    #[serde(default)]
    pub sources: Vec<String>,
    #[serde(default)]
    pub tool_calls_made: Vec<ToolCallRecord>,
    #[serde(default)]
    pub needs_confirmation: bool,
    #[serde(default)]
    pub route_to_agent: Option<String>,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

/// Record of one executed tool call, kept on the response for auditing and
/// confidence scoring.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallRecord {
    pub tool: String,
    pub arguments: serde_json::Value,
    pub success: bool,
    #[serde(default)]
    pub error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_binding_validation() {
        let config = AgentConfig::new("a1", "Agent", AgentKind::Llm);
        let errors = config.validate();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("llm"));

        let config = config.with_llm(LlmBinding::default());
        assert!(config.validate().is_empty());
    }

    #[test]
    fn test_full_kind_requires_everything() {
        let config = AgentConfig::new("a1", "Agent", AgentKind::Full);
        let errors = config.validate();
        assert_eq!(errors.len(), 3);

        let config = config
            .with_llm(LlmBinding::default())
            .with_knowledge(KnowledgeBinding {
                enabled: true,
                collection_name: "docs".into(),
                embedding_model: default_embedding_model(),
                embedding_provider: "openai".into(),
                top_k: 5,
                similarity_threshold: 0.7,
                rerank: false,
                rerank_model: None,
                chunk_overlap: 50,
                include_metadata: true,
            })
            .with_tool(ToolBinding {
                tool_id: "calculator".into(),
                enabled: true,
                requires_confirmation: false,
                timeout_seconds: 30,
                retry_count: 1,
                config: HashMap::new(),
            });
        assert!(config.validate().is_empty());
    }

    #[test]
    fn test_router_requires_nonempty_table() {
        let config = AgentConfig::new("r1", "Router", AgentKind::Router)
            .with_llm(LlmBinding::default())
            .with_routing_table(HashMap::new());
        assert!(!config.validate().is_empty());
    }

    #[test]
    fn test_system_prompt_sections() {
        let mut config = AgentConfig::new("a1", "Agent", AgentKind::Llm)
            .with_role_title("Billing Assistant")
            .with_goal("resolving billing questions")
            .with_example("hello", "hi there");
        config.instructions.rules.push("Always be polite".into());

        let prompt = config.build_system_prompt();
        assert!(prompt.contains("## ROLE"));
        assert!(prompt.contains("You are Billing Assistant."));
        assert!(prompt.contains("## GOAL"));
        assert!(prompt.contains("## RULES"));
        assert!(prompt.contains("## EXAMPLES"));
        assert!(prompt.contains("Input: hello"));
    }

    #[test]
    fn test_enabled_tools_preserves_order() {
        let mut config = AgentConfig::new("t1", "Tools", AgentKind::Tool);
        for (id, enabled) in [("alpha", true), ("beta", false), ("gamma", true)] {
            config.tools.push(ToolBinding {
                tool_id: id.into(),
                enabled,
                requires_confirmation: false,
                timeout_seconds: 30,
                retry_count: 1,
                config: HashMap::new(),
            });
        }
        assert_eq!(config.enabled_tools(), vec!["alpha", "gamma"]);
    }

    #[test]
    fn test_config_json_round_trip() {
        let config = AgentConfig::new("a1", "Agent", AgentKind::Orchestrator)
            .with_llm(LlmBinding::default())
            .with_orchestrator(OrchestratorBinding::default());
        let json = serde_json::to_string(&config).unwrap();
        let back: AgentConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.kind, AgentKind::Orchestrator);
        assert_eq!(back.orchestrator.unwrap().max_parallel, 5);
    }

    #[test]
    fn test_routing_rules_sorted_by_priority() {
        let rules = RoutingRules {
            rules: vec![
                RoutingRule {
                    id: "low".into(),
                    condition: RoutingCondition::Contains,
                    pattern: "a".into(),
                    target_agent: "x".into(),
                    priority: 1,
                    description: None,
                    enabled: true,
                },
                RoutingRule {
                    id: "disabled".into(),
                    condition: RoutingCondition::Contains,
                    pattern: "b".into(),
                    target_agent: "y".into(),
                    priority: 100,
                    description: None,
                    enabled: false,
                },
                RoutingRule {
                    id: "high".into(),
                    condition: RoutingCondition::Exact,
                    pattern: "c".into(),
                    target_agent: "z".into(),
                    priority: 10,
                    description: None,
                    enabled: true,
                },
            ],
            fallback_to_llm: true,
            default_agent: None,
            case_sensitive: false,
        };

        let sorted = rules.sorted_rules();
        assert_eq!(sorted.len(), 2);
        assert_eq!(sorted[0].id, "high");
        assert_eq!(sorted[1].id, "low");
    }
}

//! Orchestrator lane: child agents as callable tools.
//!
//! Three modes decide which children run:
//!
//! - **llm-driven** — the orchestrator LLM sees each child as an
//!   `agent:<id>` tool and fans out at will; agent calls issued in one
//!   turn execute in parallel under a semaphore, other tools run
//!   sequentially, and results rejoin the conversation in request order.
//! - **workflow** — a supplied step graph (agent / parallel / conditional
//!   / loop) is followed deterministically with template-driven inputs.
//! - **hybrid** — priority-ordered routing rules pick a child directly;
//!   unmatched input falls back to llm-driven or a default agent.
//!
//! A per-instance circuit breaker isolates failing children, and a
//! consecutive-call bound keeps the LLM from hammering one child.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tokio::time::Instant;

use crate::agentflow::activities::{Activities, ToolExecutionInput};
use crate::agentflow::agent_tool::{agent_tool_definition, parse_agent_tool_name, AGENT_TOOL_PREFIX};
use crate::agentflow::aggregators::{self, ChildResult};
use crate::agentflow::config::{
    AgentConfig, AgentResponse, AggregationStrategy, InvocationContext, OrchestratorBinding,
    OrchestratorMode, RoutingCondition, RoutingRule, ToolCallRecord,
};
use crate::agentflow::confidence::{self, ConfidenceSignals};
use crate::agentflow::error::AgentError;
use crate::agentflow::llm::{ChatMessage, ChatRole, CompletionOptions, ToolCall};
use crate::agentflow::tool_protocol::{build_tool_schemas, unsanitize_tool_name, ToolDefinition};

/// Failures before a child's circuit opens.
const FAILURE_THRESHOLD: u32 = 3;
/// How long an open circuit stays open before one trial is allowed.
const RECOVERY_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Default)]
struct BreakerEntry {
    failures: u32,
    open_since: Option<Instant>,
}

/// Per-orchestrator-instance fault isolator for child agents.
///
/// From `closed`, [`FAILURE_THRESHOLD`] consecutive failures open the
/// circuit; after [`RECOVERY_TIMEOUT`] it half-opens, allowing exactly one
/// trial; any success closes it again.
pub struct CircuitBreaker {
    failure_threshold: u32,
    recovery_timeout: Duration,
    state: std::sync::Mutex<HashMap<String, BreakerEntry>>,
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(FAILURE_THRESHOLD, RECOVERY_TIMEOUT)
    }
}

impl CircuitBreaker {
    pub fn new(failure_threshold: u32, recovery_timeout: Duration) -> Self {
        Self {
            failure_threshold,
            recovery_timeout,
            state: std::sync::Mutex::new(HashMap::new()),
        }
    }

    pub fn record_failure(&self, agent_id: &str) {
        let mut state = self.state.lock().expect("breaker mutex poisoned");
        let entry = state.entry(agent_id.to_string()).or_default();
        entry.failures += 1;
        if entry.failures >= self.failure_threshold && entry.open_since.is_none() {
            entry.open_since = Some(Instant::now());
        }
    }

    pub fn record_success(&self, agent_id: &str) {
        let mut state = self.state.lock().expect("breaker mutex poisoned");
        let entry = state.entry(agent_id.to_string()).or_default();
        entry.failures = 0;
        entry.open_since = None;
    }

    /// Whether calls to the agent should be short-circuited. After the
    /// recovery timeout this transitions to half-open and permits one
    /// trial (failure count resets to threshold − 1).
    pub fn is_open(&self, agent_id: &str) -> bool {
        let mut state = self.state.lock().expect("breaker mutex poisoned");
        let Some(entry) = state.get_mut(agent_id) else {
            return false;
        };
        let Some(open_since) = entry.open_since else {
            return false;
        };

        if open_since.elapsed() > self.recovery_timeout {
            entry.open_since = None;
            entry.failures = self.failure_threshold.saturating_sub(1);
            return false;
        }
        true
    }

    /// closed / half-open / open, for logs and metadata.
    pub fn status(&self, agent_id: &str) -> &'static str {
        let state = self.state.lock().expect("breaker mutex poisoned");
        match state.get(agent_id) {
            Some(entry) if entry.open_since.is_some() => "open",
            Some(entry) if entry.failures > 0 => "half-open",
            _ => "closed",
        }
    }
}

// ---------------------------------------------------------------------------
// Workflow-mode graph
// ---------------------------------------------------------------------------

/// One branch of a parallel step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParallelBranch {
    pub agent_id: String,
    #[serde(default)]
    pub input: Option<String>,
}

/// A step in a workflow-mode graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkflowStep {
    /// Invoke one agent; input is a template string.
    Agent {
        id: String,
        agent_id: String,
        #[serde(default)]
        input: Option<String>,
        #[serde(default)]
        next: Option<String>,
    },
    /// Fan out to several agents and aggregate their outputs.
    Parallel {
        id: String,
        branches: Vec<ParallelBranch>,
        #[serde(default)]
        aggregation: Option<AggregationStrategy>,
        #[serde(default)]
        next: Option<String>,
    },
    /// Branch on a rendered boolean expression.
    Conditional {
        id: String,
        condition: String,
        #[serde(default)]
        if_true: Option<String>,
        #[serde(default)]
        if_false: Option<String>,
    },
    /// Re-run one agent until the exit condition holds or the cap is hit.
    Loop {
        id: String,
        agent_id: String,
        #[serde(default)]
        input: Option<String>,
        max_iterations: u32,
        #[serde(default)]
        exit_condition: Option<String>,
        #[serde(default)]
        next: Option<String>,
    },
}

impl WorkflowStep {
    fn id(&self) -> &str {
        match self {
            WorkflowStep::Agent { id, .. }
            | WorkflowStep::Parallel { id, .. }
            | WorkflowStep::Conditional { id, .. }
            | WorkflowStep::Loop { id, .. } => id,
        }
    }
}

/// The externally supplied graph for workflow mode.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowGraph {
    pub entry_step: String,
    pub steps: Vec<WorkflowStep>,
}

/// Render `${user_input}` / `${steps.<id>.output}` / `${context.<k>}`
/// placeholders. Unknown placeholders render empty.
fn render_template(
    template: &str,
    ctx: &InvocationContext,
    step_outputs: &HashMap<String, String>,
) -> String {
    let re = regex::Regex::new(r"\$\{([A-Za-z0-9_.]+)\}").expect("template regex is valid");
    re.replace_all(template, |caps: &regex::Captures<'_>| {
        let path = &caps[1];
        if path == "user_input" {
            return ctx.user_input.clone();
        }
        if let Some(rest) = path.strip_prefix("steps.") {
            if let Some(step_id) = rest.strip_suffix(".output") {
                return step_outputs.get(step_id).cloned().unwrap_or_default();
            }
        }
        if let Some(key) = path.strip_prefix("context.") {
            return ctx
                .metadata
                .get(key)
                .map(|v| match v {
                    serde_json::Value::String(s) => s.clone(),
                    other => other.to_string(),
                })
                .unwrap_or_default();
        }
        String::new()
    })
    .into_owned()
}

/// Render placeholders into string literals and evaluate as a boolean.
/// Unevaluable conditions are false.
fn evaluate_condition(
    condition: &str,
    ctx: &InvocationContext,
    step_outputs: &HashMap<String, String>,
) -> bool {
    let re = regex::Regex::new(r"\$\{([A-Za-z0-9_.]+)\}").expect("template regex is valid");
    let rendered = re
        .replace_all(condition, |caps: &regex::Captures<'_>| {
            let raw = render_template(&format!("${{{}}}", &caps[1]), ctx, step_outputs);
            raw.replace('\\', "\\\\").replace('"', "\\\"")
        })
        .into_owned();

    match evalexpr::eval_boolean(&rendered) {
        Ok(result) => result,
        Err(e) => {
            log::warn!("condition '{}' failed to evaluate: {}", rendered, e);
            false
        }
    }
}

// ---------------------------------------------------------------------------
// Runner
// ---------------------------------------------------------------------------

struct ToolOutcome {
    call: ToolCall,
    canonical_name: String,
    success: bool,
    content: String,
    error: Option<String>,
    child_confidence: Option<f64>,
}

/// Executes one orchestrator invocation.
pub struct OrchestratorRunner {
    activities: Arc<Activities>,
    config: AgentConfig,
    binding: OrchestratorBinding,
    breaker: CircuitBreaker,
    depth: u32,
}

impl OrchestratorRunner {
    pub fn new(activities: Arc<Activities>, config: &AgentConfig, depth: u32) -> Result<Self, AgentError> {
        let binding = config
            .orchestrator
            .clone()
            .ok_or_else(|| AgentError::ConfigInvalid("orchestrator binding missing".into()))?;
        Ok(Self {
            activities,
            config: config.clone(),
            binding,
            breaker: CircuitBreaker::default(),
            depth,
        })
    }

    pub async fn run(&self, ctx: &InvocationContext) -> Result<AgentResponse, AgentError> {
        match self.binding.mode {
            OrchestratorMode::LlmDriven => self.run_llm_driven(ctx).await,
            OrchestratorMode::Workflow => self.run_workflow(ctx).await,
            OrchestratorMode::Hybrid => self.run_hybrid(ctx).await,
        }
    }

    // -- shared helpers ----------------------------------------------------

    fn child_references(&self) -> Vec<&crate::agentflow::config::AgentReference> {
        self.binding
            .available_agents
            .iter()
            .filter(|r| self.binding.allow_self_reference || r.agent_id != self.config.id)
            .collect()
    }

    async fn agent_tool_definitions(
        &self,
        suppressed: Option<&str>,
    ) -> Vec<ToolDefinition> {
        let mut definitions = Vec::new();
        for reference in self.child_references() {
            let tool_name = format!("{}{}", AGENT_TOOL_PREFIX, reference.agent_id);
            if suppressed == Some(tool_name.as_str()) {
                continue;
            }
            match self.activities.agents().get(&reference.agent_id).await {
                Ok(Some(config)) => definitions.push(agent_tool_definition(
                    &config,
                    reference.description.as_deref(),
                )),
                _ => log::warn!(
                    "orchestrator references unknown agent: {}",
                    reference.agent_id
                ),
            }
        }
        definitions
    }

    fn orchestration_system_prompt(&self) -> String {
        let base = self.config.build_system_prompt();

        let agent_list: Vec<String> = self
            .child_references()
            .iter()
            .map(|r| {
                let mut line = format!("- agent:{}", r.agent_id);
                if let Some(alias) = &r.alias {
                    line.push_str(&format!(" (alias: {})", alias));
                }
                if let Some(description) = &r.description {
                    line.push_str(&format!(": {}", description));
                }
                line
            })
            .collect();

        format!(
            "{}\n\n## ORCHESTRATION\n\n\
             You are an orchestrator agent that coordinates other specialized agents.\n\n\
             Available agents:\n{}\n\n\
             You can call these agents as tools using their agent: prefix names.\n\
             Each agent will process your query and return results.\n\n\
             Guidelines:\n\
             - Call agents when their expertise matches the task\n\
             - You can call multiple agents in parallel if needed\n\
             - Synthesize results from multiple agents into a coherent response\n\
             - If an agent fails, consider alternatives or explain the limitation",
            base,
            if agent_list.is_empty() {
                "No agents configured.".to_string()
            } else {
                agent_list.join("\n")
            }
        )
    }

    fn tool_input(&self, ctx: &InvocationContext, call: &ToolCall, canonical: &str) -> ToolExecutionInput {
        ToolExecutionInput {
            tool_name: canonical.to_string(),
            arguments: call.arguments.clone(),
            user_id: ctx.user_id.clone(),
            session_id: ctx.session_id.clone(),
            conversation_history: ctx.conversation_history.clone(),
            request_id: ctx.request_id.clone(),
            workflow_id: ctx.workflow_id.clone(),
            timeout_seconds: None,
            current_depth: self.depth,
            max_depth: self.binding.max_depth,
        }
    }

    /// Execute one turn's tool calls: agent calls in parallel under the
    /// semaphore, others sequentially, results in original request order.
    async fn execute_tool_calls(
        &self,
        ctx: &InvocationContext,
        calls: &[ToolCall],
    ) -> Vec<ToolOutcome> {
        let canonical: Vec<String> = calls
            .iter()
            .map(|c| unsanitize_tool_name(&c.name))
            .collect();

        let semaphore = Arc::new(Semaphore::new(self.binding.max_parallel.max(1)));
        let mut agent_futures = Vec::new();
        let mut agent_slots = Vec::new();

        for (index, call) in calls.iter().enumerate() {
            if parse_agent_tool_name(&canonical[index]).is_none() {
                continue;
            }
            let semaphore = Arc::clone(&semaphore);
            let input = self.tool_input(ctx, call, &canonical[index]);
            let name = canonical[index].clone();
            agent_slots.push(index);
            agent_futures.push(async move {
                let _permit = semaphore
                    .acquire()
                    .await
                    .expect("semaphore is never closed");
                self.execute_child_call(name, input).await
            });
        }

        let agent_results = join_all(agent_futures).await;
        let mut by_index: HashMap<usize, ToolOutcome> = agent_slots
            .into_iter()
            .zip(agent_results)
            .collect();

        let mut outcomes = Vec::with_capacity(calls.len());
        for (index, call) in calls.iter().enumerate() {
            if let Some(outcome) = by_index.remove(&index) {
                outcomes.push(ToolOutcome {
                    call: call.clone(),
                    ..outcome
                });
                continue;
            }

            // Non-agent tools run sequentially, in request order.
            let input = self.tool_input(ctx, call, &canonical[index]);
            let output = self.activities.execute_tool(input).await;
            let content = tool_output_text(&output.output);
            outcomes.push(ToolOutcome {
                call: call.clone(),
                canonical_name: canonical[index].clone(),
                success: output.success,
                content,
                error: output.error,
                child_confidence: None,
            });
        }
        outcomes
    }

    async fn execute_child_call(&self, canonical_name: String, input: ToolExecutionInput) -> ToolOutcome {
        let agent_id = parse_agent_tool_name(&canonical_name)
            .expect("caller filtered agent calls")
            .to_string();

        if self.breaker.is_open(&agent_id) {
            log::warn!(
                "agent_circuit_open agent_id={} status={}",
                agent_id,
                self.breaker.status(&agent_id)
            );
            return ToolOutcome {
                call: ToolCall {
                    id: String::new(),
                    name: String::new(),
                    arguments: serde_json::Value::Null,
                },
                canonical_name,
                success: false,
                content: String::new(),
                error: Some(format!(
                    "Agent {} is temporarily unavailable (circuit open after failures)",
                    agent_id
                )),
                child_confidence: None,
            };
        }

        let output = self.activities.execute_tool(input).await;

        if output.success {
            self.breaker.record_success(&agent_id);
        } else {
            self.breaker.record_failure(&agent_id);
            log::warn!(
                "agent_execution_failed agent_id={} error={:?} circuit_status={}",
                agent_id,
                output.error,
                self.breaker.status(&agent_id)
            );
        }

        ToolOutcome {
            call: ToolCall {
                id: String::new(),
                name: String::new(),
                arguments: serde_json::Value::Null,
            },
            canonical_name,
            success: output.success,
            content: tool_output_text(&output.output),
            error: output.error,
            child_confidence: output.child_confidence,
        }
    }

    // -- llm-driven mode -----------------------------------------------------

    async fn run_llm_driven(&self, ctx: &InvocationContext) -> Result<AgentResponse, AgentError> {
        let llm = self
            .config
            .llm
            .as_ref()
            .ok_or_else(|| AgentError::ConfigInvalid("orchestrator requires an llm binding".into()))?;

        let mut messages = vec![ChatMessage::text(
            ChatRole::System,
            self.orchestration_system_prompt(),
        )];
        for msg in &ctx.conversation_history {
            messages.push(ChatMessage::text(ChatRole::parse(&msg.role), &msg.content));
        }
        messages.push(ChatMessage::text(ChatRole::User, &ctx.user_input));

        let non_agent_tools: Vec<String> = self
            .config
            .enabled_tools()
            .into_iter()
            .filter(|t| parse_agent_tool_name(t).is_none())
            .collect();

        let mut all_tool_calls: Vec<ToolCallRecord> = Vec::new();
        let mut child_confidences: Vec<f64> = Vec::new();
        let mut child_failures = 0usize;
        let mut streak: (Option<String>, u32) = (None, 0);
        let mut iterations = 0u32;

        while iterations < self.binding.max_iterations {
            iterations += 1;

            // Loop suppression: a child called too many times in a row is
            // withheld from the next schema set.
            let suppressed = match &streak {
                (Some(name), count) if *count >= self.binding.max_same_agent_calls => {
                    Some(name.clone())
                }
                _ => None,
            };

            let mut definitions = self.agent_tool_definitions(suppressed.as_deref()).await;
            definitions.extend(self.activities.get_tool_definitions(&non_agent_tools).await);
            let (schemas, _) = build_tool_schemas(&definitions);

            let options = CompletionOptions {
                tools: if schemas.is_empty() { None } else { Some(schemas) },
                ..Default::default()
            };
            let response = self.activities.llm_completion(llm, &messages, &options).await?;

            if response.tool_calls.is_empty() {
                let signals = ConfidenceSignals {
                    finish_reason: Some(response.finish_reason.clone()),
                    response_length: response.content.len(),
                    has_uncertainty_language: confidence::detect_uncertainty(&response.content),
                    is_refusal: confidence::detect_refusal(&response.content),
                    tool_calls_total: all_tool_calls.len(),
                    tool_calls_succeeded: all_tool_calls.iter().filter(|t| t.success).count(),
                    tool_calls_failed: all_tool_calls.iter().filter(|t| !t.success).count(),
                    iterations_used: iterations,
                    child_confidences: child_confidences.clone(),
                    child_failures,
                    ..Default::default()
                };

                let mut metadata = HashMap::new();
                metadata.insert("model".to_string(), serde_json::json!(response.model));
                metadata.insert("iterations".to_string(), serde_json::json!(iterations));
                metadata.insert("mode".to_string(), serde_json::json!("llm_driven"));
                metadata.insert(
                    "child_confidences".to_string(),
                    serde_json::json!(child_confidences),
                );

                return Ok(AgentResponse {
                    content: response.content,
                    confidence: confidence::calculate(&signals),
                    sources: Vec::new(),
                    tool_calls_made: all_tool_calls,
                    needs_confirmation: false,
                    route_to_agent: None,
                    metadata,
                });
            }

            messages.push(ChatMessage::assistant_with_calls(
                response.content.clone(),
                response.tool_calls.clone(),
            ));

            let outcomes = self.execute_tool_calls(ctx, &response.tool_calls).await;

            for outcome in &outcomes {
                all_tool_calls.push(ToolCallRecord {
                    tool: outcome.canonical_name.clone(),
                    arguments: outcome.call.arguments.clone(),
                    success: outcome.success,
                    error: outcome.error.clone(),
                });

                if parse_agent_tool_name(&outcome.canonical_name).is_some() {
                    if outcome.success {
                        child_confidences.push(outcome.child_confidence.unwrap_or(0.85));
                    } else {
                        child_failures += 1;
                    }

                    // Track consecutive calls to the same child.
                    let same_child = streak.0.as_deref() == Some(outcome.canonical_name.as_str());
                    if same_child {
                        streak.1 += 1;
                    } else {
                        streak = (Some(outcome.canonical_name.clone()), 1);
                    }
                } else {
                    streak = (None, 0);
                }

                let payload = serde_json::json!({
                    "success": outcome.success,
                    "content": outcome.content,
                    "error": outcome.error,
                });
                messages.push(ChatMessage::tool_result(
                    outcome.call.id.clone(),
                    payload.to_string(),
                ));
            }
        }

        // Cap reached.
        let signals = ConfidenceSignals {
            tool_calls_total: all_tool_calls.len(),
            tool_calls_succeeded: all_tool_calls.iter().filter(|t| t.success).count(),
            tool_calls_failed: all_tool_calls.iter().filter(|t| !t.success).count(),
            iterations_used: iterations,
            max_iterations_reached: true,
            child_confidences: child_confidences.clone(),
            child_failures,
            ..Default::default()
        };

        let mut metadata = HashMap::new();
        metadata.insert("iterations".to_string(), serde_json::json!(iterations));
        metadata.insert("mode".to_string(), serde_json::json!("llm_driven"));
        metadata.insert("max_iterations_reached".to_string(), serde_json::json!(true));

        Ok(AgentResponse {
            content: "Maximum orchestration iterations reached.".to_string(),
            confidence: confidence::calculate(&signals),
            sources: Vec::new(),
            tool_calls_made: all_tool_calls,
            needs_confirmation: false,
            route_to_agent: None,
            metadata,
        })
    }

    // -- workflow mode -------------------------------------------------------

    async fn run_workflow(&self, ctx: &InvocationContext) -> Result<AgentResponse, AgentError> {
        let definition = self
            .binding
            .workflow_definition
            .clone()
            .ok_or_else(|| AgentError::ConfigInvalid("workflow mode requires a workflow_definition".into()))?;
        let graph: WorkflowGraph = serde_json::from_value(definition)
            .map_err(|e| AgentError::ConfigInvalid(format!("invalid workflow definition: {}", e)))?;

        let steps: HashMap<&str, &WorkflowStep> =
            graph.steps.iter().map(|s| (s.id(), s)).collect();

        let mut step_outputs: HashMap<String, String> = HashMap::new();
        let mut child_confidences: Vec<f64> = Vec::new();
        let mut child_failures = 0usize;
        let mut executed_steps: Vec<String> = Vec::new();
        let mut last_output = String::new();
        let mut current = Some(graph.entry_step.clone());

        // A linear walk over the graph; a malformed graph that cycles is
        // bounded by a generous step budget.
        let mut step_budget = 100u32;

        while let Some(step_id) = current {
            if step_budget == 0 {
                return Err(AgentError::MaxIterations(100));
            }
            step_budget -= 1;

            let Some(step) = steps.get(step_id.as_str()) else {
                return Err(AgentError::ConfigInvalid(format!(
                    "workflow step not found: {}",
                    step_id
                )));
            };
            executed_steps.push(step_id.clone());

            match step {
                WorkflowStep::Agent {
                    id,
                    agent_id,
                    input,
                    next,
                } => {
                    let query = render_template(
                        input.as_deref().unwrap_or("${user_input}"),
                        ctx,
                        &step_outputs,
                    );
                    let result = self.invoke_child(ctx, agent_id, &query).await;
                    match &result {
                        Ok((content, conf)) => {
                            child_confidences.push(*conf);
                            step_outputs.insert(id.clone(), content.clone());
                            last_output = content.clone();
                        }
                        Err(e) => {
                            child_failures += 1;
                            step_outputs.insert(id.clone(), String::new());
                            last_output = format!("Step {} failed: {}", id, e);
                        }
                    }
                    current = next.clone();
                }
                WorkflowStep::Parallel {
                    id,
                    branches,
                    aggregation,
                    next,
                } => {
                    let semaphore = Arc::new(Semaphore::new(self.binding.max_parallel.max(1)));
                    let futures = branches.iter().map(|branch| {
                        let semaphore = Arc::clone(&semaphore);
                        let query = render_template(
                            branch.input.as_deref().unwrap_or("${user_input}"),
                            ctx,
                            &step_outputs,
                        );
                        async move {
                            let _permit = semaphore
                                .acquire()
                                .await
                                .expect("semaphore is never closed");
                            let result = self.invoke_child(ctx, &branch.agent_id, &query).await;
                            (branch.agent_id.clone(), result)
                        }
                    });

                    let branch_results = join_all(futures).await;
                    let mut results = Vec::new();
                    for (agent_id, result) in branch_results {
                        match result {
                            Ok((content, conf)) => {
                                child_confidences.push(conf);
                                results.push(ChildResult::ok(agent_id, content));
                            }
                            Err(e) => {
                                child_failures += 1;
                                results.push(ChildResult::failed(agent_id, e.to_string()));
                            }
                        }
                    }

                    let strategy = aggregation.unwrap_or(self.binding.default_aggregation);
                    let aggregated = aggregators::aggregate(strategy, &results, None).await;
                    step_outputs.insert(id.clone(), aggregated.clone());
                    last_output = aggregated;
                    current = next.clone();
                }
                WorkflowStep::Conditional {
                    condition,
                    if_true,
                    if_false,
                    ..
                } => {
                    current = if evaluate_condition(condition, ctx, &step_outputs) {
                        if_true.clone()
                    } else {
                        if_false.clone()
                    };
                }
                WorkflowStep::Loop {
                    id,
                    agent_id,
                    input,
                    max_iterations,
                    exit_condition,
                    next,
                } => {
                    for _ in 0..*max_iterations {
                        let query = render_template(
                            input.as_deref().unwrap_or("${user_input}"),
                            ctx,
                            &step_outputs,
                        );
                        match self.invoke_child(ctx, agent_id, &query).await {
                            Ok((content, conf)) => {
                                child_confidences.push(conf);
                                step_outputs.insert(id.clone(), content.clone());
                                last_output = content;
                            }
                            Err(e) => {
                                child_failures += 1;
                                last_output = format!("Loop step {} failed: {}", id, e);
                                break;
                            }
                        }

                        if let Some(exit) = exit_condition {
                            if evaluate_condition(exit, ctx, &step_outputs) {
                                break;
                            }
                        }
                    }
                    current = next.clone();
                }
            }
        }

        let signals = ConfidenceSignals {
            response_length: last_output.len(),
            iterations_used: executed_steps.len() as u32,
            child_confidences: child_confidences.clone(),
            child_failures,
            ..Default::default()
        };

        let mut metadata = HashMap::new();
        metadata.insert("mode".to_string(), serde_json::json!("workflow"));
        metadata.insert("executed_steps".to_string(), serde_json::json!(executed_steps));
        metadata.insert(
            "child_confidences".to_string(),
            serde_json::json!(child_confidences),
        );

        Ok(AgentResponse {
            content: last_output,
            confidence: confidence::calculate(&signals),
            sources: Vec::new(),
            tool_calls_made: Vec::new(),
            needs_confirmation: false,
            route_to_agent: None,
            metadata,
        })
    }

    async fn invoke_child(
        &self,
        ctx: &InvocationContext,
        agent_id: &str,
        query: &str,
    ) -> Result<(String, f64), AgentError> {
        if self.breaker.is_open(agent_id) {
            return Err(AgentError::ChildAgentUnavailable {
                agent_id: agent_id.to_string(),
                reason: "circuit open after failures".to_string(),
            });
        }

        let input = ToolExecutionInput {
            tool_name: format!("{}{}", AGENT_TOOL_PREFIX, agent_id),
            arguments: serde_json::json!({"query": query}),
            user_id: ctx.user_id.clone(),
            session_id: ctx.session_id.clone(),
            conversation_history: ctx.conversation_history.clone(),
            request_id: ctx.request_id.clone(),
            workflow_id: ctx.workflow_id.clone(),
            timeout_seconds: None,
            current_depth: self.depth,
            max_depth: self.binding.max_depth,
        };

        let result = self
            .activities
            .execute_agent_as_tool(agent_id, query, "", &input)
            .await;

        match &result {
            Ok(_) => self.breaker.record_success(agent_id),
            Err(_) => self.breaker.record_failure(agent_id),
        }
        result
    }

    // -- hybrid mode ---------------------------------------------------------

    fn rule_matches(rule: &RoutingRule, input: &str, case_sensitive: bool) -> bool {
        let (haystack, needle) = if case_sensitive {
            (input.to_string(), rule.pattern.clone())
        } else {
            (input.to_lowercase(), rule.pattern.to_lowercase())
        };

        match rule.condition {
            RoutingCondition::Contains => haystack.contains(&needle),
            RoutingCondition::StartsWith => haystack.starts_with(&needle),
            RoutingCondition::EndsWith => haystack.ends_with(&needle),
            RoutingCondition::Exact => haystack == needle,
            RoutingCondition::Regex => {
                let pattern = if case_sensitive {
                    rule.pattern.clone()
                } else {
                    format!("(?i){}", rule.pattern)
                };
                match regex::Regex::new(&pattern) {
                    Ok(re) => re.is_match(input),
                    Err(e) => {
                        log::warn!("invalid routing regex '{}': {}", rule.pattern, e);
                        false
                    }
                }
            }
        }
    }

    async fn run_hybrid(&self, ctx: &InvocationContext) -> Result<AgentResponse, AgentError> {
        let rules = self.binding.routing_rules.clone().unwrap_or_default();

        for rule in rules.sorted_rules() {
            if Self::rule_matches(rule, &ctx.user_input, rules.case_sensitive) {
                log::info!(
                    "routing_rule_matched rule={} target={}",
                    rule.id,
                    rule.target_agent
                );
                return self.direct_invoke(ctx, &rule.target_agent, Some(&rule.id)).await;
            }
        }

        if rules.fallback_to_llm {
            return self.run_llm_driven(ctx).await;
        }

        if let Some(default_agent) = &rules.default_agent {
            return self.direct_invoke(ctx, default_agent, None).await;
        }

        Err(AgentError::ConfigInvalid(
            "hybrid orchestration: no routing rule matched and no fallback configured".to_string(),
        ))
    }

    async fn direct_invoke(
        &self,
        ctx: &InvocationContext,
        agent_id: &str,
        matched_rule: Option<&str>,
    ) -> Result<AgentResponse, AgentError> {
        match self.invoke_child(ctx, agent_id, &ctx.user_input).await {
            Ok((content, child_confidence)) => {
                let mut metadata = HashMap::new();
                metadata.insert("mode".to_string(), serde_json::json!("hybrid"));
                metadata.insert("target_agent".to_string(), serde_json::json!(agent_id));
                if let Some(rule) = matched_rule {
                    metadata.insert("matched_rule".to_string(), serde_json::json!(rule));
                }

                let signals = ConfidenceSignals {
                    response_length: content.len(),
                    child_confidences: vec![child_confidence],
                    ..Default::default()
                };

                Ok(AgentResponse {
                    content,
                    confidence: confidence::calculate(&signals),
                    sources: Vec::new(),
                    tool_calls_made: Vec::new(),
                    needs_confirmation: false,
                    route_to_agent: Some(agent_id.to_string()),
                    metadata,
                })
            }
            Err(e) => {
                let mut metadata = HashMap::new();
                metadata.insert("mode".to_string(), serde_json::json!("hybrid"));
                metadata.insert("target_agent".to_string(), serde_json::json!(agent_id));
                metadata.insert("error".to_string(), serde_json::json!(e.to_string()));

                Ok(AgentResponse {
                    content: format!("Agent {} failed: {}", agent_id, e),
                    confidence: 0.0,
                    sources: Vec::new(),
                    tool_calls_made: Vec::new(),
                    needs_confirmation: false,
                    route_to_agent: Some(agent_id.to_string()),
                    metadata,
                })
            }
        }
    }
}

fn tool_output_text(output: &serde_json::Value) -> String {
    match output {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Null => String::new(),
        other => other.to_string(),
    }
}

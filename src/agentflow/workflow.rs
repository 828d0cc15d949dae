//! The agent control loop.
//!
//! [`AgentWorkflow`] drives one invocation to completion: it validates the
//! configuration snapshot, picks the lane for the agent kind, and runs the
//! cross-cutting hooks (input safety gate, input sanitizer, external
//! tool-result scrubbing, loop/hallucination validators, output safety
//! gate) in a fixed order around the lane.
//!
//! The loop is deterministic given configuration + inputs + activity
//! results: all I/O, clock reads and randomness live inside
//! [`Activities`]; replaying the same activity outcomes replays the same
//! response.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use agentflow::activities::Activities;
//! use agentflow::config::{AgentConfig, AgentKind, InvocationContext};
//! use agentflow::knowledge::StaticKnowledgeBase;
//! use agentflow::mcp::McpManager;
//! use agentflow::storage::FileAgentRepository;
//! use agentflow::tool_protocol::ToolRegistry;
//! use agentflow::workflow::AgentWorkflow;
//!
//! # async {
//! let registry = ToolRegistry::shared();
//! let activities = Arc::new(Activities::new(
//!     registry.clone(),
//!     Arc::new(McpManager::new(registry)),
//!     Arc::new(StaticKnowledgeBase::new()),
//!     Arc::new(FileAgentRepository::new("agents")?),
//! ));
//!
//! let workflow = AgentWorkflow::new(activities);
//! let config = AgentConfig::new("greeter", "Greeter", AgentKind::Simple)
//!     .with_example("hello", "hi there");
//! let ctx = InvocationContext {
//!     user_input: "hello".into(),
//!     ..Default::default()
//! };
//! let response = workflow.execute(&config, &ctx).await?;
//! println!("{} ({:.2})", response.content, response.confidence);
//! # Ok::<(), Box<dyn std::error::Error + Send + Sync>>(())
//! # };
//! ```

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::agentflow::activities::{validate_config, Activities, ToolExecutionInput};
use crate::agentflow::config::{
    AgentConfig, AgentKind, AgentResponse, InvocationContext, ToolCallRecord,
};
use crate::agentflow::confidence::{self, ConfidenceSignals};
use crate::agentflow::error::AgentError;
use crate::agentflow::knowledge::RetrievedDocument;
use crate::agentflow::llm::{ChatMessage, ChatRole, CompletionOptions, ToolChoice};
use crate::agentflow::orchestrator::OrchestratorRunner;
use crate::agentflow::safety::SafetyCheckInput;
use crate::agentflow::tool_protocol::{build_tool_schemas, unsanitize_tool_name};
use crate::agentflow::validators::{
    ActionValidatorInput, HallucinationCheckerInput, LoopDetectorInput,
};

/// Iteration cap for the tool loop (tool and full lanes).
pub const MAX_TOOL_ITERATIONS: u32 = 10;

/// Content returned when a safety gate trips.
pub const SAFETY_REFUSAL: &str =
    "I can't help with that request because it violates the configured safety policy.";

/// Drives one agent invocation to completion.
pub struct AgentWorkflow {
    activities: Arc<Activities>,
}

impl AgentWorkflow {
    pub fn new(activities: Arc<Activities>) -> Self {
        Self { activities }
    }

    /// Run one invocation at nesting depth 0.
    pub async fn execute(
        &self,
        config: &AgentConfig,
        ctx: &InvocationContext,
    ) -> Result<AgentResponse, AgentError> {
        self.execute_at_depth(config, ctx, 0).await
    }

    /// Run one invocation at the given child-nesting depth. The soft
    /// per-invocation deadline comes from the safety binding; on breach a
    /// partial response with a heavy confidence penalty is returned.
    pub async fn execute_at_depth(
        &self,
        config: &AgentConfig,
        ctx: &InvocationContext,
        depth: u32,
    ) -> Result<AgentResponse, AgentError> {
        validate_config(config)?;
        if !config.is_active {
            return Err(AgentError::ConfigInvalid(format!(
                "agent {} is not active",
                config.id
            )));
        }

        let deadline = Duration::from_secs(config.safety.timeout_seconds.max(1));
        match tokio::time::timeout(deadline, self.run_gated(config, ctx, depth)).await {
            Ok(result) => result,
            Err(_) => {
                log::warn!(
                    "invocation timed out agent={} after {}s",
                    config.id,
                    deadline.as_secs()
                );
                let mut metadata = HashMap::new();
                metadata.insert("timeout".to_string(), serde_json::json!(true));
                Ok(AgentResponse {
                    content: "The request could not be completed within the time limit."
                        .to_string(),
                    confidence: 0.2,
                    sources: Vec::new(),
                    tool_calls_made: Vec::new(),
                    needs_confirmation: false,
                    route_to_agent: None,
                    metadata,
                })
            }
        }
    }

    async fn run_gated(
        &self,
        config: &AgentConfig,
        ctx: &InvocationContext,
        depth: u32,
    ) -> Result<AgentResponse, AgentError> {
        // Input safety gate. A violation means no LLM call is ever issued.
        let input_check = self.activities.check_input_safety(&SafetyCheckInput {
            content: ctx.user_input.clone(),
            level: config.safety.level,
            blocked_topics: config.safety.blocked_topics.clone(),
            blocked_patterns: config.safety.blocked_patterns.clone(),
        });
        if !input_check.is_safe {
            log::warn!(
                "input safety violation agent={} violations={:?}",
                config.id,
                input_check.violations
            );
            let mut metadata = HashMap::new();
            metadata.insert("safety_violation".to_string(), serde_json::json!("input"));
            metadata.insert(
                "violations".to_string(),
                serde_json::json!(input_check.violations),
            );
            return Ok(AgentResponse {
                content: SAFETY_REFUSAL.to_string(),
                confidence: confidence::calculate(&ConfidenceSignals {
                    is_refusal: true,
                    response_length: SAFETY_REFUSAL.len(),
                    finish_reason: Some("stop".to_string()),
                    ..Default::default()
                }),
                sources: Vec::new(),
                tool_calls_made: Vec::new(),
                needs_confirmation: false,
                route_to_agent: None,
                metadata,
            });
        }

        // Prompt-injection sanitizer ahead of the first LLM step; a
        // rewrite replaces the input for the rest of the run. Validator
        // breakage never blocks the invocation.
        let mut ctx = ctx.clone();
        if lane_uses_llm(config.kind) {
            match self.activities.sanitize_input(&ctx.user_input).await {
                Ok(sanitized) => {
                    if sanitized.is_suspicious {
                        log::warn!(
                            "input sanitizer flagged signals={:?}",
                            sanitized.detected_signals
                        );
                    }
                    ctx.user_input = sanitized.sanitized_input;
                }
                Err(e) => log::warn!("input sanitizer unavailable: {}", e),
            }
        }

        let mut response = match config.kind {
            AgentKind::Simple => self.run_simple(config, &ctx),
            AgentKind::Llm => self.run_llm(config, &ctx).await?,
            AgentKind::Rag => self.run_rag(config, &ctx).await?,
            AgentKind::Tool => self.run_tool_loop(config, &ctx, depth, false).await?,
            AgentKind::Full => self.run_tool_loop(config, &ctx, depth, true).await?,
            AgentKind::Router => self.run_router(config, &ctx).await?,
            AgentKind::Orchestrator => {
                OrchestratorRunner::new(Arc::clone(&self.activities), config, depth)?
                    .run(&ctx)
                    .await?
            }
        };

        // Post-content validators, each at most once per final content.
        if lane_uses_llm(config.kind) {
            self.apply_loop_detector(&ctx, &mut response).await;
            if config.safety.hallucination_check {
                self.apply_hallucination_check(&ctx, &mut response).await;
            }
        }

        // Output safety gate last: violating content is never returned.
        let output_check = self.activities.check_output_safety(&SafetyCheckInput {
            content: response.content.clone(),
            level: config.safety.level,
            blocked_topics: config.safety.blocked_topics.clone(),
            blocked_patterns: config.safety.blocked_patterns.clone(),
        });
        if !output_check.is_safe {
            log::warn!(
                "output safety violation agent={} violations={:?}",
                config.id,
                output_check.violations
            );
            response.metadata.insert(
                "safety_violation".to_string(),
                serde_json::json!("output"),
            );
            response.metadata.insert(
                "violations".to_string(),
                serde_json::json!(output_check.violations),
            );
            response.content = SAFETY_REFUSAL.to_string();
            response.confidence = (response.confidence * 0.5).clamp(0.0, 1.0);
        }

        Ok(response)
    }

    async fn apply_loop_detector(&self, ctx: &InvocationContext, response: &mut AgentResponse) {
        if ctx.conversation_history.is_empty() {
            return;
        }
        let input = LoopDetectorInput {
            conversation_history: ctx
                .conversation_history
                .iter()
                .map(|m| (m.role.clone(), m.content.clone()))
                .collect(),
            current_response: response.content.clone(),
        };
        match self.activities.detect_loop(&input).await {
            Ok(verdict) if verdict.is_loop => {
                log::info!("loop detected: {}", verdict.reason);
                response.metadata.insert(
                    "loop_detected".to_string(),
                    serde_json::json!(verdict.reason),
                );
                if let Some(previous) = verdict.already_answered_with {
                    response.content =
                        format!("As mentioned earlier: {}", previous);
                }
            }
            Ok(_) => {}
            Err(e) => log::warn!("loop detector unavailable: {}", e),
        }
    }

    async fn apply_hallucination_check(
        &self,
        ctx: &InvocationContext,
        response: &mut AgentResponse,
    ) {
        let retrieved_context = response
            .metadata
            .get("retrieved_context")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string());
        let tool_results: Vec<(String, serde_json::Value)> = response
            .tool_calls_made
            .iter()
            .map(|record| {
                (
                    record.tool.clone(),
                    serde_json::json!({"success": record.success, "error": record.error}),
                )
            })
            .collect();

        if retrieved_context.is_none() && tool_results.is_empty() {
            return;
        }

        let input = HallucinationCheckerInput {
            agent_response: response.content.clone(),
            retrieved_context,
            tool_results,
            user_query: Some(ctx.user_input.clone()),
        };
        match self.activities.check_hallucination(&input).await {
            Ok(verdict) if !verdict.is_grounded => {
                log::warn!(
                    "ungrounded claims detected: {:?}",
                    verdict.ungrounded_claims
                );
                response.metadata.insert(
                    "ungrounded_claims".to_string(),
                    serde_json::json!(verdict.ungrounded_claims),
                );
                if let Some(fix) = verdict.suggested_fix {
                    response.content = fix;
                    response
                        .metadata
                        .insert("hallucination_corrected".to_string(), serde_json::json!(true));
                }
            }
            Ok(_) => {}
            Err(e) => log::warn!("hallucination checker unavailable: {}", e),
        }
    }

    // -- simple lane ---------------------------------------------------------

    fn run_simple(&self, config: &AgentConfig, ctx: &InvocationContext) -> AgentResponse {
        let output = self.activities.execute_simple_agent(config, &ctx.user_input);
        let mut metadata = HashMap::new();
        metadata.insert(
            "match_type".to_string(),
            serde_json::json!(output.match_type),
        );
        AgentResponse {
            content: output.content,
            confidence: output.confidence,
            sources: Vec::new(),
            tool_calls_made: Vec::new(),
            needs_confirmation: false,
            route_to_agent: None,
            metadata,
        }
    }

    // -- llm lane ------------------------------------------------------------

    fn base_messages(&self, system_prompt: String, ctx: &InvocationContext) -> Vec<ChatMessage> {
        let mut messages = vec![ChatMessage::text(ChatRole::System, system_prompt)];
        for msg in &ctx.conversation_history {
            messages.push(ChatMessage::text(ChatRole::parse(&msg.role), &msg.content));
        }
        messages.push(ChatMessage::text(ChatRole::User, &ctx.user_input));
        messages
    }

    async fn run_llm(
        &self,
        config: &AgentConfig,
        ctx: &InvocationContext,
    ) -> Result<AgentResponse, AgentError> {
        let llm = config.llm.as_ref().expect("validated: llm lane has a binding");
        let messages = self.base_messages(config.build_system_prompt(), ctx);
        let response = self
            .activities
            .llm_completion(llm, &messages, &CompletionOptions::default())
            .await?;

        let signals = ConfidenceSignals::from_response(&response.content, &response.finish_reason);

        let mut metadata = HashMap::new();
        metadata.insert("model".to_string(), serde_json::json!(response.model));
        metadata.insert(
            "finish_reason".to_string(),
            serde_json::json!(response.finish_reason),
        );
        metadata.insert(
            "total_tokens".to_string(),
            serde_json::json!(response.usage.total_tokens),
        );

        Ok(AgentResponse {
            content: response.content,
            confidence: confidence::calculate(&signals),
            sources: Vec::new(),
            tool_calls_made: Vec::new(),
            needs_confirmation: false,
            route_to_agent: None,
            metadata,
        })
    }

    // -- rag lane ------------------------------------------------------------

    fn context_block(documents: &[RetrievedDocument]) -> String {
        documents
            .iter()
            .enumerate()
            .map(|(i, doc)| format!("[Document {}]\n{}", i + 1, doc.content))
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    fn retrieval_signals(documents: &[RetrievedDocument], signals: &mut ConfidenceSignals) {
        signals.documents_retrieved = documents.len();
        if !documents.is_empty() {
            signals.avg_relevance_score =
                documents.iter().map(|d| d.score).sum::<f64>() / documents.len() as f64;
            signals.min_relevance_score = documents
                .iter()
                .map(|d| d.score)
                .fold(f64::INFINITY, f64::min);
        }
    }

    async fn run_rag(
        &self,
        config: &AgentConfig,
        ctx: &InvocationContext,
    ) -> Result<AgentResponse, AgentError> {
        let llm = config.llm.as_ref().expect("validated: rag lane has a binding");
        let knowledge = config
            .knowledge
            .as_ref()
            .expect("validated: rag lane has a knowledge binding");

        let retrieval = self
            .activities
            .retrieve_knowledge(knowledge, &ctx.user_input)
            .await?;

        let mut system_prompt = config.build_system_prompt();
        if !retrieval.documents.is_empty() {
            system_prompt.push_str(&format!(
                "\n\n## RETRIEVED CONTEXT\n{}",
                Self::context_block(&retrieval.documents)
            ));
        }

        let messages = self.base_messages(system_prompt, ctx);
        let response = self
            .activities
            .llm_completion(llm, &messages, &CompletionOptions::default())
            .await?;

        let mut signals =
            ConfidenceSignals::from_response(&response.content, &response.finish_reason);
        Self::retrieval_signals(&retrieval.documents, &mut signals);

        let mut metadata = HashMap::new();
        metadata.insert("model".to_string(), serde_json::json!(response.model));
        metadata.insert(
            "retrieved_count".to_string(),
            serde_json::json!(retrieval.documents.len()),
        );
        metadata.insert(
            "retrieval_scores".to_string(),
            serde_json::json!(retrieval
                .documents
                .iter()
                .map(|d| d.score)
                .collect::<Vec<_>>()),
        );
        if !retrieval.documents.is_empty() {
            metadata.insert(
                "retrieved_context".to_string(),
                serde_json::json!(Self::context_block(&retrieval.documents)),
            );
        }

        let sources = retrieval
            .documents
            .iter()
            .filter_map(|d| {
                d.metadata
                    .get("source")
                    .and_then(|s| s.as_str())
                    .map(|s| s.to_string())
            })
            .collect();

        Ok(AgentResponse {
            content: response.content,
            confidence: confidence::calculate(&signals),
            sources,
            tool_calls_made: Vec::new(),
            needs_confirmation: false,
            route_to_agent: None,
            metadata,
        })
    }

    // -- tool / full lanes -----------------------------------------------------

    async fn run_tool_loop(
        &self,
        config: &AgentConfig,
        ctx: &InvocationContext,
        depth: u32,
        with_retrieval: bool,
    ) -> Result<AgentResponse, AgentError> {
        let llm = config.llm.as_ref().expect("validated: tool lane has a binding");

        let mut retrieval_docs: Vec<RetrievedDocument> = Vec::new();
        let mut system_prompt = config.build_system_prompt();
        if with_retrieval {
            let knowledge = config
                .knowledge
                .as_ref()
                .expect("validated: full lane has a knowledge binding");
            let retrieval = self
                .activities
                .retrieve_knowledge(knowledge, &ctx.user_input)
                .await?;
            if !retrieval.documents.is_empty() {
                system_prompt.push_str(&format!(
                    "\n\n## RETRIEVED CONTEXT\n{}",
                    Self::context_block(&retrieval.documents)
                ));
            }
            retrieval_docs = retrieval.documents;
        }

        let enabled_tools = config.enabled_tools();
        let timeout_by_tool: HashMap<String, u64> = config
            .tools
            .iter()
            .map(|t| (t.tool_id.clone(), t.timeout_seconds))
            .collect();
        let confirmation_tools: Vec<&str> = config
            .tools
            .iter()
            .filter(|t| t.requires_confirmation)
            .map(|t| t.tool_id.as_str())
            .chain(
                config
                    .governance
                    .require_confirmation_for
                    .iter()
                    .map(|t| t.as_str()),
            )
            .collect();
        let definitions = self.activities.get_tool_definitions(&enabled_tools).await;
        let (schemas, _) = build_tool_schemas(&definitions);
        let tool_descriptions: Vec<(String, String)> = definitions
            .iter()
            .map(|d| (d.name.clone(), d.description.clone()))
            .collect();

        let mut messages = self.base_messages(system_prompt, ctx);
        let mut tool_calls_made: Vec<ToolCallRecord> = Vec::new();
        let mut iterations = 0u32;
        let mut forced_tool: Option<String> = None;
        let mut action_validated = false;
        let mut last_model = String::new();
        let mut total_tokens = 0u64;

        while iterations < MAX_TOOL_ITERATIONS {
            iterations += 1;

            let options = CompletionOptions {
                tools: if schemas.is_empty() {
                    None
                } else {
                    Some(schemas.clone())
                },
                tool_choice: match forced_tool.take() {
                    Some(name) => ToolChoice::Tool(name),
                    None => ToolChoice::Auto,
                },
                ..Default::default()
            };

            let response = self.activities.llm_completion(llm, &messages, &options).await?;
            last_model = response.model.clone();
            total_tokens += response.usage.total_tokens;

            if response.tool_calls.is_empty() {
                // The action validator may force one tool-directed retry
                // when the agent claims work it never performed.
                if !action_validated && tool_calls_made.is_empty() && !tool_descriptions.is_empty()
                {
                    action_validated = true;
                    let verdict = self
                        .activities
                        .validate_action(&ActionValidatorInput {
                            agent_description: config.description.clone(),
                            available_tools: tool_descriptions.clone(),
                            user_input: ctx.user_input.clone(),
                            agent_response: response.content.clone(),
                            tool_calls_made: Vec::new(),
                        })
                        .await;
                    match verdict {
                        Ok(v) if v.should_retry_with_tool && iterations < MAX_TOOL_ITERATIONS => {
                            if let Some(tool) = v.suggested_tool {
                                log::info!(
                                    "action validator forcing retry with tool {}: {}",
                                    tool,
                                    v.reason
                                );
                                forced_tool = Some(
                                    crate::agentflow::tool_protocol::sanitize_tool_name(&tool),
                                );
                                continue;
                            }
                        }
                        Ok(_) => {}
                        Err(e) => log::warn!("action validator unavailable: {}", e),
                    }
                }

                let mut signals =
                    ConfidenceSignals::from_response(&response.content, &response.finish_reason);
                signals.iterations_used = iterations;
                signals.tool_calls_total = tool_calls_made.len();
                signals.tool_calls_succeeded =
                    tool_calls_made.iter().filter(|t| t.success).count();
                signals.tool_calls_failed =
                    tool_calls_made.iter().filter(|t| !t.success).count();
                Self::retrieval_signals(&retrieval_docs, &mut signals);

                let mut metadata = HashMap::new();
                metadata.insert("model".to_string(), serde_json::json!(response.model));
                metadata.insert("iterations".to_string(), serde_json::json!(iterations));
                metadata.insert("total_tokens".to_string(), serde_json::json!(total_tokens));
                if !retrieval_docs.is_empty() {
                    metadata.insert(
                        "retrieved_count".to_string(),
                        serde_json::json!(retrieval_docs.len()),
                    );
                    metadata.insert(
                        "retrieved_context".to_string(),
                        serde_json::json!(Self::context_block(&retrieval_docs)),
                    );
                }

                let needs_confirmation = tool_calls_made
                    .iter()
                    .any(|t| confirmation_tools.contains(&t.tool.as_str()));

                return Ok(AgentResponse {
                    content: response.content,
                    confidence: confidence::calculate(&signals),
                    sources: Vec::new(),
                    tool_calls_made,
                    needs_confirmation,
                    route_to_agent: None,
                    metadata,
                });
            }

            // Assistant turn first, then tool results in call order.
            messages.push(ChatMessage::assistant_with_calls(
                response.content.clone(),
                response.tool_calls.clone(),
            ));

            for call in &response.tool_calls {
                let canonical = unsanitize_tool_name(&call.name);
                let output = self
                    .activities
                    .execute_tool(ToolExecutionInput {
                        tool_name: canonical.clone(),
                        arguments: call.arguments.clone(),
                        user_id: ctx.user_id.clone(),
                        session_id: ctx.session_id.clone(),
                        conversation_history: ctx.conversation_history.clone(),
                        request_id: ctx.request_id.clone(),
                        workflow_id: ctx.workflow_id.clone(),
                        timeout_seconds: timeout_by_tool.get(&canonical).copied(),
                        current_depth: depth,
                        max_depth: 3,
                    })
                    .await;

                tool_calls_made.push(ToolCallRecord {
                    tool: canonical.clone(),
                    arguments: call.arguments.clone(),
                    success: output.success,
                    error: output.error.clone(),
                });

                let mut result_text = serde_json::json!({
                    "success": output.success,
                    "output": output.output,
                    "error": output.error,
                })
                .to_string();

                // External tool output is data, never instructions.
                if self.activities.is_external_tool(&canonical) {
                    let (scrubbed, flagged) = self.activities.sanitize_tool_result(&result_text);
                    if flagged {
                        result_text = scrubbed;
                    }
                }

                messages.push(ChatMessage::tool_result(call.id.clone(), result_text));
            }
        }

        // Cap reached: sentinel response with the max-iterations penalty.
        let mut signals = ConfidenceSignals {
            iterations_used: iterations,
            max_iterations_reached: true,
            tool_calls_total: tool_calls_made.len(),
            tool_calls_succeeded: tool_calls_made.iter().filter(|t| t.success).count(),
            tool_calls_failed: tool_calls_made.iter().filter(|t| !t.success).count(),
            finish_reason: Some("stop".to_string()),
            response_length: 64,
            ..Default::default()
        };
        Self::retrieval_signals(&retrieval_docs, &mut signals);

        let mut metadata = HashMap::new();
        metadata.insert("model".to_string(), serde_json::json!(last_model));
        metadata.insert("iterations".to_string(), serde_json::json!(iterations));
        metadata.insert(
            "max_iterations_reached".to_string(),
            serde_json::json!(true),
        );

        let needs_confirmation = tool_calls_made
            .iter()
            .any(|t| confirmation_tools.contains(&t.tool.as_str()));

        Ok(AgentResponse {
            content: "I've reached the maximum number of tool operations for this request."
                .to_string(),
            confidence: confidence::calculate(&signals),
            sources: Vec::new(),
            tool_calls_made,
            needs_confirmation,
            route_to_agent: None,
            metadata,
        })
    }

    // -- router lane -----------------------------------------------------------

    async fn run_router(
        &self,
        config: &AgentConfig,
        ctx: &InvocationContext,
    ) -> Result<AgentResponse, AgentError> {
        let llm = config.llm.as_ref().expect("validated: router lane has a binding");
        let routing_table = config
            .routing_table
            .as_ref()
            .expect("validated: router lane has a routing table");

        // Deterministic category order for prompting and matching.
        let mut categories: Vec<&String> = routing_table
            .keys()
            .filter(|c| c.as_str() != "default")
            .collect();
        categories.sort();

        let rules: Vec<String> = categories
            .iter()
            .map(|c| format!("- {}: Route to {}", c, routing_table[c.as_str()]))
            .collect();

        let system_prompt = format!(
            "You are a routing classifier. Classify the user's input into exactly one category.\n\n\
             Available categories: {}\n\n\
             Rules:\n{}\n\n\
             Respond with ONLY the category name, nothing else.",
            categories
                .iter()
                .map(|c| c.as_str())
                .collect::<Vec<_>>()
                .join(", "),
            rules.join("\n")
        );

        let messages = vec![
            ChatMessage::text(ChatRole::System, system_prompt),
            ChatMessage::text(ChatRole::User, &ctx.user_input),
        ];
        let response = self
            .activities
            .llm_completion(llm, &messages, &CompletionOptions::default())
            .await?;

        let answer = response.content.trim().to_lowercase();
        let mut classification = categories
            .iter()
            .find(|c| answer.contains(&c.to_lowercase()))
            .map(|c| c.to_string());

        let target_agent = match &classification {
            Some(category) => routing_table.get(category).cloned(),
            None => None,
        };
        let target_agent = match target_agent {
            Some(target) => Some(target),
            None => {
                let fallback = routing_table.get("default").cloned();
                if fallback.is_some() {
                    classification = Some("default".to_string());
                }
                fallback
            }
        };

        let Some(target_agent) = target_agent else {
            let preview: String = ctx.user_input.chars().take(50).collect();
            let mut metadata = HashMap::new();
            metadata.insert("routing_failed".to_string(), serde_json::json!(true));
            metadata.insert(
                "classification".to_string(),
                serde_json::json!(answer),
            );
            return Ok(AgentResponse {
                content: format!("Could not determine routing for: {}", preview),
                confidence: 0.3,
                sources: Vec::new(),
                tool_calls_made: Vec::new(),
                needs_confirmation: false,
                route_to_agent: None,
                metadata,
            });
        };

        let classification = classification.unwrap_or_else(|| "default".to_string());
        let mut metadata = HashMap::new();
        metadata.insert(
            "classification".to_string(),
            serde_json::json!(classification),
        );
        metadata.insert(
            "target_agent".to_string(),
            serde_json::json!(target_agent),
        );

        Ok(AgentResponse {
            content: format!("Routing to: {}", target_agent),
            confidence: 0.9,
            sources: Vec::new(),
            tool_calls_made: Vec::new(),
            needs_confirmation: false,
            route_to_agent: Some(target_agent),
            metadata,
        })
    }
}

/// Whether this kind's lane issues LLM calls of its own.
fn lane_uses_llm(kind: AgentKind) -> bool {
    !matches!(kind, AgentKind::Simple)
}

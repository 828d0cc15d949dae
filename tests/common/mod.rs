//! Shared test harness: a scripted mock LLM provider and an engine
//! factory wired to in-process implementations of every seam.
#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use agentflow::activities::Activities;
use agentflow::knowledge::StaticKnowledgeBase;
use agentflow::llm::{
    ChatMessage, ChatRole, ChunkStream, CompletionOptions, LlmError, LlmProvider, LlmResponse,
    TokenUsage, ToolCall,
};
use agentflow::mcp::McpManager;
use agentflow::storage::FileAgentRepository;
use agentflow::tool_protocol::ToolRegistry;
use agentflow::workflow::AgentWorkflow;

/// A scripted provider: main-lane calls pop pre-programmed responses in
/// order, while validator calls (recognized by their system prompts) get
/// permissive verdicts so scripts only describe the lane under test.
pub struct MockProvider {
    scripted: Mutex<VecDeque<LlmResponse>>,
    pub lane_calls: AtomicUsize,
    pub requests: Mutex<Vec<Vec<ChatMessage>>>,
}

impl MockProvider {
    pub fn new(scripted: Vec<LlmResponse>) -> Arc<Self> {
        Arc::new(Self {
            scripted: Mutex::new(scripted.into()),
            lane_calls: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn lane_call_count(&self) -> usize {
        self.lane_calls.load(Ordering::SeqCst)
    }

    fn validator_reply(system: &str, messages: &[ChatMessage]) -> Option<String> {
        if system.contains("input sanitization assistant") {
            let original = messages
                .iter()
                .rev()
                .find(|m| m.role == ChatRole::User)
                .map(|m| m.content.clone())
                .unwrap_or_default();
            return Some(
                serde_json::json!({
                    "is_suspicious": false,
                    "sanitized_input": original,
                    "detected_signals": [],
                    "reason": "clean",
                })
                .to_string(),
            );
        }
        if system.contains("loop detection assistant") {
            return Some(
                serde_json::json!({
                    "is_loop": false,
                    "reason": "no loop",
                    "already_answered_with": null,
                    "suggested_action": "proceed",
                })
                .to_string(),
            );
        }
        if system.contains("hallucination detection assistant") {
            return Some(
                serde_json::json!({
                    "is_grounded": true,
                    "ungrounded_claims": [],
                    "suggested_fix": null,
                    "confidence": 0.9,
                    "reason": "grounded",
                })
                .to_string(),
            );
        }
        if system.contains("action validation assistant") {
            return Some(
                serde_json::json!({
                    "is_valid": true,
                    "should_retry_with_tool": false,
                    "suggested_tool": null,
                    "reason": "fine",
                })
                .to_string(),
            );
        }
        None
    }
}

#[async_trait]
impl LlmProvider for MockProvider {
    async fn complete(
        &self,
        messages: &[ChatMessage],
        _options: &CompletionOptions,
    ) -> Result<LlmResponse, LlmError> {
        let system = messages
            .iter()
            .find(|m| m.role == ChatRole::System)
            .map(|m| m.content.clone())
            .unwrap_or_default();

        if let Some(content) = Self::validator_reply(&system, messages) {
            return Ok(text_response(&content, "stop"));
        }

        self.lane_calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().await.push(messages.to_vec());

        let mut scripted = self.scripted.lock().await;
        Ok(scripted
            .pop_front()
            .unwrap_or_else(|| text_response("done", "stop")))
    }

    async fn stream(
        &self,
        _messages: &[ChatMessage],
        _options: &CompletionOptions,
    ) -> Result<ChunkStream, LlmError> {
        Ok(Box::pin(futures_util::stream::empty()))
    }

    fn model_name(&self) -> &str {
        "mock-model"
    }
}

pub fn text_response(content: &str, finish_reason: &str) -> LlmResponse {
    LlmResponse {
        content: content.to_string(),
        model: "mock-model".to_string(),
        usage: TokenUsage {
            prompt_tokens: 10,
            completion_tokens: 5,
            total_tokens: 15,
        },
        finish_reason: finish_reason.to_string(),
        tool_calls: Vec::new(),
    }
}

pub fn tool_call_response(calls: Vec<(&str, &str, serde_json::Value)>) -> LlmResponse {
    LlmResponse {
        content: String::new(),
        model: "mock-model".to_string(),
        usage: TokenUsage {
            prompt_tokens: 10,
            completion_tokens: 5,
            total_tokens: 15,
        },
        finish_reason: "tool_calls".to_string(),
        tool_calls: calls
            .into_iter()
            .map(|(id, name, arguments)| ToolCall {
                id: id.to_string(),
                name: name.to_string(),
                arguments,
            })
            .collect(),
    }
}

/// Engine wired to a scripted provider, a temp-dir agent repository, and
/// an in-process knowledge base.
pub struct TestEngine {
    pub workflow: AgentWorkflow,
    pub activities: Arc<Activities>,
    pub provider: Arc<MockProvider>,
    pub repository: Arc<FileAgentRepository>,
    pub knowledge: Arc<StaticKnowledgeBase>,
    // Held so the repository directory outlives the engine.
    _tempdir: tempfile::TempDir,
}

pub async fn engine_with_script(scripted: Vec<LlmResponse>) -> TestEngine {
    let provider = MockProvider::new(scripted);
    let registry = ToolRegistry::shared();
    agentflow::tools::register_builtin_tools(&registry).await;

    let tempdir = tempfile::tempdir().unwrap();
    let repository = Arc::new(FileAgentRepository::new(tempdir.path()).unwrap());
    let knowledge = Arc::new(StaticKnowledgeBase::new());

    let activities = Arc::new(
        Activities::new(
            registry.clone(),
            Arc::new(McpManager::new(registry)),
            knowledge.clone(),
            repository.clone(),
        )
        .with_provider_override(provider.clone()),
    );

    TestEngine {
        workflow: AgentWorkflow::new(activities.clone()),
        activities,
        provider,
        repository,
        knowledge,
        _tempdir: tempdir,
    }
}

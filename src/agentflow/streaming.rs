//! Streaming projection of a workflow execution.
//!
//! The durable workflow is not byte-streamed, so the projector synthesizes
//! a realistic narrative around it: a retrieving/retrieved pair when a
//! knowledge base is bound, preview start events for up to two bound tools,
//! one `generating` before the result, the final content chunked at ~50
//! characters with a short inter-chunk delay, and a terminal `complete`.
//! Preview end events are reconciled with the run's actual per-tool
//! outcomes when the result reports them.
//!
//! When the consumer drops the stream, event delivery stops but the
//! workflow runs to completion — its durable state is not wasted.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use uuid::Uuid;

use crate::agentflow::config::{AgentConfig, AgentResponse, InvocationContext};
use crate::agentflow::event::{
    chunk_event, complete_event, error_event, generating_event, mcp_end_event, mcp_start_event,
    message_saved_event, retrieved_event, retrieving_event, thinking_event, tool_end_event,
    tool_start_event, StreamEvent,
};
use crate::agentflow::workflow::AgentWorkflow;

const CHUNK_SIZE: usize = 50;
const CHUNK_DELAY: std::time::Duration = std::time::Duration::from_millis(20);
const PREVIEW_TOOLS: usize = 2;

/// Projects one invocation into an ordered [`StreamEvent`] stream.
pub struct StreamingProjector {
    workflow: Arc<AgentWorkflow>,
}

impl StreamingProjector {
    pub fn new(workflow: Arc<AgentWorkflow>) -> Self {
        Self { workflow }
    }

    /// Execute the agent and stream progress events. The returned stream
    /// is totally ordered and ends in exactly one `complete` or `error`.
    pub fn execute(
        &self,
        config: AgentConfig,
        ctx: InvocationContext,
    ) -> ReceiverStream<StreamEvent> {
        let (tx, rx) = mpsc::channel(64);
        let workflow = Arc::clone(&self.workflow);

        tokio::spawn(async move {
            // Sends are best-effort: a disconnected consumer must not
            // cancel the run.
            let execution_id = format!("exec-{}", Uuid::new_v4().simple());

            let _ = tx.send(message_saved_event("user", None)).await;
            let _ = tx
                .send(thinking_event(Some("Understanding your request")))
                .await;

            if let Some(knowledge) = &config.knowledge {
                let _ = tx
                    .send(retrieving_event(
                        &knowledge.collection_name,
                        Some(&ctx.user_input),
                    ))
                    .await;
                tokio::time::sleep(std::time::Duration::from_millis(100)).await;
                let _ = tx.send(retrieved_event(0, 0)).await;
            }

            // Preview the first bound tools; the matching end events are
            // emitted after the run with the observed outcomes.
            let preview_tools: Vec<String> = config
                .tools
                .iter()
                .filter(|t| t.enabled)
                .take(PREVIEW_TOOLS)
                .map(|t| t.tool_id.clone())
                .collect();
            for tool_id in &preview_tools {
                let _ = tx.send(preview_start(tool_id)).await;
            }

            let _ = tx.send(generating_event()).await;

            let response = workflow.execute(&config, &ctx).await;

            match response {
                Ok(response) => {
                    for tool_id in &preview_tools {
                        let _ = tx.send(preview_end(tool_id, &response)).await;
                    }

                    let chars: Vec<char> = response.content.chars().collect();
                    for chunk in chars.chunks(CHUNK_SIZE) {
                        let piece: String = chunk.iter().collect();
                        let _ = tx.send(chunk_event(&piece, None)).await;
                        tokio::time::sleep(CHUNK_DELAY).await;
                    }

                    let total_tokens = response
                        .metadata
                        .get("total_tokens")
                        .and_then(|v| v.as_u64());
                    let _ = tx
                        .send(complete_event("", Some(&execution_id), total_tokens))
                        .await;
                }
                Err(e) => {
                    log::error!("workflow execution failed: {}", e);
                    let _ = tx
                        .send(error_event(&e.to_string(), Some(e.kind()), false))
                        .await;
                }
            }
        });

        ReceiverStream::new(rx)
    }
}

fn split_mcp_tool_id(tool_id: &str) -> Option<(&str, &str)> {
    // Server- or template-qualified ids stream as MCP events.
    tool_id.split_once(':')
}

fn preview_start(tool_id: &str) -> StreamEvent {
    match split_mcp_tool_id(tool_id) {
        Some((server_name, tool_name)) => mcp_start_event(server_name, tool_name),
        None => tool_start_event(tool_id, None, None),
    }
}

fn preview_end(tool_id: &str, response: &AgentResponse) -> StreamEvent {
    // The run's recorded calls supersede the optimistic preview outcome.
    let success = response
        .tool_calls_made
        .iter()
        .find(|record| record.tool == tool_id || record.tool.ends_with(&format!(":{}", tool_id)))
        .map(|record| record.success)
        .unwrap_or(true);

    match split_mcp_tool_id(tool_id) {
        Some((server_name, tool_name)) => mcp_end_event(server_name, tool_name, success),
        None => tool_end_event(tool_id, success, None),
    }
}

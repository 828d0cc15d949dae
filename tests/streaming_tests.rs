//! Streaming projector behavior: ordering, terminal events, chunking.

mod common;

use std::collections::HashMap;
use std::sync::Arc;

use tokio_stream::StreamExt;

use agentflow::config::{
    AgentConfig, AgentKind, InvocationContext, KnowledgeBinding, LlmBinding, ToolBinding,
};
use agentflow::event::{StreamEvent, StreamEventType};
use agentflow::streaming::StreamingProjector;

use common::{engine_with_script, text_response};

fn ctx(user_input: &str) -> InvocationContext {
    InvocationContext {
        user_input: user_input.to_string(),
        session_id: "sess-1".to_string(),
        user_id: "user-1".to_string(),
        ..Default::default()
    }
}

async fn collect(projector: &StreamingProjector, config: AgentConfig) -> Vec<StreamEvent> {
    let mut stream = projector.execute(config, ctx("hello"));
    let mut events = Vec::new();
    while let Some(event) = stream.next().await {
        events.push(event);
    }
    events
}

fn types(events: &[StreamEvent]) -> Vec<StreamEventType> {
    events.iter().map(|e| e.event_type).collect()
}

#[tokio::test]
async fn test_stream_ends_in_exactly_one_complete() {
    let engine = engine_with_script(vec![]).await;
    let projector = StreamingProjector::new(Arc::new(agentflow::AgentWorkflow::new(
        engine.activities.clone(),
    )));

    let config = AgentConfig::new("greeter", "Greeter", AgentKind::Simple)
        .with_example("hello", "hi there")
        .with_goal("greeting");

    let events = collect(&projector, config).await;
    let kinds = types(&events);

    // Narrative order: saved user message, thinking, generating, content,
    // terminal complete.
    assert_eq!(kinds[0], StreamEventType::MessageSaved);
    assert_eq!(kinds[1], StreamEventType::Thinking);
    assert!(kinds.contains(&StreamEventType::Generating));

    let terminals = events.iter().filter(|e| e.is_terminal()).count();
    assert_eq!(terminals, 1);
    assert_eq!(kinds.last(), Some(&StreamEventType::Complete));

    // Chunks reassemble into the final content.
    let reassembled: String = events
        .iter()
        .filter(|e| e.event_type == StreamEventType::Chunk)
        .map(|e| e.data["content"].as_str().unwrap())
        .collect();
    assert_eq!(reassembled, "hi there");
}

#[tokio::test]
async fn test_long_content_chunks_at_fifty_chars() {
    let long = "x".repeat(120);
    let engine = engine_with_script(vec![text_response(&long, "stop")]).await;
    let projector = StreamingProjector::new(Arc::new(agentflow::AgentWorkflow::new(
        engine.activities.clone(),
    )));

    let config = AgentConfig::new("assistant", "Assistant", AgentKind::Llm)
        .with_llm(LlmBinding::default());

    let events = collect(&projector, config).await;
    let chunks: Vec<&str> = events
        .iter()
        .filter(|e| e.event_type == StreamEventType::Chunk)
        .map(|e| e.data["content"].as_str().unwrap())
        .collect();

    assert_eq!(chunks.len(), 3);
    assert_eq!(chunks[0].len(), 50);
    assert_eq!(chunks[2].len(), 20);
}

#[tokio::test]
async fn test_kb_bound_agent_streams_retrieval_pair() {
    let engine = engine_with_script(vec![text_response("answer", "stop")]).await;
    engine
        .knowledge
        .add_document("docs", "some document", HashMap::new())
        .await;

    let projector = StreamingProjector::new(Arc::new(agentflow::AgentWorkflow::new(
        engine.activities.clone(),
    )));

    let config = AgentConfig::new("support", "Support", AgentKind::Rag)
        .with_llm(LlmBinding::default())
        .with_knowledge(KnowledgeBinding {
            enabled: true,
            collection_name: "docs".into(),
            embedding_model: "text-embedding-3-small".into(),
            embedding_provider: "openai".into(),
            top_k: 5,
            similarity_threshold: 0.1,
            rerank: false,
            rerank_model: None,
            chunk_overlap: 50,
            include_metadata: true,
        });

    let events = collect(&projector, config).await;
    let kinds = types(&events);

    let retrieving = kinds
        .iter()
        .position(|k| *k == StreamEventType::Retrieving)
        .unwrap();
    let retrieved = kinds
        .iter()
        .position(|k| *k == StreamEventType::Retrieved)
        .unwrap();
    let generating = kinds
        .iter()
        .position(|k| *k == StreamEventType::Generating)
        .unwrap();
    assert!(retrieving < retrieved);
    assert!(retrieved < generating);

    let retrieving_event = &events[retrieving];
    assert_eq!(retrieving_event.data["knowledge_base_name"], "docs");
}

#[tokio::test]
async fn test_tool_previews_open_and_close() {
    let engine = engine_with_script(vec![text_response("did not need tools", "stop")]).await;
    let projector = StreamingProjector::new(Arc::new(agentflow::AgentWorkflow::new(
        engine.activities.clone(),
    )));

    let mut config = AgentConfig::new("worker", "Worker", AgentKind::Tool)
        .with_llm(LlmBinding::default());
    for tool_id in ["calculator", "srv_abc:list_events", "datetime"] {
        config.tools.push(ToolBinding {
            tool_id: tool_id.to_string(),
            enabled: true,
            requires_confirmation: false,
            timeout_seconds: 30,
            retry_count: 1,
            config: HashMap::new(),
        });
    }

    let events = collect(&projector, config).await;
    let kinds = types(&events);

    // Only the first two bound tools are previewed; the MCP-shaped id
    // streams as mcp events.
    assert_eq!(
        kinds.iter().filter(|k| **k == StreamEventType::ToolStart).count(),
        1
    );
    assert_eq!(
        kinds.iter().filter(|k| **k == StreamEventType::McpStart).count(),
        1
    );
    assert_eq!(
        kinds.iter().filter(|k| **k == StreamEventType::ToolEnd).count(),
        1
    );
    assert_eq!(
        kinds.iter().filter(|k| **k == StreamEventType::McpEnd).count(),
        1
    );

    let mcp_start = events
        .iter()
        .find(|e| e.event_type == StreamEventType::McpStart)
        .unwrap();
    assert_eq!(mcp_start.data["server_name"], "srv_abc");
    assert_eq!(mcp_start.data["tool_name"], "list_events");
}

#[tokio::test]
async fn test_invalid_config_streams_error_terminal() {
    let engine = engine_with_script(vec![]).await;
    let projector = StreamingProjector::new(Arc::new(agentflow::AgentWorkflow::new(
        engine.activities.clone(),
    )));

    // llm kind with no binding fails validation.
    let config = AgentConfig::new("broken", "Broken", AgentKind::Llm);

    let events = collect(&projector, config).await;
    let last = events.last().unwrap();
    assert_eq!(last.event_type, StreamEventType::Error);
    assert_eq!(last.data["error_type"], "config_invalid");
    assert_eq!(last.data["recoverable"], false);

    // Exactly one terminal event, and no chunks were emitted.
    assert_eq!(events.iter().filter(|e| e.is_terminal()).count(), 1);
    assert!(!types(&events).contains(&StreamEventType::Chunk));
}

#[tokio::test]
async fn test_output_safety_refusal_still_completes() {
    let engine = engine_with_script(vec![text_response(
        "the card is 4111111111111111",
        "stop",
    )])
    .await;
    let projector = StreamingProjector::new(Arc::new(agentflow::AgentWorkflow::new(
        engine.activities.clone(),
    )));

    let mut config = AgentConfig::new("assistant", "Assistant", AgentKind::Llm)
        .with_llm(LlmBinding::default());
    config.safety.level = agentflow::config::SafetyLevel::High;

    let events = collect(&projector, config).await;
    assert_eq!(
        events.last().unwrap().event_type,
        StreamEventType::Complete
    );

    // The streamed chunks carry the refusal, not the unsafe content.
    let reassembled: String = events
        .iter()
        .filter(|e| e.event_type == StreamEventType::Chunk)
        .map(|e| e.data["content"].as_str().unwrap())
        .collect();
    assert!(!reassembled.contains("4111111111111111"));
}

#[tokio::test]
async fn test_dropped_consumer_does_not_panic_workflow() {
    let engine = engine_with_script(vec![]).await;
    let projector = StreamingProjector::new(Arc::new(agentflow::AgentWorkflow::new(
        engine.activities.clone(),
    )));

    let config = AgentConfig::new("greeter", "Greeter", AgentKind::Simple)
        .with_example("hello", "hi there");

    let mut stream = projector.execute(config, ctx("hello"));
    // Take one event, then drop the stream mid-run.
    let first = stream.next().await.unwrap();
    assert_eq!(first.event_type, StreamEventType::MessageSaved);
    drop(stream);

    // The detached task finishes on its own; give it a moment.
    tokio::time::sleep(std::time::Duration::from_millis(200)).await;
}

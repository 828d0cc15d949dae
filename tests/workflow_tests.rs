//! End-to-end control-loop scenarios with a scripted provider.

mod common;

use std::collections::HashMap;

use agentflow::config::{
    AgentConfig, AgentKind, HistoryMessage, InvocationContext, LlmBinding, SafetyLevel,
    ToolBinding,
};
use agentflow::knowledge::KnowledgeBase;
use agentflow::llm::ChatRole;
use agentflow::workflow::SAFETY_REFUSAL;

use common::{engine_with_script, text_response, tool_call_response};

fn ctx(user_input: &str) -> InvocationContext {
    InvocationContext {
        user_input: user_input.to_string(),
        session_id: "sess-1".to_string(),
        user_id: "user-1".to_string(),
        ..Default::default()
    }
}

fn llm_binding() -> LlmBinding {
    LlmBinding::default()
}

fn tool_binding(tool_id: &str) -> ToolBinding {
    ToolBinding {
        tool_id: tool_id.to_string(),
        enabled: true,
        requires_confirmation: false,
        timeout_seconds: 30,
        retry_count: 1,
        config: HashMap::new(),
    }
}

#[tokio::test]
async fn test_simple_pattern_hit() {
    let engine = engine_with_script(vec![]).await;

    let config = AgentConfig::new("greeter", "Greeter", AgentKind::Simple)
        .with_example("hello", "hi there")
        .with_goal("greeting people");

    let response = engine
        .workflow
        .execute(&config, &ctx("Hello!"))
        .await
        .unwrap();

    assert_eq!(response.content, "hi there");
    assert_eq!(response.confidence, 1.0);
    assert_eq!(response.metadata["match_type"], "pattern");
    // Rule-based lane never touches the LLM.
    assert_eq!(engine.provider.lane_call_count(), 0);
}

#[tokio::test]
async fn test_router_classifies_and_routes() {
    let engine =
        engine_with_script(vec![text_response("This seems like a billing issue.", "stop")]).await;

    let mut table = HashMap::new();
    table.insert("billing".to_string(), "agent-b".to_string());
    table.insert("technical".to_string(), "agent-t".to_string());
    table.insert("default".to_string(), "agent-g".to_string());

    let config = AgentConfig::new("router", "Router", AgentKind::Router)
        .with_llm(llm_binding())
        .with_routing_table(table);

    let response = engine
        .workflow
        .execute(&config, &ctx("Why was I charged twice?"))
        .await
        .unwrap();

    assert_eq!(response.content, "Routing to: agent-b");
    assert_eq!(response.confidence, 0.9);
    assert_eq!(response.metadata["classification"], "billing");
    assert_eq!(response.metadata["target_agent"], "agent-b");
    assert_eq!(response.route_to_agent.as_deref(), Some("agent-b"));
}

#[tokio::test]
async fn test_router_falls_back_to_default() {
    let engine = engine_with_script(vec![text_response("no idea", "stop")]).await;

    let mut table = HashMap::new();
    table.insert("billing".to_string(), "agent-b".to_string());
    table.insert("default".to_string(), "agent-g".to_string());

    let config = AgentConfig::new("router", "Router", AgentKind::Router)
        .with_llm(llm_binding())
        .with_routing_table(table);

    let response = engine
        .workflow
        .execute(&config, &ctx("gibberish"))
        .await
        .unwrap();

    assert_eq!(response.metadata["classification"], "default");
    assert_eq!(response.route_to_agent.as_deref(), Some("agent-g"));
}

#[tokio::test]
async fn test_llm_lane_single_call() {
    let engine = engine_with_script(vec![text_response(
        "Rust's ownership model prevents data races at compile time.",
        "stop",
    )])
    .await;

    let config = AgentConfig::new("assistant", "Assistant", AgentKind::Llm)
        .with_llm(llm_binding())
        .with_role_title("Rust Tutor");

    let response = engine
        .workflow
        .execute(&config, &ctx("Why is Rust memory safe?"))
        .await
        .unwrap();

    assert!(response.content.contains("ownership"));
    assert!(response.confidence > 0.0 && response.confidence <= 1.0);
    assert_eq!(engine.provider.lane_call_count(), 1);

    // The system prompt carries the persona sections.
    let requests = engine.provider.requests.lock().await;
    let system = &requests[0][0];
    assert_eq!(system.role, ChatRole::System);
    assert!(system.content.contains("You are Rust Tutor."));
}

#[tokio::test]
async fn test_rag_lane_injects_retrieved_context() {
    let engine = engine_with_script(vec![text_response(
        "Refunds are processed within 5 business days.",
        "stop",
    )])
    .await;

    engine
        .knowledge
        .add_document(
            "support-docs",
            "Refund policy: refunds are processed within 5 business days.",
            HashMap::new(),
        )
        .await;

    let config = AgentConfig::new("support", "Support", AgentKind::Rag)
        .with_llm(llm_binding())
        .with_knowledge(agentflow::config::KnowledgeBinding {
            enabled: true,
            collection_name: "support-docs".to_string(),
            embedding_model: "text-embedding-3-small".to_string(),
            embedding_provider: "openai".to_string(),
            top_k: 5,
            similarity_threshold: 0.1,
            rerank: false,
            rerank_model: None,
            chunk_overlap: 50,
            include_metadata: true,
        });

    let response = engine
        .workflow
        .execute(&config, &ctx("what is the refund policy"))
        .await
        .unwrap();

    assert_eq!(response.metadata["retrieved_count"], 1);

    let requests = engine.provider.requests.lock().await;
    let system = &requests[0][0].content;
    assert!(system.contains("## RETRIEVED CONTEXT"));
    assert!(system.contains("[Document 1]"));
}

#[tokio::test]
async fn test_tool_loop_executes_and_feeds_back() {
    let engine = engine_with_script(vec![
        tool_call_response(vec![(
            "call_1",
            "calculator",
            serde_json::json!({"expression": "6 * 7"}),
        )]),
        text_response("The answer is 42.", "stop"),
    ])
    .await;

    let config = AgentConfig::new("math", "Math", AgentKind::Tool)
        .with_llm(llm_binding())
        .with_tool(tool_binding("calculator"));

    let response = engine
        .workflow
        .execute(&config, &ctx("what is 6 times 7"))
        .await
        .unwrap();

    assert_eq!(response.content, "The answer is 42.");
    assert_eq!(response.tool_calls_made.len(), 1);
    assert!(response.tool_calls_made[0].success);
    assert_eq!(response.tool_calls_made[0].tool, "calculator");
    assert_eq!(response.metadata["iterations"], 2);

    // Second request carries the assistant tool-call turn and the tool
    // result, in that order.
    let requests = engine.provider.requests.lock().await;
    let second = &requests[1];
    let assistant_turn = second
        .iter()
        .position(|m| m.role == ChatRole::Assistant && !m.tool_calls.is_empty())
        .unwrap();
    let tool_turn = second
        .iter()
        .position(|m| m.role == ChatRole::Tool)
        .unwrap();
    assert!(assistant_turn < tool_turn);
    assert!(second[tool_turn].content.contains("42"));
}

#[tokio::test]
async fn test_tool_loop_unknown_tool_is_reported_not_fatal() {
    let engine = engine_with_script(vec![
        tool_call_response(vec![("call_1", "nonexistent", serde_json::json!({}))]),
        text_response("I could not use that tool.", "stop"),
    ])
    .await;

    let config = AgentConfig::new("math", "Math", AgentKind::Tool)
        .with_llm(llm_binding())
        .with_tool(tool_binding("calculator"));

    let response = engine
        .workflow
        .execute(&config, &ctx("use a made-up tool"))
        .await
        .unwrap();

    assert_eq!(response.tool_calls_made.len(), 1);
    assert!(!response.tool_calls_made[0].success);
    assert!(response.tool_calls_made[0]
        .error
        .as_deref()
        .unwrap()
        .contains("Tool not found"));
    // The loop carried on to a natural stop.
    assert_eq!(response.content, "I could not use that tool.");
}

#[tokio::test]
async fn test_tool_loop_iteration_cap() {
    // Every turn asks for another tool call; the loop must stop at the cap.
    let script: Vec<_> = (0..20)
        .map(|_| {
            tool_call_response(vec![(
                "call_again",
                "calculator",
                serde_json::json!({"expression": "1 + 1"}),
            )])
        })
        .collect();
    let engine = engine_with_script(script).await;

    let config = AgentConfig::new("math", "Math", AgentKind::Tool)
        .with_llm(llm_binding())
        .with_tool(tool_binding("calculator"));

    let response = engine
        .workflow
        .execute(&config, &ctx("loop forever"))
        .await
        .unwrap();

    assert_eq!(response.metadata["max_iterations_reached"], true);
    assert!(response.content.contains("maximum number of tool operations"));
    // LLM calls per invocation stay within the cap.
    assert!(engine.provider.lane_call_count() <= 11);
    assert_eq!(response.tool_calls_made.len(), 10);
}

#[tokio::test]
async fn test_input_safety_gate_blocks_before_llm() {
    let engine = engine_with_script(vec![text_response("should never run", "stop")]).await;

    let mut config = AgentConfig::new("assistant", "Assistant", AgentKind::Llm)
        .with_llm(llm_binding());
    config.safety.blocked_topics.push("cryptocurrency".into());

    let response = engine
        .workflow
        .execute(&config, &ctx("Tell me about cryptocurrency"))
        .await
        .unwrap();

    assert_eq!(response.content, SAFETY_REFUSAL);
    assert_eq!(response.metadata["safety_violation"], "input");
    // Safety-gate finality: no LLM call was issued.
    assert_eq!(engine.provider.lane_call_count(), 0);
}

#[tokio::test]
async fn test_output_safety_trip_replaces_content() {
    let engine = engine_with_script(vec![text_response(
        "Sure, the card on file is 4111111111111111.",
        "stop",
    )])
    .await;

    let mut config = AgentConfig::new("assistant", "Assistant", AgentKind::Llm)
        .with_llm(llm_binding());
    config.safety.level = SafetyLevel::High;

    let response = engine
        .workflow
        .execute(&config, &ctx("what card do you have on file?"))
        .await
        .unwrap();

    // The original content is never returned.
    assert_eq!(response.content, SAFETY_REFUSAL);
    assert_eq!(response.metadata["safety_violation"], "output");
    assert!(response.confidence <= 0.5);
}

#[tokio::test]
async fn test_config_invalid_surfaces() {
    let engine = engine_with_script(vec![]).await;

    // llm kind with no llm binding.
    let config = AgentConfig::new("broken", "Broken", AgentKind::Llm);
    let error = engine
        .workflow
        .execute(&config, &ctx("hello"))
        .await
        .unwrap_err();
    assert_eq!(error.kind(), "config_invalid");
}

#[tokio::test]
async fn test_inactive_agent_rejected() {
    let engine = engine_with_script(vec![]).await;

    let mut config = AgentConfig::new("sleepy", "Sleepy", AgentKind::Simple);
    config.is_active = false;

    let error = engine
        .workflow
        .execute(&config, &ctx("hello"))
        .await
        .unwrap_err();
    assert_eq!(error.kind(), "config_invalid");
}

#[tokio::test]
async fn test_replay_determinism() {
    // Identical scripts and inputs produce identical responses.
    let script = || {
        vec![
            tool_call_response(vec![(
                "call_1",
                "calculator",
                serde_json::json!({"expression": "2 + 2"}),
            )]),
            text_response("It is 4.", "stop"),
        ]
    };

    let config = AgentConfig::new("math", "Math", AgentKind::Tool)
        .with_llm(llm_binding())
        .with_tool(tool_binding("calculator"));

    let first = engine_with_script(script())
        .await
        .workflow
        .execute(&config, &ctx("2+2?"))
        .await
        .unwrap();
    let second = engine_with_script(script())
        .await
        .workflow
        .execute(&config, &ctx("2+2?"))
        .await
        .unwrap();

    assert_eq!(first.content, second.content);
    assert_eq!(first.confidence, second.confidence);
    assert_eq!(first.tool_calls_made.len(), second.tool_calls_made.len());
    assert_eq!(
        first.metadata["iterations"],
        second.metadata["iterations"]
    );
}

#[tokio::test]
async fn test_history_is_forwarded_to_llm() {
    let engine = engine_with_script(vec![text_response("as before", "stop")]).await;

    let config = AgentConfig::new("assistant", "Assistant", AgentKind::Llm)
        .with_llm(llm_binding());

    let mut context = ctx("and now?");
    context.conversation_history = vec![
        HistoryMessage {
            role: "user".into(),
            content: "first question".into(),
        },
        HistoryMessage {
            role: "assistant".into(),
            content: "first answer".into(),
        },
    ];

    engine.workflow.execute(&config, &context).await.unwrap();

    let requests = engine.provider.requests.lock().await;
    let roles: Vec<ChatRole> = requests[0].iter().map(|m| m.role.clone()).collect();
    assert_eq!(
        roles,
        vec![
            ChatRole::System,
            ChatRole::User,
            ChatRole::Assistant,
            ChatRole::User
        ]
    );
    assert_eq!(requests[0][1].content, "first question");
}

#[tokio::test]
async fn test_knowledge_client_is_deterministic_within_invocation() {
    let engine = engine_with_script(vec![]).await;
    engine
        .knowledge
        .add_document("kb", "alpha beta gamma", HashMap::new())
        .await;

    let a = engine.knowledge.search("kb", "alpha", 3, None).await.unwrap();
    let b = engine.knowledge.search("kb", "alpha", 3, None).await.unwrap();
    assert_eq!(a.len(), b.len());
    assert_eq!(a[0].score, b[0].score);
}

//! Orchestrator scenarios: parallel fan-out, circuit breaking, hybrid
//! routing, and workflow-graph execution.

mod common;

use std::collections::HashMap;

use agentflow::config::{
    AgentConfig, AgentKind, AgentReference, AggregationStrategy, InvocationContext, LlmBinding,
    OrchestratorBinding, OrchestratorMode, RoutingCondition, RoutingRule, RoutingRules,
};
use agentflow::storage::AgentRepository;

use common::{engine_with_script, text_response, tool_call_response, TestEngine};

fn ctx(user_input: &str) -> InvocationContext {
    InvocationContext {
        user_input: user_input.to_string(),
        session_id: "sess-1".to_string(),
        user_id: "user-1".to_string(),
        ..Default::default()
    }
}

fn child_reference(agent_id: &str) -> AgentReference {
    AgentReference {
        agent_id: agent_id.to_string(),
        alias: None,
        description: None,
    }
}

/// Register a simple child agent that answers everything with `answer`.
async fn register_child(engine: &TestEngine, agent_id: &str, answer: &str) {
    let config = AgentConfig::new(agent_id, agent_id, AgentKind::Simple)
        .with_example("*", answer)
        .with_goal("answering questions");
    engine
        .repository
        .put(config, "user-1")
        .await
        .unwrap();
}

fn orchestrator_config(binding: OrchestratorBinding) -> AgentConfig {
    AgentConfig::new("orchestrator", "Orchestrator", AgentKind::Orchestrator)
        .with_llm(LlmBinding::default())
        .with_role_title("Coordinator")
        .with_goal("coordinating specialists")
        .with_orchestrator(binding)
}

#[tokio::test]
async fn test_parallel_agent_fan_out_and_merge() {
    // Turn 1 fans out to both children in parallel; turn 2 merges.
    let engine = engine_with_script(vec![
        tool_call_response(vec![
            ("call_a", "agent__a", serde_json::json!({"query": "X"})),
            ("call_b", "agent__b", serde_json::json!({"query": "X"})),
        ]),
        text_response("merged", "stop"),
    ])
    .await;

    register_child(&engine, "a", "alpha result").await;
    register_child(&engine, "b", "beta result").await;

    let config = orchestrator_config(OrchestratorBinding {
        available_agents: vec![child_reference("a"), child_reference("b")],
        max_parallel: 5,
        ..OrchestratorBinding::default()
    });

    let response = engine.workflow.execute(&config, &ctx("X")).await.unwrap();

    assert_eq!(response.content, "merged");
    assert_eq!(response.metadata["mode"], "llm_driven");
    assert_eq!(response.tool_calls_made.len(), 2);
    assert!(response.tool_calls_made.iter().all(|t| t.success));
    // Results rejoin in request order even when executed in parallel.
    assert_eq!(response.tool_calls_made[0].tool, "agent:a");
    assert_eq!(response.tool_calls_made[1].tool, "agent:b");

    let child_confidences = response.metadata["child_confidences"].as_array().unwrap();
    assert_eq!(child_confidences.len(), 2);
    assert!(response.confidence > 0.0 && response.confidence <= 1.0);
}

#[tokio::test]
async fn test_circuit_opens_after_three_failures() {
    // `ghost` is never registered, so every call fails. Three sequential
    // failures open the circuit; the fourth call short-circuits without
    // starting an execution.
    let engine = engine_with_script(vec![
        tool_call_response(vec![("c1", "agent__ghost", serde_json::json!({"query": "q"}))]),
        tool_call_response(vec![("c2", "agent__ghost", serde_json::json!({"query": "q"}))]),
        tool_call_response(vec![("c3", "agent__ghost", serde_json::json!({"query": "q"}))]),
        tool_call_response(vec![("c4", "agent__ghost", serde_json::json!({"query": "q"}))]),
        text_response("giving up on ghost", "stop"),
    ])
    .await;

    let config = orchestrator_config(OrchestratorBinding {
        available_agents: vec![child_reference("ghost")],
        // Keep the ghost callable every turn despite the failures.
        max_same_agent_calls: 10,
        ..OrchestratorBinding::default()
    });

    let response = engine.workflow.execute(&config, &ctx("q")).await.unwrap();

    assert_eq!(response.content, "giving up on ghost");
    assert_eq!(response.tool_calls_made.len(), 4);
    assert!(response.tool_calls_made.iter().all(|t| !t.success));

    // First three fail on the missing config; the fourth is rejected by
    // the open circuit.
    assert!(response.tool_calls_made[2]
        .error
        .as_deref()
        .unwrap()
        .contains("not found"));
    assert!(response.tool_calls_made[3]
        .error
        .as_deref()
        .unwrap()
        .contains("temporarily unavailable"));
}

#[tokio::test]
async fn test_loop_suppression_withholds_tool_schema() {
    // The same child is called on three consecutive turns; on the fourth
    // turn its schema is withheld, leaving the LLM without tools.
    let engine = engine_with_script(vec![
        tool_call_response(vec![("c1", "agent__a", serde_json::json!({"query": "q"}))]),
        tool_call_response(vec![("c2", "agent__a", serde_json::json!({"query": "q"}))]),
        tool_call_response(vec![("c3", "agent__a", serde_json::json!({"query": "q"}))]),
        text_response("done without the suppressed agent", "stop"),
    ])
    .await;

    register_child(&engine, "a", "same answer").await;

    let config = orchestrator_config(OrchestratorBinding {
        available_agents: vec![child_reference("a")],
        max_same_agent_calls: 3,
        ..OrchestratorBinding::default()
    });

    let response = engine.workflow.execute(&config, &ctx("q")).await.unwrap();
    assert_eq!(response.content, "done without the suppressed agent");
    assert_eq!(response.tool_calls_made.len(), 3);
}

#[tokio::test]
async fn test_max_iterations_sentinel() {
    let script: Vec<_> = (0..20)
        .map(|_| tool_call_response(vec![("c", "agent__a", serde_json::json!({"query": "q"}))]))
        .collect();
    let engine = engine_with_script(script).await;
    register_child(&engine, "a", "again").await;

    let config = orchestrator_config(OrchestratorBinding {
        available_agents: vec![child_reference("a")],
        max_iterations: 4,
        max_same_agent_calls: 100,
        ..OrchestratorBinding::default()
    });

    let response = engine.workflow.execute(&config, &ctx("q")).await.unwrap();
    assert!(response.content.contains("Maximum orchestration iterations"));
    assert_eq!(response.metadata["max_iterations_reached"], true);
    assert_eq!(engine.provider.lane_call_count(), 4);
}

#[tokio::test]
async fn test_hybrid_routing_rule_invokes_child_directly() {
    let engine = engine_with_script(vec![]).await;
    register_child(&engine, "billing-agent", "Your invoice is ready.").await;

    let config = orchestrator_config(OrchestratorBinding {
        mode: OrchestratorMode::Hybrid,
        available_agents: vec![child_reference("billing-agent")],
        routing_rules: Some(RoutingRules {
            rules: vec![RoutingRule {
                id: "billing".into(),
                condition: RoutingCondition::Contains,
                pattern: "invoice".into(),
                target_agent: "billing-agent".into(),
                priority: 10,
                description: None,
                enabled: true,
            }],
            fallback_to_llm: false,
            default_agent: None,
            case_sensitive: false,
        }),
        ..OrchestratorBinding::default()
    });

    let response = engine
        .workflow
        .execute(&config, &ctx("Where is my INVOICE?"))
        .await
        .unwrap();

    assert_eq!(response.content, "Your invoice is ready.");
    assert_eq!(response.route_to_agent.as_deref(), Some("billing-agent"));
    assert_eq!(response.metadata["matched_rule"], "billing");
    // No LLM turn was needed.
    assert_eq!(engine.provider.lane_call_count(), 0);
}

#[tokio::test]
async fn test_hybrid_no_match_no_fallback_fails() {
    let engine = engine_with_script(vec![]).await;

    let config = orchestrator_config(OrchestratorBinding {
        mode: OrchestratorMode::Hybrid,
        routing_rules: Some(RoutingRules {
            rules: vec![],
            fallback_to_llm: false,
            default_agent: None,
            case_sensitive: false,
        }),
        ..OrchestratorBinding::default()
    });

    let error = engine
        .workflow
        .execute(&config, &ctx("anything"))
        .await
        .unwrap_err();
    assert_eq!(error.kind(), "config_invalid");
}

#[tokio::test]
async fn test_workflow_graph_sequence_and_parallel() {
    let engine = engine_with_script(vec![]).await;
    register_child(&engine, "planner", "the plan").await;
    register_child(&engine, "critic-a", "looks good").await;
    register_child(&engine, "critic-b", "needs work").await;

    let graph = serde_json::json!({
        "entry_step": "plan",
        "steps": [
            {"type": "agent", "id": "plan", "agent_id": "planner",
             "input": "${user_input}", "next": "review"},
            {"type": "parallel", "id": "review", "branches": [
                {"agent_id": "critic-a", "input": "${steps.plan.output}"},
                {"agent_id": "critic-b", "input": "${steps.plan.output}"},
            ], "aggregation": "all"},
        ],
    });

    let config = orchestrator_config(OrchestratorBinding {
        mode: OrchestratorMode::Workflow,
        available_agents: vec![
            child_reference("planner"),
            child_reference("critic-a"),
            child_reference("critic-b"),
        ],
        workflow_definition: Some(graph),
        default_aggregation: AggregationStrategy::All,
        ..OrchestratorBinding::default()
    });

    let response = engine
        .workflow
        .execute(&config, &ctx("draft a plan"))
        .await
        .unwrap();

    assert_eq!(response.metadata["mode"], "workflow");
    assert!(response.content.contains("[critic-a]\nlooks good"));
    assert!(response.content.contains("[critic-b]\nneeds work"));

    let executed: Vec<&str> = response.metadata["executed_steps"]
        .as_array()
        .unwrap()
        .iter()
        .map(|v| v.as_str().unwrap())
        .collect();
    assert_eq!(executed, vec!["plan", "review"]);
}

#[tokio::test]
async fn test_workflow_graph_conditional_branch() {
    let engine = engine_with_script(vec![]).await;
    register_child(&engine, "checker", "approved").await;
    register_child(&engine, "executor", "executed").await;
    register_child(&engine, "escalator", "escalated").await;

    let graph = serde_json::json!({
        "entry_step": "check",
        "steps": [
            {"type": "agent", "id": "check", "agent_id": "checker", "next": "branch"},
            {"type": "conditional", "id": "branch",
             "condition": "\"${steps.check.output}\" == \"approved\"",
             "if_true": "run", "if_false": "escalate"},
            {"type": "agent", "id": "run", "agent_id": "executor"},
            {"type": "agent", "id": "escalate", "agent_id": "escalator"},
        ],
    });

    let config = orchestrator_config(OrchestratorBinding {
        mode: OrchestratorMode::Workflow,
        available_agents: vec![
            child_reference("checker"),
            child_reference("executor"),
            child_reference("escalator"),
        ],
        workflow_definition: Some(graph),
        ..OrchestratorBinding::default()
    });

    let response = engine
        .workflow
        .execute(&config, &ctx("check and run"))
        .await
        .unwrap();

    assert_eq!(response.content, "executed");
    let executed: Vec<&str> = response.metadata["executed_steps"]
        .as_array()
        .unwrap()
        .iter()
        .map(|v| v.as_str().unwrap())
        .collect();
    assert_eq!(executed, vec!["check", "branch", "run"]);
}

#[tokio::test]
async fn test_self_reference_excluded_by_default() {
    // An orchestrator listing itself as a child must not see its own tool.
    let engine = engine_with_script(vec![text_response("no recursion", "stop")]).await;

    let config = orchestrator_config(OrchestratorBinding {
        available_agents: vec![child_reference("orchestrator")],
        ..OrchestratorBinding::default()
    });
    engine
        .repository
        .put(config.clone(), "user-1")
        .await
        .unwrap();

    let response = engine.workflow.execute(&config, &ctx("loop?")).await.unwrap();
    assert_eq!(response.content, "no recursion");

    // The orchestration prompt lists no agents.
    let requests = engine.provider.requests.lock().await;
    assert!(requests[0][0].content.contains("No agents configured."));
}

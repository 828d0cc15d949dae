//! Aggregation strategies for multi-agent results.
//!
//! An orchestrator that fans out to several children combines their
//! outputs with one of five strategies: `first` successful result, `all`
//! formatted together, majority `vote`, JSON `merge`, or LLM-adjudicated
//! `best`.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::agentflow::config::AggregationStrategy;
use crate::agentflow::llm::{ChatMessage, ChatRole, CompletionOptions, LlmProvider};

/// Standardized result from one child-agent execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChildResult {
    pub agent_id: String,
    pub success: bool,
    pub content: String,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl ChildResult {
    pub fn ok(agent_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
            success: true,
            content: content.into(),
            error: None,
            metadata: HashMap::new(),
        }
    }

    pub fn failed(agent_id: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
            success: false,
            content: String::new(),
            error: Some(error.into()),
            metadata: HashMap::new(),
        }
    }
}

/// Key-conflict policy for [`AggregationStrategy::Merge`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MergePolicy {
    /// Later values overwrite earlier ones.
    #[default]
    Last,
    /// Keep the first value seen.
    First,
    /// Collect all values into a list.
    List,
}

/// Aggregate child results with the chosen strategy.
///
/// `best_provider` is only consulted for [`AggregationStrategy::Best`];
/// when absent, `best` degrades to `first`.
pub async fn aggregate(
    strategy: AggregationStrategy,
    results: &[ChildResult],
    best_provider: Option<&dyn LlmProvider>,
) -> String {
    match strategy {
        AggregationStrategy::First => first_success(results),
        AggregationStrategy::All => all_results(results, "\n\n---\n\n"),
        AggregationStrategy::Vote => vote(results),
        AggregationStrategy::Merge => merge(results, MergePolicy::Last),
        AggregationStrategy::Best => match best_provider {
            Some(provider) => best(results, provider).await,
            None => {
                log::warn!("best aggregation requested without a provider, falling back to first");
                first_success(results)
            }
        },
    }
}

/// First successful, non-empty result; otherwise the concatenated errors.
pub fn first_success(results: &[ChildResult]) -> String {
    for result in results {
        if result.success && !result.content.is_empty() {
            return result.content.clone();
        }
    }

    let errors: Vec<&str> = results
        .iter()
        .filter_map(|r| r.error.as_deref())
        .collect();
    if errors.is_empty() {
        "No results available.".to_string()
    } else {
        format!("No successful results. Errors: {}", errors.join("; "))
    }
}

/// Every result formatted as `[<agent_id>]\n<content>` blocks.
pub fn all_results(results: &[ChildResult], separator: &str) -> String {
    let parts: Vec<String> = results
        .iter()
        .map(|result| {
            if result.success {
                format!("[{}]\n{}", result.agent_id, result.content)
            } else {
                format!(
                    "[{}] (failed)\n{}",
                    result.agent_id,
                    result.error.as_deref().unwrap_or("Unknown error")
                )
            }
        })
        .collect();
    parts.join(separator)
}

/// Majority vote over lower-cased, trimmed content; the winning original
/// content is returned.
pub fn vote(results: &[ChildResult]) -> String {
    let mut votes: HashMap<String, usize> = HashMap::new();
    for result in results {
        if result.success && !result.content.is_empty() {
            *votes
                .entry(result.content.trim().to_lowercase())
                .or_default() += 1;
        }
    }

    if votes.is_empty() {
        return "No valid votes received.".to_string();
    }

    // Deterministic winner: highest count, ties broken lexicographically.
    let winner = votes
        .iter()
        .max_by(|a, b| a.1.cmp(b.1).then_with(|| b.0.cmp(a.0)))
        .map(|(content, _)| content.clone())
        .unwrap_or_default();

    for result in results {
        if result.success && result.content.trim().to_lowercase() == winner {
            return result.content.clone();
        }
    }
    winner
}

/// Key-by-key merge of JSON-object contents under the given conflict
/// policy. Non-JSON and failed results are skipped.
pub fn merge(results: &[ChildResult], policy: MergePolicy) -> String {
    let mut merged = serde_json::Map::new();

    for result in results {
        if !result.success {
            continue;
        }
        let Ok(serde_json::Value::Object(data)) =
            serde_json::from_str::<serde_json::Value>(&result.content)
        else {
            continue;
        };

        for (key, value) in data {
            match merged.get_mut(&key) {
                None => {
                    merged.insert(key, value);
                }
                Some(existing) => match policy {
                    MergePolicy::Last => {
                        *existing = value;
                    }
                    MergePolicy::First => {}
                    MergePolicy::List => {
                        if let serde_json::Value::Array(list) = existing {
                            list.push(value);
                        } else {
                            let previous = existing.take();
                            *existing = serde_json::Value::Array(vec![previous, value]);
                        }
                    }
                },
            }
        }
    }

    serde_json::to_string_pretty(&serde_json::Value::Object(merged))
        .unwrap_or_else(|_| "{}".to_string())
}

const BEST_SYSTEM_PROMPT: &str = "You are a result evaluator.";

/// LLM-adjudicated selection: a small model receives the labeled results
/// and returns the single best synthesized answer.
pub async fn best(results: &[ChildResult], provider: &dyn LlmProvider) -> String {
    let responses_text: Vec<String> = results
        .iter()
        .filter(|r| r.success && !r.content.is_empty())
        .map(|r| format!("--- Agent: {} ---\n{}", r.agent_id, r.content))
        .collect();

    if responses_text.is_empty() {
        return "No successful results to evaluate.".to_string();
    }

    let prompt = format!(
        "You are evaluating responses from multiple specialized agents.\n\
         Analyze each response for accuracy, completeness, and relevance.\n\
         Select and return the best response, or synthesize them into an improved answer.\n\n\
         Responses:\n{}\n\n\
         Return only the final answer, no explanation of your selection process.",
        responses_text.join("\n\n")
    );

    let response = provider
        .complete(
            &[
                ChatMessage::text(ChatRole::System, BEST_SYSTEM_PROMPT),
                ChatMessage::text(ChatRole::User, prompt),
            ],
            &CompletionOptions {
                temperature: Some(0.3),
                max_tokens: Some(2048),
                ..Default::default()
            },
        )
        .await;

    match response {
        Ok(response) => response.content,
        Err(e) => {
            log::error!("best aggregation failed, falling back to first: {}", e);
            first_success(results)
        }
    }
}

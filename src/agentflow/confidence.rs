//! Confidence scoring from execution signals.
//!
//! Replaces hardcoded per-lane confidences with a weighted aggregation of
//! four signal categories: LLM completion quality, tool success rate,
//! retrieval relevance, and response characteristics (including child-agent
//! blending for orchestrators). Categories without data are skipped; with
//! no signals at all the score is 0.5.

use serde::{Deserialize, Serialize};

/// Signals collected over one invocation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfidenceSignals {
    // LLM signals
    pub finish_reason: Option<String>,
    pub response_length: usize,
    pub max_tokens_used: bool,

    // Tool signals
    pub tool_calls_total: usize,
    pub tool_calls_succeeded: usize,
    pub tool_calls_failed: usize,

    // Retrieval signals
    pub documents_retrieved: usize,
    pub avg_relevance_score: f64,
    pub min_relevance_score: f64,

    // Response signals
    pub has_uncertainty_language: bool,
    pub is_refusal: bool,
    pub iterations_used: u32,
    pub max_iterations_reached: bool,

    // Child agent signals (orchestrator)
    pub child_confidences: Vec<f64>,
    pub child_failures: usize,
}

impl ConfidenceSignals {
    /// Seed LLM + response signals from a completion.
    pub fn from_response(content: &str, finish_reason: &str) -> Self {
        Self {
            finish_reason: Some(finish_reason.to_string()),
            response_length: content.len(),
            has_uncertainty_language: detect_uncertainty(content),
            is_refusal: detect_refusal(content),
            iterations_used: 1,
            ..Default::default()
        }
    }
}

const WEIGHT_LLM: f64 = 0.30;
const WEIGHT_TOOLS: f64 = 0.25;
const WEIGHT_RETRIEVAL: f64 = 0.25;
const WEIGHT_RESPONSE: f64 = 0.20;

/// Phrases that mark a hedged answer (case-insensitive substring match).
pub const UNCERTAINTY_PHRASES: &[&str] = &[
    "i'm not sure",
    "i'm not certain",
    "might be",
    "could be",
    "possibly",
    "perhaps",
    "i think",
    "it seems",
    "appears to be",
    "may not be accurate",
    "i don't have enough information",
];

/// Phrases that mark a refusal.
pub const REFUSAL_PHRASES: &[&str] = &[
    "i can't",
    "i cannot",
    "i'm unable",
    "i am unable",
    "i don't have access",
    "beyond my capabilities",
    "outside my scope",
];

/// Whether the text hedges.
pub fn detect_uncertainty(text: &str) -> bool {
    let lower = text.to_lowercase();
    UNCERTAINTY_PHRASES.iter().any(|p| lower.contains(p))
}

/// Whether the text refuses.
pub fn detect_refusal(text: &str) -> bool {
    let lower = text.to_lowercase();
    REFUSAL_PHRASES.iter().any(|p| lower.contains(p))
}

/// Aggregate the signals into a score in `[0, 1]`.
pub fn calculate(signals: &ConfidenceSignals) -> f64 {
    let scores = [
        (WEIGHT_LLM, llm_confidence(signals)),
        (WEIGHT_TOOLS, tool_confidence(signals)),
        (WEIGHT_RETRIEVAL, retrieval_confidence(signals)),
        (WEIGHT_RESPONSE, response_confidence(signals)),
    ];

    let mut weighted_sum = 0.0;
    let mut total_weight = 0.0;
    for (weight, score) in scores {
        if let Some(score) = score {
            weighted_sum += score * weight;
            total_weight += weight;
        }
    }

    if total_weight == 0.0 {
        return 0.5;
    }

    let mut confidence = weighted_sum / total_weight;

    if signals.max_iterations_reached {
        confidence *= 0.7;
    }
    if signals.is_refusal {
        confidence *= 0.5;
    }

    confidence.clamp(0.0, 1.0)
}

fn llm_confidence(signals: &ConfidenceSignals) -> Option<f64> {
    let finish_reason = signals.finish_reason.as_deref()?;

    let mut base: f64 = match finish_reason {
        "stop" => 0.9,
        "length" => 0.6,
        "tool_calls" => 0.85,
        "content_filter" => 0.3,
        _ => 0.85,
    };

    if signals.response_length <= 20 {
        base *= 0.8;
    } else if signals.response_length > 50 {
        base *= 1.05;
    }

    Some(base.min(1.0))
}

fn tool_confidence(signals: &ConfidenceSignals) -> Option<f64> {
    if signals.tool_calls_total == 0 {
        return None;
    }

    let success_rate = signals.tool_calls_succeeded as f64 / signals.tool_calls_total as f64;
    let mut base = 0.5 + success_rate * 0.5;

    if signals.tool_calls_failed > 2 {
        base *= 0.8;
    }

    Some(base)
}

fn retrieval_confidence(signals: &ConfidenceSignals) -> Option<f64> {
    if signals.documents_retrieved == 0 {
        return None;
    }

    let mut base = if signals.avg_relevance_score > 0.0 {
        0.5 + signals.avg_relevance_score * 0.4
    } else {
        // Scores unavailable from the store.
        0.6
    };

    if signals.documents_retrieved >= 3 && signals.min_relevance_score > 0.7 {
        base *= 1.1;
    }
    if signals.min_relevance_score < 0.3 {
        base *= 0.85;
    }

    Some(base.min(1.0))
}

fn response_confidence(signals: &ConfidenceSignals) -> Option<f64> {
    // No response was produced at all: nothing to judge.
    if signals.finish_reason.is_none()
        && signals.response_length == 0
        && signals.child_confidences.is_empty()
        && !signals.max_iterations_reached
    {
        return None;
    }

    let mut base = 0.85;

    if signals.has_uncertainty_language {
        base *= 0.85;
    }

    if signals.iterations_used > 8 {
        base *= 0.8;
    } else if signals.iterations_used > 5 {
        base *= 0.9;
    }

    if !signals.child_confidences.is_empty() {
        let avg_child: f64 = signals.child_confidences.iter().sum::<f64>()
            / signals.child_confidences.len() as f64;
        let min_child = signals
            .child_confidences
            .iter()
            .cloned()
            .fold(f64::INFINITY, f64::min);

        base = base * 0.4 + avg_child * 0.4 + min_child * 0.2;

        if signals.child_failures > 0 {
            let failure_ratio = signals.child_failures as f64
                / (signals.child_confidences.len() + signals.child_failures) as f64;
            base *= 1.0 - failure_ratio * 0.5;
        }
    }

    Some(base)
}

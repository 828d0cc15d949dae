//! Rule-based input/output safety gates.
//!
//! Every lane runs [`check_input`] before its first LLM step and
//! [`check_output`] on the final content. Checks are deliberately cheap:
//! case-insensitive substring matches against configured blocked topics,
//! user-supplied regexes (invalid patterns logged and skipped), and — at
//! [`SafetyLevel::High`] and above — built-in suspicious/sensitive pattern
//! sets that contribute at most one aggregated violation per check.
//!
//! On violation the workflow terminates with a safety-violation outcome;
//! the filter never rewrites content.

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::agentflow::config::SafetyLevel;

lazy_static! {
    /// Input-side: injection/credential probing tokens.
    static ref SUSPICIOUS_INPUT_PATTERNS: Vec<Regex> = vec![
        Regex::new(r"(?i)\b(hack|exploit|bypass|inject)\b").unwrap(),
        Regex::new(r"(?i)(?:password|secret|api.?key)\s*[:=]").unwrap(),
    ];
    /// Output-side: data that must not leak.
    static ref SENSITIVE_OUTPUT_PATTERNS: Vec<Regex> = vec![
        // SSN shape
        Regex::new(r"\b\d{3}-\d{2}-\d{4}\b").unwrap(),
        // Credit-card-shaped 16-digit run
        Regex::new(r"\b\d{16}\b").unwrap(),
        // Credential assignments
        Regex::new(r"(?i)(?:password|secret|key)[\s:=]+\S+").unwrap(),
    ];
}

/// Input for one safety check.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SafetyCheckInput {
    pub content: String,
    pub level: SafetyLevel,
    #[serde(default)]
    pub blocked_topics: Vec<String>,
    #[serde(default)]
    pub blocked_patterns: Vec<String>,
}

/// Outcome of one safety check.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SafetyCheckOutput {
    pub is_safe: bool,
    pub violations: Vec<String>,
    pub confidence: f64,
    #[serde(default)]
    pub filtered_content: Option<String>,
}

fn match_configured_rules(input: &SafetyCheckInput, topic_label: &str) -> Vec<String> {
    let mut violations = Vec::new();
    let content_lower = input.content.to_lowercase();

    for topic in &input.blocked_topics {
        if content_lower.contains(&topic.to_lowercase()) {
            violations.push(format!("{}: {}", topic_label, topic));
        }
    }

    for pattern in &input.blocked_patterns {
        match Regex::new(&format!("(?i){}", pattern)) {
            Ok(re) => {
                if re.is_match(&input.content) {
                    violations.push(format!("Blocked pattern: {}", pattern));
                }
            }
            Err(e) => {
                log::warn!("invalid blocked pattern '{}': {}", pattern, e);
            }
        }
    }

    violations
}

/// Check input content before any LLM step.
pub fn check_input(input: &SafetyCheckInput) -> SafetyCheckOutput {
    log::info!("checking input safety: level={:?}", input.level);

    let mut violations = match_configured_rules(input, "Blocked topic");

    if input.level >= SafetyLevel::High {
        let hit = SUSPICIOUS_INPUT_PATTERNS
            .iter()
            .any(|re| re.is_match(&input.content));
        if hit {
            violations.push("Suspicious content pattern detected".to_string());
        }
    }

    let is_safe = violations.is_empty();
    log::info!(
        "input safety check complete: safe={} violations={}",
        is_safe,
        violations.len()
    );

    SafetyCheckOutput {
        is_safe,
        violations,
        confidence: if is_safe { 1.0 } else { 0.9 },
        filtered_content: None,
    }
}

/// Check generated content before it is returned.
pub fn check_output(input: &SafetyCheckInput) -> SafetyCheckOutput {
    log::info!("checking output safety: level={:?}", input.level);

    let mut violations = match_configured_rules(input, "Output contains blocked topic");

    if input.level >= SafetyLevel::High {
        let hit = SENSITIVE_OUTPUT_PATTERNS
            .iter()
            .any(|re| re.is_match(&input.content));
        if hit {
            violations.push("Potential sensitive data in output".to_string());
        }
    }

    let is_safe = violations.is_empty();
    log::info!(
        "output safety check: safe={} violations={}",
        is_safe,
        violations.len()
    );

    SafetyCheckOutput {
        is_safe,
        violations,
        confidence: if is_safe { 1.0 } else { 0.85 },
        filtered_content: None,
    }
}

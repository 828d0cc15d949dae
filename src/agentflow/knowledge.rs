//! Knowledge retrieval seam.
//!
//! The engine treats retrieval as an opaque top-k + similarity-threshold
//! search behind the [`KnowledgeBase`] trait; production deployments plug
//! a vector store in here. Results must be deterministic under fixed
//! inputs within one invocation — the workflow never re-queries on replay.

use std::collections::HashMap;
use std::error::Error;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

/// One retrieved document with its similarity score.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievedDocument {
    pub content: String,
    pub score: f64,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

/// Opaque top-k search over a named collection.
#[async_trait]
pub trait KnowledgeBase: Send + Sync {
    /// Return up to `top_k` documents ordered by descending score,
    /// dropping anything below `score_threshold` when given.
    async fn search(
        &self,
        collection: &str,
        query: &str,
        top_k: usize,
        score_threshold: Option<f64>,
    ) -> Result<Vec<RetrievedDocument>, Box<dyn Error + Send + Sync>>;
}

/// Deterministic in-process knowledge base.
///
/// Scores documents by keyword overlap with the query. Used by tests and
/// the CLI bootstrap path; not a substitute for a vector store.
#[derive(Default)]
pub struct StaticKnowledgeBase {
    collections: RwLock<HashMap<String, Vec<RetrievedDocument>>>,
}

impl StaticKnowledgeBase {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a document to a collection.
    pub async fn add_document(
        &self,
        collection: &str,
        content: impl Into<String>,
        metadata: HashMap<String, serde_json::Value>,
    ) {
        let mut collections = self.collections.write().await;
        collections
            .entry(collection.to_string())
            .or_default()
            .push(RetrievedDocument {
                content: content.into(),
                score: 0.0,
                metadata,
            });
    }

    fn score(query: &str, content: &str) -> f64 {
        let content_lower = content.to_lowercase();
        let terms: Vec<String> = query
            .to_lowercase()
            .split_whitespace()
            .map(|t| t.trim_matches(|c: char| !c.is_alphanumeric()).to_string())
            .filter(|t| !t.is_empty())
            .collect();
        if terms.is_empty() {
            return 0.0;
        }
        let hits = terms
            .iter()
            .filter(|t| content_lower.contains(t.as_str()))
            .count();
        hits as f64 / terms.len() as f64
    }
}

#[async_trait]
impl KnowledgeBase for StaticKnowledgeBase {
    async fn search(
        &self,
        collection: &str,
        query: &str,
        top_k: usize,
        score_threshold: Option<f64>,
    ) -> Result<Vec<RetrievedDocument>, Box<dyn Error + Send + Sync>> {
        let collections = self.collections.read().await;
        let Some(documents) = collections.get(collection) else {
            return Ok(Vec::new());
        };

        let mut scored: Vec<RetrievedDocument> = documents
            .iter()
            .map(|doc| RetrievedDocument {
                content: doc.content.clone(),
                score: Self::score(query, &doc.content),
                metadata: doc.metadata.clone(),
            })
            .filter(|doc| score_threshold.map_or(true, |t| doc.score >= t))
            .collect();

        // Stable ordering: score descending, then content for ties.
        scored.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.content.cmp(&b.content))
        });
        scored.truncate(top_k);
        Ok(scored)
    }
}

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Where a retrieval result came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetrievalOrigin {
    Vector,
    Lexical,
}

/// A document surfaced for one query. Not persisted.
///
/// `distance` is a dissimilarity score, lower is more relevant. Vector
/// results carry the index's cosine distance; lexical results synthesize
/// `1 - overlap_ratio`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievedDocument {
    pub content: String,
    pub metadata: HashMap<String, String>,
    pub distance: f64,
    pub origin: RetrievalOrigin,
}

impl RetrievedDocument {
    /// Source name for display and deduplication.
    pub fn source(&self) -> &str {
        self.metadata
            .get("source")
            .map(String::as_str)
            .unwrap_or("our documentation")
    }

    /// Optional stored question label (FAQ-style documents).
    pub fn label(&self) -> Option<&str> {
        self.metadata
            .get("Question")
            .map(String::as_str)
            .filter(|q| !q.is_empty())
    }
}

/// How the answer text was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GeneratedVia {
    Model,
    Fallback,
}

/// The composer's output: final text, its grounding, and follow-ups.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComposedAnswer {
    pub text: String,
    pub sources: Vec<RetrievedDocument>,
    /// At most three entries.
    pub suggested_questions: Vec<String>,
    pub generated_via: GeneratedVia,
}

//! HTTP request/response shapes.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::rag::RetrievedDocument;

#[derive(Debug, Clone, Deserialize)]
pub struct ChatRequest {
    pub question: String,
    pub user_id: String,
    pub conversation_id: Option<String>,
}

/// A grounding document as exposed over the API and persisted alongside
/// each turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceDocument {
    pub source: String,
    pub content: String,
    #[serde(default)]
    pub details: HashMap<String, String>,
}

impl From<&RetrievedDocument> for SourceDocument {
    fn from(doc: &RetrievedDocument) -> Self {
        SourceDocument {
            source: doc.source().to_string(),
            content: doc.content.clone(),
            details: doc.metadata.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatResponse {
    pub response: String,
    pub sources: Vec<SourceDocument>,
    pub suggested_questions: Vec<String>,
    pub timestamp: DateTime<Utc>,
    pub conversation_id: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rag::RetrievalOrigin;

    #[test]
    fn source_document_uses_metadata_source() {
        let mut metadata = HashMap::new();
        metadata.insert("source".to_string(), "faqs".to_string());
        let doc = RetrievedDocument {
            content: "text".to_string(),
            metadata,
            distance: 0.1,
            origin: RetrievalOrigin::Vector,
        };

        let source = SourceDocument::from(&doc);
        assert_eq!(source.source, "faqs");
        assert_eq!(source.details.get("source").map(String::as_str), Some("faqs"));
    }

    #[test]
    fn missing_source_falls_back_to_default_label() {
        let doc = RetrievedDocument {
            content: "text".to_string(),
            metadata: HashMap::new(),
            distance: 0.1,
            origin: RetrievalOrigin::Lexical,
        };

        assert_eq!(SourceDocument::from(&doc).source, "our documentation");
    }
}

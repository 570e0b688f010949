//! Hybrid document retrieval.
//!
//! Vector similarity first, then a keyword-overlap fallback when the index
//! under-returns. Retrieval never fails the request: any internal error is
//! logged and surfaces as "no grounding available".

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use regex::Regex;

use super::store::DocumentIndex;
use super::types::{RetrievalOrigin, RetrievedDocument};
use crate::core::errors::ApiError;
use crate::llm::LlmProvider;

pub struct DocumentRetriever {
    provider: Arc<dyn LlmProvider>,
    index: Arc<dyn DocumentIndex>,
    /// Vector matches at or above this cosine distance are discarded as noise.
    distance_cutoff: f64,
    word: Regex,
}

impl DocumentRetriever {
    pub fn new(
        provider: Arc<dyn LlmProvider>,
        index: Arc<dyn DocumentIndex>,
        distance_cutoff: f64,
    ) -> Self {
        Self {
            provider,
            index,
            distance_cutoff,
            word: Regex::new(r"\w+").expect("static pattern"),
        }
    }

    /// Retrieve up to `limit` documents for `question`, ascending distance.
    ///
    /// Returns an empty vec on any internal failure.
    pub async fn retrieve(&self, question: &str, limit: usize) -> Vec<RetrievedDocument> {
        match self.retrieve_inner(question, limit).await {
            Ok(docs) => {
                tracing::debug!(
                    "Retrieved {} documents for question '{}'",
                    docs.len(),
                    truncate_for_log(question)
                );
                docs
            }
            Err(err) => {
                tracing::error!(
                    "Document retrieval failed for '{}': {}",
                    truncate_for_log(question),
                    err
                );
                Vec::new()
            }
        }
    }

    async fn retrieve_inner(
        &self,
        question: &str,
        limit: usize,
    ) -> Result<Vec<RetrievedDocument>, ApiError> {
        let embedding = self.provider.embed(question).await?;
        let matches = self.index.query(&embedding, limit).await?;

        let mut docs: Vec<RetrievedDocument> = matches
            .into_iter()
            .filter(|m| m.distance < self.distance_cutoff)
            .map(|m| RetrievedDocument {
                content: m.document.content,
                metadata: m.document.metadata,
                distance: m.distance,
                origin: RetrievalOrigin::Vector,
            })
            .collect();

        if docs.len() < limit {
            match self.lexical_search(question, limit - docs.len()).await {
                Ok(lexical) => {
                    if !lexical.is_empty() {
                        tracing::debug!("Lexical fallback added {} documents", lexical.len());
                    }
                    docs.extend(lexical);
                }
                Err(err) => tracing::error!("Lexical fallback failed: {}", err),
            }
        }

        Ok(merge_and_rank(docs, limit))
    }

    /// Keyword-overlap search over the whole collection.
    ///
    /// Overlap ratio is `|question ∩ document| / |question|` over lowercase
    /// word tokens; matches get a pseudo-distance of `1 - overlap`. The scan
    /// stops collecting once `max_results` matches are found.
    async fn lexical_search(
        &self,
        question: &str,
        max_results: usize,
    ) -> Result<Vec<RetrievedDocument>, ApiError> {
        let question_tokens = self.tokenize(question);
        if question_tokens.is_empty() || max_results == 0 {
            return Ok(Vec::new());
        }

        let mut lexical = Vec::new();
        for document in self.index.scan().await? {
            let doc_tokens = self.tokenize(&document.content);
            let common = question_tokens.intersection(&doc_tokens).count();
            if common == 0 {
                continue;
            }

            let overlap = common as f64 / question_tokens.len() as f64;
            lexical.push(RetrievedDocument {
                content: document.content,
                metadata: document.metadata,
                distance: 1.0 - overlap,
                origin: RetrievalOrigin::Lexical,
            });

            if lexical.len() >= max_results {
                break;
            }
        }

        lexical.sort_by(|a, b| {
            a.distance
                .partial_cmp(&b.distance)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        Ok(lexical)
    }

    fn tokenize(&self, text: &str) -> HashSet<String> {
        let lower = text.to_lowercase();
        self.word
            .find_iter(&lower)
            .map(|m| m.as_str().to_string())
            .collect()
    }
}

/// Dedupe by `(content, source)` keeping the smaller distance, then sort
/// ascending and truncate.
fn merge_and_rank(docs: Vec<RetrievedDocument>, limit: usize) -> Vec<RetrievedDocument> {
    let mut unique: HashMap<(String, String), RetrievedDocument> = HashMap::new();
    for doc in docs {
        let key = (
            doc.content.clone(),
            doc.metadata.get("source").cloned().unwrap_or_default(),
        );
        match unique.get(&key) {
            Some(existing) if existing.distance <= doc.distance => {}
            _ => {
                unique.insert(key, doc);
            }
        }
    }

    let mut merged: Vec<RetrievedDocument> = unique.into_values().collect();
    merged.sort_by(|a, b| {
        a.distance
            .partial_cmp(&b.distance)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    merged.truncate(limit);
    merged
}

fn truncate_for_log(text: &str) -> String {
    text.chars().take(50).collect()
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::super::store::{IndexMatch, IndexedDocument};
    use super::*;

    struct FixedProvider;

    #[async_trait]
    impl LlmProvider for FixedProvider {
        fn name(&self) -> &str {
            "fixed"
        }

        async fn health_check(&self) -> Result<bool, ApiError> {
            Ok(true)
        }

        async fn generate(&self, _prompt: &str) -> Result<String, ApiError> {
            Ok(String::new())
        }

        async fn embed(&self, _input: &str) -> Result<Vec<f32>, ApiError> {
            Ok(vec![1.0, 0.0])
        }
    }

    struct FailingProvider;

    #[async_trait]
    impl LlmProvider for FailingProvider {
        fn name(&self) -> &str {
            "failing"
        }

        async fn health_check(&self) -> Result<bool, ApiError> {
            Ok(false)
        }

        async fn generate(&self, _prompt: &str) -> Result<String, ApiError> {
            Err(ApiError::Upstream("down".to_string()))
        }

        async fn embed(&self, _input: &str) -> Result<Vec<f32>, ApiError> {
            Err(ApiError::Upstream("down".to_string()))
        }
    }

    struct StaticIndex {
        matches: Vec<IndexMatch>,
        documents: Vec<IndexedDocument>,
        query_calls: AtomicUsize,
    }

    impl StaticIndex {
        fn new(matches: Vec<IndexMatch>, documents: Vec<IndexedDocument>) -> Self {
            Self {
                matches,
                documents,
                query_calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl DocumentIndex for StaticIndex {
        async fn query(
            &self,
            _embedding: &[f32],
            limit: usize,
        ) -> Result<Vec<IndexMatch>, ApiError> {
            self.query_calls.fetch_add(1, Ordering::SeqCst);
            let mut matches = self.matches.clone();
            matches.truncate(limit);
            Ok(matches)
        }

        async fn scan(&self) -> Result<Vec<IndexedDocument>, ApiError> {
            Ok(self.documents.clone())
        }

        async fn count(&self) -> Result<usize, ApiError> {
            Ok(self.documents.len())
        }
    }

    fn doc(content: &str, source: &str) -> IndexedDocument {
        let mut metadata = HashMap::new();
        metadata.insert("source".to_string(), source.to_string());
        IndexedDocument {
            content: content.to_string(),
            metadata,
        }
    }

    fn vector_match(content: &str, source: &str, distance: f64) -> IndexMatch {
        IndexMatch {
            document: doc(content, source),
            distance,
        }
    }

    #[test]
    fn merge_keeps_smaller_distance_on_collision() {
        let vector = RetrievedDocument {
            content: "X".to_string(),
            metadata: doc("X", "S").metadata,
            distance: 0.4,
            origin: RetrievalOrigin::Vector,
        };
        let lexical = RetrievedDocument {
            content: "X".to_string(),
            metadata: doc("X", "S").metadata,
            distance: 0.6,
            origin: RetrievalOrigin::Lexical,
        };

        let merged = merge_and_rank(vec![vector, lexical], 5);
        assert_eq!(merged.len(), 1);
        assert!((merged[0].distance - 0.4).abs() < f64::EPSILON);
        assert_eq!(merged[0].origin, RetrievalOrigin::Vector);
    }

    #[tokio::test]
    async fn distance_cutoff_filters_noise() {
        let index = StaticIndex::new(
            vec![
                vector_match("invoicing", "faqs", 0.3),
                vector_match("unrelated", "faqs", 0.85),
                vector_match("billing", "manual", 0.5),
            ],
            Vec::new(),
        );
        let retriever =
            DocumentRetriever::new(Arc::new(FixedProvider), Arc::new(index), 0.8);

        let docs = retriever.retrieve("billing question", 3).await;
        assert_eq!(docs.len(), 2);
        assert!(docs.iter().all(|d| d.distance < 0.8));
        assert!((docs[0].distance - 0.3).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn lexical_fallback_fills_remaining_quota() {
        let index = StaticIndex::new(
            Vec::new(),
            vec![
                doc("track stock levels in the warehouse module", "faqs"),
                doc("payroll deadlines and tax filing", "faqs"),
            ],
        );
        let retriever =
            DocumentRetriever::new(Arc::new(FixedProvider), Arc::new(index), 0.8);

        let docs = retriever.retrieve("how to track stock levels", 5).await;
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].origin, RetrievalOrigin::Lexical);
        assert!(docs[0].distance < 1.0);
    }

    #[tokio::test]
    async fn provider_failure_degrades_to_empty() {
        let index = StaticIndex::new(vec![vector_match("a", "s", 0.1)], Vec::new());
        let retriever =
            DocumentRetriever::new(Arc::new(FailingProvider), Arc::new(index), 0.8);

        let docs = retriever.retrieve("anything", 5).await;
        assert!(docs.is_empty());
    }
}

//! DocumentIndex trait, the interface over the document collection.
//!
//! The retriever needs two access paths: nearest-neighbor search with
//! distances, and a full scan for the lexical fallback. The shipped
//! implementation is `SqliteDocumentIndex` in the `sqlite` module.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::core::errors::ApiError;

/// A document as stored in the collection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexedDocument {
    pub content: String,
    /// Always carries a `source` key; FAQ rows also carry `Question`.
    pub metadata: HashMap<String, String>,
}

/// One nearest-neighbor hit.
#[derive(Debug, Clone)]
pub struct IndexMatch {
    pub document: IndexedDocument,
    /// Cosine distance, lower is closer.
    pub distance: f64,
}

#[async_trait]
pub trait DocumentIndex: Send + Sync {
    /// Nearest neighbors of `embedding`, ascending distance, at most `limit`.
    async fn query(&self, embedding: &[f32], limit: usize) -> Result<Vec<IndexMatch>, ApiError>;

    /// Every document in the collection, used by the lexical fallback.
    async fn scan(&self) -> Result<Vec<IndexedDocument>, ApiError>;

    /// Total number of stored documents.
    async fn count(&self) -> Result<usize, ApiError>;
}

//! SQLite-backed document index.
//!
//! In-process collection using SQLite for content/metadata and brute-force
//! cosine distance over embedding BLOBs for nearest-neighbor search. The
//! offline ingestion job populates it through `insert_batch`.

use std::collections::HashMap;
use std::path::PathBuf;

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use super::store::{DocumentIndex, IndexMatch, IndexedDocument};
use crate::core::errors::ApiError;

pub struct SqliteDocumentIndex {
    pool: SqlitePool,
    #[allow(dead_code)]
    db_path: PathBuf,
}

impl SqliteDocumentIndex {
    pub async fn with_path(db_path: PathBuf) -> Result<Self, ApiError> {
        let options = SqliteConnectOptions::new()
            .filename(&db_path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .min_connections(1)
            .max_connections(4)
            .connect_with(options)
            .await
            .map_err(ApiError::internal)?;

        let index = Self { pool, db_path };
        index.init_schema().await?;
        Ok(index)
    }

    async fn init_schema(&self) -> Result<(), ApiError> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS documents (
                doc_id TEXT PRIMARY KEY,
                content TEXT NOT NULL,
                metadata TEXT NOT NULL DEFAULT '{}',
                embedding BLOB,
                created_at TEXT NOT NULL DEFAULT (STRFTIME('%Y-%m-%dT%H:%M:%fZ', 'now'))
            )",
        )
        .execute(&self.pool)
        .await
        .map_err(ApiError::internal)?;

        Ok(())
    }

    /// Insert one document with its embedding; generates the id.
    pub async fn insert(
        &self,
        document: IndexedDocument,
        embedding: Vec<f32>,
    ) -> Result<String, ApiError> {
        let doc_id = Uuid::new_v4().to_string();
        let metadata = serde_json::to_string(&document.metadata).map_err(ApiError::internal)?;
        let blob = serialize_embedding(&embedding);

        sqlx::query(
            "INSERT INTO documents (doc_id, content, metadata, embedding)
             VALUES (?1, ?2, ?3, ?4)",
        )
        .bind(&doc_id)
        .bind(&document.content)
        .bind(&metadata)
        .bind(&blob)
        .execute(&self.pool)
        .await
        .map_err(ApiError::internal)?;

        Ok(doc_id)
    }

    pub async fn insert_batch(
        &self,
        items: Vec<(IndexedDocument, Vec<f32>)>,
    ) -> Result<(), ApiError> {
        if items.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await.map_err(ApiError::internal)?;

        for (document, embedding) in &items {
            let metadata = serde_json::to_string(&document.metadata).map_err(ApiError::internal)?;
            let blob = serialize_embedding(embedding);

            sqlx::query(
                "INSERT INTO documents (doc_id, content, metadata, embedding)
                 VALUES (?1, ?2, ?3, ?4)",
            )
            .bind(Uuid::new_v4().to_string())
            .bind(&document.content)
            .bind(&metadata)
            .bind(&blob)
            .execute(&mut *tx)
            .await
            .map_err(ApiError::internal)?;
        }

        tx.commit().await.map_err(ApiError::internal)?;
        Ok(())
    }

    fn row_to_document(row: &sqlx::sqlite::SqliteRow) -> IndexedDocument {
        let metadata_str: String = row.get("metadata");
        let metadata = serde_json::from_str::<HashMap<String, String>>(&metadata_str)
            .unwrap_or_else(|err| {
                tracing::warn!("Malformed document metadata, treating as empty: {}", err);
                HashMap::new()
            });

        IndexedDocument {
            content: row.get("content"),
            metadata,
        }
    }
}

fn serialize_embedding(embedding: &[f32]) -> Vec<u8> {
    embedding.iter().flat_map(|f| f.to_le_bytes()).collect()
}

fn deserialize_embedding(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

fn cosine_distance(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 1.0;
    }

    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    let denom = norm_a * norm_b;

    if denom <= f32::EPSILON {
        1.0
    } else {
        (1.0 - (dot / denom) as f64).max(0.0)
    }
}

#[async_trait]
impl DocumentIndex for SqliteDocumentIndex {
    async fn query(&self, embedding: &[f32], limit: usize) -> Result<Vec<IndexMatch>, ApiError> {
        let rows = sqlx::query("SELECT content, metadata, embedding FROM documents")
            .fetch_all(&self.pool)
            .await
            .map_err(ApiError::internal)?;

        let mut matches: Vec<IndexMatch> = rows
            .iter()
            .filter_map(|row| {
                let embedding_bytes: Vec<u8> = row.get("embedding");
                if embedding_bytes.is_empty() {
                    return None;
                }
                let stored = deserialize_embedding(&embedding_bytes);

                Some(IndexMatch {
                    document: Self::row_to_document(row),
                    distance: cosine_distance(embedding, &stored),
                })
            })
            .collect();

        matches.sort_by(|a, b| {
            a.distance
                .partial_cmp(&b.distance)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        matches.truncate(limit.max(1));

        Ok(matches)
    }

    async fn scan(&self) -> Result<Vec<IndexedDocument>, ApiError> {
        let rows = sqlx::query("SELECT content, metadata FROM documents ORDER BY created_at")
            .fetch_all(&self.pool)
            .await
            .map_err(ApiError::internal)?;

        Ok(rows.iter().map(Self::row_to_document).collect())
    }

    async fn count(&self) -> Result<usize, ApiError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM documents")
            .fetch_one(&self.pool)
            .await
            .map_err(ApiError::internal)?;

        Ok(count as usize)
    }
}

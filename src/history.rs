//! Conversation and chat-history persistence.
//!
//! Two tables: `conversations` (one row per conversation, authoritative
//! state) and `chat_history` (append-only, one row per turn). All access is
//! through parameterized queries; every row is mapped through a helper.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Row, SqlitePool};

use crate::core::errors::ApiError;

#[derive(Debug, Clone)]
pub struct ConversationRecord {
    pub conversation_id: String,
    pub user_id: String,
    pub context: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

/// Row shape for the per-user conversation listing.
#[derive(Debug, Clone)]
pub struct ConversationSummary {
    pub conversation_id: String,
    pub created_at: String,
    pub updated_at: String,
    pub context: Option<String>,
    pub first_question: Option<String>,
}

/// One persisted turn.
#[derive(Debug, Clone)]
pub struct ChatHistoryMessage {
    pub question: String,
    pub response: String,
    pub sources: Option<String>,
    pub timestamp: String,
}

#[derive(Debug, Clone)]
pub struct HistoryStore {
    db_path: PathBuf,
    pool: SqlitePool,
}

impl HistoryStore {
    pub async fn new(db_path: PathBuf) -> Result<Self, ApiError> {
        let connect_options = SqliteConnectOptions::new()
            .filename(&db_path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .min_connections(1)
            .max_connections(8)
            .acquire_timeout(Duration::from_secs(5))
            .connect_with(connect_options)
            .await
            .map_err(ApiError::internal)?;

        let store = Self { db_path, pool };
        store.init_schema().await?;
        Ok(store)
    }

    pub fn db_path(&self) -> &PathBuf {
        &self.db_path
    }

    async fn init_schema(&self) -> Result<(), ApiError> {
        sqlx::query(
            "\
            CREATE TABLE IF NOT EXISTS conversations (
                conversation_id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                context TEXT,
                created_at TEXT NOT NULL DEFAULT (STRFTIME('%Y-%m-%dT%H:%M:%fZ', 'now')),
                updated_at TEXT NOT NULL DEFAULT (STRFTIME('%Y-%m-%dT%H:%M:%fZ', 'now'))
            )",
        )
        .execute(&self.pool)
        .await
        .map_err(ApiError::internal)?;

        sqlx::query(
            "\
            CREATE TABLE IF NOT EXISTS chat_history (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                conversation_id TEXT,
                user_id TEXT NOT NULL,
                question TEXT NOT NULL,
                response TEXT NOT NULL,
                sources TEXT,
                timestamp TEXT NOT NULL DEFAULT (STRFTIME('%Y-%m-%dT%H:%M:%fZ', 'now')),
                feedback INTEGER
            )",
        )
        .execute(&self.pool)
        .await
        .map_err(ApiError::internal)?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_chat_history_user_id ON chat_history(user_id)")
            .execute(&self.pool)
            .await
            .map_err(ApiError::internal)?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_chat_history_timestamp ON chat_history(timestamp)",
        )
        .execute(&self.pool)
        .await
        .map_err(ApiError::internal)?;

        Ok(())
    }

    /// Insert a new conversation row. Returns `Ok(false)` when the id already
    /// exists (lost a creation race), `Ok(true)` on success.
    pub async fn create_conversation(
        &self,
        conversation_id: &str,
        user_id: &str,
        context: &HashMap<String, String>,
    ) -> Result<bool, ApiError> {
        let context_json = serde_json::to_string(context).map_err(ApiError::internal)?;

        let result = sqlx::query(
            "INSERT INTO conversations (conversation_id, user_id, context) VALUES (?1, ?2, ?3)",
        )
        .bind(conversation_id)
        .bind(user_id)
        .bind(&context_json)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(true),
            Err(sqlx::Error::Database(db_err))
                if db_err.message().contains("UNIQUE constraint failed") =>
            {
                Ok(false)
            }
            Err(err) => Err(ApiError::internal(err)),
        }
    }

    pub async fn get_conversation(
        &self,
        conversation_id: &str,
    ) -> Result<Option<ConversationRecord>, ApiError> {
        let row = sqlx::query(
            "SELECT conversation_id, user_id, context, created_at, updated_at
             FROM conversations WHERE conversation_id = ?1",
        )
        .bind(conversation_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(ApiError::internal)?;

        row.map(|row| conversation_record_from_row(&row))
            .transpose()
            .map_err(ApiError::internal)
    }

    /// The most recently updated conversation for a user, if any.
    pub async fn latest_conversation(
        &self,
        user_id: &str,
    ) -> Result<Option<ConversationRecord>, ApiError> {
        let row = sqlx::query(
            "SELECT conversation_id, user_id, context, created_at, updated_at
             FROM conversations WHERE user_id = ?1
             ORDER BY updated_at DESC LIMIT 1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(ApiError::internal)?;

        row.map(|row| conversation_record_from_row(&row))
            .transpose()
            .map_err(ApiError::internal)
    }

    /// Persist the serialized context and bump `updated_at`.
    pub async fn touch_conversation(
        &self,
        conversation_id: &str,
        context: &HashMap<String, String>,
    ) -> Result<(), ApiError> {
        let context_json = serde_json::to_string(context).map_err(ApiError::internal)?;

        sqlx::query(
            "UPDATE conversations SET context = ?1, updated_at = ?2 WHERE conversation_id = ?3",
        )
        .bind(&context_json)
        .bind(now_timestamp())
        .bind(conversation_id)
        .execute(&self.pool)
        .await
        .map_err(ApiError::internal)?;

        Ok(())
    }

    /// Bump `updated_at` on every conversation older than `cutoff`.
    pub async fn refresh_stale_conversations(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<u64, ApiError> {
        let result = sqlx::query("UPDATE conversations SET updated_at = ?1 WHERE updated_at < ?2")
            .bind(now_timestamp())
            .bind(format_timestamp(cutoff))
            .execute(&self.pool)
            .await
            .map_err(ApiError::internal)?;

        Ok(result.rows_affected())
    }

    /// Append one turn. Never updated or deleted afterwards.
    pub async fn append_history(
        &self,
        conversation_id: &str,
        user_id: &str,
        question: &str,
        response: &str,
        sources_json: &str,
    ) -> Result<(), ApiError> {
        sqlx::query(
            "\
            INSERT INTO chat_history (conversation_id, user_id, question, response, sources)
            VALUES (?1, ?2, ?3, ?4, ?5)",
        )
        .bind(conversation_id)
        .bind(user_id)
        .bind(question)
        .bind(response)
        .bind(sources_json)
        .execute(&self.pool)
        .await
        .map_err(ApiError::internal)?;

        Ok(())
    }

    pub async fn list_user_conversations(
        &self,
        user_id: &str,
    ) -> Result<Vec<ConversationSummary>, ApiError> {
        let rows = sqlx::query(
            "\
            SELECT c.conversation_id, c.created_at, c.updated_at, c.context,
                   (SELECT question FROM chat_history
                    WHERE conversation_id = c.conversation_id
                    ORDER BY timestamp ASC, id ASC LIMIT 1) AS first_question
            FROM conversations c
            WHERE c.user_id = ?1
            ORDER BY c.updated_at DESC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(ApiError::internal)?;

        rows.into_iter()
            .map(|row| conversation_summary_from_row(&row))
            .collect::<Result<Vec<_>, _>>()
            .map_err(ApiError::internal)
    }

    pub async fn conversation_messages(
        &self,
        conversation_id: &str,
    ) -> Result<Vec<ChatHistoryMessage>, ApiError> {
        let rows = sqlx::query(
            "\
            SELECT question, response, sources, timestamp
            FROM chat_history
            WHERE conversation_id = ?1
            ORDER BY timestamp ASC, id ASC",
        )
        .bind(conversation_id)
        .fetch_all(&self.pool)
        .await
        .map_err(ApiError::internal)?;

        rows.into_iter()
            .map(|row| history_message_from_row(&row))
            .collect::<Result<Vec<_>, _>>()
            .map_err(ApiError::internal)
    }
}

fn conversation_record_from_row(
    row: &sqlx::sqlite::SqliteRow,
) -> Result<ConversationRecord, sqlx::Error> {
    Ok(ConversationRecord {
        conversation_id: row.try_get("conversation_id")?,
        user_id: row.try_get("user_id")?,
        context: row.try_get("context")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn conversation_summary_from_row(
    row: &sqlx::sqlite::SqliteRow,
) -> Result<ConversationSummary, sqlx::Error> {
    Ok(ConversationSummary {
        conversation_id: row.try_get("conversation_id")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
        context: row.try_get("context")?,
        first_question: row.try_get("first_question")?,
    })
}

fn history_message_from_row(
    row: &sqlx::sqlite::SqliteRow,
) -> Result<ChatHistoryMessage, sqlx::Error> {
    Ok(ChatHistoryMessage {
        question: row.try_get("question")?,
        response: row.try_get("response")?,
        sources: row.try_get("sources")?,
        timestamp: row.try_get("timestamp")?,
    })
}

/// Current time in the same shape SQLite's STRFTIME default produces.
pub fn now_timestamp() -> String {
    format_timestamp(Utc::now())
}

pub fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Parse a stored timestamp; malformed values fall back to now with a warning.
pub fn parse_timestamp(raw: &str) -> DateTime<Utc> {
    match DateTime::parse_from_rfc3339(raw) {
        Ok(ts) => ts.with_timezone(&Utc),
        Err(err) => {
            tracing::warn!("Malformed stored timestamp '{}': {}", raw, err);
            Utc::now()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn test_store() -> HistoryStore {
        let tmp = std::env::temp_dir().join(format!(
            "lumina-history-test-{}.db",
            uuid::Uuid::new_v4()
        ));
        HistoryStore::new(tmp).await.unwrap()
    }

    #[tokio::test]
    async fn create_and_fetch_conversation() {
        let store = test_store().await;
        let mut context = HashMap::new();
        context.insert("topic".to_string(), "inventory".to_string());

        let created = store
            .create_conversation("conv_1_user", "user-1", &context)
            .await
            .unwrap();
        assert!(created);

        let record = store.get_conversation("conv_1_user").await.unwrap().unwrap();
        assert_eq!(record.user_id, "user-1");
        assert!(record.context.unwrap().contains("inventory"));

        assert!(store.get_conversation("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn duplicate_conversation_insert_is_reported_not_fatal() {
        let store = test_store().await;
        let context = HashMap::new();

        assert!(store
            .create_conversation("conv_dup", "user-1", &context)
            .await
            .unwrap());
        let second = store
            .create_conversation("conv_dup", "user-1", &context)
            .await
            .unwrap();
        assert!(!second);
    }

    #[tokio::test]
    async fn latest_conversation_orders_by_updated_at() {
        let store = test_store().await;
        let context = HashMap::new();

        store
            .create_conversation("conv_a", "user-1", &context)
            .await
            .unwrap();
        store
            .create_conversation("conv_b", "user-1", &context)
            .await
            .unwrap();
        store.touch_conversation("conv_a", &context).await.unwrap();

        let latest = store.latest_conversation("user-1").await.unwrap().unwrap();
        assert_eq!(latest.conversation_id, "conv_a");

        assert!(store.latest_conversation("nobody").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn history_round_trip_and_first_question() {
        let store = test_store().await;
        let context = HashMap::new();
        store
            .create_conversation("conv_h", "user-1", &context)
            .await
            .unwrap();

        store
            .append_history("conv_h", "user-1", "first question?", "answer one", "[]")
            .await
            .unwrap();
        store
            .append_history("conv_h", "user-1", "second question?", "answer two", "[]")
            .await
            .unwrap();

        let messages = store.conversation_messages("conv_h").await.unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].question, "first question?");
        assert_eq!(messages[1].response, "answer two");

        let summaries = store.list_user_conversations("user-1").await.unwrap();
        assert_eq!(summaries.len(), 1);
        assert_eq!(
            summaries[0].first_question.as_deref(),
            Some("first question?")
        );
    }

    #[tokio::test]
    async fn refresh_stale_bumps_old_rows() {
        let store = test_store().await;
        let context = HashMap::new();
        store
            .create_conversation("conv_old", "user-1", &context)
            .await
            .unwrap();

        sqlx::query("UPDATE conversations SET updated_at = '2000-01-01T00:00:00.000Z'")
            .execute(&store.pool)
            .await
            .unwrap();

        let refreshed = store
            .refresh_stale_conversations(Utc::now() - chrono::Duration::seconds(60))
            .await
            .unwrap();
        assert_eq!(refreshed, 1);

        let record = store.get_conversation("conv_old").await.unwrap().unwrap();
        assert!(record.updated_at.starts_with("20"));
        assert_ne!(record.updated_at, "2000-01-01T00:00:00.000Z");
    }

    #[test]
    fn timestamps_round_trip() {
        let now = Utc::now();
        let parsed = parse_timestamp(&format_timestamp(now));
        assert!((parsed - now).num_milliseconds().abs() < 5);
    }
}

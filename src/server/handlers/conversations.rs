use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::response::IntoResponse;
use axum::Json;
use serde_json::{json, Value};

use crate::core::errors::ApiError;
use crate::models::SourceDocument;
use crate::state::AppState;

/// All conversations for a user, most recently updated first.
pub async fn user_conversations(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let summaries = state
        .history
        .list_user_conversations(&user_id)
        .await
        .map_err(|err| {
            tracing::error!("Failed to list conversations for '{}': {}", user_id, err);
            ApiError::Internal("Failed to retrieve conversation list.".to_string())
        })?;

    let conversations: Vec<Value> = summaries
        .into_iter()
        .map(|summary| {
            json!({
                "conversation_id": summary.conversation_id,
                "created_at": summary.created_at,
                "updated_at": summary.updated_at,
                "context": parse_context(summary.context.as_deref()),
                "first_question": summary.first_question,
            })
        })
        .collect();

    Ok(Json(json!({ "conversations": conversations })))
}

/// Full message history of one conversation, oldest first.
pub async fn conversation(
    State(state): State<Arc<AppState>>,
    Path(conversation_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let not_found = || ApiError::NotFound("Conversation not found or an error occurred.".to_string());

    let record = state
        .history
        .get_conversation(&conversation_id)
        .await
        .map_err(|err| {
            tracing::error!("Failed to load conversation '{}': {}", conversation_id, err);
            not_found()
        })?;
    if record.is_none() {
        return Err(not_found());
    }

    let messages = state
        .history
        .conversation_messages(&conversation_id)
        .await
        .map_err(|err| {
            tracing::error!(
                "Failed to load history for '{}': {}",
                conversation_id,
                err
            );
            not_found()
        })?;

    let messages: Vec<Value> = messages
        .into_iter()
        .map(|message| {
            json!({
                "question": message.question,
                "response": message.response,
                "sources": parse_sources(message.sources.as_deref()),
                "timestamp": message.timestamp,
            })
        })
        .collect();

    Ok(Json(json!({ "messages": messages })))
}

fn parse_context(raw: Option<&str>) -> HashMap<String, String> {
    match raw {
        None | Some("") => HashMap::new(),
        Some(raw) => serde_json::from_str(raw).unwrap_or_else(|err| {
            tracing::warn!("Malformed conversation context, returning empty: {}", err);
            HashMap::new()
        }),
    }
}

fn parse_sources(raw: Option<&str>) -> Vec<SourceDocument> {
    match raw {
        None | Some("") => Vec::new(),
        Some(raw) => serde_json::from_str(raw).unwrap_or_else(|err| {
            tracing::warn!("Malformed persisted sources, returning empty: {}", err);
            Vec::new()
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn malformed_context_parses_as_empty() {
        assert!(parse_context(Some("not json")).is_empty());
        assert!(parse_context(None).is_empty());

        let parsed = parse_context(Some(r#"{"topic":"billing"}"#));
        assert_eq!(parsed.get("topic").map(String::as_str), Some("billing"));
    }

    #[test]
    fn malformed_sources_parse_as_empty() {
        assert!(parse_sources(Some("[{broken")).is_empty());

        let parsed = parse_sources(Some(
            r#"[{"source":"faqs","content":"text","details":{}}]"#,
        ));
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].source, "faqs");
    }
}

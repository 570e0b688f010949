use std::sync::Arc;

use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;
use chrono::Utc;

use crate::core::errors::ApiError;
use crate::models::{ChatRequest, ChatResponse, SourceDocument};
use crate::state::AppState;

/// Fixed user-facing apology for unexpected failures; internal detail stays
/// in the logs.
const INTERNAL_ERROR_MESSAGE: &str =
    "I apologize, an unexpected error occurred. Our team has been notified. Please try again shortly.";

pub async fn chat(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<ChatRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if payload.question.is_empty() {
        return Err(ApiError::BadRequest("question must not be empty".to_string()));
    }
    if payload.user_id.is_empty() {
        return Err(ApiError::BadRequest("user_id must not be empty".to_string()));
    }

    let outcome = state
        .chat
        .handle(
            &payload.question,
            &payload.user_id,
            payload.conversation_id.as_deref(),
        )
        .await
        .map_err(|err| {
            tracing::error!(
                "Chat request failed for user '{}': {}",
                payload.user_id,
                err
            );
            ApiError::Internal(INTERNAL_ERROR_MESSAGE.to_string())
        })?;

    let sources: Vec<SourceDocument> = outcome
        .answer
        .sources
        .iter()
        .map(SourceDocument::from)
        .collect();

    Ok(Json(ChatResponse {
        response: outcome.answer.text,
        sources,
        suggested_questions: outcome.answer.suggested_questions,
        timestamp: Utc::now(),
        conversation_id: outcome.conversation_id,
    }))
}

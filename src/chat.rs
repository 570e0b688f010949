//! Chat orchestration: the per-request pipeline.
//!
//! greeting short-circuit → conversation resolution → cache → retrieval →
//! composition → persistence. The canned-answer paths (greeting, empty
//! retrieval) bypass the model entirely; every turn is persisted.

use std::sync::Arc;

use crate::config::ChatSettings;
use crate::conversation::{ConversationManager, ConversationState};
use crate::core::errors::ApiError;
use crate::history::HistoryStore;
use crate::models::SourceDocument;
use crate::rag::{AnswerComposer, ComposedAnswer, DocumentRetriever, GeneratedVia, QueryCache};

const GREETING_TOKENS: [&str; 7] = [
    "hi",
    "hello",
    "hey",
    "good morning",
    "good afternoon",
    "good evening",
    "greetings",
];

const GREETING_SUGGESTIONS: [&str; 4] = [
    "What are the main ERP modules Lumina offers?",
    "How can Lumina ERP benefit my business?",
    "Tell me about your pricing structures.",
    "How do I get technical support for Lumina ERP?",
];

const NO_RESULTS_SUGGESTIONS: [&str; 3] = [
    "Can you please rephrase your question more specifically?",
    "What specific Lumina ERP module are you interested in?",
    "Would you like to speak to a human support agent?",
];

/// Result of one handled turn.
#[derive(Debug, Clone)]
pub struct ChatOutcome {
    pub answer: ComposedAnswer,
    pub conversation_id: String,
}

pub struct ChatService {
    retriever: DocumentRetriever,
    composer: AnswerComposer,
    cache: QueryCache,
    conversations: Arc<ConversationManager>,
    history: HistoryStore,
    settings: ChatSettings,
    retrieval_limit: usize,
}

impl ChatService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        retriever: DocumentRetriever,
        composer: AnswerComposer,
        cache: QueryCache,
        conversations: Arc<ConversationManager>,
        history: HistoryStore,
        settings: ChatSettings,
        retrieval_limit: usize,
    ) -> Self {
        Self {
            retriever,
            composer,
            cache,
            conversations,
            history,
            settings,
            retrieval_limit,
        }
    }

    /// Handle one turn end to end.
    pub async fn handle(
        &self,
        question: &str,
        user_id: &str,
        conversation_id: Option<&str>,
    ) -> Result<ChatOutcome, ApiError> {
        tracing::info!(
            "Chat turn for user '{}' (conversation: {:?}): '{}'",
            user_id,
            conversation_id,
            truncate_for_log(question)
        );

        let conversation = self.conversations.resolve(user_id, conversation_id).await;

        let answer = self.answer(question, user_id).await;

        self.persist_turn(&conversation, question, &answer).await?;

        Ok(ChatOutcome {
            answer,
            conversation_id: conversation.conversation_id,
        })
    }

    /// The retrieval-augmented pipeline. Never errors: every failure mode
    /// ends in a canned or structured fallback answer.
    async fn answer(&self, question: &str, user_id: &str) -> ComposedAnswer {
        if is_greeting(question) {
            tracing::info!("Greeting detected, returning canned greeting");
            return ComposedAnswer {
                text: self.settings.greeting_message.clone(),
                sources: Vec::new(),
                suggested_questions: string_vec(&GREETING_SUGGESTIONS),
                generated_via: GeneratedVia::Fallback,
            };
        }

        if let Some(hit) = self.cache.get(user_id, question) {
            tracing::debug!("Answer cache hit for user '{}'", user_id);
            return hit;
        }

        let docs = self.retriever.retrieve(question, self.retrieval_limit).await;

        if docs.is_empty() {
            tracing::warn!(
                "No relevant documents for '{}', returning generic fallback",
                truncate_for_log(question)
            );
            return ComposedAnswer {
                text: self.settings.fallback_message.clone(),
                sources: Vec::new(),
                suggested_questions: string_vec(&NO_RESULTS_SUGGESTIONS),
                generated_via: GeneratedVia::Fallback,
            };
        }

        let answer = self.composer.compose(question, &docs).await;
        self.cache.insert(user_id, question, answer.clone());
        answer
    }

    async fn persist_turn(
        &self,
        conversation: &ConversationState,
        question: &str,
        answer: &ComposedAnswer,
    ) -> Result<(), ApiError> {
        let sources: Vec<SourceDocument> =
            answer.sources.iter().map(SourceDocument::from).collect();
        let sources_json = serde_json::to_string(&sources).map_err(ApiError::internal)?;

        self.history
            .append_history(
                &conversation.conversation_id,
                &conversation.user_id,
                question,
                &answer.text,
                &sources_json,
            )
            .await?;

        self.conversations.touch(conversation).await?;
        Ok(())
    }
}

fn is_greeting(question: &str) -> bool {
    let normalized = question.trim().to_lowercase();
    GREETING_TOKENS
        .iter()
        .any(|token| normalized.contains(token))
}

fn string_vec(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

fn truncate_for_log(text: &str) -> String {
    text.chars().take(50).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn greeting_detection_is_substring_based() {
        assert!(is_greeting("Hello"));
        assert!(is_greeting("  Hey there  "));
        assert!(is_greeting("GOOD MORNING team"));
        assert!(!is_greeting("How do I track stock levels?"));
    }
}

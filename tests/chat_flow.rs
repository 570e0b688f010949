//! End-to-end tests for the chat pipeline over a temporary SQLite store,
//! with the provider and index seams mocked out.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;

use lumina_backend::chat::ChatService;
use lumina_backend::config::ChatSettings;
use lumina_backend::conversation::ConversationManager;
use lumina_backend::core::errors::ApiError;
use lumina_backend::history::HistoryStore;
use lumina_backend::llm::LlmProvider;
use lumina_backend::rag::{
    AnswerComposer, DocumentIndex, DocumentRetriever, IndexMatch, IndexedDocument, QueryCache,
};

struct CountingProvider {
    response: Option<String>,
    generate_calls: AtomicUsize,
    embed_calls: AtomicUsize,
}

impl CountingProvider {
    fn answering(response: &str) -> Self {
        Self {
            response: Some(response.to_string()),
            generate_calls: AtomicUsize::new(0),
            embed_calls: AtomicUsize::new(0),
        }
    }

    fn failing() -> Self {
        Self {
            response: None,
            generate_calls: AtomicUsize::new(0),
            embed_calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl LlmProvider for CountingProvider {
    fn name(&self) -> &str {
        "counting"
    }

    async fn health_check(&self) -> Result<bool, ApiError> {
        Ok(true)
    }

    async fn generate(&self, _prompt: &str) -> Result<String, ApiError> {
        self.generate_calls.fetch_add(1, Ordering::SeqCst);
        match &self.response {
            Some(text) => Ok(text.clone()),
            None => Err(ApiError::Upstream("generation timed out".to_string())),
        }
    }

    async fn embed(&self, _input: &str) -> Result<Vec<f32>, ApiError> {
        self.embed_calls.fetch_add(1, Ordering::SeqCst);
        Ok(vec![1.0, 0.0])
    }
}

struct CountingIndex {
    matches: Vec<IndexMatch>,
    query_calls: AtomicUsize,
}

impl CountingIndex {
    fn new(matches: Vec<IndexMatch>) -> Self {
        Self {
            matches,
            query_calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl DocumentIndex for CountingIndex {
    async fn query(&self, _embedding: &[f32], limit: usize) -> Result<Vec<IndexMatch>, ApiError> {
        self.query_calls.fetch_add(1, Ordering::SeqCst);
        let mut matches = self.matches.clone();
        matches.truncate(limit);
        Ok(matches)
    }

    async fn scan(&self) -> Result<Vec<IndexedDocument>, ApiError> {
        Ok(self.matches.iter().map(|m| m.document.clone()).collect())
    }

    async fn count(&self) -> Result<usize, ApiError> {
        Ok(self.matches.len())
    }
}

fn faq_match(content: &str, source: &str, distance: f64) -> IndexMatch {
    let mut metadata = HashMap::new();
    metadata.insert("source".to_string(), source.to_string());
    IndexMatch {
        document: IndexedDocument {
            content: content.to_string(),
            metadata,
        },
        distance,
    }
}

struct Harness {
    service: ChatService,
    history: HistoryStore,
    provider: Arc<CountingProvider>,
    index: Arc<CountingIndex>,
    settings: ChatSettings,
    _tmp: TempDir,
}

async fn harness(provider: CountingProvider, index: CountingIndex) -> Harness {
    let tmp = TempDir::new().expect("temp dir");
    let history = HistoryStore::new(tmp.path().join("chat.db"))
        .await
        .expect("history store");

    let provider = Arc::new(provider);
    let index = Arc::new(index);
    let settings = ChatSettings::default();

    let conversations = Arc::new(ConversationManager::new(history.clone(), 1800));
    let retriever = DocumentRetriever::new(provider.clone(), index.clone(), 0.8);
    let composer = AnswerComposer::new(
        provider.clone(),
        Duration::from_secs(5),
        settings.fallback_message.clone(),
    );
    let cache = QueryCache::new(64);

    let service = ChatService::new(
        retriever,
        composer,
        cache,
        conversations,
        history.clone(),
        settings.clone(),
        5,
    );

    Harness {
        service,
        history,
        provider,
        index,
        settings,
        _tmp: tmp,
    }
}

#[tokio::test]
async fn greeting_bypasses_retrieval_and_generation() {
    let h = harness(
        CountingProvider::answering("unused"),
        CountingIndex::new(vec![faq_match("doc", "faqs", 0.1)]),
    )
    .await;

    let outcome = h
        .service
        .handle("Hey there", "user-1", None)
        .await
        .expect("greeting turn");

    assert_eq!(outcome.answer.text, h.settings.greeting_message);
    assert_eq!(outcome.answer.suggested_questions.len(), 4);
    assert!(outcome.answer.sources.is_empty());
    assert_eq!(h.index.query_calls.load(Ordering::SeqCst), 0);
    assert_eq!(h.provider.generate_calls.load(Ordering::SeqCst), 0);
    assert_eq!(h.provider.embed_calls.load(Ordering::SeqCst), 0);

    // Greeting turns are still persisted.
    let messages = h
        .history
        .conversation_messages(&outcome.conversation_id)
        .await
        .expect("messages");
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].question, "Hey there");
}

#[tokio::test]
async fn identical_questions_compose_only_once() {
    let h = harness(
        CountingProvider::answering(
            "You can track stock levels from the Inventory workspace. Feel free to ask for more.\n\n\
             Suggested questions:\n- What is module X?",
        ),
        CountingIndex::new(vec![faq_match("Inventory tracking guide", "faqs", 0.3)]),
    )
    .await;

    let first = h
        .service
        .handle("How do I track stock levels?", "u1", None)
        .await
        .expect("first turn");
    let second = h
        .service
        .handle("How do I track stock levels?", "u1", None)
        .await
        .expect("second turn");

    assert_eq!(first.answer.text, second.answer.text);
    assert_eq!(
        first.answer.suggested_questions,
        second.answer.suggested_questions
    );
    assert_eq!(first.answer.sources.len(), second.answer.sources.len());

    // Retrieval and generation ran once; the second turn was a cache hit.
    assert_eq!(h.provider.generate_calls.load(Ordering::SeqCst), 1);
    assert_eq!(h.provider.embed_calls.load(Ordering::SeqCst), 1);
    assert_eq!(h.index.query_calls.load(Ordering::SeqCst), 1);

    // Both turns persisted into the same conversation.
    assert_eq!(first.conversation_id, second.conversation_id);
    let messages = h
        .history
        .conversation_messages(&first.conversation_id)
        .await
        .expect("messages");
    assert_eq!(messages.len(), 2);
}

#[tokio::test]
async fn empty_retrieval_never_reaches_generation() {
    let h = harness(
        CountingProvider::answering("unused"),
        CountingIndex::new(Vec::new()),
    )
    .await;

    let outcome = h
        .service
        .handle("How do I configure payroll runs?", "u1", None)
        .await
        .expect("turn");

    assert_eq!(outcome.answer.text, h.settings.fallback_message);
    assert_eq!(outcome.answer.suggested_questions.len(), 3);
    assert!(outcome.answer.sources.is_empty());
    assert_eq!(h.provider.generate_calls.load(Ordering::SeqCst), 0);
    assert_eq!(h.index.query_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn generation_failure_surfaces_document_excerpts() {
    let h = harness(
        CountingProvider::failing(),
        CountingIndex::new(vec![
            faq_match("Stock levels update on every goods receipt.", "faqs", 0.2),
            faq_match("Reorder points trigger purchase proposals.", "manual", 0.4),
        ]),
    )
    .await;

    let outcome = h
        .service
        .handle("How do stock levels update?", "u1", None)
        .await
        .expect("turn");

    assert_ne!(outcome.answer.text, h.settings.fallback_message);
    assert!(outcome.answer.text.contains("From faqs"));
    assert!(outcome.answer.text.contains("From manual"));
    assert!(outcome.answer.text.contains("Stock levels update"));
    assert_eq!(outcome.answer.sources.len(), 2);
    assert_eq!(outcome.answer.suggested_questions.len(), 3);
}

#[tokio::test]
async fn turns_accumulate_in_one_conversation_with_first_question() {
    let h = harness(
        CountingProvider::answering("Certainly, the finance module covers ledgers. Feel free to ask."),
        CountingIndex::new(vec![faq_match("Finance module overview", "faqs", 0.2)]),
    )
    .await;

    let first = h
        .service
        .handle("What does the finance module cover?", "u9", None)
        .await
        .expect("first");
    let second = h
        .service
        .handle(
            "Does it support multiple ledgers?",
            "u9",
            Some(&first.conversation_id),
        )
        .await
        .expect("second");

    assert_eq!(first.conversation_id, second.conversation_id);

    let summaries = h
        .history
        .list_user_conversations("u9")
        .await
        .expect("summaries");
    assert_eq!(summaries.len(), 1);
    assert_eq!(
        summaries[0].first_question.as_deref(),
        Some("What does the finance module cover?")
    );
}

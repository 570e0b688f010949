use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::chat::ChatService;
use crate::config::{AppPaths, Settings};
use crate::conversation::ConversationManager;
use crate::history::HistoryStore;
use crate::llm::{GeminiProvider, LlmProvider};
use crate::rag::{
    AnswerComposer, DocumentIndex, DocumentRetriever, QueryCache, SqliteDocumentIndex,
};

#[derive(Clone)]
pub struct AppState {
    pub paths: Arc<AppPaths>,
    pub settings: Settings,
    pub history: HistoryStore,
    pub index: Arc<dyn DocumentIndex>,
    pub provider: Arc<dyn LlmProvider>,
    pub conversations: Arc<ConversationManager>,
    pub chat: Arc<ChatService>,
    #[allow(dead_code)]
    pub started_at: DateTime<Utc>,
}

impl AppState {
    pub async fn initialize(paths: Arc<AppPaths>) -> anyhow::Result<Arc<Self>> {
        let settings = Settings::load(&paths);

        let history = HistoryStore::new(paths.db_path.clone()).await?;
        let index: Arc<dyn DocumentIndex> =
            Arc::new(SqliteDocumentIndex::with_path(paths.index_db_path.clone()).await?);
        let provider: Arc<dyn LlmProvider> = Arc::new(GeminiProvider::new(&settings.llm)?);

        let conversations = Arc::new(ConversationManager::new(
            history.clone(),
            settings.chat.conversation_timeout_secs,
        ));

        let retriever = DocumentRetriever::new(
            provider.clone(),
            index.clone(),
            settings.retrieval.distance_cutoff,
        );
        let composer = AnswerComposer::new(
            provider.clone(),
            Duration::from_secs(settings.llm.request_timeout_secs),
            settings.chat.fallback_message.clone(),
        );
        let cache = QueryCache::new(settings.chat.query_cache_max_entries);

        let chat = Arc::new(ChatService::new(
            retriever,
            composer,
            cache,
            conversations.clone(),
            history.clone(),
            settings.chat.clone(),
            settings.retrieval.limit,
        ));

        let started_at = Utc::now();

        Ok(Arc::new(AppState {
            paths,
            settings,
            history,
            index,
            provider,
            conversations,
            chat,
            started_at,
        }))
    }
}

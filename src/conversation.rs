//! Conversation lifecycle: an in-memory working set over the persisted rows.
//!
//! The working set is a best-effort cache keyed by conversation id; the
//! persisted row is authoritative and the working set can be rebuilt from it
//! at any time. Expired entries leave the working set only, never storage.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Duration, Utc};

use crate::core::errors::ApiError;
use crate::history::{parse_timestamp, ConversationRecord, HistoryStore};

#[derive(Debug, Clone)]
pub struct ConversationState {
    pub conversation_id: String,
    pub user_id: String,
    pub context: HashMap<String, String>,
    pub last_interaction: DateTime<Utc>,
}

pub struct ConversationManager {
    history: HistoryStore,
    active: Mutex<HashMap<String, ConversationState>>,
    timeout: Duration,
}

impl ConversationManager {
    pub fn new(history: HistoryStore, timeout_secs: u64) -> Self {
        Self {
            history,
            active: Mutex::new(HashMap::new()),
            timeout: Duration::seconds(timeout_secs as i64),
        }
    }

    /// Find or create the conversation for this turn.
    ///
    /// Order: working set (matching user), explicit id from storage, the
    /// user's most recent conversation, then a fresh one. Storage errors on
    /// the lookup path are logged and fall through to the next step.
    pub async fn resolve(
        &self,
        user_id: &str,
        conversation_id: Option<&str>,
    ) -> ConversationState {
        self.sweep_expired().await;

        if let Some(id) = conversation_id {
            let active = self.lock_active();
            if let Some(state) = active.get(id) {
                if state.user_id == user_id {
                    tracing::debug!("Conversation '{}' found in working set", id);
                    return state.clone();
                }
                tracing::warn!(
                    "Conversation '{}' in working set belongs to a different user, ignoring",
                    id
                );
            }
        }

        if let Some(id) = conversation_id {
            match self.history.get_conversation(id).await {
                Ok(Some(record)) => {
                    let state = self.hydrate(record);
                    tracing::debug!("Loaded conversation '{}' from storage", id);
                    return state;
                }
                Ok(None) => {
                    tracing::warn!("Conversation id '{}' not found in storage", id);
                }
                Err(err) => {
                    tracing::error!("Failed to load conversation '{}': {}", id, err);
                }
            }
        }

        match self.history.latest_conversation(user_id).await {
            Ok(Some(record)) => {
                let state = self.hydrate(record);
                tracing::info!(
                    "Resumed most recent conversation '{}' for user '{}'",
                    state.conversation_id,
                    user_id
                );
                return state;
            }
            Ok(None) => {
                tracing::info!("No existing conversations for user '{}', creating one", user_id);
            }
            Err(err) => {
                tracing::error!(
                    "Failed to load recent conversation for user '{}': {}",
                    user_id,
                    err
                );
            }
        }

        self.create(user_id).await
    }

    /// Record activity: bump `last_interaction`, refresh the working-set
    /// entry, and persist the serialized context.
    pub async fn touch(&self, state: &ConversationState) -> Result<ConversationState, ApiError> {
        let mut updated = state.clone();
        updated.last_interaction = Utc::now();

        self.lock_active()
            .insert(updated.conversation_id.clone(), updated.clone());

        self.history
            .touch_conversation(&updated.conversation_id, &updated.context)
            .await?;

        Ok(updated)
    }

    /// Evict idle conversations from the working set and refresh the
    /// persisted `updated_at` of rows older than the cutoff. Persistence is
    /// never deleted from here.
    pub async fn sweep_expired(&self) {
        let cutoff = Utc::now() - self.timeout;

        {
            let mut active = self.lock_active();
            let expired: Vec<String> = active
                .iter()
                .filter(|(_, state)| state.last_interaction < cutoff)
                .map(|(id, _)| id.clone())
                .collect();
            for id in expired {
                active.remove(&id);
                tracing::debug!("Evicted expired conversation '{}' from working set", id);
            }
        }

        if let Err(err) = self.history.refresh_stale_conversations(cutoff).await {
            tracing::error!("Conversation sweep failed to refresh storage: {}", err);
        }
    }

    async fn create(&self, user_id: &str) -> ConversationState {
        let truncated_user: String = user_id.chars().take(8).collect();
        let conversation_id = format!("conv_{}_{}", Utc::now().timestamp(), truncated_user);

        let state = ConversationState {
            conversation_id: conversation_id.clone(),
            user_id: user_id.to_string(),
            context: HashMap::new(),
            last_interaction: Utc::now(),
        };

        match self
            .history
            .create_conversation(&conversation_id, user_id, &state.context)
            .await
        {
            Ok(true) => {
                tracing::info!(
                    "Created conversation '{}' for user '{}'",
                    conversation_id,
                    user_id
                );
            }
            Ok(false) => {
                tracing::warn!(
                    "Conversation '{}' already persisted by a concurrent request, continuing",
                    conversation_id
                );
            }
            Err(err) => {
                tracing::error!(
                    "Failed to persist new conversation '{}': {}",
                    conversation_id,
                    err
                );
            }
        }

        self.lock_active()
            .insert(conversation_id.clone(), state.clone());
        state
    }

    fn hydrate(&self, record: ConversationRecord) -> ConversationState {
        let context = match record.context.as_deref() {
            None | Some("") => HashMap::new(),
            Some(raw) => serde_json::from_str::<HashMap<String, String>>(raw).unwrap_or_else(
                |err| {
                    tracing::warn!(
                        "Malformed context for conversation '{}', treating as empty: {}",
                        record.conversation_id,
                        err
                    );
                    HashMap::new()
                },
            ),
        };

        let state = ConversationState {
            conversation_id: record.conversation_id,
            user_id: record.user_id,
            context,
            last_interaction: parse_timestamp(&record.updated_at),
        };

        self.lock_active()
            .insert(state.conversation_id.clone(), state.clone());
        state
    }

    fn lock_active(&self) -> MutexGuard<'_, HashMap<String, ConversationState>> {
        match self.active.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

//! Per-(user, question) answer cache.
//!
//! Keys are the exact strings with no normalization, so paraphrases never
//! share an entry. Hits return the previously composed answer verbatim,
//! sources and follow-ups included, until eviction or process restart.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use super::types::ComposedAnswer;

pub struct QueryCache {
    entries: Mutex<HashMap<(String, String), ComposedAnswer>>,
    max_entries: usize,
}

impl QueryCache {
    pub fn new(max_entries: usize) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            max_entries,
        }
    }

    pub fn get(&self, user_id: &str, question: &str) -> Option<ComposedAnswer> {
        let entries = self.lock();
        entries
            .get(&(user_id.to_string(), question.to_string()))
            .cloned()
    }

    pub fn insert(&self, user_id: &str, question: &str, answer: ComposedAnswer) {
        if self.max_entries == 0 {
            return;
        }

        let key = (user_id.to_string(), question.to_string());
        let mut entries = self.lock();

        if !entries.contains_key(&key) && entries.len() >= self.max_entries {
            // At capacity: drop an arbitrary entry before inserting.
            if let Some(evict) = entries.keys().next().cloned() {
                entries.remove(&evict);
                tracing::debug!("Query cache at capacity, evicted one entry");
            }
        }

        entries.insert(key, answer);
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<(String, String), ComposedAnswer>> {
        match self.entries.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::types::GeneratedVia;
    use super::*;

    fn answer(text: &str) -> ComposedAnswer {
        ComposedAnswer {
            text: text.to_string(),
            sources: Vec::new(),
            suggested_questions: Vec::new(),
            generated_via: GeneratedVia::Model,
        }
    }

    #[test]
    fn hit_returns_stored_answer_verbatim() {
        let cache = QueryCache::new(8);
        assert!(cache.get("u1", "q1").is_none());

        cache.insert("u1", "q1", answer("first"));
        let hit = cache.get("u1", "q1").expect("cached");
        assert_eq!(hit.text, "first");

        // Exact-key semantics: case and whitespace matter.
        assert!(cache.get("u1", "Q1").is_none());
        assert!(cache.get("u1", "q1 ").is_none());
    }

    #[test]
    fn capacity_bound_evicts_one_entry() {
        let cache = QueryCache::new(2);
        cache.insert("u1", "a", answer("a"));
        cache.insert("u1", "b", answer("b"));
        cache.insert("u1", "c", answer("c"));

        assert_eq!(cache.len(), 2);
        assert!(cache.get("u1", "c").is_some());
    }

    #[test]
    fn overwriting_existing_key_does_not_evict() {
        let cache = QueryCache::new(2);
        cache.insert("u1", "a", answer("a"));
        cache.insert("u1", "b", answer("b"));
        cache.insert("u1", "a", answer("a2"));

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get("u1", "a").expect("cached").text, "a2");
        assert!(cache.get("u1", "b").is_some());
    }
}

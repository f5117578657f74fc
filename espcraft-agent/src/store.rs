//! In-memory session store
//!
//! Maps a session id to exactly one [`ConversationState`]. Each session sits
//! behind its own async mutex; holding that lock for the length of an advance
//! is what keeps two requests on the same session from interleaving turns.
//! Different sessions never wait on each other.

use espcraft_core::{ConversationState, Error, Result};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::Mutex as AsyncMutex;

/// Lockable slot holding one session's state
pub type SessionSlot = Arc<AsyncMutex<ConversationState>>;

#[derive(Default)]
pub struct SessionStore {
    sessions: Mutex<HashMap<String, SessionSlot>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn map(&self) -> MutexGuard<'_, HashMap<String, SessionSlot>> {
        // entries are only inserted whole, so a poisoned map is still consistent
        self.sessions.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// The slot for `session_id`, created at `Step::Collect` if missing
    pub fn slot(&self, session_id: &str) -> SessionSlot {
        let mut map = self.map();
        if let Some(slot) = map.get(session_id) {
            return slot.clone();
        }
        tracing::debug!(session_id, "creating session");
        let slot = SessionSlot::default();
        map.insert(session_id.to_string(), slot.clone());
        slot
    }

    /// Current state for `session_id`, creating a fresh one if needed
    pub async fn get_or_create(&self, session_id: &str) -> ConversationState {
        let slot = self.slot(session_id);
        let state = slot.lock().await;
        state.clone()
    }

    /// Current state of an existing session
    pub async fn get(&self, session_id: &str) -> Result<ConversationState> {
        let slot = self
            .map()
            .get(session_id)
            .cloned()
            .ok_or_else(|| Error::session_not_found(session_id).with_operation("store::get"))?;
        let state = slot.lock().await;
        Ok(state.clone())
    }

    /// Replace the state of `session_id`
    pub async fn put(&self, session_id: &str, state: ConversationState) {
        let slot = self.slot(session_id);
        *slot.lock().await = state;
    }

    /// Drop a session. Returns whether it existed.
    pub fn remove(&self, session_id: &str) -> bool {
        self.map().remove(session_id).is_some()
    }

    /// Known session ids, sorted
    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.map().keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.map().len()
    }

    pub fn is_empty(&self) -> bool {
        self.map().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use espcraft_core::{ErrorKind, Step, Turn};

    #[tokio::test]
    async fn test_get_or_create_starts_fresh() {
        let store = SessionStore::new();
        let state = store.get_or_create("bench").await;

        assert_eq!(state, ConversationState::new());
        assert_eq!(state.step(), Step::Collect);
        assert_eq!(store.ids(), vec!["bench"]);
    }

    #[tokio::test]
    async fn test_put_then_get() {
        let store = SessionStore::new();
        let state = ConversationState::new().with_turn(Turn::assistant("ack"));
        store.put("bench", state.clone()).await;

        assert_eq!(store.get("bench").await.unwrap(), state);
        assert_eq!(store.get_or_create("bench").await, state);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_missing_session() {
        let store = SessionStore::new();
        let err = store.get("ghost").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SessionNotFound);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_remove() {
        let store = SessionStore::new();
        store.get_or_create("a").await;
        assert!(store.remove("a"));
        assert!(!store.remove("a"));
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_sessions_are_isolated() {
        let store = SessionStore::new();
        let shared = &store;
        let write = move |id: &'static str, n: usize| async move {
            for i in 0..n {
                let slot = shared.slot(id);
                let mut state = slot.lock().await;
                *state = state.with_user_turn(format!("{}-{}", id, i));
                tokio::task::yield_now().await;
            }
        };

        tokio::join!(write("a", 5), write("b", 3));

        let a = store.get("a").await.unwrap();
        let b = store.get("b").await.unwrap();
        assert_eq!(a.turns().len(), 5);
        assert_eq!(b.turns().len(), 3);
        assert!(a.turns().iter().all(|t| t.text().starts_with("a-")));
        assert!(b.turns().iter().all(|t| t.text().starts_with("b-")));
        assert_eq!(store.ids(), vec!["a", "b"]);
    }
}

//! Per-chat session and temperature state.
//!
//! [`ChatStore`] owns the `chat_id -> conversation` and
//! `chat_id -> temperature` mappings and is injected into handlers through
//! the dispatcher dependency map, so there is no module-global state. All
//! map access goes through one async mutex; session creation happens while
//! that lock is held, which makes `get_or_create` an atomic
//! create-if-absent (two concurrent first messages for a chat cannot both
//! create a session, the second caller observes the first one's).

use crate::llm::{ChatBackend, ChatSession, LlmError, RequestPart, ResponsePart};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::info;

#[derive(Default)]
struct Inner {
    sessions: HashMap<i64, Arc<Mutex<ChatSession>>>,
    temperatures: HashMap<i64, f32>,
}

/// Store of live conversations, keyed by Telegram chat id.
///
/// Sessions are created lazily on first use and live until process
/// shutdown; `/clear` replaces them in place.
pub struct ChatStore {
    backend: Arc<dyn ChatBackend>,
    system_prompt: String,
    default_temperature: f32,
    inner: Mutex<Inner>,
}

impl ChatStore {
    /// Create an empty store backed by `backend`
    pub fn new(
        backend: Arc<dyn ChatBackend>,
        system_prompt: String,
        default_temperature: f32,
    ) -> Self {
        Self {
            backend,
            system_prompt,
            default_temperature,
            inner: Mutex::new(Inner::default()),
        }
    }

    /// Return the chat's session, creating and priming one if absent.
    ///
    /// # Errors
    ///
    /// Returns the backend error if a new session's priming turn fails;
    /// the store is left without an entry so the next message retries.
    pub async fn get_or_create(&self, chat_id: i64) -> Result<Arc<Mutex<ChatSession>>, LlmError> {
        let mut inner = self.inner.lock().await;
        if let Some(session) = inner.sessions.get(&chat_id) {
            return Ok(session.clone());
        }

        info!("Creating new chat session for chat {chat_id}");
        let session = Arc::new(Mutex::new(self.backend.start_chat(&self.system_prompt).await?));
        inner.sessions.insert(chat_id, session.clone());
        Ok(session)
    }

    /// Unconditionally replace the chat's session with a freshly primed one
    /// and drop any stored temperature override.
    ///
    /// # Errors
    ///
    /// Returns the backend error if priming fails; in that case the old
    /// session (if any) is kept so the chat stays usable.
    pub async fn reset(&self, chat_id: i64) -> Result<Arc<Mutex<ChatSession>>, LlmError> {
        let mut inner = self.inner.lock().await;
        let session = Arc::new(Mutex::new(self.backend.start_chat(&self.system_prompt).await?));
        inner.sessions.insert(chat_id, session.clone());
        inner.temperatures.remove(&chat_id);
        info!("Chat session reset for chat {chat_id}");
        Ok(session)
    }

    /// Store a temperature override for the chat, applied from the next
    /// outbound request on
    pub async fn set_temperature(&self, chat_id: i64, value: f32) {
        self.inner.lock().await.temperatures.insert(chat_id, value);
    }

    /// The chat's effective sampling temperature
    pub async fn temperature(&self, chat_id: i64) -> f32 {
        self.inner
            .lock()
            .await
            .temperatures
            .get(&chat_id)
            .copied()
            .unwrap_or(self.default_temperature)
    }

    /// Send one user message into the chat's conversation and return the
    /// reply parts.
    ///
    /// The store lock is released before the backend call; only the
    /// per-chat session mutex is held across it, so slow requests in one
    /// chat never block other chats.
    ///
    /// # Errors
    ///
    /// Propagates backend errors; on failure the conversation history is
    /// unchanged.
    pub async fn send(
        &self,
        chat_id: i64,
        parts: Vec<RequestPart>,
    ) -> Result<Vec<ResponsePart>, LlmError> {
        let session = self.get_or_create(chat_id).await?;
        let temperature = self.temperature(chat_id).await;
        let mut session = session.lock().await;
        self.backend
            .send_message(&mut session, parts, temperature)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::MockChatBackend;
    use serde_json::json;

    fn primed_session() -> ChatSession {
        let mut session = ChatSession::default();
        session.push_turn(json!({ "role": "user", "parts": [{ "text": "[SYSTEM] prime" }] }));
        session.push_turn(json!({ "role": "model", "parts": [{ "text": "UNDERSTOOD_ACCEPT" }] }));
        session
    }

    fn store_with_creations(expected: usize) -> ChatStore {
        let mut backend = MockChatBackend::new();
        backend
            .expect_start_chat()
            .times(expected)
            .returning(|_| Ok(primed_session()));
        ChatStore::new(Arc::new(backend), "prime".to_string(), 1.0)
    }

    #[tokio::test]
    async fn get_or_create_is_idempotent() {
        let store = store_with_creations(1);
        let first = store.get_or_create(7).await.expect("create");
        let second = store.get_or_create(7).await.expect("lookup");
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[tokio::test]
    async fn distinct_chats_get_distinct_sessions() {
        let store = store_with_creations(2);
        let a = store.get_or_create(1).await.expect("create a");
        let b = store.get_or_create(2).await.expect("create b");
        assert!(!Arc::ptr_eq(&a, &b));
    }

    #[tokio::test]
    async fn concurrent_first_messages_create_one_session() {
        let store = Arc::new(store_with_creations(1));
        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let store = store.clone();
                tokio::spawn(async move { store.get_or_create(42).await })
            })
            .collect();
        let mut handles = Vec::new();
        for task in tasks {
            handles.push(task.await.expect("join").expect("create"));
        }
        for handle in &handles[1..] {
            assert!(Arc::ptr_eq(&handles[0], handle));
        }
    }

    #[tokio::test]
    async fn reset_replaces_session_and_temperature() {
        let store = store_with_creations(2);
        let before = store.get_or_create(5).await.expect("create");
        store.set_temperature(5, 1.5).await;

        let after = store.reset(5).await.expect("reset");
        assert!(!Arc::ptr_eq(&before, &after));
        // Fresh session holds only the priming exchange
        assert_eq!(after.lock().await.turn_count(), 2);
        // Override reverted to default
        assert!((store.temperature(5).await - 1.0).abs() < f32::EPSILON);
    }

    #[tokio::test]
    async fn reset_works_for_unknown_chat() {
        let store = store_with_creations(1);
        let session = store.reset(99).await.expect("reset");
        assert_eq!(session.lock().await.turn_count(), 2);
    }

    #[tokio::test]
    async fn failed_creation_leaves_no_entry() {
        let mut backend = MockChatBackend::new();
        let mut created = false;
        backend.expect_start_chat().times(2).returning(move |_| {
            if created {
                Ok(primed_session())
            } else {
                created = true;
                Err(LlmError::NetworkError("offline".to_string()))
            }
        });
        let store = ChatStore::new(Arc::new(backend), "prime".to_string(), 1.0);

        assert!(store.get_or_create(3).await.is_err());
        // Next attempt retries creation instead of returning a broken entry
        assert!(store.get_or_create(3).await.is_ok());
    }

    #[tokio::test]
    async fn temperature_defaults_until_overridden() {
        let store = store_with_creations(0);
        assert!((store.temperature(1).await - 1.0).abs() < f32::EPSILON);
        store.set_temperature(1, 0.2).await;
        assert!((store.temperature(1).await - 0.2).abs() < f32::EPSILON);
        // Other chats unaffected
        assert!((store.temperature(2).await - 1.0).abs() < f32::EPSILON);
    }

    #[tokio::test]
    async fn send_uses_override_and_appends_history() {
        let mut backend = MockChatBackend::new();
        backend
            .expect_start_chat()
            .times(1)
            .returning(|_| Ok(primed_session()));
        backend
            .expect_send_message()
            .times(1)
            .returning(|chat, parts, temperature| {
                assert!((temperature - 1.5).abs() < f32::EPSILON);
                assert_eq!(parts.len(), 1);
                chat.push_turn(json!({ "role": "user", "parts": [{ "text": "hi" }] }));
                chat.push_turn(json!({ "role": "model", "parts": [{ "text": "hello" }] }));
                Ok(vec![ResponsePart::Text("hello".to_string())])
            });
        let store = ChatStore::new(Arc::new(backend), "prime".to_string(), 1.0);

        store.set_temperature(9, 1.5).await;
        let reply = store
            .send(9, vec![RequestPart::Text("hi".to_string())])
            .await
            .expect("send");
        assert_eq!(reply, vec![ResponsePart::Text("hello".to_string())]);

        let session = store.get_or_create(9).await.expect("session");
        assert_eq!(session.lock().await.turn_count(), 4);
    }
}

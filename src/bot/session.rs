//! Per-conversation history for the multi-turn `/chat` command.
//!
//! Each conversation keeps at most `2 × max_turns` entries. Eviction always
//! drops a whole user/assistant pair so the history keeps alternating.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use tokio::sync::{Mutex, RwLock};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    User,
    Assistant,
}

/// One side of an exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub role: Role,
    pub text: String,
}

type History = Arc<Mutex<VecDeque<Entry>>>;

/// In-memory session store, shared by all handlers.
pub struct SessionStore {
    max_turns: usize,
    sessions: RwLock<HashMap<i64, History>>,
}

impl SessionStore {
    pub fn new(max_turns: usize) -> Self {
        Self {
            max_turns: max_turns.max(1),
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Maximum number of stored entries per conversation.
    pub fn window(&self) -> usize {
        self.max_turns * 2
    }

    async fn get(&self, conversation_id: i64) -> Option<History> {
        self.sessions.read().await.get(&conversation_id).cloned()
    }

    async fn get_or_create(&self, conversation_id: i64) -> History {
        if let Some(history) = self.get(conversation_id).await {
            return history;
        }
        let mut sessions = self.sessions.write().await;
        sessions
            .entry(conversation_id)
            .or_insert_with(|| Arc::new(Mutex::new(VecDeque::with_capacity(self.window()))))
            .clone()
    }

    /// Record one user turn and the assistant's reply.
    pub async fn append_exchange(
        &self,
        conversation_id: i64,
        user_text: &str,
        assistant_text: &str,
    ) {
        let history = self.get_or_create(conversation_id).await;
        let mut entries = history.lock().await;

        entries.push_back(Entry {
            role: Role::User,
            text: user_text.to_string(),
        });
        entries.push_back(Entry {
            role: Role::Assistant,
            text: assistant_text.to_string(),
        });

        while entries.len() > self.window() {
            entries.pop_front();
            entries.pop_front();
        }

        debug!("Session {} now holds {} entries", conversation_id, entries.len());
    }

    /// Flatten retained history, oldest first, into one context string.
    pub async fn build_context(&self, conversation_id: i64) -> String {
        let Some(history) = self.get(conversation_id).await else {
            return String::new();
        };
        let entries = history.lock().await;
        entries
            .iter()
            .map(|e| e.text.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Snapshot of a conversation's retained entries.
    pub async fn history(&self, conversation_id: i64) -> Vec<Entry> {
        match self.get(conversation_id).await {
            Some(history) => history.lock().await.iter().cloned().collect(),
            None => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_empty_context_for_unknown_conversation() {
        let store = SessionStore::new(3);
        assert_eq!(store.build_context(42).await, "");
        assert!(store.history(42).await.is_empty());
    }

    #[tokio::test]
    async fn test_context_is_chronological() {
        let store = SessionStore::new(3);
        store.append_exchange(1, "hi", "hello").await;
        store.append_exchange(1, "how are you", "fine").await;
        assert_eq!(store.build_context(1).await, "hi\nhello\nhow are you\nfine");
    }

    #[tokio::test]
    async fn test_window_evicts_oldest_pairs() {
        let n = 4;
        let store = SessionStore::new(n);
        for i in 0..(2 * n + 1) {
            store.append_exchange(7, &format!("u{i}"), &format!("a{i}")).await;
        }

        let history = store.history(7).await;
        assert_eq!(history.len(), store.window());

        // Oldest retained exchange is the (n + 1)th one
        let first_kept = n + 1;
        assert_eq!(history[0].text, format!("u{first_kept}"));
        assert_eq!(history.last().unwrap().text, format!("a{}", 2 * n));

        // Still alternating user/assistant
        for (i, entry) in history.iter().enumerate() {
            let expected = if i % 2 == 0 { Role::User } else { Role::Assistant };
            assert_eq!(entry.role, expected);
        }
    }

    #[tokio::test]
    async fn test_twenty_five_turns_with_window_of_twenty() {
        let store = SessionStore::new(20);
        for i in 0..25 {
            store.append_exchange(1, &format!("q{i}"), &format!("r{i}")).await;
        }

        let history = store.history(1).await;
        assert_eq!(history.len(), 40);

        assert!(history.iter().all(|e| e.text != "q4" && e.text != "r4"));

        let context = store.build_context(1).await;
        assert!(context.starts_with("q5\nr5\n"));
        assert!(context.ends_with("q24\nr24"));
    }

    #[tokio::test]
    async fn test_sessions_are_isolated() {
        let store = SessionStore::new(5);
        store.append_exchange(1, "secret from A", "ok A").await;
        store.append_exchange(2, "hello from B", "ok B").await;

        let context_b = store.build_context(2).await;
        assert!(!context_b.contains("secret from A"));
        assert!(!context_b.contains("ok A"));
        assert_eq!(context_b, "hello from B\nok B");
    }

    #[tokio::test]
    async fn test_concurrent_appends_across_conversations() {
        let store = Arc::new(SessionStore::new(50));
        let mut handles = Vec::new();
        for chat in 0..8i64 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                for i in 0..10 {
                    store.append_exchange(chat, &format!("c{chat} u{i}"), "ok").await;
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        for chat in 0..8i64 {
            let history = store.history(chat).await;
            assert_eq!(history.len(), 20);
            assert!(history
                .iter()
                .filter(|e| e.role == Role::User)
                .all(|e| e.text.starts_with(&format!("c{chat} "))));
        }
    }
}

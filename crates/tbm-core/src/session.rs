//! In-memory per-user session store.
//!
//! Last write wins, no eviction, no TTL. Contents live as long as the process.

use dashmap::{mapref::entry::Entry, DashMap};
use serde::{Deserialize, Serialize};

use crate::domain::{BotId, UserId};

/// Concurrent `UserId -> V` map.
///
/// Each key is guarded by its shard lock, so readers never see a half-written
/// value and writers to different users rarely contend.
#[derive(Debug)]
pub struct SessionStore<V> {
    sessions: DashMap<UserId, V>,
}

impl<V> Default for SessionStore<V> {
    fn default() -> Self {
        Self {
            sessions: DashMap::new(),
        }
    }
}

impl<V: Clone> SessionStore<V> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Unconditional overwrite.
    pub fn save(&self, user_id: UserId, value: V) {
        self.sessions.insert(user_id, value);
    }

    pub fn load(&self, user_id: UserId) -> Option<V> {
        self.sessions.get(&user_id).map(|v| v.value().clone())
    }

    /// Atomic read-modify-write of one user's value.
    pub fn update<F>(&self, user_id: UserId, f: F) -> V
    where
        F: FnOnce(Option<&V>) -> V,
    {
        match self.sessions.entry(user_id) {
            Entry::Occupied(mut o) => {
                let next = f(Some(o.get()));
                o.insert(next.clone());
                next
            }
            Entry::Vacant(v) => {
                let next = f(None);
                v.insert(next.clone());
                next
            }
        }
    }

    pub fn remove(&self, user_id: UserId) -> Option<V> {
        self.sessions.remove(&user_id).map(|(_, v)| v)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

/// What the message pipeline remembers about a user.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserSession {
    /// Bot the user last talked to.
    pub bot_id: Option<BotId>,
    pub last_text: Option<String>,
    pub message_count: u64,
    pub last_seen_ms: i64,
}

impl UserSession {
    /// Fold one inbound message into the previous record.
    pub fn record(prev: Option<&UserSession>, bot_id: BotId, text: &str, now_ms: i64) -> Self {
        let count = prev.map(|p| p.message_count).unwrap_or(0);
        Self {
            bot_id: Some(bot_id),
            last_text: if text.is_empty() {
                prev.and_then(|p| p.last_text.clone())
            } else {
                Some(text.to_string())
            },
            message_count: count + 1,
            last_seen_ms: now_ms,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn save_then_load_round_trips() {
        let store = SessionStore::new();
        store.save(UserId(1), "v".to_string());
        assert_eq!(store.load(UserId(1)).as_deref(), Some("v"));
    }

    #[test]
    fn load_unknown_user_is_none() {
        let store: SessionStore<String> = SessionStore::new();
        assert!(store.load(UserId(42)).is_none());
        assert!(store.is_empty());
    }

    #[test]
    fn last_write_wins() {
        let store = SessionStore::new();
        store.save(UserId(1), 1u32);
        store.save(UserId(1), 2u32);
        assert_eq!(store.load(UserId(1)), Some(2));
        assert_eq!(store.len(), 1);
        assert_eq!(store.remove(UserId(1)), Some(2));
        assert!(store.load(UserId(1)).is_none());
    }

    #[test]
    fn concurrent_updates_are_not_lost() {
        let store = Arc::new(SessionStore::<u64>::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = store.clone();
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        store.update(UserId(9), |v| v.copied().unwrap_or(0) + 1);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(store.load(UserId(9)), Some(8000));
    }

    #[test]
    fn user_session_keeps_last_text_on_empty_message() {
        let first = UserSession::record(None, BotId(1), "hello", 10);
        let second = UserSession::record(Some(&first), BotId(1), "", 20);
        assert_eq!(second.message_count, 2);
        assert_eq!(second.last_text.as_deref(), Some("hello"));
        assert_eq!(second.last_seen_ms, 20);
    }
}

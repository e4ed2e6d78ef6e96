//! Session records and their thread-safe store.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

/// Lifecycle state of a [`GenerationSession`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Active,
    Expired,
}

/// One submitted query and the correlation id used for its stream and cache.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationSession {
    pub id: String,
    /// `None` for anonymous requesters.
    pub owner_id: Option<String>,
    pub query_text: String,
    pub created_at: DateTime<Utc>,
    pub status: SessionStatus,
}

impl GenerationSession {
    fn new(owner_id: Option<String>, query_text: String) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            owner_id,
            query_text,
            created_at: Utc::now(),
            status: SessionStatus::Active,
        }
    }

    /// Time elapsed since creation.
    #[must_use]
    pub fn age(&self) -> Duration {
        (Utc::now() - self.created_at)
            .to_std()
            .unwrap_or(Duration::ZERO)
    }
}

/// Thread-safe store for sessions.
///
/// Cloning is cheap; clones share the same underlying map.
#[derive(Debug, Clone, Default)]
pub struct SessionStore {
    inner: Arc<RwLock<HashMap<String, GenerationSession>>>,
}

impl SessionStore {
    /// Create an empty session store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Mint and store a new active session.
    pub fn create(&self, owner_id: Option<&str>, query_text: &str) -> GenerationSession {
        let session = GenerationSession::new(owner_id.map(str::to_string), query_text.to_string());
        self.insert(session.clone());
        session
    }

    /// Insert or replace a session record.
    pub fn insert(&self, session: GenerationSession) {
        let mut guard = self.inner.write().unwrap_or_else(std::sync::PoisonError::into_inner);
        guard.insert(session.id.clone(), session);
    }

    /// Get a session by id.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<GenerationSession> {
        let guard = self.inner.read().unwrap_or_else(std::sync::PoisonError::into_inner);
        guard.get(id).cloned()
    }

    /// Return the newest active session of `owner_id` created within
    /// `window` whose query matches `query_text` (ignoring surrounding
    /// whitespace), or create one. The flag is `true` when a session was
    /// reused.
    ///
    /// Lookup and insert happen under one write lock, so concurrent
    /// duplicates resolve to a single session. Anonymous callers always get
    /// a new session.
    pub fn find_or_create(
        &self,
        owner_id: Option<&str>,
        query_text: &str,
        window: Duration,
    ) -> (GenerationSession, bool) {
        let query = query_text.trim();
        let mut guard = self.inner.write().unwrap_or_else(std::sync::PoisonError::into_inner);

        if let Some(owner) = owner_id {
            let existing = guard
                .values()
                .filter(|s| s.owner_id.as_deref() == Some(owner))
                .filter(|s| s.status == SessionStatus::Active && s.age() < window)
                .filter(|s| s.query_text.trim() == query)
                .max_by_key(|s| s.created_at);
            if let Some(session) = existing {
                return (session.clone(), true);
            }
        }

        let session = GenerationSession::new(owner_id.map(str::to_string), query.to_string());
        guard.insert(session.id.clone(), session.clone());
        (session, false)
    }

    /// Mark a session expired. Returns `false` if it does not exist.
    pub fn expire(&self, id: &str) -> bool {
        let mut guard = self.inner.write().unwrap_or_else(std::sync::PoisonError::into_inner);
        match guard.get_mut(id) {
            Some(session) => {
                session.status = SessionStatus::Expired;
                true
            }
            None => false,
        }
    }

    /// Expire sessions older than `max_age` and drop expired ones older than
    /// twice that. Returns the number of sessions newly expired.
    pub fn expire_older_than(&self, max_age: Duration) -> usize {
        let mut guard = self.inner.write().unwrap_or_else(std::sync::PoisonError::into_inner);
        guard.retain(|_, s| s.status == SessionStatus::Active || s.age() < max_age * 2);

        let mut expired = 0;
        for session in guard.values_mut() {
            if session.status == SessionStatus::Active && session.age() >= max_age {
                session.status = SessionStatus::Expired;
                expired += 1;
            }
        }
        expired
    }

    /// Number of stored sessions, active or expired.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.read().unwrap_or_else(std::sync::PoisonError::into_inner).len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backdate(store: &SessionStore, id: &str, by: Duration) {
        let mut session = store.get(id).unwrap();
        session.created_at -= chrono::Duration::from_std(by).unwrap();
        store.insert(session);
    }

    #[test]
    fn test_session_store() {
        let store = SessionStore::new();
        assert!(store.is_empty());

        let session = store.create(Some("u1"), "ramen");
        assert_eq!(store.len(), 1);
        assert_eq!(store.get(&session.id).unwrap().query_text, "ramen");
        assert_eq!(session.status, SessionStatus::Active);
    }

    #[test]
    fn test_find_or_create_filters() {
        let store = SessionStore::new();
        let window = Duration::from_secs(600);
        let mine = store.create(Some("u1"), "a");
        let old = store.create(Some("u1"), "a");
        let expired = store.create(Some("u1"), "a");
        store.create(Some("u2"), "a");
        store.create(None, "a");

        backdate(&store, &old.id, Duration::from_secs(3600));
        store.expire(&expired.id);

        let (found, reused) = store.find_or_create(Some("u1"), " a ", window);
        assert!(reused);
        assert_eq!(found.id, mine.id);

        let (other, reused) = store.find_or_create(Some("u1"), "b", window);
        assert!(!reused);
        assert_eq!(store.get(&other.id).unwrap().query_text, "b");
    }

    #[test]
    fn test_concurrent_duplicates_share_one_session() {
        let store = SessionStore::new();
        let handles: Vec<_> = (0..16)
            .map(|_| {
                let store = store.clone();
                std::thread::spawn(move || {
                    store.find_or_create(Some("u1"), "tapas in Madrid", Duration::from_secs(600))
                })
            })
            .collect();
        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        let first = &results[0].0.id;
        assert!(results.iter().all(|(s, _)| &s.id == first));
        assert_eq!(results.iter().filter(|(_, reused)| !reused).count(), 1);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_expire_older_than() {
        let store = SessionStore::new();
        let fresh = store.create(None, "fresh");
        let stale = store.create(None, "stale");
        let ancient = store.create(None, "ancient");
        backdate(&store, &stale.id, Duration::from_secs(700));
        backdate(&store, &ancient.id, Duration::from_secs(5000));
        store.expire(&ancient.id);

        assert_eq!(store.expire_older_than(Duration::from_secs(600)), 1);
        assert_eq!(store.get(&fresh.id).unwrap().status, SessionStatus::Active);
        assert_eq!(store.get(&stale.id).unwrap().status, SessionStatus::Expired);
        assert!(store.get(&ancient.id).is_none());
    }
}

//! Session reuse for rapid duplicate submissions.

use std::time::Duration;

use super::SessionStore;

/// Outcome of [`SessionResolver::resolve`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub session_id: String,
    /// `true` when an existing session was matched.
    pub reused: bool,
}

/// Decides whether a request reuses an existing generation session.
///
/// Identified requesters reuse their newest active session from within the
/// recency window whose query equals the incoming one (ignoring surrounding
/// whitespace). Anonymous requesters always get a new session.
#[derive(Debug, Clone)]
pub struct SessionResolver {
    store: SessionStore,
    window: Duration,
}

impl SessionResolver {
    #[must_use]
    pub fn new(store: SessionStore, window: Duration) -> Self {
        Self { store, window }
    }

    #[must_use]
    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    pub fn resolve(&self, owner_id: Option<&str>, query: &str) -> Resolution {
        let (session, reused) = self.store.find_or_create(owner_id, query, self.window);
        if reused {
            tracing::debug!(session_id = %session.id, owner_id = ?owner_id, "Reusing recent session");
        } else {
            tracing::debug!(session_id = %session.id, anonymous = owner_id.is_none(), "Created new session");
        }
        Resolution {
            session_id: session.id,
            reused,
        }
    }
}

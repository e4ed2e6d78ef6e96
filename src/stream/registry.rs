//! One event channel per active session.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tokio::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

use crate::domain::Domain;
use crate::error::RegistryError;
use crate::normalized::StreamEnvelope;

/// A registered session channel.
///
/// Exactly one producer may take the sending half and exactly one consumer
/// the receiving half. Once the producer drops its sender the consumer sees
/// the channel close. The cancellation token fires when the entry is closed so
/// the producer can stop.
#[derive(Debug)]
pub struct SessionChannel {
    session_id: String,
    domain: Domain,
    sender: Mutex<Option<mpsc::Sender<StreamEnvelope>>>,
    receiver: Mutex<Option<mpsc::Receiver<StreamEnvelope>>>,
    cancel: CancellationToken,
    created_at: Instant,
}

impl SessionChannel {
    #[must_use]
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    #[must_use]
    pub fn domain(&self) -> Domain {
        self.domain
    }

    /// Take the sending half. Returns `None` once a producer has attached.
    pub fn take_sender(&self) -> Option<mpsc::Sender<StreamEnvelope>> {
        self.sender
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .take()
    }

    /// Token cancelled when this entry is closed.
    #[must_use]
    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Take the receiving half. Returns `None` once a consumer has attached.
    pub fn take_receiver(&self) -> Option<mpsc::Receiver<StreamEnvelope>> {
        self.receiver
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .take()
    }

    #[must_use]
    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }
}

/// Registry of live session channels.
///
/// Invariant: at most one channel per session id. [`StreamRegistry::create`]
/// rejects a second registration instead of replacing the first.
#[derive(Debug, Clone)]
pub struct StreamRegistry {
    channels: Arc<Mutex<HashMap<String, Arc<SessionChannel>>>>,
    capacity: usize,
}

impl StreamRegistry {
    /// Create a registry whose channels buffer up to `capacity` envelopes.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            channels: Arc::new(Mutex::new(HashMap::new())),
            capacity: capacity.max(1),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Arc<SessionChannel>>> {
        self.channels
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Register a channel for `session_id`.
    pub fn create(
        &self,
        session_id: &str,
        domain: Domain,
    ) -> Result<Arc<SessionChannel>, RegistryError> {
        let mut channels = self.lock();
        if channels.contains_key(session_id) {
            return Err(RegistryError::AlreadyActive(session_id.to_string()));
        }

        let (sender, receiver) = mpsc::channel(self.capacity);
        let channel = Arc::new(SessionChannel {
            session_id: session_id.to_string(),
            domain,
            sender: Mutex::new(Some(sender)),
            receiver: Mutex::new(Some(receiver)),
            cancel: CancellationToken::new(),
            created_at: Instant::now(),
        });
        channels.insert(session_id.to_string(), Arc::clone(&channel));

        tracing::info!(name: "stream.opened", session_id = %session_id, domain = %domain, "Stream registered");
        Ok(channel)
    }

    /// Look up the live channel for `session_id`.
    #[must_use]
    pub fn get(&self, session_id: &str) -> Option<Arc<SessionChannel>> {
        self.lock().get(session_id).cloned()
    }

    /// Remove the entry and cancel its producer. Returns `false` if absent.
    pub fn close(&self, session_id: &str) -> bool {
        let removed = self.lock().remove(session_id);
        match removed {
            Some(channel) => {
                channel.cancel.cancel();
                tracing::info!(name: "stream.closed", session_id = %session_id, "Stream closed");
                true
            }
            None => false,
        }
    }

    /// Close the entry only if it is still `channel`, so a stale consumer
    /// never tears down a newer registration for the same id.
    pub fn close_channel(&self, channel: &Arc<SessionChannel>) -> bool {
        let mut channels = self.lock();
        let is_current = channels
            .get(channel.session_id())
            .is_some_and(|current| Arc::ptr_eq(current, channel));
        if !is_current {
            return false;
        }
        channels.remove(channel.session_id());
        drop(channels);

        channel.cancel.cancel();
        tracing::info!(name: "stream.closed", session_id = %channel.session_id(), "Stream closed");
        true
    }

    /// Close every entry older than `max_age`. Returns how many were closed.
    pub fn reap_older_than(&self, max_age: Duration) -> usize {
        let stale: Vec<Arc<SessionChannel>> = self
            .lock()
            .values()
            .filter(|c| c.age() >= max_age)
            .cloned()
            .collect();

        stale.iter().filter(|c| self.close_channel(c)).count()
    }

    /// Number of live entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_then_get_returns_same_channel() {
        let registry = StreamRegistry::new(8);
        let created = registry.create("s1", Domain::Dining).unwrap();
        let fetched = registry.get("s1").unwrap();
        assert!(Arc::ptr_eq(&created, &fetched));
        assert_eq!(fetched.domain(), Domain::Dining);
    }

    #[test]
    fn test_duplicate_create_is_rejected() {
        let registry = StreamRegistry::new(8);
        registry.create("s1", Domain::Dining).unwrap();
        let err = registry.create("s1", Domain::Lodging).unwrap_err();
        assert!(matches!(err, RegistryError::AlreadyActive(id) if id == "s1"));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_close_removes_and_cancels() {
        let registry = StreamRegistry::new(8);
        let channel = registry.create("s1", Domain::Dining).unwrap();
        let token = channel.cancellation();

        assert!(registry.close("s1"));
        assert!(registry.get("s1").is_none());
        assert!(token.is_cancelled());
        assert!(!registry.close("s1"));
    }

    #[test]
    fn test_halves_taken_once() {
        let registry = StreamRegistry::new(8);
        let channel = registry.create("s1", Domain::Dining).unwrap();
        assert!(channel.take_receiver().is_some());
        assert!(channel.take_receiver().is_none());
        assert!(channel.take_sender().is_some());
        assert!(channel.take_sender().is_none());
    }

    #[test]
    fn test_close_channel_ignores_stale_handle() {
        let registry = StreamRegistry::new(8);
        let old = registry.create("s1", Domain::Dining).unwrap();
        registry.close("s1");
        let new = registry.create("s1", Domain::Dining).unwrap();

        assert!(!registry.close_channel(&old));
        assert!(registry.get("s1").is_some());
        assert!(registry.close_channel(&new));
        assert!(registry.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_reap_older_than() {
        let registry = StreamRegistry::new(8);
        registry.create("old", Domain::Dining).unwrap();
        tokio::time::advance(Duration::from_secs(120)).await;
        registry.create("new", Domain::Dining).unwrap();

        assert_eq!(registry.reap_older_than(Duration::from_secs(60)), 1);
        assert!(registry.get("old").is_none());
        assert!(registry.get("new").is_some());
    }

    #[tokio::test]
    async fn test_concurrent_create_admits_one() {
        let registry = StreamRegistry::new(8);
        let mut handles = Vec::new();
        for _ in 0..16 {
            let registry = registry.clone();
            handles.push(tokio::spawn(async move {
                registry.create("shared", Domain::Activities).is_ok()
            }));
        }
        let mut admitted = 0;
        for h in handles {
            if h.await.unwrap() {
                admitted += 1;
            }
        }
        assert_eq!(admitted, 1);
    }
}

use std::collections::HashMap;
use std::sync::RwLock;
use std::sync::atomic::{AtomicUsize, Ordering};

use anyhow::Result;
use async_trait::async_trait;

use crate::persistence::ResultStore;

/// Process-local result store.
///
/// Keeps every saved result per session and counts reads, which lets tests
/// assert that cache hits never reach the backing store.
#[derive(Debug, Default)]
pub struct InMemoryResultStore {
    results: RwLock<HashMap<String, Vec<String>>>,
    reads: AtomicUsize,
}

impl InMemoryResultStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of `latest_result_for_session` calls served so far.
    #[must_use]
    pub fn read_count(&self) -> usize {
        self.reads.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl ResultStore for InMemoryResultStore {
    async fn latest_result_for_session(&self, session_id: &str) -> Result<Option<String>> {
        self.reads.fetch_add(1, Ordering::Relaxed);
        let guard = self
            .results
            .read()
            .map_err(|e| anyhow::anyhow!("result store lock poisoned: {e}"))?;
        Ok(guard.get(session_id).and_then(|v| v.last().cloned()))
    }

    async fn save_result(&self, session_id: &str, raw: &str) -> Result<()> {
        let mut guard = self
            .results
            .write()
            .map_err(|e| anyhow::anyhow!("result store lock poisoned: {e}"))?;
        guard
            .entry(session_id.to_string())
            .or_default()
            .push(raw.to_string());
        Ok(())
    }
}

//! Backing store for generation results.
//!
//! The relational store is an external collaborator; the pipeline only needs
//! to write the raw result of a finished generation and read back the latest
//! one for a session. Parsing the raw text is the cache's job.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;

use crate::config::PersistenceConfig;

pub mod providers;

#[async_trait]
pub trait ResultStore: Send + Sync + std::fmt::Debug {
    /// Latest stored raw result for `session_id`, if any.
    async fn latest_result_for_session(&self, session_id: &str) -> Result<Option<String>>;

    /// Append a raw result for `session_id`.
    async fn save_result(&self, session_id: &str, raw: &str) -> Result<()>;
}

/// Build the configured result store.
pub async fn connect(config: &PersistenceConfig) -> Result<Arc<dyn ResultStore>> {
    match config.provider.as_str() {
        "postgres" => {
            let provider = providers::postgres::PostgresResultStore::new(&config.database_url).await?;
            Ok(Arc::new(provider))
        }
        "memory" => Ok(Arc::new(providers::memory::InMemoryResultStore::new())),
        other => anyhow::bail!("unknown persistence provider: {other}"),
    }
}

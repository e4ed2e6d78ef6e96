//! Travel result delivery
//!
//! Streams generated travel recommendations to a client as they are produced
//! and keeps the finished result set available to later domain views
//! (itinerary, lodging, dining, activities) without re-running generation.
//!
//! # Architecture
//!
//! - **Server**: Axum-based HTTP server with SSE streaming and a WebSocket location channel
//! - **Pipeline**: one producer task per session feeding a bounded channel
//! - **Cache**: TTL-bounded complete-set and per-domain caches with backing-store fallback
//!
//! # Modules
//!
//! - [`intent`]: keyword-weighted domain classification
//! - [`session`]: generation sessions and reuse resolution
//! - [`stream`]: registry, translator and transport loop
//! - [`cache`]: result caches
//! - [`normalized`]: envelope model and SSE framing

// Allow pedantic clippy warnings that don't add value for this codebase
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::missing_fields_in_debug)]
#![allow(clippy::implicit_hasher)]
#![allow(clippy::match_same_arms)]
#![allow(clippy::cargo_common_metadata)]
#![allow(clippy::multiple_crate_versions)]
#![allow(clippy::unused_async)]

pub mod cache;
pub mod config;
pub mod domain;
pub mod error;
pub mod generation;
pub mod intent;
pub mod nearby;
pub mod normalized;
pub mod persistence;
pub mod pipeline;
pub mod security;
pub mod server;
pub mod session;
pub mod stream;
pub mod telemetry;

use std::sync::Arc;

use crate::cache::ResultCache;
use crate::config::AppConfig;
use crate::domain::CategoryTable;
use crate::generation::GenerationEngine;
use crate::intent::IntentClassifier;
use crate::persistence::ResultStore;
use crate::pipeline::{Pipeline, PipelineSettings};
use crate::security::SlidingWindowLimiter;
use crate::session::{SessionResolver, SessionStore};
use crate::stream::StreamRegistry;

/// Application state shared across all handlers.
#[derive(Clone, Debug)]
pub struct AppState {
    /// Starts and reuses generation sessions.
    pub pipeline: Pipeline,
    /// Live session channels.
    pub registry: StreamRegistry,
    /// Result cache with backing-store fallback.
    pub cache: ResultCache,
    /// Session index shared with the resolver.
    pub sessions: SessionStore,
    /// Nearby channel rate limiter
    pub limiter: Arc<SlidingWindowLimiter>,
    /// Global Configuration
    pub config: Arc<AppConfig>,
}

impl AppState {
    /// Wire the pipeline from configuration and its two external collaborators.
    pub fn new(
        config: Arc<AppConfig>,
        store: Arc<dyn ResultStore>,
        engine: Arc<dyn GenerationEngine>,
    ) -> Self {
        Self::with_classifier(config, store, engine, IntentClassifier::default())
    }

    pub fn with_classifier(
        config: Arc<AppConfig>,
        store: Arc<dyn ResultStore>,
        engine: Arc<dyn GenerationEngine>,
        classifier: IntentClassifier,
    ) -> Self {
        let registry = StreamRegistry::new(config.stream.channel_capacity);
        let cache = ResultCache::new(config.cache.ttl(), CategoryTable::default(), store)
            .with_repopulate(config.cache.repopulate_on_fallback);
        let sessions = SessionStore::new();
        let resolver = SessionResolver::new(sessions.clone(), config.session.reuse_window());
        let pipeline = Pipeline::new(
            registry.clone(),
            cache.clone(),
            resolver,
            classifier,
            engine,
            PipelineSettings::from(config.as_ref()),
        );

        Self {
            pipeline,
            registry,
            cache,
            sessions,
            limiter: Arc::new(SlidingWindowLimiter::from_config(&config.rate_limit)),
            config,
        }
    }
}

//! Result-delivery pipeline.
//!
//! [`Pipeline::start`] resolves the session, classifies the query, opens the
//! session's registry entry and spawns one producer task that drives the
//! generation engine. The producer is the sole writer to the channel; the
//! [`TransportLoop`](crate::stream::TransportLoop) attached by the stream
//! endpoint is the sole reader.
//!
//! On `complete` the unified result set is cached under the session id (and
//! the explicit cache key, if any) and saved to the backing store before the
//! `complete` envelope is sent, so any view opened from the navigation URL
//! is served from cache.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use serde::Serialize;
use tokio::sync::mpsc::{self, error::SendTimeoutError};
use tokio_util::sync::CancellationToken;

use crate::cache::{ResultCache, is_valid_key};
use crate::config::AppConfig;
use crate::domain::{Domain, ResultSet};
use crate::error::{PipelineError, RegistryError};
use crate::generation::{GenerationEngine, GenerationRequest};
use crate::intent::IntentClassifier;
use crate::normalized::{EnvelopeBody, StreamEnvelope};
use crate::session::SessionResolver;
use crate::stream::{EventTranslator, ProducerEvent, StreamRegistry};

/// Timing knobs for producer tasks.
#[derive(Debug, Clone, Copy)]
pub struct PipelineSettings {
    /// Upper bound on a single channel send.
    pub send_timeout: Duration,
    /// Upper bound on a whole generation run.
    pub session_timeout: Duration,
    /// Upper bound on persisting a finished result.
    pub persist_timeout: Duration,
}

impl From<&AppConfig> for PipelineSettings {
    fn from(config: &AppConfig) -> Self {
        Self {
            send_timeout: config.stream.send_timeout(),
            session_timeout: config.stream.session_timeout(),
            persist_timeout: config.persistence.write_timeout(),
        }
    }
}

/// Response to a started (or reused) generation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StartedSession {
    pub session_id: String,
    pub stream_url: String,
    pub domain: Domain,
    /// An existing session was matched.
    pub reused: bool,
    /// The result is already cached; no generation was started.
    pub cached: bool,
}

#[derive(Debug, Clone)]
pub struct Pipeline {
    registry: StreamRegistry,
    cache: ResultCache,
    resolver: SessionResolver,
    classifier: Arc<IntentClassifier>,
    engine: Arc<dyn GenerationEngine>,
    settings: PipelineSettings,
}

impl Pipeline {
    #[must_use]
    pub fn new(
        registry: StreamRegistry,
        cache: ResultCache,
        resolver: SessionResolver,
        classifier: IntentClassifier,
        engine: Arc<dyn GenerationEngine>,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            registry,
            cache,
            resolver,
            classifier: Arc::new(classifier),
            engine,
            settings,
        }
    }

    #[must_use]
    pub fn classifier(&self) -> &IntentClassifier {
        &self.classifier
    }

    /// Start generation for `query`, or reuse a recent identical session.
    ///
    /// Must be called within a tokio runtime; the producer is spawned onto it.
    pub fn start(
        &self,
        owner_id: Option<&str>,
        query: &str,
        cache_key: Option<&str>,
    ) -> Result<StartedSession, PipelineError> {
        let query = query.trim();
        if query.is_empty() {
            return Err(PipelineError::EmptyQuery);
        }

        let resolution = self.resolver.resolve(owner_id, query);
        let session_id = resolution.session_id;
        let stream_url = format!("/api/discover/stream?sessionId={session_id}");

        if resolution.reused {
            if let Some(channel) = self.registry.get(&session_id) {
                return Ok(StartedSession {
                    session_id,
                    stream_url,
                    domain: channel.domain(),
                    reused: true,
                    cached: false,
                });
            }
            if self.cache.complete(&session_id).is_some() {
                tracing::debug!(session_id = %session_id, "Reused session is already cached");
                return Ok(StartedSession {
                    session_id,
                    stream_url,
                    domain: self.classifier.classify(query),
                    reused: true,
                    cached: true,
                });
            }
        }

        let domain = self.classifier.classify(query);
        let channel = self.registry.create(&session_id, domain)?;
        let Some(sender) = channel.take_sender() else {
            return Err(RegistryError::AlreadyActive(session_id).into());
        };

        let producer = Producer {
            request: GenerationRequest {
                session_id: session_id.clone(),
                query: query.to_string(),
                domain_hint: domain,
                owner_id: owner_id.map(str::to_string),
            },
            cache_key: cache_key
                .filter(|k| is_valid_key(k) && *k != session_id)
                .map(str::to_string),
            sink: Sink {
                sender,
                cancel: channel.cancellation(),
                send_timeout: self.settings.send_timeout,
            },
            cache: self.cache.clone(),
            engine: Arc::clone(&self.engine),
            session_timeout: self.settings.session_timeout,
            persist_timeout: self.settings.persist_timeout,
        };
        tokio::spawn(producer.run());

        tracing::info!(session_id = %session_id, domain = %domain, reused = resolution.reused, "Generation started");
        Ok(StartedSession {
            session_id,
            stream_url,
            domain,
            reused: resolution.reused,
            cached: false,
        })
    }
}

/// Why a producer stopped writing.
enum Outcome {
    /// A terminal pair was sent.
    Finished,
    /// The consumer went away or the entry was closed.
    Abandoned,
    /// The engine could not be started.
    EngineFailed(String),
    /// The engine stream ended without `complete` or `error`.
    Exhausted,
}

/// Sending half of a session channel, bounded by cancellation and timeout.
struct Sink {
    sender: mpsc::Sender<StreamEnvelope>,
    cancel: CancellationToken,
    send_timeout: Duration,
}

impl Sink {
    /// Returns `false` once the envelope can no longer be delivered.
    async fn send(&self, env: StreamEnvelope) -> bool {
        let session_id = env.session_id.clone();
        tokio::select! {
            biased;
            () = self.cancel.cancelled() => false,
            res = self.sender.send_timeout(env, self.send_timeout) => match res {
                Ok(()) => true,
                Err(SendTimeoutError::Timeout(_)) => {
                    tracing::warn!(session_id = %session_id, "Consumer too slow, abandoning stream");
                    false
                }
                Err(SendTimeoutError::Closed(_)) => {
                    tracing::debug!(session_id = %session_id, "Consumer gone, stopping producer");
                    false
                }
            },
        }
    }

    async fn send_all(&self, envs: Vec<StreamEnvelope>) -> bool {
        for env in envs {
            if !self.send(env).await {
                return false;
            }
        }
        true
    }
}

/// Background task driving one generation run.
struct Producer {
    request: GenerationRequest,
    cache_key: Option<String>,
    sink: Sink,
    cache: ResultCache,
    engine: Arc<dyn GenerationEngine>,
    session_timeout: Duration,
    persist_timeout: Duration,
}

impl Producer {
    async fn run(self) {
        let session_id = self.request.session_id.clone();
        let classified = self.request.domain_hint;
        let mut translator = EventTranslator::new(&session_id, classified);

        let announce = translator.envelope(EnvelopeBody::DomainDetected { domain: classified });
        if !self.sink.send(announce).await {
            return;
        }

        let outcome = match tokio::time::timeout(self.session_timeout, self.drive(&mut translator)).await {
            Ok(outcome) => outcome,
            Err(_) => {
                tracing::warn!(session_id = %session_id, "Generation exceeded the session timeout");
                let closing = translator.fail("Generation took too long. Please try again.", true, None);
                self.sink.send_all(closing).await;
                return;
            }
        };

        match outcome {
            Outcome::Finished | Outcome::Abandoned => {}
            Outcome::EngineFailed(message) => {
                let closing = translator.fail(
                    format!("Personalized results are unavailable right now: {message}"),
                    true,
                    Some(classified),
                );
                self.sink.send_all(closing).await;
            }
            Outcome::Exhausted => {
                tracing::warn!(session_id = %session_id, "Engine stream ended without a result");
                let closing = translator.fail(
                    "Generation ended before producing a result. Please try again.",
                    true,
                    Some(classified),
                );
                self.sink.send_all(closing).await;
            }
        }
    }

    async fn drive(&self, translator: &mut EventTranslator) -> Outcome {
        let session_id = self.request.session_id.as_str();
        let classified = self.request.domain_hint;

        let mut frames = match self.engine.generate(self.request.clone()).await {
            Ok(frames) => frames,
            Err(e) => {
                tracing::error!(name: "generation.failed", session_id = %session_id, error = %e, "Generation engine failed");
                return Outcome::EngineFailed(e.to_string());
            }
        };

        loop {
            let next = tokio::select! {
                biased;
                () = self.sink.cancel.cancelled() => return Outcome::Abandoned,
                next = frames.next() => next,
            };
            let Some(frame) = next else {
                return Outcome::Exhausted;
            };

            let raw = match frame {
                Ok(raw) => raw,
                Err(e) => {
                    tracing::warn!(session_id = %session_id, error = %e, "Skipping unreadable engine frame");
                    continue;
                }
            };
            let event = match ProducerEvent::parse(&raw) {
                Ok(event) => event,
                Err(e) => {
                    tracing::warn!(session_id = %session_id, error = %e, "Skipping producer frame");
                    continue;
                }
            };

            let envs = match event {
                ProducerEvent::Complete => {
                    self.store(translator.results()).await;
                    translator.complete()
                }
                ProducerEvent::Error { message } => {
                    tracing::error!(name: "generation.failed", session_id = %session_id, error = %message, "Engine reported an error");
                    translator.fail(message, true, Some(classified))
                }
                other => translator.translate(other),
            };

            let terminal = envs.iter().any(|e| e.is_final);
            if !self.sink.send_all(envs).await {
                return Outcome::Abandoned;
            }
            if terminal {
                return Outcome::Finished;
            }
        }
    }

    /// Cache and persist the finished result set.
    async fn store(&self, results: &ResultSet) {
        let session_id = self.request.session_id.as_str();
        self.cache.put(session_id, results.clone());
        if let Some(key) = &self.cache_key {
            self.cache.put(key, results.clone());
        }

        let raw = match results.to_raw() {
            Ok(raw) => raw,
            Err(e) => {
                tracing::warn!(session_id = %session_id, error = %e, "Failed to serialize result");
                return;
            }
        };
        let save = self.cache.store().save_result(session_id, &raw);
        match tokio::time::timeout(self.persist_timeout, save).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::warn!(session_id = %session_id, error = %e, "Failed to persist result"),
            Err(_) => tracing::warn!(
                session_id = %session_id,
                timeout_ms = self.persist_timeout.as_millis(),
                "Persisting result timed out"
            ),
        }
    }
}

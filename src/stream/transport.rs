//! Per-connection consumption loop.

use std::sync::Arc;

use futures::Stream;
use tokio::time::Duration;

use super::registry::{SessionChannel, StreamRegistry};
use super::translator::EventTranslator;
use crate::cache::ResultCache;
use crate::domain::Domain;
use crate::normalized::StreamEnvelope;

/// Closes the registry entry when the consumer goes away, whichever way it
/// exits: final envelope, producer hang-up, cancellation, timeout or the
/// response body being dropped on disconnect.
struct CloseGuard {
    registry: StreamRegistry,
    channel: Arc<SessionChannel>,
    armed: bool,
}

impl Drop for CloseGuard {
    fn drop(&mut self) {
        if self.armed {
            self.registry.close_channel(&self.channel);
        }
    }
}

enum Step {
    Deliver(StreamEnvelope),
    ProducerGone,
    Cancelled,
    TimedOut,
}

/// Drains one session channel into an ordered envelope stream.
///
/// The loop ends after the first envelope with `is_final`, when the producer
/// drops its sender, when the channel's cancellation token fires, or when the
/// session timeout elapses. A producer hang-up or timeout still ends with an
/// explicit terminal pair: a completion if the result is cached, otherwise a
/// retryable error.
#[derive(Debug)]
pub struct TransportLoop {
    registry: StreamRegistry,
    cache: ResultCache,
    channel: Arc<SessionChannel>,
    session_timeout: Duration,
}

impl TransportLoop {
    #[must_use]
    pub fn new(
        registry: StreamRegistry,
        cache: ResultCache,
        channel: Arc<SessionChannel>,
        session_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            cache,
            channel,
            session_timeout,
        }
    }

    pub fn into_stream(self) -> impl Stream<Item = StreamEnvelope> + Send + 'static {
        async_stream::stream! {
            let session_id = self.channel.session_id().to_string();
            let mut guard = CloseGuard {
                registry: self.registry.clone(),
                channel: Arc::clone(&self.channel),
                armed: true,
            };

            let Some(mut rx) = self.channel.take_receiver() else {
                // Another connection owns this stream; leave its entry alone.
                guard.armed = false;
                tracing::warn!(session_id = %session_id, "Stream already has a consumer");
                let mut t = EventTranslator::resume(&session_id, self.channel.domain(), 0);
                for env in t.fail("This session is already being streamed elsewhere.", false, None) {
                    yield env;
                }
                return;
            };

            let cancel = self.channel.cancellation();
            let deadline = tokio::time::sleep(self.session_timeout);
            tokio::pin!(deadline);

            let mut delivered: u64 = 0;
            let mut domain = self.channel.domain();

            loop {
                let step = tokio::select! {
                    biased;
                    () = cancel.cancelled() => Step::Cancelled,
                    received = rx.recv() => match received {
                        Some(env) => Step::Deliver(env),
                        None => Step::ProducerGone,
                    },
                    () = &mut deadline => Step::TimedOut,
                };

                match step {
                    Step::Deliver(env) => {
                        delivered += 1;
                        domain = env.domain;
                        let is_final = env.is_final;
                        yield env;
                        if is_final {
                            break;
                        }
                    }
                    Step::ProducerGone => {
                        tracing::debug!(session_id = %session_id, "Producer closed the channel");
                        for env in self.closing(domain, delivered, "The result stream ended unexpectedly. Please try again.") {
                            yield env;
                        }
                        break;
                    }
                    Step::Cancelled => {
                        tracing::debug!(session_id = %session_id, "Stream cancelled");
                        break;
                    }
                    Step::TimedOut => {
                        tracing::warn!(
                            session_id = %session_id,
                            timeout_secs = self.session_timeout.as_secs(),
                            "Session timed out"
                        );
                        for env in self.closing(domain, delivered, "Generation took too long. Please try again.") {
                            yield env;
                        }
                        break;
                    }
                }
            }

            drop(guard);
        }
    }

    /// Terminal envelopes for a stream that ended without its own close: a
    /// completion if the result was cached meanwhile, else a retryable error.
    fn closing(&self, domain: Domain, next_seq: u64, message: &str) -> Vec<StreamEnvelope> {
        let session_id = self.channel.session_id();
        let mut t = EventTranslator::resume(session_id, domain, next_seq);
        match self.cache.complete(session_id) {
            Some(set) => t.complete_with_count(set.len()),
            None => t.fail(message, true, None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::fixtures::poi;
    use crate::domain::{CategoryTable, ResultSet};
    use crate::normalized::{EnvelopeBody, Progress};
    use crate::persistence::providers::memory::InMemoryResultStore;
    use futures::StreamExt;

    fn cache() -> ResultCache {
        ResultCache::new(
            Duration::from_secs(600),
            CategoryTable::default(),
            Arc::new(InMemoryResultStore::new()),
        )
    }

    fn progress(t: &mut EventTranslator) -> StreamEnvelope {
        t.envelope(EnvelopeBody::Progress(Progress {
            message: "working".into(),
            percent: None,
        }))
    }

    #[tokio::test]
    async fn test_forwards_sequence_and_stops_after_close() {
        let registry = StreamRegistry::new(32);
        let channel = registry.create("s1", Domain::Dining).unwrap();
        let tx = channel.take_sender().unwrap();

        let mut t = EventTranslator::new("s1", Domain::Dining);
        let mut sent = vec![progress(&mut t)];
        for id in ["a", "b", "c"] {
            sent.extend(t.translate(crate::stream::ProducerEvent::Poi { poi: poi(id, "cafe") }));
        }
        sent.extend(t.complete());
        let straggler = progress(&mut t);

        for env in sent.iter().cloned().chain([straggler]) {
            tx.send(env).await.unwrap();
        }

        let transport = TransportLoop::new(registry.clone(), cache(), channel, Duration::from_secs(300));
        let received: Vec<_> = transport.into_stream().collect().await;

        assert_eq!(received, sent);
        let names: Vec<_> = received.iter().map(StreamEnvelope::event_name).collect();
        assert_eq!(
            names,
            vec!["progress", "resultItem", "resultItem", "resultItem", "complete", "sse-close"]
        );
        assert!(registry.get("s1").is_none());
    }

    #[tokio::test]
    async fn test_producer_hangup_ends_stream_and_releases_entry() {
        let registry = StreamRegistry::new(8);
        let channel = registry.create("s1", Domain::Dining).unwrap();
        let tx = channel.take_sender().unwrap();
        let mut t = EventTranslator::new("s1", Domain::Dining);
        tx.send(progress(&mut t)).await.unwrap();
        drop(tx);

        let transport = TransportLoop::new(registry.clone(), cache(), Arc::clone(&channel), Duration::from_secs(300));
        drop(channel);
        let received: Vec<_> = transport.into_stream().collect().await;
        let names: Vec<_> = received.iter().map(StreamEnvelope::event_name).collect();
        assert_eq!(names, vec!["progress", "error", "sse-close"]);
        assert_eq!(received[1].event_id, "s1-1");
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_cancellation_ends_stream() {
        let registry = StreamRegistry::new(8);
        let channel = registry.create("s1", Domain::Dining).unwrap();
        let _tx = channel.take_sender().unwrap();
        channel.cancellation().cancel();

        let transport = TransportLoop::new(registry.clone(), cache(), channel, Duration::from_secs(300));
        let received: Vec<_> = transport.into_stream().collect().await;
        assert!(received.is_empty());
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_dropping_consumer_releases_entry() {
        let registry = StreamRegistry::new(8);
        let channel = registry.create("s1", Domain::Dining).unwrap();
        let tx = channel.take_sender().unwrap();
        let token = channel.cancellation();
        let mut t = EventTranslator::new("s1", Domain::Dining);
        tx.send(progress(&mut t)).await.unwrap();

        let transport = TransportLoop::new(registry.clone(), cache(), channel, Duration::from_secs(300));
        let mut stream = Box::pin(transport.into_stream());
        assert!(stream.next().await.is_some());
        drop(stream);

        assert!(registry.is_empty());
        assert!(token.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_without_result_emits_retryable_error() {
        let registry = StreamRegistry::new(8);
        let channel = registry.create("s1", Domain::Lodging).unwrap();
        let _tx = channel.take_sender().unwrap();

        let transport = TransportLoop::new(registry.clone(), cache(), channel, Duration::from_secs(300));
        let received: Vec<_> = transport.into_stream().collect().await;

        assert_eq!(received.len(), 2);
        assert!(matches!(&received[0].body, EnvelopeBody::Error(e) if e.retryable));
        assert_eq!(received[1].body, EnvelopeBody::CloseSignal);
        assert!(registry.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_with_cached_result_completes() {
        let registry = StreamRegistry::new(8);
        let cache = cache();
        cache.put(
            "s1",
            ResultSet {
                city: None,
                points_of_interest: vec![poi("a", "hotel"), poi("b", "hotel")],
            },
        );
        let channel = registry.create("s1", Domain::Lodging).unwrap();
        let _tx = channel.take_sender().unwrap();

        let transport = TransportLoop::new(registry.clone(), cache, channel, Duration::from_secs(300));
        let received: Vec<_> = transport.into_stream().collect().await;

        assert_eq!(received[0].event_name(), "complete");
        assert_eq!(received[0].navigation.as_ref().unwrap().url, "/hotels?sessionId=s1");
        assert_eq!(received[1].event_name(), "sse-close");
    }

    #[tokio::test]
    async fn test_second_consumer_is_refused_without_closing_first() {
        let registry = StreamRegistry::new(8);
        let channel = registry.create("s1", Domain::Dining).unwrap();
        let _rx = channel.take_receiver();

        let transport = TransportLoop::new(registry.clone(), cache(), channel, Duration::from_secs(300));
        let received: Vec<_> = transport.into_stream().collect().await;

        assert_eq!(received.len(), 2);
        assert_eq!(received[0].event_name(), "error");
        assert!(registry.get("s1").is_some());
    }
}

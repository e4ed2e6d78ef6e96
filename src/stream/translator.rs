//! Producer event parsing and translation into [`StreamEnvelope`]s.

use serde::Deserialize;

use crate::domain::{CityMetadata, Domain, Poi, ResultSet};
use crate::error::TranslateError;
use crate::normalized::{Completion, EnvelopeBody, ErrorPayload, Progress, StreamEnvelope};

/// Events emitted by a generation engine, tagged by `kind`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum ProducerEvent {
    Progress {
        message: String,
        #[serde(default)]
        percent: Option<u8>,
    },
    City {
        city: CityMetadata,
    },
    Poi {
        poi: Poi,
    },
    Pois {
        items: Vec<Poi>,
    },
    Domain {
        domain: Domain,
    },
    Complete,
    Error {
        message: String,
    },
}

const KNOWN_KINDS: &[&str] = &[
    "progress", "city", "poi", "pois", "domain", "complete", "error",
];

impl ProducerEvent {
    /// Parse one raw producer frame.
    ///
    /// Unknown kinds are rejected rather than probed for fields.
    pub fn parse(raw: &serde_json::Value) -> Result<Self, TranslateError> {
        let kind = raw
            .get("kind")
            .and_then(serde_json::Value::as_str)
            .ok_or(TranslateError::MissingKind)?;
        if !KNOWN_KINDS.contains(&kind) {
            return Err(TranslateError::UnknownKind(kind.to_string()));
        }
        Ok(Self::deserialize(raw)?)
    }
}

/// Turns producer events for one session into ordered envelopes.
///
/// The translator also accumulates the unified [`ResultSet`] so the caller
/// can cache exactly what was streamed.
#[derive(Debug)]
pub struct EventTranslator {
    session_id: String,
    domain: Domain,
    seq: u64,
    results: ResultSet,
}

impl EventTranslator {
    #[must_use]
    pub fn new(session_id: impl Into<String>, domain: Domain) -> Self {
        Self {
            session_id: session_id.into(),
            domain,
            seq: 0,
            results: ResultSet::default(),
        }
    }

    /// Continue numbering an existing session at `next_seq`.
    #[must_use]
    pub fn resume(session_id: impl Into<String>, domain: Domain, next_seq: u64) -> Self {
        Self {
            seq: next_seq,
            ..Self::new(session_id, domain)
        }
    }

    #[must_use]
    pub fn domain(&self) -> Domain {
        self.domain
    }

    #[must_use]
    pub fn results(&self) -> &ResultSet {
        &self.results
    }

    /// Wrap `body` in the next envelope of this session.
    pub fn envelope(&mut self, body: EnvelopeBody) -> StreamEnvelope {
        let env = StreamEnvelope::new(&self.session_id, self.seq, self.domain, body);
        self.seq += 1;
        env
    }

    /// Translate one producer event.
    ///
    /// Terminal events (`complete`, `error`) are always followed by a close
    /// signal, the only envelope with `is_final` set.
    pub fn translate(&mut self, event: ProducerEvent) -> Vec<StreamEnvelope> {
        match event {
            ProducerEvent::Progress { message, percent } => {
                vec![self.envelope(EnvelopeBody::Progress(Progress {
                    message,
                    percent: percent.map(|p| p.min(100)),
                }))]
            }
            ProducerEvent::City { city } => {
                self.results.city = Some(city.clone());
                vec![self.envelope(EnvelopeBody::CityData(city))]
            }
            ProducerEvent::Poi { poi } => self.result_items([poi]),
            ProducerEvent::Pois { items } => self.result_items(items),
            ProducerEvent::Domain { domain } => {
                self.domain = domain;
                vec![self.envelope(EnvelopeBody::DomainDetected { domain })]
            }
            ProducerEvent::Complete => self.complete(),
            ProducerEvent::Error { message } => self.fail(message, true, None),
        }
    }

    /// The `complete` envelope with navigation, then the close signal.
    pub fn complete(&mut self) -> Vec<StreamEnvelope> {
        self.complete_with_count(self.results.len())
    }

    /// Completion for a result set that was produced elsewhere, e.g. served
    /// from cache after the original stream ended.
    pub fn complete_with_count(&mut self, poi_count: usize) -> Vec<StreamEnvelope> {
        let url = self.domain.navigation_url(&self.session_id);
        let complete = self
            .envelope(EnvelopeBody::Complete(Completion { poi_count }))
            .with_navigation(url);
        let close = self.envelope(EnvelopeBody::CloseSignal);
        vec![complete, close]
    }

    /// A terminal error envelope followed by the close signal.
    ///
    /// `fallback` routes the client to a locally classified domain when the
    /// engine could not produce one.
    pub fn fail(
        &mut self,
        message: impl Into<String>,
        retryable: bool,
        fallback: Option<Domain>,
    ) -> Vec<StreamEnvelope> {
        let mut error = self.envelope(EnvelopeBody::Error(ErrorPayload {
            message: message.into(),
            retryable,
        }));
        if let Some(domain) = fallback {
            error = error.with_navigation(domain.navigation_url(&self.session_id));
        }
        let close = self.envelope(EnvelopeBody::CloseSignal);
        vec![error, close]
    }

    fn result_items(&mut self, pois: impl IntoIterator<Item = Poi>) -> Vec<StreamEnvelope> {
        let mut out = Vec::new();
        for poi in pois {
            if self.results.push_unique(poi.clone()) {
                out.push(self.envelope(EnvelopeBody::ResultItem(poi)));
            } else {
                tracing::debug!(session_id = %self.session_id, poi_id = %poi.id, "Skipping duplicate POI");
            }
        }
        out
    }
}

//! Normalized envelope model for the result stream.
//!
//! Every unit pushed to a client is a [`StreamEnvelope`]: a typed
//! [`EnvelopeBody`] plus routing metadata (session, domain, event id,
//! finality, optional navigation). Envelopes are immutable once built and
//! are moved from the producer, through the session channel, to the consumer.
//!
//! # Wire format
//!
//! One SSE frame per envelope. The frame's `event:` name equals the body's
//! `type` tag, and `data:` carries the whole envelope as JSON:
//!
//! ```text
//! event: resultItem
//! data: {"type":"resultItem","payload":{...},"sessionId":"...","eventId":"...-3",...}
//! ```
//!
//! Every terminal envelope (`complete` or `error`) is followed by a closing
//! frame whose type is `sse-close`, telling auto-reconnecting clients not to
//! reconnect. The closing frame is the only envelope with `isFinal` set.
//!
//! # Example
//!
//! ```rust
//! use travel_stream::domain::Domain;
//! use travel_stream::normalized::{EnvelopeBody, StreamEnvelope, sse_frame};
//!
//! let env = StreamEnvelope::new("s1", 0, Domain::Dining, EnvelopeBody::CloseSignal);
//! assert!(env.is_final);
//! assert!(sse_frame(&env).starts_with("event: sse-close\n"));
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{CityMetadata, Domain, Poi};

/// Progress update while the engine is still working.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Progress {
    pub message: String,
    /// Optional completion estimate, 0-100.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub percent: Option<u8>,
}

/// Terminal or informational error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub message: String,
    /// Whether retrying the same query may succeed.
    #[serde(default)]
    pub retryable: bool,
}

/// Summary sent with the `complete` envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Completion {
    pub poi_count: usize,
}

/// Page the client should navigate to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Navigation {
    pub url: String,
}

/// Typed envelope payload, one variant per event kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum EnvelopeBody {
    #[serde(rename = "progress")]
    Progress(Progress),
    #[serde(rename = "cityData")]
    CityData(CityMetadata),
    #[serde(rename = "resultItem")]
    ResultItem(Poi),
    #[serde(rename = "domainDetected")]
    DomainDetected { domain: Domain },
    #[serde(rename = "complete")]
    Complete(Completion),
    #[serde(rename = "error")]
    Error(ErrorPayload),
    /// Documented end-of-stream marker; always final.
    #[serde(rename = "sse-close")]
    CloseSignal,
}

impl EnvelopeBody {
    /// SSE event name for this body.
    #[must_use]
    pub fn event_name(&self) -> &'static str {
        match self {
            EnvelopeBody::Progress(_) => "progress",
            EnvelopeBody::CityData(_) => "cityData",
            EnvelopeBody::ResultItem(_) => "resultItem",
            EnvelopeBody::DomainDetected { .. } => "domainDetected",
            EnvelopeBody::Complete(_) => "complete",
            EnvelopeBody::Error(_) => "error",
            EnvelopeBody::CloseSignal => "sse-close",
        }
    }
}

/// One discrete unit pushed over the streaming transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamEnvelope {
    #[serde(flatten)]
    pub body: EnvelopeBody,
    pub session_id: String,
    pub domain: Domain,
    pub timestamp: DateTime<Utc>,
    /// `<session_id>-<seq>`, increasing per session.
    pub event_id: String,
    pub is_final: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub navigation: Option<Navigation>,
}

impl StreamEnvelope {
    /// Build an envelope. Close signals are always final.
    #[must_use]
    pub fn new(session_id: &str, seq: u64, domain: Domain, body: EnvelopeBody) -> Self {
        let is_final = matches!(body, EnvelopeBody::CloseSignal);
        Self {
            body,
            session_id: session_id.to_string(),
            domain,
            timestamp: Utc::now(),
            event_id: format!("{session_id}-{seq}"),
            is_final,
            navigation: None,
        }
    }

    #[must_use]
    pub fn with_navigation(mut self, url: impl Into<String>) -> Self {
        self.navigation = Some(Navigation { url: url.into() });
        self
    }

    #[must_use]
    pub fn event_name(&self) -> &'static str {
        self.body.event_name()
    }

    /// Envelope JSON; falls back to a minimal error object if serialization fails.
    #[must_use]
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|e| {
            serde_json::json!({
                "type": "error",
                "payload": { "message": e.to_string(), "retryable": false },
                "sessionId": self.session_id,
                "isFinal": self.is_final,
            })
            .to_string()
        })
    }
}

/// Convert an envelope to a raw SSE frame.
#[must_use]
pub fn sse_frame(env: &StreamEnvelope) -> String {
    format!("event: {}\nid: {}\ndata: {}\n\n", env.event_name(), env.event_id, env.to_json())
}

/// Convert an envelope to an axum SSE [`Event`](axum::response::sse::Event).
#[must_use]
pub fn sse_event(env: &StreamEnvelope) -> axum::response::sse::Event {
    axum::response::sse::Event::default()
        .event(env.event_name())
        .id(env.event_id.clone())
        .data(env.to_json())
}

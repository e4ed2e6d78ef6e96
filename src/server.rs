use std::convert::Infallible;
use std::pin::Pin;
use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::HeaderMap,
    response::sse::{Event, KeepAlive, Sse},
    routing::{get, post},
};
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;

use tracing::info;

use crate::AppState;
use crate::cache::DomainResult;
use crate::config::AppConfig;
use crate::domain::Domain;
use crate::error::ApiError;
use crate::normalized::{StreamEnvelope, sse_event};
use crate::pipeline::StartedSession;
use crate::session::GenerationSession;
use crate::stream::{EventTranslator, TransportLoop};

type EnvelopeStream = Pin<Box<dyn Stream<Item = StreamEnvelope> + Send>>;

/// Start the Axum server with the provided configuration.
pub async fn start_server(config: Arc<AppConfig>) -> anyhow::Result<()> {
    let store = crate::persistence::connect(&config.persistence).await?;
    info!(provider = %config.persistence.provider, "Result store ready");

    let engine = crate::generation::from_config(&config.generation).await?;
    info!(
        provider = %config.generation.provider,
        endpoint = %config.generation.endpoint,
        "Generation engine configured"
    );

    let state = AppState::new(Arc::clone(&config), store, engine);
    spawn_sweeper(state.clone());

    let app = build_router(state);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    info!(
        name: "server.started",
        address = %addr,
        "Server started"
    );

    axum::serve(listener, app.into_make_service()).await?;
    Ok(())
}

/// Build the application router.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/api/discover", post(api_discover))
        .route("/api/discover/stream", get(api_discover_stream))
        .route("/api/results/{domain}", get(api_results))
        .route("/ws/nearby", get(crate::nearby::nearby_ws))
        .route("/healthz", get(healthz))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Periodically purge expired cache entries, reap abandoned registry entries,
/// expire stale sessions and forget idle rate-limit clients.
pub fn spawn_sweeper(state: AppState) -> tokio::task::JoinHandle<()> {
    let every = state.config.cache.sweep_interval();
    let abandoned_after = state.config.stream.session_timeout() + state.config.stream.send_timeout();
    let reuse_window = state.config.session.reuse_window();

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let purged = state.cache.purge_expired();
            let reaped = state.registry.reap_older_than(abandoned_after);
            let expired = state.sessions.expire_older_than(reuse_window);
            let evicted = state.limiter.evict_idle(std::time::Instant::now());
            if purged + reaped + expired + evicted > 0 {
                tracing::debug!(purged, reaped, expired, evicted, "Sweeper pass");
            }
        }
    })
}

/// Requester identity supplied by the upstream auth layer, if any.
pub(crate) fn client_identity(headers: &HeaderMap) -> Option<String> {
    ["x-user-id", "x-client-id"]
        .iter()
        .filter_map(|name| headers.get(*name))
        .filter_map(|value| value.to_str().ok())
        .map(str::trim)
        .find(|value| !value.is_empty())
        .map(str::to_string)
}

// ─────────────────────────────────────────────────────────────────────────────
// API Handlers
// ─────────────────────────────────────────────────────────────────────────────

/// Request body for the discover API.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DiscoverRequest {
    /// Free-text travel query.
    query: String,
    /// Optional key to cache the result under, for reuse across pages.
    #[serde(default)]
    cache_key: Option<String>,
}

/// POST /api/discover - Start (or reuse) a generation and get its stream URL.
async fn api_discover(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<DiscoverRequest>,
) -> Result<Json<StartedSession>, ApiError> {
    let owner = client_identity(&headers);
    tracing::info!(
        owner_id = ?owner,
        query_length = req.query.len(),
        "Received discover request"
    );

    let started = state
        .pipeline
        .start(owner.as_deref(), &req.query, req.cache_key.as_deref())?;
    Ok(Json(started))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StreamQuery {
    session_id: String,
}

/// GET /api/discover/stream?sessionId= - SSE stream of one session.
///
/// Ids that were never issued by the discover endpoint are a 404; envelopes
/// are only ever stamped with known session ids.
async fn api_discover_stream(
    State(state): State<AppState>,
    Query(q): Query<StreamQuery>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let session_id = q.session_id;
    let keep_alive = state.config.stream.keep_alive();

    let Some(session) = state.sessions.get(&session_id) else {
        tracing::debug!(session_id = %session_id, "Stream requested for unknown session");
        return Err(ApiError::NotFound(format!("session {session_id}")));
    };

    let envelopes: EnvelopeStream = match state.registry.get(&session.id) {
        Some(channel) => {
            tracing::debug!(session_id = %session.id, "Attaching transport loop");
            let transport = TransportLoop::new(
                state.registry.clone(),
                state.cache.clone(),
                channel,
                state.config.stream.session_timeout(),
            );
            Box::pin(transport.into_stream())
        }
        None => Box::pin(futures::stream::iter(detached_envelopes(&state, &session))),
    };

    let stream = envelopes.map(|env| Ok::<_, Infallible>(sse_event(&env)));
    Ok(Sse::new(stream).keep_alive(KeepAlive::new().interval(keep_alive)))
}

/// Envelopes for a known session with no live channel: its cached result if
/// the stream already finished, otherwise a retryable error.
fn detached_envelopes(state: &AppState, session: &GenerationSession) -> Vec<StreamEnvelope> {
    let domain = state.pipeline.classifier().classify(&session.query_text);
    let mut translator = EventTranslator::new(&session.id, domain);

    match state.cache.complete(&session.id) {
        Some(set) => {
            tracing::debug!(session_id = %session.id, "Replaying completion from cache");
            translator.complete_with_count(set.len())
        }
        None => {
            tracing::debug!(session_id = %session.id, "Session has no live stream and no cached result");
            translator.fail(
                "The result stream is no longer available. Please try again.",
                true,
                Some(domain),
            )
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResultsQuery {
    #[serde(default)]
    session_id: Option<String>,
    #[serde(default)]
    cache_key: Option<String>,
}

/// GET /api/results/{domain} - Domain view of a finished result set.
async fn api_results(
    State(state): State<AppState>,
    Path(domain): Path<String>,
    Query(q): Query<ResultsQuery>,
) -> Result<Json<DomainResult>, ApiError> {
    let domain: Domain = domain
        .parse()
        .map_err(|e: crate::domain::UnknownDomain| ApiError::NotFound(e.to_string()))?;

    let Some(key) = q.cache_key.as_deref().or(q.session_id.as_deref()) else {
        return Err(ApiError::BadRequest("sessionId or cacheKey is required".to_string()));
    };

    let result = state.cache.load(key, q.session_id.as_deref(), domain).await;
    tracing::debug!(key = %key, domain = %domain, source = ?result.source, pois = result.points_of_interest.len(), "Served results");
    Ok(Json(result))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Health {
    status: &'static str,
    active_streams: usize,
    cached_results: usize,
}

/// GET /healthz
async fn healthz(State(state): State<AppState>) -> Json<Health> {
    Json(Health {
        status: "ok",
        active_streams: state.registry.len(),
        cached_results: state.cache.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_client_identity_prefers_user_id() {
        let mut headers = HeaderMap::new();
        assert_eq!(client_identity(&headers), None);

        headers.insert("x-client-id", HeaderValue::from_static("device-7"));
        assert_eq!(client_identity(&headers).as_deref(), Some("device-7"));

        headers.insert("x-user-id", HeaderValue::from_static("user-1"));
        assert_eq!(client_identity(&headers).as_deref(), Some("user-1"));

        headers.insert("x-user-id", HeaderValue::from_static("  "));
        assert_eq!(client_identity(&headers).as_deref(), Some("device-7"));
    }
}

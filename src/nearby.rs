//! WebSocket location channel.
//!
//! Clients send their position; each accepted update is answered with the
//! session's cached POIs within the requested radius, nearest first. Inbound
//! messages pass through the rate limiter; a rejection is a soft reply and
//! the connection stays open.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::response::Response;
use serde::{Deserialize, Serialize};

use crate::AppState;
use crate::cache::ResultCache;
use crate::domain::{Domain, GeoPoint, Poi};
use crate::security::SlidingWindowLimiter;
use crate::server::client_identity;

const DEFAULT_RADIUS_KM: f64 = 5.0;

/// Inbound location update.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct LocationUpdate {
    pub latitude: f64,
    pub longitude: f64,
    /// Search radius in kilometres.
    #[serde(default = "default_radius")]
    pub radius: f64,
}

fn default_radius() -> f64 {
    DEFAULT_RADIUS_KM
}

impl LocationUpdate {
    fn validate(&self) -> Result<GeoPoint, String> {
        if !(-90.0..=90.0).contains(&self.latitude) || !(-180.0..=180.0).contains(&self.longitude) {
            return Err("latitude/longitude out of range".to_string());
        }
        if !self.radius.is_finite() || self.radius <= 0.0 {
            return Err("radius must be a positive number of kilometres".to_string());
        }
        Ok(GeoPoint {
            lat: self.latitude,
            lon: self.longitude,
        })
    }
}

/// A POI with its distance from the client.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NearbyPoi {
    #[serde(flatten)]
    pub poi: Poi,
    pub distance_km: f64,
}

/// Outbound message.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NearbyMessage {
    Pois { pois: Vec<NearbyPoi> },
    Error { message: String },
    RateLimited { message: String },
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NearbyQuery {
    pub session_id: String,
}

/// Answer one inbound frame.
pub async fn reply(
    cache: &ResultCache,
    limiter: &SlidingWindowLimiter,
    session_id: &str,
    client_id: &str,
    text: &str,
) -> NearbyMessage {
    if !limiter.check(client_id) {
        return NearbyMessage::RateLimited {
            message: "Too many location updates, slow down and retry shortly.".to_string(),
        };
    }

    let update: LocationUpdate = match serde_json::from_str(text) {
        Ok(u) => u,
        Err(e) => {
            tracing::debug!(session_id = %session_id, error = %e, "Malformed location update");
            return NearbyMessage::Error {
                message: format!("invalid location update: {e}"),
            };
        }
    };
    let origin = match update.validate() {
        Ok(origin) => origin,
        Err(message) => return NearbyMessage::Error { message },
    };

    let result = cache.load(session_id, None, Domain::Itinerary).await;
    let mut pois: Vec<NearbyPoi> = result
        .points_of_interest
        .into_iter()
        .map(|poi| NearbyPoi {
            distance_km: origin.distance_km(&poi.geo),
            poi,
        })
        .filter(|p| p.distance_km <= update.radius)
        .collect();
    pois.sort_by(|a, b| a.distance_km.total_cmp(&b.distance_km));

    NearbyMessage::Pois { pois }
}

/// GET /ws/nearby?sessionId=
pub async fn nearby_ws(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(query): Query<NearbyQuery>,
    headers: HeaderMap,
) -> Response {
    let client_id = client_identity(&headers).unwrap_or_else(|| query.session_id.clone());
    ws.on_upgrade(move |socket| run(socket, state, query.session_id, client_id))
}

async fn run(mut socket: WebSocket, state: AppState, session_id: String, client_id: String) {
    tracing::debug!(session_id = %session_id, client_id = %client_id, "Nearby channel opened");

    while let Some(msg) = socket.recv().await {
        let text = match msg {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => {
                tracing::debug!(session_id = %session_id, error = %e, "Nearby channel error");
                break;
            }
        };

        let out = reply(&state.cache, &state.limiter, &session_id, &client_id, text.as_str()).await;
        let payload = serde_json::to_string(&out).unwrap_or_else(|e| {
            serde_json::json!({ "type": "error", "message": e.to_string() }).to_string()
        });
        if socket.send(Message::Text(payload.into())).await.is_err() {
            break;
        }
    }

    tracing::debug!(session_id = %session_id, "Nearby channel closed");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::fixtures::poi;
    use crate::domain::{CategoryTable, ResultSet};
    use crate::persistence::providers::memory::InMemoryResultStore;
    use std::sync::Arc;
    use std::time::Duration;

    fn located(id: &str, lat: f64, lon: f64) -> Poi {
        Poi {
            geo: GeoPoint { lat, lon },
            ..poi(id, "museum")
        }
    }

    fn cache() -> ResultCache {
        let cache = ResultCache::new(
            Duration::from_secs(600),
            CategoryTable::default(),
            Arc::new(InMemoryResultStore::new()),
        );
        cache.put(
            "s1",
            ResultSet {
                city: None,
                points_of_interest: vec![
                    located("far", 38.80, -9.20),
                    located("near", 38.7075, -9.1365),
                    located("nearest", 38.7071, -9.1357),
                ],
            },
        );
        cache
    }

    #[tokio::test]
    async fn test_pois_within_radius_sorted_by_distance() {
        let limiter = SlidingWindowLimiter::new(Duration::from_secs(10), 5);
        let msg = reply(
            &cache(),
            &limiter,
            "s1",
            "c1",
            r#"{"latitude":38.7071,"longitude":-9.1355,"radius":1}"#,
        )
        .await;

        let NearbyMessage::Pois { pois } = msg else {
            panic!("expected pois, got {msg:?}");
        };
        let ids: Vec<_> = pois.iter().map(|p| p.poi.id.as_str()).collect();
        assert_eq!(ids, vec!["nearest", "near"]);
    }

    #[tokio::test]
    async fn test_default_radius_and_wire_shape() {
        let limiter = SlidingWindowLimiter::new(Duration::from_secs(10), 5);
        let msg = reply(&cache(), &limiter, "s1", "c1", r#"{"latitude":38.7071,"longitude":-9.1355}"#).await;
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "pois");
        assert_eq!(json["pois"].as_array().unwrap().len(), 2);
        assert!(json["pois"][0]["distanceKm"].is_number());
        assert_eq!(json["pois"][0]["id"], "nearest");
    }

    #[tokio::test]
    async fn test_malformed_and_out_of_range_updates() {
        let limiter = SlidingWindowLimiter::new(Duration::from_secs(10), 5);
        let cache = cache();
        assert!(matches!(
            reply(&cache, &limiter, "s1", "c1", "hello").await,
            NearbyMessage::Error { .. }
        ));
        assert!(matches!(
            reply(&cache, &limiter, "s1", "c1", r#"{"latitude":91,"longitude":0}"#).await,
            NearbyMessage::Error { .. }
        ));
        assert!(matches!(
            reply(&cache, &limiter, "s1", "c1", r#"{"latitude":0,"longitude":0,"radius":-1}"#).await,
            NearbyMessage::Error { .. }
        ));
    }

    #[tokio::test]
    async fn test_rate_limited_reply() {
        let limiter = SlidingWindowLimiter::new(Duration::from_secs(60), 1);
        let cache = cache();
        let update = r#"{"latitude":0,"longitude":0}"#;
        assert!(matches!(
            reply(&cache, &limiter, "s1", "c1", update).await,
            NearbyMessage::Pois { .. }
        ));
        let msg = reply(&cache, &limiter, "s1", "c1", update).await;
        assert_eq!(serde_json::to_value(&msg).unwrap()["type"], "rate_limited");
    }

    #[tokio::test]
    async fn test_unknown_session_is_empty() {
        let limiter = SlidingWindowLimiter::new(Duration::from_secs(10), 5);
        let msg = reply(&cache(), &limiter, "nope", "c1", r#"{"latitude":0,"longitude":0}"#).await;
        assert!(matches!(msg, NearbyMessage::Pois { pois } if pois.is_empty()));
    }
}

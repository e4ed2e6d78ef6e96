//! Generation engine abstraction.
//!
//! The engine itself is an opaque producer: it accepts a query and yields raw
//! producer frames (JSON objects tagged by `kind`) until it is done. Frames are
//! parsed and translated by the pipeline, never by the engine.
//!
//! # Engines
//!
//! - [`HttpGenerationEngine`]: POSTs the request and reads an SSE `data:` stream
//! - [`ReplayEngine`]: replays a fixed list of frames, for tests and demos

pub mod http;
pub mod replay;

pub use http::HttpGenerationEngine;
pub use replay::ReplayEngine;

use std::pin::Pin;
use std::sync::Arc;

use futures::Stream;
use serde::Serialize;

use crate::config::GenerationConfig;
use crate::domain::Domain;

/// Raw producer frames from one generation run.
pub type FrameStream = Pin<Box<dyn Stream<Item = anyhow::Result<serde_json::Value>> + Send>>;

/// One generation request.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationRequest {
    pub session_id: String,
    pub query: String,
    /// Domain picked by the local classifier; engines may override it.
    pub domain_hint: Domain,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner_id: Option<String>,
}

#[async_trait::async_trait]
pub trait GenerationEngine: Send + Sync + std::fmt::Debug {
    /// Start a generation run.
    ///
    /// # Errors
    ///
    /// Returns an error if the engine cannot be reached. Per-frame failures
    /// are reported as `Err` items on the returned stream.
    async fn generate(&self, req: GenerationRequest) -> anyhow::Result<FrameStream>;
}

/// Build the configured engine.
pub async fn from_config(config: &GenerationConfig) -> anyhow::Result<Arc<dyn GenerationEngine>> {
    match config.provider.as_str() {
        "http" => Ok(Arc::new(HttpGenerationEngine::new(
            config.endpoint.clone(),
            config.api_key.clone(),
        ))),
        "replay" => {
            let Some(path) = &config.replay_file else {
                anyhow::bail!("generation.replay_file is required for the replay provider");
            };
            Ok(Arc::new(ReplayEngine::from_file(path).await?))
        }
        other => anyhow::bail!("unknown generation provider: {other}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(provider: &str) -> GenerationConfig {
        GenerationConfig {
            provider: provider.to_string(),
            endpoint: "http://127.0.0.1:1/generate".to_string(),
            api_key: None,
            replay_file: None,
        }
    }

    #[tokio::test]
    async fn test_from_config_providers() {
        assert!(from_config(&config("http")).await.is_ok());
        assert!(from_config(&config("replay")).await.is_err());
        assert!(from_config(&config("carrier-pigeon")).await.is_err());
    }

    #[test]
    fn test_request_wire_shape() {
        let req = GenerationRequest {
            session_id: "s1".into(),
            query: "tapas".into(),
            domain_hint: Domain::Dining,
            owner_id: None,
        };
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["sessionId"], "s1");
        assert_eq!(json["domainHint"], "dining");
        assert!(json.get("ownerId").is_none());
    }
}

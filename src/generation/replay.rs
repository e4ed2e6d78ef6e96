//! Engine that replays recorded producer frames.

use std::time::Duration;

use anyhow::Context;

use super::{FrameStream, GenerationEngine, GenerationRequest};

/// Replays a fixed list of frames for every request.
#[derive(Debug, Clone, Default)]
pub struct ReplayEngine {
    frames: Vec<serde_json::Value>,
    delay: Option<Duration>,
    failure: Option<String>,
}

impl ReplayEngine {
    #[must_use]
    pub fn new(frames: Vec<serde_json::Value>) -> Self {
        Self {
            frames,
            ..Self::default()
        }
    }

    /// An engine whose every `generate` call fails with `message`.
    #[must_use]
    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            failure: Some(message.into()),
            ..Self::default()
        }
    }

    /// Pause before each frame.
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Load frames from a JSON array file.
    pub async fn from_file(path: &str) -> anyhow::Result<Self> {
        let text = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("reading replay file {path}"))?;
        let frames: Vec<serde_json::Value> =
            serde_json::from_str(&text).with_context(|| format!("parsing replay file {path}"))?;
        tracing::info!(path = %path, frames = frames.len(), "Loaded replay frames");
        Ok(Self::new(frames))
    }
}

#[async_trait::async_trait]
impl GenerationEngine for ReplayEngine {
    async fn generate(&self, req: GenerationRequest) -> anyhow::Result<FrameStream> {
        if let Some(message) = &self.failure {
            anyhow::bail!("{message}");
        }

        tracing::debug!(session_id = %req.session_id, frames = self.frames.len(), "Replaying frames");
        let frames = self.frames.clone();
        let delay = self.delay;

        let out = async_stream::stream! {
            for frame in frames {
                if let Some(d) = delay {
                    tokio::time::sleep(d).await;
                }
                yield Ok::<_, anyhow::Error>(frame);
            }
        };
        Ok(Box::pin(out))
    }
}

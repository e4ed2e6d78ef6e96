//! Remote generation engine speaking SSE.

use futures::StreamExt;

use super::{FrameStream, GenerationEngine, GenerationRequest};

/// Generation engine reached over HTTP.
///
/// The request is POSTed as JSON; the response is an SSE stream whose `data:`
/// lines each hold one producer frame. A `[DONE]` line ends the run.
#[derive(Debug, Clone)]
pub struct HttpGenerationEngine {
    http: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
}

impl HttpGenerationEngine {
    #[must_use]
    pub fn new(endpoint: String, api_key: Option<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            endpoint,
            api_key: api_key.filter(|k| !k.trim().is_empty()),
        }
    }
}

#[async_trait::async_trait]
impl GenerationEngine for HttpGenerationEngine {
    async fn generate(&self, req: GenerationRequest) -> anyhow::Result<FrameStream> {
        let mut rb = self
            .http
            .post(&self.endpoint)
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .json(&req);
        if let Some(k) = &self.api_key {
            rb = rb.bearer_auth(k);
        }

        let resp = rb.send().await?.error_for_status()?;
        let byte_stream = resp.bytes_stream();
        let session_id = req.session_id;

        let out = async_stream::stream! {
            let mut buf = Vec::<u8>::new();
            let mut pending_cr = false;

            futures::pin_mut!(byte_stream);
            while let Some(chunk) = byte_stream.next().await {
                let chunk = match chunk {
                    Ok(c) => c,
                    Err(e) => {
                        yield Err(anyhow::Error::from(e));
                        return;
                    }
                };
                push_normalized(&mut buf, &chunk, &mut pending_cr);

                while let Some(pos) = find_double_newline(&buf) {
                    let frame = buf.drain(..pos + 2).collect::<Vec<_>>();
                    let text = String::from_utf8_lossy(&frame);

                    for data in data_lines(&text) {
                        if data == "[DONE]" {
                            tracing::debug!(session_id = %session_id, "Engine signalled end of stream");
                            return;
                        }
                        yield parse_frame(data);
                    }
                }
            }

            // The last frame may end without a blank line.
            if pending_cr {
                buf.push(b'\n');
            }
            let text = String::from_utf8_lossy(&buf);
            for data in data_lines(&text) {
                if data == "[DONE]" {
                    return;
                }
                yield parse_frame(data);
            }
        };

        Ok(Box::pin(out))
    }
}

fn parse_frame(data: &str) -> anyhow::Result<serde_json::Value> {
    serde_json::from_str(data).map_err(|e| anyhow::anyhow!("invalid engine frame: {e}"))
}

/// Append `chunk` to `buf` with `\r\n` and lone `\r` line endings turned into
/// `\n`. A `\r` at the end of a chunk is held in `pending_cr` until the next
/// byte shows whether it starts a `\r\n` pair.
fn push_normalized(buf: &mut Vec<u8>, chunk: &[u8], pending_cr: &mut bool) {
    for &byte in chunk {
        if std::mem::take(pending_cr) {
            buf.push(b'\n');
            if byte == b'\n' {
                continue;
            }
        }
        if byte == b'\r' {
            *pending_cr = true;
        } else {
            buf.push(byte);
        }
    }
}

/// Payloads of the `data:` lines in one SSE frame.
fn data_lines(frame: &str) -> impl Iterator<Item = &str> {
    frame
        .lines()
        .map(str::trim)
        .filter_map(|line| line.strip_prefix("data:"))
        .map(str::trim)
        .filter(|data| !data.is_empty())
}

/// Find the position of a double newline in the buffer.
fn find_double_newline(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == b"\n\n")
}

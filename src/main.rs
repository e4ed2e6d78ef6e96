//! Travel result delivery server
//!
//! Entry point: loads configuration and serves the streaming API.

use std::sync::Arc;

use mimalloc::MiMalloc;
use travel_stream::config::AppConfig;

/// Global allocator for improved performance (M-MIMALLOC-APPS).
#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env (if present)
    let _ = dotenvy::dotenv();

    // Initialize tracing (M-LOG-STRUCTURED)
    travel_stream::telemetry::init()?;

    let config = match AppConfig::load() {
        Ok(c) => Arc::new(c),
        Err(e) => {
            eprintln!("Configuration error: {e}");
            std::process::exit(1);
        }
    };

    travel_stream::server::start_server(config).await
}

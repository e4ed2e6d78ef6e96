use clap::Parser;
use config::{Config, Environment, File, FileFormat};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Config file path
    #[arg(short, long, env = "CONFIG_FILE")]
    pub config: Option<String>,

    /// Port to listen on
    #[arg(long, env = "PORT")]
    pub port: Option<u16>,

    /// Result cache TTL in seconds
    #[arg(long, env = "CACHE_TTL_SECS")]
    pub cache_ttl_secs: Option<u64>,

    /// Enable rate limiting on the nearby channel
    #[arg(long, env = "RATE_LIMIT_ENABLED")]
    pub rate_limit_enabled: Option<bool>,

    /// Backing store provider (memory, postgres)
    #[arg(long, env = "PERSISTENCE_PROVIDER")]
    pub persistence_provider: Option<String>,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub cache: CacheConfig,
    pub stream: StreamConfig,
    pub session: SessionConfig,
    pub rate_limit: RateLimitConfig,
    pub persistence: PersistenceConfig,
    pub generation: GenerationConfig,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct ServerConfig {
    pub port: u16,
    pub host: String,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct CacheConfig {
    pub ttl_secs: u64,
    pub sweep_interval_secs: u64,
    /// Write backing-store hits back into the caches.
    pub repopulate_on_fallback: bool,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct StreamConfig {
    pub channel_capacity: usize,
    pub send_timeout_ms: u64,
    pub session_timeout_secs: u64,
    pub keep_alive_secs: u64,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct SessionConfig {
    pub reuse_window_secs: u64,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct RateLimitConfig {
    pub enabled: bool,
    pub window_ms: u64,
    pub max_requests: usize,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct PersistenceConfig {
    pub provider: String,
    pub database_url: String,
    /// Upper bound on the best-effort write of a finished result.
    pub write_timeout_ms: u64,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct GenerationConfig {
    /// `http` or `replay`.
    pub provider: String,
    pub endpoint: String,
    #[serde(default)]
    pub api_key: Option<String>,
    /// JSON array of producer events, used by the `replay` provider.
    #[serde(default)]
    pub replay_file: Option<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                port: 3000,
                host: "0.0.0.0".to_string(),
            },
            cache: CacheConfig {
                ttl_secs: 1800,
                sweep_interval_secs: 60,
                repopulate_on_fallback: true,
            },
            stream: StreamConfig {
                channel_capacity: 256,
                send_timeout_ms: 5000,
                session_timeout_secs: 300,
                keep_alive_secs: 15,
            },
            session: SessionConfig {
                reuse_window_secs: 600,
            },
            rate_limit: RateLimitConfig {
                enabled: true,
                window_ms: 10_000,
                max_requests: 20,
            },
            persistence: PersistenceConfig {
                provider: "memory".to_string(),
                database_url: String::new(),
                write_timeout_ms: 2000,
            },
            generation: GenerationConfig {
                provider: "http".to_string(),
                endpoint: "http://127.0.0.1:8088/generate".to_string(),
                api_key: None,
                replay_file: None,
            },
        }
    }
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }
}

impl StreamConfig {
    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }

    pub fn session_timeout(&self) -> Duration {
        Duration::from_secs(self.session_timeout_secs)
    }

    pub fn keep_alive(&self) -> Duration {
        Duration::from_secs(self.keep_alive_secs.max(1))
    }
}

impl SessionConfig {
    pub fn reuse_window(&self) -> Duration {
        Duration::from_secs(self.reuse_window_secs)
    }
}

impl PersistenceConfig {
    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }
}

impl RateLimitConfig {
    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }
}

impl AppConfig {
    pub fn load() -> Result<Self, config::ConfigError> {
        Self::load_from_args(std::env::args())
    }

    pub fn load_from_args<I, T>(args: I) -> Result<Self, config::ConfigError>
    where
        I: IntoIterator<Item = T>,
        T: Into<std::ffi::OsString> + Clone,
    {
        let cli =
            Cli::try_parse_from(args).map_err(|e| config::ConfigError::Message(e.to_string()))?;

        let defaults = Self::default();
        let mut builder = Config::builder();

        // 1. Defaults
        builder = builder
            .set_default("server.port", i64::from(defaults.server.port))?
            .set_default("server.host", defaults.server.host)?
            .set_default("cache.ttl_secs", defaults.cache.ttl_secs as i64)?
            .set_default("cache.sweep_interval_secs", defaults.cache.sweep_interval_secs as i64)?
            .set_default(
                "cache.repopulate_on_fallback",
                defaults.cache.repopulate_on_fallback,
            )?
            .set_default("stream.channel_capacity", defaults.stream.channel_capacity as i64)?
            .set_default("stream.send_timeout_ms", defaults.stream.send_timeout_ms as i64)?
            .set_default("stream.session_timeout_secs", defaults.stream.session_timeout_secs as i64)?
            .set_default("stream.keep_alive_secs", defaults.stream.keep_alive_secs as i64)?
            .set_default("session.reuse_window_secs", defaults.session.reuse_window_secs as i64)?
            .set_default("rate_limit.enabled", defaults.rate_limit.enabled)?
            .set_default("rate_limit.window_ms", defaults.rate_limit.window_ms as i64)?
            .set_default("rate_limit.max_requests", defaults.rate_limit.max_requests as i64)?
            .set_default("persistence.provider", defaults.persistence.provider)?
            .set_default("persistence.database_url", defaults.persistence.database_url)?
            .set_default("persistence.write_timeout_ms", defaults.persistence.write_timeout_ms as i64)?
            .set_default("generation.provider", defaults.generation.provider)?
            .set_default("generation.endpoint", defaults.generation.endpoint)?;

        // 2. Config file: explicit path, else ./config.yaml when present
        if let Some(path) = &cli.config {
            builder = builder.add_source(File::with_name(path).required(true));
        } else if Path::new("config.yaml").exists() {
            builder = builder.add_source(File::new("config.yaml", FileFormat::Yaml).required(false));
        }

        // 3. Environment variables, e.g. TRAVEL_SERVER__PORT=8000
        builder = builder.add_source(
            Environment::with_prefix("TRAVEL")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        // 4. CLI flags (and their plain env fallbacks via clap)
        if let Some(port) = cli.port {
            builder = builder.set_override("server.port", i64::from(port))?;
        }
        if let Some(ttl) = cli.cache_ttl_secs {
            builder = builder.set_override("cache.ttl_secs", ttl as i64)?;
        }
        if let Some(rl) = cli.rate_limit_enabled {
            builder = builder.set_override("rate_limit.enabled", rl)?;
        }
        if let Some(provider) = cli.persistence_provider {
            builder = builder.set_override("persistence.provider", provider)?;
        }

        let cfg = builder.build()?;
        cfg.try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duration_helpers() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.cache.ttl(), Duration::from_secs(1800));
        assert_eq!(cfg.stream.send_timeout(), Duration::from_secs(5));
        assert_eq!(cfg.stream.session_timeout(), Duration::from_secs(300));
        assert_eq!(cfg.session.reuse_window(), Duration::from_secs(600));
        assert_eq!(cfg.rate_limit.window(), Duration::from_secs(10));
        assert_eq!(cfg.persistence.write_timeout(), Duration::from_secs(2));
    }

    #[test]
    fn test_zero_intervals_are_clamped() {
        let mut cfg = AppConfig::default();
        cfg.cache.sweep_interval_secs = 0;
        cfg.stream.keep_alive_secs = 0;
        assert_eq!(cfg.cache.sweep_interval(), Duration::from_secs(1));
        assert_eq!(cfg.stream.keep_alive(), Duration::from_secs(1));
    }
}

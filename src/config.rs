//! Server Configuration
//!
//! Runtime settings sourced from environment variables. Game numeric tuning
//! lives in `world::balance`, not here.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Server/runtime configuration.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Bind address for the WebSocket listener.
    pub bind_addr: SocketAddr,
    /// Maximum concurrent connections.
    pub max_connections: usize,
    /// HS256 secret used to validate access tokens.
    pub auth_secret: String,
    /// Skip token expiry validation (testing only).
    pub auth_skip_expiry: bool,
    /// TTL applied to a player's ephemeral keys.
    pub player_ttl: Duration,
    /// Directory holding static world content (majors, courses, achievements, balance).
    pub world_dir: PathBuf,
    /// Directory holding durable game saves.
    pub save_dir: PathBuf,
    /// API key for the content generator; unset means static fallback content.
    pub content_api_key: Option<String>,
    /// Base URL of the OpenAI-compatible content endpoint.
    pub content_base_url: String,
    /// Model name passed to the content endpoint.
    pub content_model: String,
    /// Heartbeat interval for the connection reaper.
    pub reaper_interval: Duration,
    /// A channel silent longer than this is force-closed.
    pub heartbeat_timeout: Duration,
    /// Server version string.
    pub version: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8090".parse().unwrap(),
            max_connections: 1000,
            auth_secret: String::new(),
            auth_skip_expiry: false,
            player_ttl: Duration::from_secs(60 * 60 * 24),
            world_dir: PathBuf::from("world"),
            save_dir: PathBuf::from("saves"),
            content_api_key: None,
            content_base_url: "https://api.openai.com/v1".to_string(),
            content_model: "gpt-4o-mini".to_string(),
            reaper_interval: Duration::from_secs(30),
            heartbeat_timeout: Duration::from_secs(120),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

impl Settings {
    /// Create settings from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            bind_addr: std::env::var("BIND_ADDR")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.bind_addr),
            max_connections: std::env::var("MAX_CONNECTIONS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.max_connections),
            auth_secret: std::env::var("AUTH_SECRET").unwrap_or_default(),
            auth_skip_expiry: std::env::var("AUTH_SKIP_EXPIRY")
                .map(|v| v == "true" || v == "1")
                .unwrap_or(false),
            player_ttl: std::env::var("PLAYER_TTL_SECONDS")
                .ok()
                .and_then(|v| v.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.player_ttl),
            world_dir: std::env::var("WORLD_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.world_dir),
            save_dir: std::env::var("SAVE_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.save_dir),
            content_api_key: std::env::var("CONTENT_API_KEY").ok(),
            content_base_url: std::env::var("CONTENT_BASE_URL")
                .unwrap_or(defaults.content_base_url),
            content_model: std::env::var("CONTENT_MODEL").unwrap_or(defaults.content_model),
            reaper_interval: std::env::var("REAPER_INTERVAL_SECONDS")
                .ok()
                .and_then(|v| v.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.reaper_interval),
            heartbeat_timeout: std::env::var("HEARTBEAT_TIMEOUT_SECONDS")
                .ok()
                .and_then(|v| v.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.heartbeat_timeout),
            version: defaults.version,
        }
    }

    /// Check whether token validation can run.
    pub fn auth_configured(&self) -> bool {
        !self.auth_secret.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = Settings::default();
        assert_eq!(settings.max_connections, 1000);
        assert_eq!(settings.player_ttl, Duration::from_secs(86400));
        assert!(!settings.auth_configured());
    }

    #[test]
    fn test_auth_configured() {
        let settings = Settings {
            auth_secret: "secret".into(),
            ..Default::default()
        };
        assert!(settings.auth_configured());
    }
}

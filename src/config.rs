//! Configuration types.

use std::path::PathBuf;
use std::time::Duration;

use crate::error::ConfigError;

/// Tunables for relay workers.
#[derive(Debug, Clone)]
pub struct ForwarderConfig {
    /// Maximum characters of message text kept in an audit entry.
    pub max_audit_text_chars: usize,
    /// Maximum characters of error text kept in an audit entry.
    pub max_audit_error_chars: usize,
    /// Maximum characters of the resolution error quoted in a startup failure entry.
    pub max_startup_error_chars: usize,
    /// How long `stop_rule` waits for a worker to finish disconnecting.
    pub stop_grace_period: Duration,
}

impl Default for ForwarderConfig {
    fn default() -> Self {
        Self {
            max_audit_text_chars: 100,
            max_audit_error_chars: 200,
            max_startup_error_chars: 150,
            stop_grace_period: Duration::from_secs(10),
        }
    }
}

/// Process-level settings read from the environment.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub db_path: PathBuf,
    /// Allowed CORS origins; `*` allows any.
    pub cors_origins: Vec<String>,
    /// Base URL of the user-account gateway.
    pub bridge_url: String,
    /// Long-poll timeout passed to the gateway's `getUpdates`.
    pub bridge_poll_timeout_secs: u64,
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let port: u16 = std::env::var("FORWARDER_PORT")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(8001);

        let db_path = std::env::var("FORWARDER_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./data/autoforward.db"));

        let cors_origins: Vec<String> = std::env::var("CORS_ORIGINS")
            .unwrap_or_else(|_| "*".to_string())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        let bridge_url = bridge_base_url(
            &std::env::var("TELEGRAM_BRIDGE_URL")
                .unwrap_or_else(|_| "http://127.0.0.1:8081".to_string()),
        )?;

        let bridge_poll_timeout_secs: u64 = std::env::var("TELEGRAM_BRIDGE_POLL_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(30);

        Ok(Self {
            port,
            db_path,
            cors_origins,
            bridge_url,
            bridge_poll_timeout_secs,
        })
    }

    /// Whether any origin may call the API.
    pub fn allows_any_origin(&self) -> bool {
        self.cors_origins.is_empty() || self.cors_origins.iter().any(|o| o == "*")
    }
}

/// Normalize the gateway base URL: http(s) only, no trailing slash.
fn bridge_base_url(raw: &str) -> Result<String, ConfigError> {
    let url = raw.trim().trim_end_matches('/');
    if !(url.starts_with("http://") || url.starts_with("https://")) {
        return Err(ConfigError::InvalidValue {
            key: "TELEGRAM_BRIDGE_URL".into(),
            message: format!("expected an http(s) URL, got {raw:?}"),
        });
    }
    Ok(url.to_string())
}

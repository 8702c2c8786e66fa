//! Configuration module for environment variable parsing.
//!
//! All settings are read once at startup and handed to the components that
//! need them through [`crate::web::AppState`].

use std::env;
use tracing::warn;

const DEFAULT_PORT: u16 = 8000;
const DEFAULT_DATABASE_URL: &str = "sqlite://data/app.db";
const DEFAULT_LOG_LEVEL: &str = "info";

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Port for the web server to listen on
    pub port: u16,

    /// SQLite connection URL for the message store
    pub database_url: String,

    /// Shared secret used to verify the `X-Signature` header.
    /// `None` when unset or blank; the service then reports itself unready.
    pub webhook_secret: Option<String>,

    /// Fallback log filter when `RUST_LOG` is not set
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            port: DEFAULT_PORT,
            database_url: DEFAULT_DATABASE_URL.to_string(),
            webhook_secret: None,
            log_level: DEFAULT_LOG_LEVEL.to_string(),
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        Config {
            port: parse_number("PORT", DEFAULT_PORT),

            database_url: env::var("DATABASE_URL")
                .ok()
                .filter(|v| !v.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_DATABASE_URL.to_string()),

            webhook_secret: parse_secret("WEBHOOK_SECRET"),

            log_level: env::var("LOG_LEVEL")
                .ok()
                .map(|v| v.trim().to_lowercase())
                .filter(|v| !v.is_empty())
                .unwrap_or_else(|| DEFAULT_LOG_LEVEL.to_string()),
        }
    }

    /// Whether a usable shared secret is configured.
    pub fn has_webhook_secret(&self) -> bool {
        self.webhook_secret.is_some()
    }

    /// The shared secret as raw key bytes, empty when unset.
    pub fn secret_bytes(&self) -> &[u8] {
        self.webhook_secret
            .as_deref()
            .map(str::as_bytes)
            .unwrap_or_default()
    }
}

/// Parse a numeric variable, falling back to `default` when absent or invalid.
fn parse_number<T: std::str::FromStr>(name: &str, default: T) -> T {
    let raw = match env::var(name) {
        Ok(v) => v,
        Err(_) => return default,
    };

    match raw.trim().parse() {
        Ok(v) => v,
        Err(_) => {
            warn!(env_var = name, value = %raw, "Invalid number, using default");
            default
        }
    }
}

/// Read a secret, treating blank values as unset.
fn parse_secret(name: &str) -> Option<String> {
    env::var(name).ok().filter(|s| !s.trim().is_empty())
}

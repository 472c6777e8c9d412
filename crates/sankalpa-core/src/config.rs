//! ============================================================================
//! Application Configuration
//! ============================================================================
//! Read from the process environment (after an optional .env file).
//! ============================================================================

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

pub const DEFAULT_API_URL: &str = "https://api.anthropic.com/v1/messages";
pub const DEFAULT_MODEL: &str = "claude-sonnet-4-5";
pub const DEFAULT_MAX_TOKENS: u32 = 1024;
pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 30;

/// Application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub anthropic_api_key: Option<String>,
    pub anthropic_api_url: String,
    pub model: String,
    pub max_tokens: u32,
    /// File overriding the built-in extraction preamble
    pub prompt_path: Option<String>,
    /// Store location; None falls back to ~/.sankalpa/habits.redb
    pub db_path: Option<String>,
    /// Client-side request timeout for the extraction call
    pub http_timeout_secs: u64,
    /// Principal used by the CLI when --user is not given
    pub default_user: Option<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            anthropic_api_key: env_non_empty("ANTHROPIC_API_KEY"),
            anthropic_api_url: env_non_empty("ANTHROPIC_API_URL")
                .unwrap_or_else(|| DEFAULT_API_URL.to_string()),
            model: env_non_empty("ANTHROPIC_MODEL_ID").unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            max_tokens: env_parsed("ANTHROPIC_MAX_TOKENS").unwrap_or(DEFAULT_MAX_TOKENS),
            prompt_path: env_non_empty("SANKALPA_PROMPT_PATH"),
            db_path: env_non_empty("SANKALPA_DB_PATH"),
            http_timeout_secs: env_parsed("SANKALPA_HTTP_TIMEOUT_SECS")
                .unwrap_or(DEFAULT_HTTP_TIMEOUT_SECS),
            default_user: env_non_empty("SANKALPA_USER"),
        }
    }
}

impl AppConfig {
    /// Load .env (if present) then read the environment
    pub fn from_env() -> Self {
        if let Err(e) = dotenvy::dotenv() {
            debug!("No .env file loaded: {}", e);
        }
        Self::default()
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }
}

fn env_non_empty(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn env_parsed<T: std::str::FromStr>(key: &str) -> Option<T> {
    env_non_empty(key).and_then(|v| v.parse().ok())
}

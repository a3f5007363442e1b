//! Configuration types for instantly-client.

use std::env;
use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use tracing::{debug, info};

use crate::error::InstantlyError;

/// Production API host.
pub const DEFAULT_BASE_URL: &str = "https://api.instantly.ai";

/// Local credentials file used when no key is present in the environment.
pub const DEFAULT_CREDENTIALS_PATH: &str = "config/secrets/instantly-config.json";

/// Configuration for connecting to the Instantly API.
#[derive(Clone)]
pub struct ClientConfig {
    /// Base URL of the API (e.g., "https://api.instantly.ai").
    pub base_url: String,
    /// Bearer token.
    pub api_key: String,
    /// Per-request timeout.
    pub timeout: Duration,
}

#[derive(Deserialize)]
struct CredentialsFile {
    api_key: Option<String>,
}

impl ClientConfig {
    /// Create a new configuration with the given API key and the default host.
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key: api_key.into(),
            timeout: Duration::from_secs(30),
        }
    }

    /// Override the API host.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Override the per-request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Load configuration from environment variables for the production key set.
    pub fn from_env() -> Result<Self, InstantlyError> {
        Self::from_env_for(None)
    }

    /// Load configuration from environment variables.
    ///
    /// | Variable | Description | Default |
    /// |----------|-------------|---------|
    /// | `INSTANTLY_API_KEY_<ENV>` | Key for `api_env` (`PROD`, `STAGING`, `DEV`) | - |
    /// | `INSTANTLY_API_KEY` | Generic key | - |
    /// | `INSTANTLY_CONFIG_PATH` | JSON credentials file | `config/secrets/instantly-config.json` |
    /// | `INSTANTLY_BASE_URL` | API host | `https://api.instantly.ai` |
    /// | `INSTANTLY_TIMEOUT_SECS` | Request timeout | `30` |
    pub fn from_env_for(api_env: Option<&str>) -> Result<Self, InstantlyError> {
        let credentials_path = env::var("INSTANTLY_CONFIG_PATH")
            .unwrap_or_else(|_| DEFAULT_CREDENTIALS_PATH.to_string());

        let api_key = resolve_api_key(
            |name| env::var(name).ok(),
            api_env,
            Path::new(&credentials_path),
        )?;

        let mut config = Self::new(api_key);

        if let Ok(base_url) = env::var("INSTANTLY_BASE_URL") {
            config = config.with_base_url(base_url);
        }

        if let Some(secs) = env::var("INSTANTLY_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
        {
            config = config.with_timeout(Duration::from_secs(secs));
        }

        Ok(config)
    }

    /// Full URL for an API path such as `/api/v2/leads/list`.
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

impl std::fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientConfig")
            .field("base_url", &self.base_url)
            .field("api_key", &"<redacted>")
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// Resolve the API key from, in order: the environment-specific variable,
/// `INSTANTLY_API_KEY`, then the JSON credentials file.
pub fn resolve_api_key<F>(
    lookup: F,
    api_env: Option<&str>,
    credentials_path: &Path,
) -> Result<String, InstantlyError>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(var) = api_env.and_then(env_specific_key_var) {
        if let Some(key) = lookup(var).filter(|k| !k.trim().is_empty()) {
            debug!("Using {} for Instantly API key", var);
            return Ok(key);
        }
    }

    if let Some(key) = lookup("INSTANTLY_API_KEY").filter(|k| !k.trim().is_empty()) {
        return Ok(key);
    }

    if credentials_path.exists() {
        let raw = fs::read_to_string(credentials_path).map_err(|e| {
            InstantlyError::Config(format!(
                "failed to read {}: {}",
                credentials_path.display(),
                e
            ))
        })?;
        let file: CredentialsFile = serde_json::from_str(&raw)?;
        if let Some(key) = file.api_key.filter(|k| !k.trim().is_empty()) {
            info!("Loaded Instantly API key from {}", credentials_path.display());
            return Ok(key);
        }
    }

    Err(InstantlyError::Config(
        "INSTANTLY_API_KEY not found in environment or credentials file".to_string(),
    ))
}

fn env_specific_key_var(api_env: &str) -> Option<&'static str> {
    match api_env.to_ascii_lowercase().as_str() {
        "production" | "prod" => Some("INSTANTLY_API_KEY_PROD"),
        "staging" => Some("INSTANTLY_API_KEY_STAGING"),
        "dev" | "development" => Some("INSTANTLY_API_KEY_DEV"),
        _ => None,
    }
}

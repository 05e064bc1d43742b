use serde::{Deserialize, Serialize};
use std::env;
use tracing::debug;

// Default configuration values
const DEFAULT_API_URL: &str = "http://localhost:8000";

/// Environment variable carrying the backend API base URL
pub const API_URL_ENV: &str = "VERANDA_API_URL";

/// Configuration for the session core.
///
/// The API base URL is the only externally configurable surface of this
/// component; everything else (timeout, header names, endpoint paths) is
/// fixed by the backend contract.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Base URL of the backend API, without a trailing slash
    #[serde(default = "default_api_url")]
    pub api_url: String,
}

impl Config {
    /// Build a configuration from the environment, falling back to the local
    /// development default when the variable is unset or empty.
    pub fn from_env() -> Self {
        let api_url = match env::var(API_URL_ENV) {
            Ok(url) if !url.trim().is_empty() => url,
            _ => DEFAULT_API_URL.to_string(),
        };

        let config = Self::with_api_url(&api_url);
        debug!(api_url = %config.api_url, "Resolved API configuration");
        config
    }

    /// Build a configuration with an explicit base URL (tests, embedding)
    pub fn with_api_url(api_url: &str) -> Self {
        Self {
            api_url: api_url.trim().trim_end_matches('/').to_string(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
        }
    }
}

fn default_api_url() -> String {
    DEFAULT_API_URL.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_trailing_slashes() {
        let config = Config::with_api_url("https://api.veranda.app/");
        assert_eq!(config.api_url, "https://api.veranda.app");

        let config = Config::with_api_url("https://api.veranda.app///");
        assert_eq!(config.api_url, "https://api.veranda.app");
    }

    #[test]
    fn default_points_at_local_backend() {
        let config = Config::default();
        assert_eq!(config.api_url, "http://localhost:8000");
    }
}

//! Console client configuration.
//!
//! Parses the TOML configuration that wires the engine to a DQ backend:
//! base URL, bearer-token source, autosave quiet period, and page size.
//! The auth token is an explicit dependency - it is resolved here and handed
//! to the components that need it, never read from ambient state deeper in
//! the stack.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors from configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    /// The TOML is invalid.
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    /// The configuration is structurally valid but unusable.
    #[error("invalid configuration: {0}")]
    Validation(String),

    /// The named token environment variable is unset or empty.
    #[error("auth token environment variable not set: {var}")]
    MissingToken {
        /// The environment variable named by `auth_token_env`.
        var: String,
    },
}

fn default_autosave_debounce_ms() -> u64 {
    800
}

fn default_page_size() -> u32 {
    200
}

fn default_request_timeout_secs() -> u64 {
    30
}

/// Client configuration for one DQ backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsoleConfig {
    /// Base URL of the DQ backend API.
    pub api_base_url: String,

    /// Environment variable holding the bearer token, e.g. `DQC_API_TOKEN`.
    ///
    /// Referencing an environment variable keeps the secret out of the
    /// config file itself.
    #[serde(default)]
    pub auth_token_env: Option<String>,

    /// Quiet period after the last cell edit before autosave flushes.
    #[serde(default = "default_autosave_debounce_ms")]
    pub autosave_debounce_ms: u64,

    /// Requested page size for row fetches. The backend may clamp it.
    #[serde(default = "default_page_size")]
    pub page_size: u32,

    /// Per-request timeout.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl ConsoleConfig {
    /// Creates a configuration pointing at `api_base_url` with defaults for
    /// everything else.
    #[must_use]
    pub fn new(api_base_url: impl Into<String>) -> Self {
        Self {
            api_base_url: api_base_url.into(),
            auth_token_env: None,
            autosave_debounce_ms: default_autosave_debounce_ms(),
            page_size: default_page_size(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }

    /// Loads configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the file cannot be read, parsed, or
    /// validated.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parses configuration from a TOML string and validates it.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] for invalid TOML and
    /// [`ConfigError::Validation`] for an unusable base URL or a zero
    /// page size.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Validation`] for an unusable base URL or a
    /// zero page size.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.api_base_url.starts_with("http://") && !self.api_base_url.starts_with("https://")
        {
            return Err(ConfigError::Validation(format!(
                "api_base_url must be an http(s) URL, got '{}'",
                self.api_base_url
            )));
        }
        if self.page_size == 0 {
            return Err(ConfigError::Validation(
                "page_size must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Resolves the bearer token from the configured environment variable.
    ///
    /// Returns `Ok(None)` when no variable is configured (anonymous access
    /// left to the backend to reject).
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingToken`] when a variable is configured
    /// but unset or empty - fail closed rather than sending unauthenticated
    /// writes.
    pub fn resolve_token(&self) -> Result<Option<String>, ConfigError> {
        match &self.auth_token_env {
            None => Ok(None),
            Some(var) => match std::env::var(var) {
                Ok(token) if !token.is_empty() => Ok(Some(token)),
                _ => Err(ConfigError::MissingToken { var: var.clone() }),
            },
        }
    }

    /// Autosave quiet period as a [`Duration`].
    #[must_use]
    pub const fn autosave_debounce(&self) -> Duration {
        Duration::from_millis(self.autosave_debounce_ms)
    }

    /// Per-request timeout as a [`Duration`].
    #[must_use]
    pub const fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

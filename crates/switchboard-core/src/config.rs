//! API configuration, loaded from the environment.

use crate::error::{AgentError, Result};

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

const API_KEY_VAR: &str = "OPENAI_API_KEY";
const BASE_URL_VAR: &str = "OPENAI_BASE_URL";
const DISABLE_TRACING_VAR: &str = "OPENAI_AGENTS_DISABLE_TRACING";

/// Connection settings for the Responses endpoint.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub api_key: String,
    pub base_url: String,
}

impl ApiConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
        }
    }

    /// Read `OPENAI_API_KEY` (required) and `OPENAI_BASE_URL` (optional).
    pub fn from_env() -> Result<Self> {
        let api_key = std::env::var(API_KEY_VAR)
            .ok()
            .filter(|key| !key.is_empty())
            .ok_or_else(|| AgentError::invalid_config(API_KEY_VAR, "not set"))?;

        let mut config = Self::new(api_key);
        if let Ok(base_url) = std::env::var(BASE_URL_VAR) {
            if !base_url.is_empty() {
                config = config.with_base_url(base_url);
            }
        }
        Ok(config)
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        // Trailing slashes would double up when joining endpoint paths.
        while self.base_url.ends_with('/') {
            self.base_url.pop();
        }
        self
    }
}

/// `OPENAI_AGENTS_DISABLE_TRACING=true|1` turns the tracing subsystem off.
pub fn tracing_disabled() -> bool {
    std::env::var(DISABLE_TRACING_VAR)
        .map(|value| value == "true" || value == "1")
        .unwrap_or(false)
}

//! Environment configuration
//!
//! All external collaborators are constructed from an explicit config value
//! and injected into the pipeline, never from module-level singletons, so
//! tests can substitute mock adapters.

use std::env;
use std::time::Duration;

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_MODEL: &str = "gpt-4o-mini";
const DEFAULT_DATABASE_URL: &str = "sqlite://data/sales.db";
const DEFAULT_LLM_TIMEOUT_SECS: u64 = 60;

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub openai_api_key: String,
    pub openai_base_url: String,
    pub model: String,
    pub database_url: String,
    /// Per-request timeout at the adapter boundary. A hung model call fails
    /// the step instead of blocking the request indefinitely.
    pub llm_timeout: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            openai_api_key: String::new(),
            openai_base_url: DEFAULT_BASE_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            database_url: DEFAULT_DATABASE_URL.to_string(),
            llm_timeout: Duration::from_secs(DEFAULT_LLM_TIMEOUT_SECS),
        }
    }
}

impl PipelineConfig {
    /// Load configuration from the environment, falling back to defaults.
    /// A missing API key is not an error here; the adapter reports it on
    /// first use.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let llm_timeout = env::var("LLM_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .map(Duration::from_secs)
            .unwrap_or(defaults.llm_timeout);

        Self {
            openai_api_key: env::var("OPENAI_API_KEY").unwrap_or(defaults.openai_api_key),
            openai_base_url: env::var("OPENAI_BASE_URL").unwrap_or(defaults.openai_base_url),
            model: env::var("OPENAI_MODEL").unwrap_or(defaults.model),
            database_url: env::var("SALES_DATABASE_URL").unwrap_or(defaults.database_url),
            llm_timeout,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = PipelineConfig::default();
        assert!(config.openai_api_key.is_empty());
        assert_eq!(config.openai_base_url, "https://api.openai.com/v1");
        assert_eq!(config.model, "gpt-4o-mini");
        assert_eq!(config.database_url, "sqlite://data/sales.db");
        assert_eq!(config.llm_timeout, Duration::from_secs(60));
    }
}

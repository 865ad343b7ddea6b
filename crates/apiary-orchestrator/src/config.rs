use apiary_core::{ApiaryError, ApiaryResult};
use serde::{Deserialize, Serialize};
use std::path::Path;

fn default_timeout_ms() -> i64 {
    30_000
}

fn default_max_retries() -> u32 {
    1
}

fn default_retry_delay_ms() -> i64 {
    500
}

/// Timing and retry knobs for the orchestrator.
///
/// Retries use a fixed delay, applied uniformly — not exponential backoff.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Implicit per-attempt deadline after a send, milliseconds.
    #[serde(default = "default_timeout_ms")]
    pub default_timeout_ms: i64,
    /// Resends allowed beyond the first attempt.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Fixed delay before a scheduled resend, milliseconds.
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: i64,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            default_timeout_ms: default_timeout_ms(),
            max_retries: default_max_retries(),
            retry_delay_ms: default_retry_delay_ms(),
        }
    }
}

impl OrchestratorConfig {
    /// Parses a TOML fragment, filling omitted fields with defaults.
    pub fn from_toml_str(source: &str) -> ApiaryResult<Self> {
        let config: Self =
            toml::from_str(source).map_err(|e| ApiaryError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Loads and parses a TOML config file.
    pub fn load(path: impl AsRef<Path>) -> ApiaryResult<Self> {
        let source = std::fs::read_to_string(path)?;
        Self::from_toml_str(&source)
    }

    /// Rejects non-positive timeouts and negative delays.
    pub fn validate(&self) -> ApiaryResult<()> {
        if self.default_timeout_ms <= 0 {
            return Err(ApiaryError::Config(
                "default_timeout_ms must be positive".to_owned(),
            ));
        }
        if self.retry_delay_ms < 0 {
            return Err(ApiaryError::Config(
                "retry_delay_ms must be non-negative".to_owned(),
            ));
        }
        Ok(())
    }
}

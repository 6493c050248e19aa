//! Engine configuration types.
//!
//! `EngineConfig` represents the `flowforge.toml` file that tunes step
//! timeouts, retry semantics, the HTTP client and simulation defaults.

use serde::{Deserialize, Serialize};

use crate::simulation::SimulationConfig;

/// Top-level configuration. All sections and fields have defaults, so an
/// empty file is valid.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub engine: EngineSettings,
    #[serde(default)]
    pub http: HttpSettings,
    /// Defaults for simulations started without an explicit config.
    #[serde(default)]
    pub simulation: SimulationConfig,
}

/// How a successful retry relates to the failure that triggered it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryMode {
    /// A later successful attempt replaces the earlier failure; the step
    /// completes with that attempt's output.
    #[default]
    RetrySuccessClears,
    /// Retries still run, but the first failure decides the step outcome.
    FirstFailureAuthoritative,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineSettings {
    /// Applied to steps without their own `timeout`.
    #[serde(default = "default_step_timeout_secs")]
    pub default_step_timeout_secs: u64,
    #[serde(default)]
    pub retry_mode: RetryMode,
    /// Run the validator on submit and fail the execution on errors.
    #[serde(default)]
    pub validate_before_run: bool,
    /// Capacity of the engine's broadcast event channel.
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
}

fn default_step_timeout_secs() -> u64 {
    300
}

fn default_event_capacity() -> usize {
    1024
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            default_step_timeout_secs: default_step_timeout_secs(),
            retry_mode: RetryMode::default(),
            validate_before_run: false,
            event_capacity: default_event_capacity(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpSettings {
    /// Client-wide request timeout in seconds.
    #[serde(default = "default_http_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

fn default_http_timeout_secs() -> u64 {
    30
}

fn default_user_agent() -> String {
    "flowforge/0.1".to_string()
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            timeout_secs: default_http_timeout_secs(),
            user_agent: default_user_agent(),
        }
    }
}

use serde::{Deserialize, Serialize};

use crate::shared::ValidationError;

/// How the emulator binary is launched and supervised.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct EmulatorConfig {
    /// Program to execute, looked up on `PATH` when not absolute.
    #[serde(default = "default_binary")]
    pub binary: String,
    /// Arguments placed before the emulator flags, e.g. when launching through a wrapper.
    #[serde(default)]
    pub binary_args: Vec<String>,
    /// Maximum time, in milliseconds, to wait for the data port to accept connections.
    #[serde(default = "default_readiness_timeout_ms")]
    pub readiness_timeout_ms: u64,
    /// Delay, in milliseconds, between two readiness probes.
    #[serde(default = "default_readiness_poll_interval_ms")]
    pub readiness_poll_interval_ms: u64,
    /// Maximum time, in milliseconds, to wait for a graceful exit before killing the process.
    #[serde(default = "default_stop_timeout_ms")]
    pub stop_timeout_ms: u64,
    /// Maximum time, in milliseconds, a query job may run before the query fails.
    #[serde(default = "default_query_timeout_ms")]
    pub query_timeout_ms: u64,
}

impl EmulatorConfig {
    /// Default emulator program name.
    pub const DEFAULT_BINARY: &'static str = "bigquery-emulator";

    /// Default readiness deadline.
    pub const DEFAULT_READINESS_TIMEOUT_MS: u64 = 10_000;

    /// Default readiness polling interval.
    pub const DEFAULT_READINESS_POLL_INTERVAL_MS: u64 = 1_000;

    /// Default graceful shutdown deadline.
    pub const DEFAULT_STOP_TIMEOUT_MS: u64 = 5_000;

    /// Default query completion deadline.
    pub const DEFAULT_QUERY_TIMEOUT_MS: u64 = 60_000;

    /// Validates the emulator launch settings.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.binary.trim().is_empty() {
            return Err(ValidationError::InvalidFieldValue {
                field: "emulator.binary".to_string(),
                constraint: "must not be empty".to_string(),
            });
        }

        if self.readiness_poll_interval_ms == 0 {
            return Err(ValidationError::InvalidFieldValue {
                field: "emulator.readiness_poll_interval_ms".to_string(),
                constraint: "must be greater than 0".to_string(),
            });
        }

        if self.query_timeout_ms == 0 {
            return Err(ValidationError::InvalidFieldValue {
                field: "emulator.query_timeout_ms".to_string(),
                constraint: "must be greater than 0".to_string(),
            });
        }

        Ok(())
    }
}

impl Default for EmulatorConfig {
    fn default() -> Self {
        Self {
            binary: default_binary(),
            binary_args: Vec::new(),
            readiness_timeout_ms: default_readiness_timeout_ms(),
            readiness_poll_interval_ms: default_readiness_poll_interval_ms(),
            stop_timeout_ms: default_stop_timeout_ms(),
            query_timeout_ms: default_query_timeout_ms(),
        }
    }
}

fn default_binary() -> String {
    EmulatorConfig::DEFAULT_BINARY.to_string()
}

fn default_readiness_timeout_ms() -> u64 {
    EmulatorConfig::DEFAULT_READINESS_TIMEOUT_MS
}

fn default_readiness_poll_interval_ms() -> u64 {
    EmulatorConfig::DEFAULT_READINESS_POLL_INTERVAL_MS
}

fn default_stop_timeout_ms() -> u64 {
    EmulatorConfig::DEFAULT_STOP_TIMEOUT_MS
}

fn default_query_timeout_ms() -> u64 {
    EmulatorConfig::DEFAULT_QUERY_TIMEOUT_MS
}

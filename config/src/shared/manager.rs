use std::path::PathBuf;

use serde::Deserialize;

use crate::shared::{EmulatorConfig, RemoteSchemaConfig, ValidationError};

/// Top level configuration of an emulator manager.
///
/// Every field has a default, so an empty configuration source describes a manager that
/// launches `bigquery-emulator` for project `test` on ports 9050/9060 and caches schemas in
/// `bqem_master_schema.yaml`.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ManagerConfig {
    /// Project id served by the emulator.
    #[serde(default = "default_project")]
    pub project: String,
    /// First data (HTTP) port tried by the port scan.
    #[serde(default = "default_port")]
    pub port: u16,
    /// First control (gRPC) port tried by the port scan.
    #[serde(default = "default_grpc_port")]
    pub grpc_port: u16,
    /// Location of the schema cache file. Schemas are neither read nor persisted when unset.
    #[serde(default = "default_schema_path")]
    pub schema_path: Option<PathBuf>,
    /// Launch an emulator process. When false an emulator is expected to already listen on `port`.
    #[serde(default = "default_launch_emulator")]
    pub launch_emulator: bool,
    /// Run the emulator with debug logging.
    #[serde(default)]
    pub debug_mode: bool,
    /// Number of consecutive port pairs tried before giving up.
    #[serde(default = "default_max_port_attempts")]
    pub max_port_attempts: u16,
    /// Emulator process settings.
    #[serde(default)]
    pub emulator: EmulatorConfig,
    /// Remote schema source settings.
    #[serde(default)]
    pub remote: RemoteSchemaConfig,
}

impl ManagerConfig {
    /// Default project id.
    pub const DEFAULT_PROJECT: &'static str = "test";

    /// Default first data port.
    pub const DEFAULT_PORT: u16 = 9050;

    /// Default first gRPC port.
    pub const DEFAULT_GRPC_PORT: u16 = 9060;

    /// Default schema cache file name.
    pub const DEFAULT_SCHEMA_PATH: &'static str = "bqem_master_schema.yaml";

    /// Default number of port pairs scanned.
    pub const DEFAULT_MAX_PORT_ATTEMPTS: u16 = 20;

    /// Validates the configuration and all nested sections.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.project.trim().is_empty() {
            return Err(ValidationError::InvalidFieldValue {
                field: "project".to_string(),
                constraint: "must not be empty".to_string(),
            });
        }

        if self.port == self.grpc_port {
            return Err(ValidationError::PortsCollide(self.port));
        }

        self.emulator.validate()?;
        self.remote.validate()?;

        Ok(())
    }
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            project: default_project(),
            port: default_port(),
            grpc_port: default_grpc_port(),
            schema_path: default_schema_path(),
            launch_emulator: default_launch_emulator(),
            debug_mode: false,
            max_port_attempts: default_max_port_attempts(),
            emulator: EmulatorConfig::default(),
            remote: RemoteSchemaConfig::default(),
        }
    }
}

fn default_project() -> String {
    ManagerConfig::DEFAULT_PROJECT.to_string()
}

fn default_port() -> u16 {
    ManagerConfig::DEFAULT_PORT
}

fn default_grpc_port() -> u16 {
    ManagerConfig::DEFAULT_GRPC_PORT
}

fn default_schema_path() -> Option<PathBuf> {
    Some(PathBuf::from(ManagerConfig::DEFAULT_SCHEMA_PATH))
}

fn default_launch_emulator() -> bool {
    true
}

fn default_max_port_attempts() -> u16 {
    ManagerConfig::DEFAULT_MAX_PORT_ATTEMPTS
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        ManagerConfig::default().validate().unwrap();
    }

    #[test]
    fn colliding_ports_are_rejected() {
        let config = ManagerConfig {
            grpc_port: ManagerConfig::DEFAULT_PORT,
            ..ManagerConfig::default()
        };

        assert!(matches!(
            config.validate(),
            Err(ValidationError::PortsCollide(9050))
        ));
    }

    #[test]
    fn zero_poll_interval_is_rejected() {
        let mut config = ManagerConfig::default();
        config.emulator.readiness_poll_interval_ms = 0;

        assert!(matches!(
            config.validate(),
            Err(ValidationError::InvalidFieldValue { .. })
        ));
    }

    #[test]
    fn zero_query_timeout_is_rejected() {
        let mut config = ManagerConfig::default();
        config.emulator.query_timeout_ms = 0;

        assert!(matches!(
            config.validate(),
            Err(ValidationError::InvalidFieldValue { field, .. }) if field == "emulator.query_timeout_ms"
        ));
    }
}

use secrecy::SecretString;
use serde::Deserialize;

use crate::shared::ValidationError;

/// Production BigQuery endpoint used as the source of truth for table schemas.
///
/// This intentionally does not implement [`serde::Serialize`] to avoid accidentally
/// leaking the access token into serialized forms.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct RemoteSchemaConfig {
    /// Whether schemas missing from the cache file may be fetched remotely.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Base URL of the BigQuery REST API.
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    /// OAuth access token sent as a bearer token. Requests are anonymous when absent.
    #[serde(default)]
    pub access_token: Option<SecretString>,
}

impl RemoteSchemaConfig {
    /// Default production endpoint.
    pub const DEFAULT_ENDPOINT: &'static str = "https://bigquery.googleapis.com";

    /// Validates the remote schema source settings.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.enabled && self.endpoint.trim().is_empty() {
            return Err(ValidationError::InvalidFieldValue {
                field: "remote.endpoint".to_string(),
                constraint: "must be set when `remote.enabled` is true".to_string(),
            });
        }

        Ok(())
    }
}

impl Default for RemoteSchemaConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            endpoint: default_endpoint(),
            access_token: None,
        }
    }
}

fn default_enabled() -> bool {
    true
}

fn default_endpoint() -> String {
    RemoteSchemaConfig::DEFAULT_ENDPOINT.to_string()
}

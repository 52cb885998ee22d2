use std::{
    fmt, io,
    path::{Path, PathBuf},
    str::FromStr,
};

use rust_cli_config::builder::{ConfigBuilder, DefaultState};
use serde::de::DeserializeOwned;
use thiserror::Error;

/// Directory containing configuration files relative to the working directory.
const CONFIGURATION_DIR: &str = "configuration";

/// Supported extensions for base and environment configuration files.
const CONFIG_FILE_EXTENSIONS: &[&str] = &["yaml", "yml", "json"];

/// Prefix for environment variable configuration overrides.
const ENV_PREFIX: &str = "APP";

/// Separator between environment variable prefix and key segments.
const ENV_PREFIX_SEPARATOR: &str = "_";

/// Separator for nested configuration keys in environment variables.
const ENV_SEPARATOR: &str = "__";

/// Variable naming the environment explicitly.
const APP_ENVIRONMENT_ENV_NAME: &str = "APP_ENVIRONMENT";

/// Variable set by CI runners (GitHub Actions, GitLab CI, CircleCI, ...).
const CI_ENV_NAME: &str = "CI";

/// Environment the test suite runs in, selecting the `configuration/{environment}.*` overrides.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    /// A developer machine.
    Local,
    /// A continuous integration runner.
    Ci,
}

impl Environment {
    /// Detects the environment of the current process.
    ///
    /// `APP_ENVIRONMENT` wins when set. Otherwise a CI runner is recognized by its `CI`
    /// variable, and anything else is [`Environment::Local`].
    pub fn detect() -> Result<Environment, LoadConfigError> {
        Self::from_vars(
            std::env::var(APP_ENVIRONMENT_ENV_NAME).ok(),
            std::env::var(CI_ENV_NAME).ok(),
        )
    }

    fn from_vars(
        app_environment: Option<String>,
        ci: Option<String>,
    ) -> Result<Environment, LoadConfigError> {
        if let Some(name) = app_environment.filter(|name| !name.trim().is_empty()) {
            return name.parse();
        }

        let on_ci_runner = ci.is_some_and(|value| {
            let value = value.trim();
            !value.is_empty() && value != "0" && !value.eq_ignore_ascii_case("false")
        });

        Ok(if on_ci_runner {
            Environment::Ci
        } else {
            Environment::Local
        })
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Local => "local",
            Environment::Ci => "ci",
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Environment {
    type Err = LoadConfigError;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        match name.trim().to_lowercase().as_str() {
            "local" => Ok(Environment::Local),
            "ci" => Ok(Environment::Ci),
            _ => Err(LoadConfigError::UnknownEnvironment(name.to_string())),
        }
    }
}

/// Identifies which configuration file is currently being loaded.
#[derive(Debug, Clone, Copy)]
enum ConfigFileKind {
    /// Shared configuration applied in every environment.
    Base,
    /// Environment-specific overrides (local/ci).
    Environment(Environment),
}

impl ConfigFileKind {
    fn stem(&self) -> &'static str {
        match self {
            ConfigFileKind::Base => "base",
            ConfigFileKind::Environment(env) => env.as_str(),
        }
    }
}

impl fmt::Display for ConfigFileKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigFileKind::Base => f.write_str("base configuration"),
            ConfigFileKind::Environment(env) => write!(f, "{env} environment configuration"),
        }
    }
}

/// Errors that can occur while loading configuration files and overrides.
#[derive(Debug, Error)]
pub enum LoadConfigError {
    /// Failed to determine the current working directory.
    #[error("failed to determine the current directory: {0}")]
    CurrentDir(#[source] io::Error),

    /// A configuration file existed but could not be parsed.
    #[error("failed to load {kind_description} from `{path}`: {source}")]
    ConfigurationFileLoad {
        kind_description: String,
        path: PathBuf,
        source: rust_cli_config::ConfigError,
    },

    /// The configuration sources were parsed but deserialization failed.
    #[error("failed to deserialize configuration: {0}")]
    Deserialization(#[source] rust_cli_config::ConfigError),

    /// `APP_ENVIRONMENT` names an environment that does not exist.
    #[error("`{0}` is not a supported environment, use either `local` or `ci`")]
    UnknownEnvironment(String),

    /// Failed to merge the configuration sources.
    #[error("failed to build configuration: {0}")]
    Builder(#[source] rust_cli_config::ConfigError),
}

/// Loads layered configuration from the `configuration` directory of the working directory.
///
/// See [`load_config_from`] for the layering rules.
pub fn load_config<T>() -> Result<T, LoadConfigError>
where
    T: DeserializeOwned,
{
    let base_path = std::env::current_dir().map_err(LoadConfigError::CurrentDir)?;

    load_config_from(&base_path.join(CONFIGURATION_DIR))
}

/// Loads layered configuration from `configuration_directory`.
///
/// Sources are applied in order: `base.(yaml|yml|json)`, then `{environment}.(yaml|yml|json)`
/// for the [`Environment::detect`]ed environment,
/// then `APP_`-prefixed environment variables. Every file is optional, so a missing directory
/// yields the defaults of `T` plus any environment overrides. Nested keys use double
/// underscores (`APP_EMULATOR__BINARY`).
pub fn load_config_from<T>(configuration_directory: &Path) -> Result<T, LoadConfigError>
where
    T: DeserializeOwned,
{
    let environment = Environment::detect()?;

    let mut builder = rust_cli_config::Config::builder();
    for kind in [ConfigFileKind::Base, ConfigFileKind::Environment(environment)] {
        let Some(path) = find_configuration_file(configuration_directory, kind) else {
            continue;
        };

        builder = builder.add_source(rust_cli_config::File::from(path.clone()));
        validate_configuration_source(&builder, kind, &path)?;
    }

    let environment_source = rust_cli_config::Environment::with_prefix(ENV_PREFIX)
        .prefix_separator(ENV_PREFIX_SEPARATOR)
        .separator(ENV_SEPARATOR)
        .try_parsing(true);

    let settings = builder
        .add_source(environment_source)
        .build()
        .map_err(LoadConfigError::Builder)?;

    settings
        .try_deserialize::<T>()
        .map_err(LoadConfigError::Deserialization)
}

/// Finds the configuration file that matches the requested kind and supported extensions.
fn find_configuration_file(directory: &Path, kind: ConfigFileKind) -> Option<PathBuf> {
    let stem = kind.stem();

    CONFIG_FILE_EXTENSIONS
        .iter()
        .map(|extension| directory.join(format!("{stem}.{extension}")))
        .find(|path| path.is_file())
}

fn validate_configuration_source(
    builder: &ConfigBuilder<DefaultState>,
    kind: ConfigFileKind,
    path: &Path,
) -> Result<(), LoadConfigError> {
    builder
        .clone()
        .build()
        .map_err(|source| LoadConfigError::ConfigurationFileLoad {
            kind_description: kind.to_string(),
            path: path.to_path_buf(),
            source,
        })
        .map(|_| ())
}

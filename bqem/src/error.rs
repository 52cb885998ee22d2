//! Error types and result definitions for emulator management.
//!
//! [`BqemError`] carries an [`ErrorKind`] classification, a static description, optional dynamic
//! detail, an optional source error, and the callsite where it was created. Callers branch on
//! [`BqemError::kind`]; the rest is diagnostic metadata for humans reading test output.

use std::backtrace::Backtrace;
use std::borrow::Cow;
use std::error;
use std::fmt;
use std::panic::Location;
use std::sync::Arc;

/// Convenient result type using [`BqemError`] as the error type.
pub type BqemResult<T> = Result<T, BqemError>;

/// Main error type of the crate.
#[derive(Debug, Clone)]
pub struct BqemError {
    kind: ErrorKind,
    description: Cow<'static, str>,
    detail: Option<Cow<'static, str>>,
    source: Option<Arc<dyn error::Error + Send + Sync>>,
    location: &'static Location<'static>,
    backtrace: Arc<Backtrace>,
}

/// Categories of errors that can occur while managing an emulator.
///
/// Only [`ErrorKind::PortOccupied`] is recovered internally (it drives the port scan); every
/// other kind is surfaced to the caller of the operation that triggered it.
#[derive(PartialEq, Eq, Copy, Clone, Debug, Hash)]
#[non_exhaustive]
pub enum ErrorKind {
    // Process & Port Errors
    PortOccupied,
    EmulatorStartupFailed,
    NoAvailablePort,

    // Schema Errors
    SchemaNotFound,
    SchemaMissing,
    InvalidTablePath,

    // Client Errors
    ClientRequestFailed,
    ClientResponseError,
    TableNotFound,
    InsertRowsFailed,

    // Configuration Errors
    ConfigError,

    // IO & Serialization Errors
    IoError,
    SerializationError,
    DeserializationError,

    // State Errors
    InvalidState,
}

impl BqemError {
    /// Returns the [`ErrorKind`] of this error.
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Returns the static description of this error.
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Returns the detailed error information if available.
    pub fn detail(&self) -> Option<&str> {
        self.detail.as_deref()
    }

    /// Returns the captured backtrace for this error.
    pub fn backtrace(&self) -> &Backtrace {
        self.backtrace.as_ref()
    }

    /// Returns the captured callsite location for this error.
    pub fn location(&self) -> &'static Location<'static> {
        self.location
    }

    /// Attaches an originating [`error::Error`] to this error and returns the modified instance.
    pub fn with_source<E>(mut self, source: E) -> Self
    where
        E: error::Error + Send + Sync + 'static,
    {
        self.source = Some(Arc::new(source));
        self
    }

    /// Creates a [`BqemError`] from its components.
    #[track_caller]
    fn from_components(
        kind: ErrorKind,
        description: Cow<'static, str>,
        detail: Option<Cow<'static, str>>,
        source: Option<Arc<dyn error::Error + Send + Sync>>,
    ) -> Self {
        BqemError {
            kind,
            description,
            detail,
            source,
            location: Location::caller(),
            backtrace: Arc::new(Backtrace::capture()),
        }
    }
}

impl PartialEq for BqemError {
    fn eq(&self, other: &BqemError) -> bool {
        self.kind == other.kind
    }
}

impl fmt::Display for BqemError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> Result<(), fmt::Error> {
        write!(
            f,
            "[{:?}] {} @ {}:{}:{}",
            self.kind,
            self.description,
            self.location.file(),
            self.location.line(),
            self.location.column()
        )?;

        if let Some(detail) = self.detail.as_deref() {
            if detail.trim().is_empty() {
                write!(f, "\n  Detail: <empty>")?;
            } else {
                write!(f, "\n  Detail:")?;
                for line in detail.lines() {
                    write!(f, "\n    {line}")?;
                }
            }
        }

        let rendered_backtrace = format!("{}", self.backtrace);
        if !rendered_backtrace.trim().is_empty() && !rendered_backtrace.contains("disabled") {
            write!(f, "\n  Backtrace:")?;
            for line in rendered_backtrace.lines() {
                write!(f, "\n    {line}")?;
            }
        }

        Ok(())
    }
}

impl error::Error for BqemError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|source| source.as_ref() as &(dyn error::Error + 'static))
    }
}

/// Creates a [`BqemError`] from an error kind and static description.
impl From<(ErrorKind, &'static str)> for BqemError {
    #[track_caller]
    fn from((kind, desc): (ErrorKind, &'static str)) -> BqemError {
        BqemError::from_components(kind, Cow::Borrowed(desc), None, None)
    }
}

/// Creates a [`BqemError`] from an error kind, static description, and dynamic detail.
impl<D> From<(ErrorKind, &'static str, D)> for BqemError
where
    D: Into<Cow<'static, str>>,
{
    #[track_caller]
    fn from((kind, desc, detail): (ErrorKind, &'static str, D)) -> BqemError {
        BqemError::from_components(kind, Cow::Borrowed(desc), Some(detail.into()), None)
    }
}

/// Converts [`std::io::Error`] to [`BqemError`] with [`ErrorKind::IoError`].
impl From<std::io::Error> for BqemError {
    #[track_caller]
    fn from(err: std::io::Error) -> BqemError {
        let detail = err.to_string();
        BqemError::from_components(
            ErrorKind::IoError,
            Cow::Borrowed("I/O operation failed"),
            Some(Cow::Owned(detail)),
            Some(Arc::new(err)),
        )
    }
}

/// Converts [`serde_json::Error`] to [`BqemError`] with the appropriate error kind.
impl From<serde_json::Error> for BqemError {
    #[track_caller]
    fn from(err: serde_json::Error) -> BqemError {
        let (kind, description) = match err.classify() {
            serde_json::error::Category::Io => (ErrorKind::IoError, "JSON I/O operation failed"),
            serde_json::error::Category::Syntax
            | serde_json::error::Category::Data
            | serde_json::error::Category::Eof => (
                ErrorKind::DeserializationError,
                "JSON deserialization failed",
            ),
        };

        let detail = err.to_string();
        BqemError::from_components(
            kind,
            Cow::Borrowed(description),
            Some(Cow::Owned(detail)),
            Some(Arc::new(err)),
        )
    }
}

/// Converts [`serde_yaml::Error`] to [`BqemError`] with [`ErrorKind::DeserializationError`].
impl From<serde_yaml::Error> for BqemError {
    #[track_caller]
    fn from(err: serde_yaml::Error) -> BqemError {
        let detail = err.to_string();
        BqemError::from_components(
            ErrorKind::DeserializationError,
            Cow::Borrowed("YAML deserialization failed"),
            Some(Cow::Owned(detail)),
            Some(Arc::new(err)),
        )
    }
}

/// Converts [`reqwest::Error`] to [`BqemError`].
///
/// Body decoding failures map to [`ErrorKind::DeserializationError`], everything else is a
/// transport failure.
impl From<reqwest::Error> for BqemError {
    #[track_caller]
    fn from(err: reqwest::Error) -> BqemError {
        let (kind, description) = if err.is_decode() {
            (
                ErrorKind::DeserializationError,
                "BigQuery response decoding failed",
            )
        } else {
            (ErrorKind::ClientRequestFailed, "BigQuery request failed")
        };

        let detail = err.to_string();
        BqemError::from_components(
            kind,
            Cow::Borrowed(description),
            Some(Cow::Owned(detail)),
            Some(Arc::new(err)),
        )
    }
}

/// Converts [`tempfile::PersistError`] to [`BqemError`] with [`ErrorKind::IoError`].
impl From<tempfile::PersistError> for BqemError {
    #[track_caller]
    fn from(err: tempfile::PersistError) -> BqemError {
        let detail = format!("{}: {}", err.file.path().display(), err.error);
        BqemError::from_components(
            ErrorKind::IoError,
            Cow::Borrowed("Replacing the schema cache file failed"),
            Some(Cow::Owned(detail)),
            Some(Arc::new(err.error)),
        )
    }
}

//! Error types for the adapter and its storage engines

use std::fmt;

use thiserror::Error;

/// Result type for adapter operations
pub type Result<T> = std::result::Result<T, DbError>;

/// Errors surfaced by adapter operations.
///
/// Engine failures are carried verbatim in [`DbError::Native`]; the adapter
/// never retries or reclassifies them.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DbError {
    /// The host exposes no storage engine
    #[error("{0}")]
    NotAvailable(String),

    /// Error reported by the storage engine
    #[error(transparent)]
    Native(#[from] NativeError),

    /// Record could not be converted to or from the engine's value model
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl DbError {
    /// The engine error kind, if this came from the engine.
    pub fn kind(&self) -> Option<&ErrorKind> {
        match self {
            DbError::Native(err) => Some(&err.kind),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for DbError {
    fn from(err: serde_json::Error) -> Self {
        DbError::Serialization(err.to_string())
    }
}

/// Error names reported by the storage engine (DOMException names).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Constraint,
    Data,
    NotFound,
    Abort,
    InvalidState,
    TransactionInactive,
    ReadOnly,
    Version,
    DataClone,
    Type,
    Unknown,
    /// Any other name, carried as reported
    Other(String),
}

impl ErrorKind {
    /// Map an engine error name to a kind.
    pub fn from_name(name: &str) -> Self {
        match name {
            "ConstraintError" => ErrorKind::Constraint,
            "DataError" => ErrorKind::Data,
            "NotFoundError" => ErrorKind::NotFound,
            "AbortError" => ErrorKind::Abort,
            "InvalidStateError" => ErrorKind::InvalidState,
            "TransactionInactiveError" => ErrorKind::TransactionInactive,
            "ReadOnlyError" => ErrorKind::ReadOnly,
            "VersionError" => ErrorKind::Version,
            "DataCloneError" => ErrorKind::DataClone,
            "TypeError" => ErrorKind::Type,
            "UnknownError" => ErrorKind::Unknown,
            other => ErrorKind::Other(other.to_string()),
        }
    }

    /// The engine's name for this kind.
    pub fn name(&self) -> &str {
        match self {
            ErrorKind::Constraint => "ConstraintError",
            ErrorKind::Data => "DataError",
            ErrorKind::NotFound => "NotFoundError",
            ErrorKind::Abort => "AbortError",
            ErrorKind::InvalidState => "InvalidStateError",
            ErrorKind::TransactionInactive => "TransactionInactiveError",
            ErrorKind::ReadOnly => "ReadOnlyError",
            ErrorKind::Version => "VersionError",
            ErrorKind::DataClone => "DataCloneError",
            ErrorKind::Type => "TypeError",
            ErrorKind::Unknown => "UnknownError",
            ErrorKind::Other(name) => name,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// An error exactly as the storage engine reported it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind}: {message}")]
pub struct NativeError {
    pub kind: ErrorKind,
    pub message: String,
}

impl NativeError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Engine error name, e.g. `"ConstraintError"`.
    pub fn name(&self) -> &str {
        self.kind.name()
    }
}

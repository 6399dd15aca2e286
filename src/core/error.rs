//! Error types for the database handler.
//!
//! Two layers live here: `DbhError` is the fallible-API error used by
//! construction, configuration loading and logging setup, while `ErrorKind`
//! and `LastError` describe the failure recorded by the last handler
//! operation.
use crate::config::DriverType;
use crate::core::db::driver::DriverError;
use std::fmt;
use thiserror::Error;

/// Error type for every fallible, non-operational entry point of the crate.
#[derive(Error, Debug)]
pub enum DbhError {
    /// Errors coming straight from SQLite
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Errors reported by any session backend
    #[error("Driver error: {0}")]
    Driver(#[from] DriverError),

    /// Configuration loading and validation errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// The configured driver was not compiled into this build
    #[error("Unsupported driver: {0} is not available in this build")]
    UnsupportedDriver(DriverType),

    /// File system and I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// TOML parsing errors
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// Logging bootstrap errors
    #[error("Logging error: {0}")]
    Logging(String),
}

/// Type alias for Result to use DbhError as the error type.
pub type Result<T> = std::result::Result<T, DbhError>;

/// Classification of the failure recorded by the last tracked operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ErrorKind {
    /// No failure recorded
    #[default]
    None,
    /// The session could not be opened
    OpenFailure,
    /// A commit was rejected
    CommitFailure,
    /// A statement could not be compiled
    PrepareFailure,
    /// A statement failed while running
    ExecutionFailure,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ErrorKind::None => "none",
            ErrorKind::OpenFailure => "open failure",
            ErrorKind::CommitFailure => "commit failure",
            ErrorKind::PrepareFailure => "prepare failure",
            ErrorKind::ExecutionFailure => "execution failure",
        };
        f.write_str(label)
    }
}

/// Error state of a handler: what failed last and the driver's explanation.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LastError {
    kind: ErrorKind,
    message: String,
}

impl LastError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        LastError {
            kind,
            message: message.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn is_error(&self) -> bool {
        self.kind != ErrorKind::None
    }

    pub fn clear(&mut self) {
        self.kind = ErrorKind::None;
        self.message.clear();
    }
}

impl fmt::Display for LastError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_error() {
            write!(f, "{}: {}", self.kind, self.message)
        } else {
            f.write_str("no error")
        }
    }
}

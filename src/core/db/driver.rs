//! Driver abstraction shared by every backend.
//!
//! A `ConnectionProvider` plays the role of a driver registry: it hands out
//! one `SqlSession` per connection name and forgets the name again when the
//! owning handler goes away. Handlers only ever talk to these two traits, so
//! tests can swap the real drivers for `MemoryProvider`.

use super::registry::RegistrationId;
use crate::config::{DbhConfig, DriverType};
use crate::core::Result;
use std::fmt;
use thiserror::Error;

/// Error reported by a session backend, carrying the driver's own text.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct DriverError {
    message: String,
}

impl DriverError {
    pub fn new(message: impl Into<String>) -> Self {
        DriverError {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// Error for operations issued against a closed session.
    pub fn not_open() -> Self {
        DriverError::new("connection is not open")
    }
}

impl From<rusqlite::Error> for DriverError {
    fn from(err: rusqlite::Error) -> Self {
        DriverError::new(err.to_string())
    }
}

/// A value bound to, or read back from, a statement.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
}

impl SqlValue {
    pub fn is_null(&self) -> bool {
        matches!(self, SqlValue::Null)
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            SqlValue::Integer(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            SqlValue::Real(v) => Some(*v),
            SqlValue::Integer(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            SqlValue::Text(v) => Some(v),
            _ => None,
        }
    }
}

impl fmt::Display for SqlValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SqlValue::Null => f.write_str("NULL"),
            SqlValue::Integer(v) => write!(f, "{}", v),
            SqlValue::Real(v) => write!(f, "{}", v),
            SqlValue::Text(v) => write!(f, "'{}'", v),
            SqlValue::Blob(v) => write!(f, "<BLOB {} bytes>", v.len()),
        }
    }
}

impl From<i64> for SqlValue {
    fn from(v: i64) -> Self {
        SqlValue::Integer(v)
    }
}

impl From<i32> for SqlValue {
    fn from(v: i32) -> Self {
        SqlValue::Integer(v.into())
    }
}

impl From<bool> for SqlValue {
    fn from(v: bool) -> Self {
        SqlValue::Integer(v.into())
    }
}

impl From<f64> for SqlValue {
    fn from(v: f64) -> Self {
        SqlValue::Real(v)
    }
}

impl From<&str> for SqlValue {
    fn from(v: &str) -> Self {
        SqlValue::Text(v.to_string())
    }
}

impl From<String> for SqlValue {
    fn from(v: String) -> Self {
        SqlValue::Text(v)
    }
}

impl From<Vec<u8>> for SqlValue {
    fn from(v: Vec<u8>) -> Self {
        SqlValue::Blob(v)
    }
}

impl<T: Into<SqlValue>> From<Option<T>> for SqlValue {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(SqlValue::Null)
    }
}

/// What a backend hands back after running a statement.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryOutput {
    /// Column names, empty for statements that return no rows
    pub columns: Vec<String>,
    pub rows: Vec<Vec<SqlValue>>,
    /// Rows changed by a data-modifying statement
    pub rows_affected: u64,
}

impl QueryOutput {
    pub fn affected(rows_affected: u64) -> Self {
        QueryOutput {
            rows_affected,
            ..QueryOutput::default()
        }
    }

    pub fn with_rows(columns: Vec<String>, rows: Vec<Vec<SqlValue>>) -> Self {
        QueryOutput {
            columns,
            rows,
            rows_affected: 0,
        }
    }
}

/// A live, stateful handle onto one database.
///
/// Implementations never panic on misuse: calls against a closed session
/// return `DriverError::not_open()`.
pub trait SqlSession: Send {
    fn driver(&self) -> DriverType;

    fn open(&mut self) -> std::result::Result<(), DriverError>;

    /// Closes the session; closing a closed session is a no-op.
    fn close(&mut self);

    fn is_open(&self) -> bool;

    /// Whether an open session is still usable.
    fn is_valid(&self) -> bool;

    /// Runs a side-effect statement with no parameters and no result.
    fn exec_direct(&mut self, sql: &str) -> std::result::Result<(), DriverError>;

    /// Compiles `sql` so that a later `execute` of the same text can run it.
    fn prepare(&mut self, sql: &str) -> std::result::Result<(), DriverError>;

    fn execute(
        &mut self,
        sql: &str,
        params: &[SqlValue],
    ) -> std::result::Result<QueryOutput, DriverError>;

    fn begin(&mut self) -> std::result::Result<(), DriverError>;

    fn commit(&mut self) -> std::result::Result<(), DriverError>;

    fn rollback(&mut self) -> std::result::Result<(), DriverError>;
}

/// A fresh session and the registration it was handed out under.
pub struct Registered {
    pub session: Box<dyn SqlSession>,
    pub id: RegistrationId,
}

/// Registry of named sessions, the injected stand-in for a global driver table.
pub trait ConnectionProvider: Send + Sync {
    /// Drivers this provider can create sessions for.
    fn drivers(&self) -> Vec<DriverType>;

    /// Creates a closed session for `config` and registers it under
    /// `config.connection_name`, taking the name over from any previous
    /// registration.
    fn add_database(&self, config: &DbhConfig) -> Result<Registered>;

    /// Forgets `connection_name`, unless it was registered again after `id`.
    fn remove_database(&self, connection_name: &str, id: RegistrationId);

    fn contains(&self, connection_name: &str) -> bool;
}

//! Core infrastructure for the handler: error types and the database layer.

pub mod db;
pub mod error;

// Re-export commonly used types for convenience
pub use error::{DbhError, ErrorKind, LastError, Result};

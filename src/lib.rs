// Core infrastructure modules
pub mod core;

// Configuration and logging
pub mod config;
pub mod logging;

pub use crate::config::{load_config, DbhConfig, DriverType, LogLevel, LogSettings};
pub use crate::core::db::{
    ConnectionProvider, DbHandler, DriverError, DriverManager, MemoryControl, MemoryProvider,
    Query, QueryOutput, Registered, RegistrationId, SqlSession, SqlValue,
};
pub use crate::core::{DbhError, ErrorKind, LastError, Result};

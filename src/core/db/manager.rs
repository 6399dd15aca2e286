//! Default connection provider backed by the real driver crates.

use super::driver::{ConnectionProvider, Registered, SqlSession};
use super::registry::{ConnectionRegistry, RegistrationId};
use super::sqlite::SqliteSession;
use crate::config::{DbhConfig, DriverType};
use crate::core::{DbhError, Result};
use tracing::debug;

/// Hands out sessions for every driver compiled into this build.
///
/// SQLite is always available; PostgreSQL and MySQL need the `postgres`
/// and `mysql` cargo features.
#[derive(Debug, Default)]
pub struct DriverManager {
    registry: ConnectionRegistry,
}

impl DriverManager {
    pub fn new() -> Self {
        DriverManager::default()
    }

    pub fn is_available(driver: DriverType) -> bool {
        match driver {
            DriverType::Sqlite => true,
            DriverType::Postgres => cfg!(feature = "postgres"),
            DriverType::Mysql => cfg!(feature = "mysql"),
        }
    }

    fn create_session(config: &DbhConfig, driver: DriverType) -> Result<Box<dyn SqlSession>> {
        match driver {
            DriverType::Sqlite => Ok(Box::new(SqliteSession::new(&config.name))),
            #[cfg(feature = "postgres")]
            DriverType::Postgres => Ok(Box::new(super::postgres::PostgresSession::new(config))),
            #[cfg(feature = "mysql")]
            DriverType::Mysql => Ok(Box::new(super::mysql::MysqlSession::new(config))),
            #[allow(unreachable_patterns)]
            other => Err(DbhError::UnsupportedDriver(other)),
        }
    }
}

impl ConnectionProvider for DriverManager {
    fn drivers(&self) -> Vec<DriverType> {
        DriverType::ALL
            .into_iter()
            .filter(|d| DriverManager::is_available(*d))
            .collect()
    }

    fn add_database(&self, config: &DbhConfig) -> Result<Registered> {
        let driver = config
            .driver
            .ok_or_else(|| DbhError::Config("driver type is not set".to_string()))?;
        let session = DriverManager::create_session(config, driver)?;
        let id = self.registry.register(&config.connection_name);
        debug!(
            connection = %config.connection_name,
            driver = %driver,
            "connection registered"
        );
        Ok(Registered { session, id })
    }

    fn remove_database(&self, connection_name: &str, id: RegistrationId) {
        if self.registry.unregister(connection_name, id) {
            debug!(connection = connection_name, "connection removed");
        }
    }

    fn contains(&self, connection_name: &str) -> bool {
        self.registry.contains(connection_name)
    }
}

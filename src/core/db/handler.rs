//! The database handler: one configuration, one session.
//!
//! `DbHandler` is meant to be embedded by concrete handlers, which build
//! their own operations out of the lifecycle, query and transaction helpers
//! below. Every helper reports success as a `bool` and records the failure
//! in the handler's error state; nothing here panics or returns early out
//! of the caller.
//!
//! ## Error state
//!
//! Tracked operations (`open_db_conn` when it really opens, `prepare_query`,
//! `execute_query`, `begin_transaction`, `commit_and_close`) clear the error
//! state when they start, so after any of them the state describes that
//! operation alone. `close_db_conn` and `rollback_and_close` leave it
//! untouched: a rollback keeps the failure that caused it.

use super::driver::{ConnectionProvider, DriverError, SqlSession};
use super::query::Query;
use super::registry::RegistrationId;
use crate::config::{DbhConfig, DriverType};
use crate::core::{ErrorKind, LastError, Result};
use crate::logging;
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, error, info, info_span, warn, Span};

/// SQLite's name for a database that lives only in memory.
const SQLITE_MEMORY: &str = ":memory:";

/// Owns one database session bound to one configuration.
pub struct DbHandler {
    config: DbhConfig,
    provider: Arc<dyn ConnectionProvider>,
    session: Box<dyn SqlSession>,
    registration: RegistrationId,
    last_error: LastError,
    span: Span,
}

impl DbHandler {
    /// Registers a session for `config` with `provider`.
    ///
    /// The session starts closed. An invalid configuration is logged but
    /// not rejected; the first open attempt will report the problem.
    ///
    /// # Errors
    ///
    /// Returns `DbhError::Config` when no driver is set and
    /// `DbhError::UnsupportedDriver` when the provider cannot serve it.
    pub fn new(config: DbhConfig, provider: Arc<dyn ConnectionProvider>) -> Result<Self> {
        let span = info_span!(
            "dbh",
            log_id = %config.log.id,
            connection = %config.connection_name
        );

        let registered = {
            let _enter = span.enter();
            let drivers = provider
                .drivers()
                .iter()
                .map(DriverType::as_str)
                .collect::<Vec<_>>()
                .join(",");
            info!(drivers = %drivers, "available sql drivers");
            if let Err(err) = config.validate() {
                warn!(error = %err, "handler created with an invalid configuration");
            }
            provider.add_database(&config)?
        };

        Ok(DbHandler {
            config,
            provider,
            session: registered.session,
            registration: registered.id,
            last_error: LastError::default(),
            span,
        })
    }

    /// Like [`new`](Self::new), first routing this handler's logs to the
    /// file named in `config.log`.
    ///
    /// A logging setup failure is reported as a warning; the handler is
    /// still created and logs wherever the process subscriber sends them.
    pub fn with_file_logging(
        config: DbhConfig,
        provider: Arc<dyn ConnectionProvider>,
    ) -> Result<Self> {
        if let Err(err) = logging::init_file_logging(&config.log) {
            warn!(
                log_id = %config.log.id,
                error = %err,
                "file logging unavailable, continuing without it"
            );
        }
        DbHandler::new(config, provider)
    }

    /// Opens the session if it is not already open and usable.
    ///
    /// A session that reports open but invalid is closed and reopened. After
    /// a successful open the configured time zone is applied where the driver
    /// supports it; failing to apply it does not fail the open.
    pub fn open_db_conn(&mut self) -> bool {
        let span = self.span.clone();
        let _enter = span.enter();

        if self.session.is_open() && self.session.is_valid() {
            return true;
        }

        self.last_error.clear();
        if self.session.is_open() {
            error!("database was open but invalid, closing");
            self.session.close();
        }

        match self.session.open() {
            Ok(()) => {
                debug!("database connection opened");
                self.apply_timezone();
                true
            }
            Err(err) => {
                error!(error = %err, "database open failed");
                self.last_error = LastError::new(ErrorKind::OpenFailure, err.message());
                false
            }
        }
    }

    fn apply_timezone(&mut self) {
        let driver = self.session.driver();
        if let Some(statement) = driver.timezone_statement(&self.config.timezone) {
            if let Err(err) = self.session.exec_direct(&statement) {
                // Ignored error: the session keeps the server's default zone.
                warn!(
                    timezone = %self.config.timezone,
                    error = %err,
                    "could not apply session time zone, ignoring"
                );
            }
        }
    }

    /// Closes the session. Closing a closed session is logged and harmless.
    pub fn close_db_conn(&mut self) {
        let span = self.span.clone();
        let _enter = span.enter();

        if !self.session.is_open() {
            error!("database was not open, closing anyway");
        }
        self.session.close();
    }

    /// Checks that the database is reachable with the configured credentials.
    ///
    /// For file-based drivers the file must already exist; otherwise no open
    /// is attempted. The session is closed again before returning.
    pub fn test_connection(&mut self) -> bool {
        if self.session.driver().is_file_based() && !self.backing_file_exists() {
            let _enter = self.span.enter();
            warn!(path = %self.config.name, "database file does not exist");
            return false;
        }
        if !self.open_db_conn() {
            return false;
        }
        self.close_db_conn();
        true
    }

    fn backing_file_exists(&self) -> bool {
        self.config.name == SQLITE_MEMORY || Path::new(&self.config.name).exists()
    }

    pub fn is_open(&self) -> bool {
        self.session.is_open()
    }

    /// A new, empty statement bound to this handler's connection.
    pub fn create_new_query(&self) -> Query {
        Query::new(&self.config.connection_name)
    }

    /// Compiles `sql` into `query`.
    ///
    /// On failure the error state holds `PrepareFailure` with the driver
    /// message and the statement text.
    pub fn prepare_query(&mut self, query: &mut Query, sql: &str) -> bool {
        let span = self.span.clone();
        let _enter = span.enter();
        self.last_error.clear();

        let outcome = self
            .check_ownership(query)
            .and_then(|()| self.session.prepare(sql));
        match outcome {
            Ok(()) => {
                query.set_prepared(sql);
                true
            }
            Err(err) => {
                error!(error = %err, query = sql, "prepare query error");
                query.set_prepare_failed(sql, err.message());
                self.last_error = LastError::new(
                    ErrorKind::PrepareFailure,
                    format!("{} for query ({})", err, sql),
                );
                false
            }
        }
    }

    /// Runs a prepared `query` with its bound values.
    ///
    /// On failure the error state holds `ExecutionFailure` with the driver
    /// message and the statement text.
    pub fn execute_query(&mut self, query: &mut Query) -> bool {
        let span = self.span.clone();
        let _enter = span.enter();
        self.last_error.clear();

        let outcome = self.check_ownership(query).and_then(|()| {
            if !query.is_prepared() {
                return Err(DriverError::new("statement was not prepared"));
            }
            self.session.execute(query.last_query(), query.bound_values())
        });
        match outcome {
            Ok(output) => {
                debug!(
                    rows = output.rows.len(),
                    rows_affected = output.rows_affected,
                    "query executed"
                );
                query.set_output(output);
                true
            }
            Err(err) => {
                error!(error = %err, query = query.last_query(), "execute query error");
                query.set_execute_failed(err.message());
                self.last_error = LastError::new(
                    ErrorKind::ExecutionFailure,
                    format!("{} for query ({})", err, query.last_query()),
                );
                false
            }
        }
    }

    fn check_ownership(&self, query: &Query) -> std::result::Result<(), DriverError> {
        if query.connection_name() == self.config.connection_name {
            Ok(())
        } else {
            Err(DriverError::new(format!(
                "query belongs to connection `{}`",
                query.connection_name()
            )))
        }
    }

    /// Starts a unit of work on the open session.
    pub fn begin_transaction(&mut self) -> bool {
        let span = self.span.clone();
        let _enter = span.enter();
        self.last_error.clear();

        match self.session.begin() {
            Ok(()) => true,
            Err(err) => {
                error!(error = %err, "could not start transaction");
                self.last_error = LastError::new(
                    ErrorKind::ExecutionFailure,
                    format!("could not start transaction: {}", err),
                );
                false
            }
        }
    }

    /// Rolls the current unit of work back and closes the session.
    pub fn rollback_and_close(&mut self, notice: &str) {
        let span = self.span.clone();
        let _enter = span.enter();

        error!(notice, "query failed, rolling back transaction");
        if let Err(err) = self.session.rollback() {
            // Ignored error: rollback failures are not classified.
            warn!(notice, error = %err, "rollback failed, ignoring");
        }
        self.close_db_conn();
    }

    /// Commits the current unit of work and closes the session whatever the
    /// outcome. Returns whether the commit succeeded.
    pub fn commit_and_close(&mut self, notice: &str) -> bool {
        let span = self.span.clone();
        let _enter = span.enter();
        self.last_error.clear();

        let committed = match self.session.commit() {
            Ok(()) => true,
            Err(err) => {
                error!(notice, error = %err, "transaction commit failed");
                self.last_error = LastError::new(ErrorKind::CommitFailure, err.message());
                false
            }
        };
        self.close_db_conn();
        committed
    }

    pub fn has_error(&self) -> bool {
        self.last_error.is_error()
    }

    pub fn error_kind(&self) -> ErrorKind {
        self.last_error.kind()
    }

    pub fn error_message(&self) -> &str {
        self.last_error.message()
    }

    pub fn last_error(&self) -> &LastError {
        &self.last_error
    }

    pub fn clear_error(&mut self) {
        self.last_error.clear();
    }

    /// Raw access to the session for statements the helpers do not cover.
    pub fn session_mut(&mut self) -> &mut dyn SqlSession {
        self.session.as_mut()
    }

    pub fn config(&self) -> &DbhConfig {
        &self.config
    }

    pub fn driver_type(&self) -> DriverType {
        self.session.driver()
    }

    pub fn db_host(&self) -> &str {
        &self.config.host
    }

    pub fn db_name(&self) -> &str {
        &self.config.name
    }

    pub fn db_username(&self) -> &str {
        &self.config.user
    }

    pub fn db_password(&self) -> &str {
        &self.config.password
    }

    pub fn db_timezone(&self) -> &str {
        &self.config.timezone
    }

    pub fn connection_name(&self) -> &str {
        &self.config.connection_name
    }

    pub fn db_port(&self) -> u16 {
        self.config.port
    }
}

impl fmt::Debug for DbHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DbHandler")
            .field("config", &self.config)
            .field("open", &self.session.is_open())
            .field("last_error", &self.last_error)
            .finish()
    }
}

impl Drop for DbHandler {
    fn drop(&mut self) {
        let _enter = self.span.enter();
        if self.session.is_open() {
            self.session.close();
        }
        self.provider
            .remove_database(&self.config.connection_name, self.registration);
        debug!("connection deregistered");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::db::memory::MemoryProvider;
    use crate::core::DbhError;

    fn handler_with(config: DbhConfig) -> (DbHandler, Arc<MemoryProvider>) {
        let provider = Arc::new(MemoryProvider::new());
        let handler = DbHandler::new(config, provider.clone()).unwrap();
        (handler, provider)
    }

    #[test]
    fn test_accessors_mirror_config() {
        let config = DbhConfig::postgres("db.local", "reports")
            .with_credentials("app", "secret")
            .with_timezone("UTC")
            .with_connection_name("reports");
        let (handler, _provider) = handler_with(config);

        assert_eq!(handler.db_host(), "db.local");
        assert_eq!(handler.db_name(), "reports");
        assert_eq!(handler.db_username(), "app");
        assert_eq!(handler.db_password(), "secret");
        assert_eq!(handler.db_timezone(), "UTC");
        assert_eq!(handler.connection_name(), "reports");
        assert_eq!(handler.db_port(), 5432);
        assert_eq!(handler.driver_type(), DriverType::Postgres);
        assert!(!handler.is_open());
        assert!(!handler.has_error());
    }

    #[test]
    fn test_new_without_driver_fails() {
        let provider = Arc::new(MemoryProvider::new());
        let result = DbHandler::new(DbhConfig::default(), provider);
        assert!(matches!(result, Err(DbhError::Config(_))));
    }

    #[test]
    fn test_open_is_noop_when_already_open() {
        let (mut handler, provider) = handler_with(DbhConfig::sqlite("app.db"));
        let control = provider.control("default");

        assert!(handler.open_db_conn());
        assert!(handler.open_db_conn());
        assert_eq!(control.open_calls(), 1);
        assert_eq!(control.close_calls(), 0);
    }

    #[test]
    fn test_foreign_query_is_rejected() {
        let (mut handler, _provider) = handler_with(DbhConfig::sqlite("app.db"));
        assert!(handler.open_db_conn());

        let mut query = Query::new("elsewhere");
        assert!(!handler.prepare_query(&mut query, "SELECT 1"));
        assert_eq!(handler.error_kind(), ErrorKind::PrepareFailure);
        assert!(handler.error_message().contains("elsewhere"));
    }

    #[test]
    fn test_debug_hides_password() {
        let config = DbhConfig::mysql("db", "app").with_credentials("root", "topsecret");
        let (handler, _provider) = handler_with(config);
        let rendered = format!("{:?}", handler);
        assert!(!rendered.contains("topsecret"));
        assert!(rendered.contains("open: false"));
    }
}

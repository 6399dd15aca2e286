//! In-memory connection provider for tests.
//!
//! `MemoryProvider` never touches a real database. Each connection name gets
//! a `MemoryControl` that scripts failures (open, prepare, execute, commit,
//! rollback) and records what the handler did, so lifecycle behaviour can be
//! asserted without a server.

use super::driver::{
    ConnectionProvider, DriverError, QueryOutput, Registered, SqlSession, SqlValue,
};
use super::registry::{ConnectionRegistry, RegistrationId};
use crate::config::{DbhConfig, DriverType};
use crate::core::{DbhError, Result};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

type DriverResult<T> = std::result::Result<T, DriverError>;

#[derive(Debug, Default)]
struct MemoryState {
    open_error: Option<String>,
    begin_error: Option<String>,
    commit_error: Option<String>,
    rollback_error: Option<String>,
    /// (statement fragment, driver message) pairs failing at prepare time
    rejected: Vec<(String, String)>,
    /// (statement fragment, driver message) pairs failing at execution time
    failing: Vec<(String, String)>,
    results: HashMap<String, QueryOutput>,
    invalid: bool,

    open: bool,
    in_transaction: bool,
    open_calls: usize,
    close_calls: usize,
    begin_calls: usize,
    commit_calls: usize,
    rollback_calls: usize,
    statements: Vec<String>,
    last_params: Vec<SqlValue>,
}

fn matching_failure(rules: &[(String, String)], sql: &str) -> Option<String> {
    rules
        .iter()
        .find(|(fragment, _)| sql.contains(fragment.as_str()))
        .map(|(_, message)| message.clone())
}

/// Script and inspection handle for one in-memory connection.
#[derive(Debug, Clone, Default)]
pub struct MemoryControl {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryControl {
    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Makes every following open attempt fail with `message`.
    pub fn fail_open(&self, message: &str) {
        self.lock().open_error = Some(message.to_string());
    }

    pub fn allow_open(&self) {
        self.lock().open_error = None;
    }

    pub fn fail_begin(&self, message: &str) {
        self.lock().begin_error = Some(message.to_string());
    }

    pub fn fail_commit(&self, message: &str) {
        self.lock().commit_error = Some(message.to_string());
    }

    pub fn fail_rollback(&self, message: &str) {
        self.lock().rollback_error = Some(message.to_string());
    }

    /// Statements containing `fragment` fail to prepare.
    pub fn reject_sql(&self, fragment: &str, message: &str) {
        self.lock()
            .rejected
            .push((fragment.to_string(), message.to_string()));
    }

    /// Statements containing `fragment` prepare fine but fail when run.
    pub fn fail_execution(&self, fragment: &str, message: &str) {
        self.lock()
            .failing
            .push((fragment.to_string(), message.to_string()));
    }

    /// Canned output returned when exactly `sql` is executed.
    pub fn set_result(&self, sql: &str, output: QueryOutput) {
        self.lock().results.insert(sql.to_string(), output);
    }

    /// Reports the current session as open but no longer usable, until it
    /// is closed.
    pub fn break_session(&self) {
        self.lock().invalid = true;
    }

    pub fn is_open(&self) -> bool {
        self.lock().open
    }

    pub fn in_transaction(&self) -> bool {
        self.lock().in_transaction
    }

    pub fn open_calls(&self) -> usize {
        self.lock().open_calls
    }

    pub fn close_calls(&self) -> usize {
        self.lock().close_calls
    }

    pub fn begin_calls(&self) -> usize {
        self.lock().begin_calls
    }

    pub fn commit_calls(&self) -> usize {
        self.lock().commit_calls
    }

    pub fn rollback_calls(&self) -> usize {
        self.lock().rollback_calls
    }

    /// Every statement that reached the session, in order.
    pub fn statements(&self) -> Vec<String> {
        self.lock().statements.clone()
    }

    pub fn last_params(&self) -> Vec<SqlValue> {
        self.lock().last_params.clone()
    }
}

/// Session half of the fake; shares its state with a `MemoryControl`.
#[derive(Debug)]
pub struct MemorySession {
    driver: DriverType,
    control: MemoryControl,
}

impl MemorySession {
    fn state(&self) -> MutexGuard<'_, MemoryState> {
        self.control.lock()
    }

    fn open_state(&self) -> DriverResult<MutexGuard<'_, MemoryState>> {
        let state = self.state();
        if !state.open {
            return Err(DriverError::not_open());
        }
        Ok(state)
    }
}

impl SqlSession for MemorySession {
    fn driver(&self) -> DriverType {
        self.driver
    }

    fn open(&mut self) -> DriverResult<()> {
        let mut state = self.state();
        state.open_calls += 1;
        if let Some(message) = &state.open_error {
            return Err(DriverError::new(message.clone()));
        }
        state.open = true;
        Ok(())
    }

    fn close(&mut self) {
        let mut state = self.state();
        state.close_calls += 1;
        state.open = false;
        state.in_transaction = false;
        state.invalid = false;
    }

    fn is_open(&self) -> bool {
        self.state().open
    }

    fn is_valid(&self) -> bool {
        let state = self.state();
        state.open && !state.invalid
    }

    fn exec_direct(&mut self, sql: &str) -> DriverResult<()> {
        let mut state = self.open_state()?;
        if let Some(message) = matching_failure(&state.failing, sql) {
            return Err(DriverError::new(message));
        }
        state.statements.push(sql.to_string());
        Ok(())
    }

    fn prepare(&mut self, sql: &str) -> DriverResult<()> {
        let state = self.open_state()?;
        if sql.trim().is_empty() {
            return Err(DriverError::new("unable to prepare an empty statement"));
        }
        match matching_failure(&state.rejected, sql) {
            Some(message) => Err(DriverError::new(message)),
            None => Ok(()),
        }
    }

    fn execute(&mut self, sql: &str, params: &[SqlValue]) -> DriverResult<QueryOutput> {
        let mut state = self.open_state()?;
        if let Some(message) = matching_failure(&state.failing, sql) {
            return Err(DriverError::new(message));
        }
        state.statements.push(sql.to_string());
        state.last_params = params.to_vec();
        Ok(state.results.get(sql).cloned().unwrap_or_default())
    }

    fn begin(&mut self) -> DriverResult<()> {
        let mut state = self.open_state()?;
        state.begin_calls += 1;
        if let Some(message) = &state.begin_error {
            return Err(DriverError::new(message.clone()));
        }
        state.in_transaction = true;
        Ok(())
    }

    fn commit(&mut self) -> DriverResult<()> {
        let mut state = self.open_state()?;
        state.commit_calls += 1;
        if let Some(message) = &state.commit_error {
            return Err(DriverError::new(message.clone()));
        }
        state.in_transaction = false;
        Ok(())
    }

    fn rollback(&mut self) -> DriverResult<()> {
        let mut state = self.open_state()?;
        state.rollback_calls += 1;
        if let Some(message) = &state.rollback_error {
            return Err(DriverError::new(message.clone()));
        }
        state.in_transaction = false;
        Ok(())
    }
}

/// Connection provider whose sessions live entirely in memory.
#[derive(Debug)]
pub struct MemoryProvider {
    drivers: Vec<DriverType>,
    registry: ConnectionRegistry,
    controls: Mutex<HashMap<String, MemoryControl>>,
}

impl Default for MemoryProvider {
    fn default() -> Self {
        MemoryProvider::with_drivers(&DriverType::ALL)
    }
}

impl MemoryProvider {
    pub fn new() -> Self {
        MemoryProvider::default()
    }

    /// Provider that only accepts the given drivers.
    pub fn with_drivers(drivers: &[DriverType]) -> Self {
        MemoryProvider {
            drivers: drivers.to_vec(),
            registry: ConnectionRegistry::new(),
            controls: Mutex::new(HashMap::new()),
        }
    }

    fn controls(&self) -> MutexGuard<'_, HashMap<String, MemoryControl>> {
        self.controls.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Control handle for `connection_name`, created on first use so tests
    /// can script a connection before the handler exists.
    ///
    /// The provider drops its copy in `remove_database`; clones already
    /// handed out keep working for assertions after the handler is gone.
    pub fn control(&self, connection_name: &str) -> MemoryControl {
        self.controls()
            .entry(connection_name.to_string())
            .or_default()
            .clone()
    }

    /// Number of connection names that currently have a control.
    pub fn control_count(&self) -> usize {
        self.controls().len()
    }
}

impl ConnectionProvider for MemoryProvider {
    fn drivers(&self) -> Vec<DriverType> {
        self.drivers.clone()
    }

    fn add_database(&self, config: &DbhConfig) -> Result<Registered> {
        let driver = config
            .driver
            .ok_or_else(|| DbhError::Config("driver type is not set".to_string()))?;
        if !self.drivers.contains(&driver) {
            return Err(DbhError::UnsupportedDriver(driver));
        }
        let id = self.registry.register(&config.connection_name);
        Ok(Registered {
            session: Box::new(MemorySession {
                driver,
                control: self.control(&config.connection_name),
            }),
            id,
        })
    }

    fn remove_database(&self, connection_name: &str, id: RegistrationId) {
        if self.registry.unregister(connection_name, id) {
            self.controls().remove(connection_name);
        }
    }

    fn contains(&self, connection_name: &str) -> bool {
        self.registry.contains(connection_name)
    }
}

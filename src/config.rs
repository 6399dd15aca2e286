//! Connection and logging configuration for a database handler.
//!
//! A `DbhConfig` is built once by the caller (from a preset, by hand, or from
//! a TOML file) and handed to `DbHandler::new`, which keeps its own copy.
use crate::core::{DbhError, Result};
use serde::Deserialize;
use std::fmt;
use std::fs;
use std::path::Path;
use std::str::FromStr;
use tracing::level_filters::LevelFilter;

/// Connection name used when the caller does not pick one.
pub const DEFAULT_CONNECTION_NAME: &str = "default";
pub const DEFAULT_LOG_ID: &str = "dbh";
pub const DEFAULT_LOG_FILENAME: &str = "dbh.log";

/// Identifies the database backend a connection targets.
///
/// Deserializes through [`FromStr`], so TOML accepts the same
/// case-insensitive names as `str::parse`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(try_from = "String")]
pub enum DriverType {
    /// Local-file database
    Sqlite,
    Postgres,
    Mysql,
}

impl DriverType {
    pub const ALL: [DriverType; 3] = [DriverType::Sqlite, DriverType::Postgres, DriverType::Mysql];

    pub fn as_str(&self) -> &'static str {
        match self {
            DriverType::Sqlite => "sqlite",
            DriverType::Postgres => "postgres",
            DriverType::Mysql => "mysql",
        }
    }

    /// Whether the database name is a path on the local file system.
    pub fn is_file_based(&self) -> bool {
        matches!(self, DriverType::Sqlite)
    }

    /// Port used by the server presets; 0 for file-based drivers.
    pub fn default_port(&self) -> u16 {
        match self {
            DriverType::Sqlite => 0,
            DriverType::Postgres => 5432,
            DriverType::Mysql => 3306,
        }
    }

    pub fn supports_timezone(&self) -> bool {
        !self.is_file_based()
    }

    /// Session statement applying `timezone`, if this driver has one.
    ///
    /// Returns `None` for drivers without session time zones and for an
    /// empty `timezone`.
    pub fn timezone_statement(&self, timezone: &str) -> Option<String> {
        let timezone = timezone.trim();
        if timezone.is_empty() || !self.supports_timezone() {
            return None;
        }
        let quoted = timezone.replace('\'', "''");
        match self {
            DriverType::Postgres => Some(format!("SET TIME ZONE '{}'", quoted)),
            DriverType::Mysql => Some(format!("SET time_zone = '{}'", quoted)),
            DriverType::Sqlite => None,
        }
    }
}

impl fmt::Display for DriverType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DriverType {
    type Err = DbhError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "sqlite" | "sqlite3" | "qsqlite" => Ok(DriverType::Sqlite),
            "postgres" | "postgresql" | "qpsql" => Ok(DriverType::Postgres),
            "mysql" | "qmysql" => Ok(DriverType::Mysql),
            other => Err(DbhError::Config(format!("unknown driver type `{}`", other))),
        }
    }
}

impl TryFrom<String> for DriverType {
    type Error = DbhError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

/// Severity threshold for the handler's log file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    #[serde(alias = "warning")]
    Warn,
    #[serde(alias = "critical")]
    Error,
}

impl LogLevel {
    pub fn to_level_filter(self) -> LevelFilter {
        match self {
            LogLevel::Trace => LevelFilter::TRACE,
            LogLevel::Debug => LevelFilter::DEBUG,
            LogLevel::Info => LevelFilter::INFO,
            LogLevel::Warn => LevelFilter::WARN,
            LogLevel::Error => LevelFilter::ERROR,
        }
    }
}

/// Logging identity bundled with each connection configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct LogSettings {
    /// Tag attached to every event emitted by the handler
    pub id: String,
    /// File the log subscriber writes to
    pub filename: String,
    pub level: LogLevel,
}

impl Default for LogSettings {
    fn default() -> Self {
        LogSettings {
            id: DEFAULT_LOG_ID.to_string(),
            filename: DEFAULT_LOG_FILENAME.to_string(),
            level: LogLevel::default(),
        }
    }
}

/// Everything a handler needs to reach one database.
#[derive(Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct DbhConfig {
    pub driver: Option<DriverType>,
    /// Registry key distinguishing simultaneous handles
    pub connection_name: String,
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    /// Database name, or the file path for file-based drivers
    pub name: String,
    pub timezone: String,
    pub log: LogSettings,
}

impl Default for DbhConfig {
    fn default() -> Self {
        DbhConfig {
            driver: None,
            connection_name: DEFAULT_CONNECTION_NAME.to_string(),
            host: String::new(),
            port: 0,
            user: String::new(),
            password: String::new(),
            name: String::new(),
            timezone: String::new(),
            log: LogSettings::default(),
        }
    }
}

impl fmt::Debug for DbhConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DbhConfig")
            .field("driver", &self.driver)
            .field("connection_name", &self.connection_name)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &if self.password.is_empty() { "" } else { "***" })
            .field("name", &self.name)
            .field("timezone", &self.timezone)
            .field("log", &self.log)
            .finish()
    }
}

impl DbhConfig {
    fn server(driver: DriverType, host: &str, name: &str) -> Self {
        DbhConfig {
            driver: Some(driver),
            host: host.to_string(),
            port: driver.default_port(),
            name: name.to_string(),
            ..DbhConfig::default()
        }
    }

    /// PostgreSQL preset on the standard port.
    pub fn postgres(host: &str, name: &str) -> Self {
        Self::server(DriverType::Postgres, host, name)
    }

    /// MySQL preset on the standard port.
    pub fn mysql(host: &str, name: &str) -> Self {
        Self::server(DriverType::Mysql, host, name)
    }

    /// SQLite preset; `path` may also be `:memory:`.
    pub fn sqlite(path: &str) -> Self {
        DbhConfig {
            driver: Some(DriverType::Sqlite),
            name: path.to_string(),
            ..DbhConfig::default()
        }
    }

    pub fn with_credentials(mut self, user: &str, password: &str) -> Self {
        self.user = user.to_string();
        self.password = password.to_string();
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_timezone(mut self, timezone: &str) -> Self {
        self.timezone = timezone.to_string();
        self
    }

    pub fn with_connection_name(mut self, name: &str) -> Self {
        self.connection_name = name.to_string();
        self
    }

    /// Gives this configuration a connection name no other handle uses.
    pub fn with_unique_connection_name(mut self, prefix: &str) -> Self {
        self.connection_name = format!("{}-{}", prefix, uuid::Uuid::new_v4());
        self
    }

    pub fn with_log(mut self, log: LogSettings) -> Self {
        self.log = log;
        self
    }

    /// Parses a configuration from TOML text; missing keys keep their defaults.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// A configuration is valid when the driver and database name are set,
    /// and the host is set unless the driver is file-based.
    pub fn is_valid(&self) -> bool {
        self.validate().is_ok()
    }

    /// Same rule as [`is_valid`](Self::is_valid), reporting which part failed.
    pub fn validate(&self) -> Result<()> {
        let driver = self
            .driver
            .ok_or_else(|| DbhError::Config("driver type is not set".to_string()))?;
        if self.name.is_empty() {
            return Err(DbhError::Config("database name is empty".to_string()));
        }
        if !driver.is_file_based() && self.host.is_empty() {
            return Err(DbhError::Config(format!(
                "host is required for the {} driver",
                driver
            )));
        }
        Ok(())
    }
}

/// Loads a handler configuration from a TOML file at the given path.
///
/// # Example
///
/// ```no_run
/// let config = dbhandler::config::load_config("db.toml").expect("Failed to load config");
/// assert!(config.is_valid());
/// ```
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<DbhConfig> {
    let content = fs::read_to_string(path)?;
    DbhConfig::from_toml_str(&content)
}

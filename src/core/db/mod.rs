//! Database layer.
//!
//! ## Architecture
//!
//! - **Driver abstraction** (`driver.rs`): `SqlSession`, `ConnectionProvider`, values
//! - **Providers** (`manager.rs`, `memory.rs`): real drivers and the in-memory fake
//! - **Backends** (`sqlite.rs`, `postgres.rs`, `mysql.rs`): one session type per driver
//! - **Handler** (`handler.rs`, `query.rs`): lifecycle, statements, transactions
pub mod driver;
pub mod handler;
pub mod manager;
pub mod memory;
#[cfg(feature = "mysql")]
pub mod mysql;
#[cfg(feature = "postgres")]
pub mod postgres;
pub mod query;
pub mod registry;
pub mod sqlite;

pub use driver::{ConnectionProvider, DriverError, QueryOutput, Registered, SqlSession, SqlValue};
pub use handler::DbHandler;
pub use manager::DriverManager;
pub use memory::{MemoryControl, MemoryProvider};
pub use query::Query;
pub use registry::{ConnectionRegistry, RegistrationId};
pub use sqlite::SqliteSession;

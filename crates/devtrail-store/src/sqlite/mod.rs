//! `SQLite` backend for the event store.
//!
//! # Architecture
//!
//! - **[`connection`]**: `r2d2` connection pool with WAL mode, foreign keys and
//!   a busy timeout applied to every connection.
//! - **[`migrations`]**: Version-tracked schema evolution. Migrations are embedded
//!   at compile time and each runs in its own transaction together with its
//!   ledger row.
//! - **[`row_types`]**: Raw row structs and the column codecs (epoch millis, JSON,
//!   enum strings) that turn them into domain types.
//! - **[`repositories`]**: Stateless repository structs. Each method takes
//!   `&Connection` and executes SQL.

pub mod connection;
pub mod migrations;
pub mod repositories;
pub mod row_types;

pub use connection::{
    ConnectionConfig, ConnectionPool, PooledConnection, PragmaState, create_file, new_file,
    verify_pragmas,
};
pub use migrations::{current_version, latest_version, run_migrations};

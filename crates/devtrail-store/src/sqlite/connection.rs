//! `SQLite` connection pool with WAL mode and foreign keys enabled.
//!
//! Uses `r2d2` connection pooling with the `r2d2_sqlite` backend.
//! The [`PragmaCustomizer`] runs on each new connection so every handle the
//! pool hands out has WAL journaling, a busy timeout, and foreign keys on.
//!
//! Pools never create the database file. A store must be created with
//! [`create_file`] first.

use std::path::Path;
use std::time::Duration;

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{Connection, OpenFlags};

use crate::errors::{Result, SqlContext, StoreError};
use crate::settings::StoreSettings;

/// Alias for the connection pool type.
pub type ConnectionPool = Pool<SqliteConnectionManager>;

/// Alias for a pooled connection.
pub type PooledConnection = r2d2::PooledConnection<SqliteConnectionManager>;

/// Pool sizing and per-connection pragmas.
#[derive(Clone, Debug)]
pub struct ConnectionConfig {
    /// Maximum pool size.
    pub pool_size: u32,
    /// How long a connection waits on a locked database.
    pub busy_timeout: Duration,
    /// Cache size in KiB.
    pub cache_size_kib: u32,
    /// How long `pool.get()` waits for a free connection.
    pub connection_timeout: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self::from(&StoreSettings::default())
    }
}

impl From<&StoreSettings> for ConnectionConfig {
    fn from(s: &StoreSettings) -> Self {
        Self {
            pool_size: s.pool_size,
            busy_timeout: s.busy_timeout(),
            cache_size_kib: s.cache_size_kib,
            connection_timeout: s.connection_timeout(),
        }
    }
}

/// `SQLite` pragma customizer that runs on each new connection.
#[derive(Debug)]
struct PragmaCustomizer {
    busy_timeout: Duration,
    cache_size_kib: u32,
}

impl r2d2::CustomizeConnection<Connection, rusqlite::Error> for PragmaCustomizer {
    fn on_acquire(&self, conn: &mut Connection) -> std::result::Result<(), rusqlite::Error> {
        apply_pragmas(conn, self.busy_timeout, self.cache_size_kib)
    }
}

fn apply_pragmas(conn: &Connection, busy_timeout: Duration, cache_size_kib: u32) -> rusqlite::Result<()> {
    conn.execute_batch(&format!(
        "PRAGMA journal_mode = WAL;\
         PRAGMA busy_timeout = {};\
         PRAGMA foreign_keys = ON;\
         PRAGMA cache_size = -{cache_size_kib};\
         PRAGMA synchronous = NORMAL;",
        busy_timeout.as_millis()
    ))
}

/// Create a brand-new database file with WAL enabled.
///
/// Fails with [`StoreError::AlreadyExists`] if anything exists at `path`.
/// Missing parent directories are created.
pub fn create_file(path: &Path, config: &ConnectionConfig) -> Result<Connection> {
    if path.exists() {
        return Err(StoreError::AlreadyExists(path.to_path_buf()));
    }
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let conn = Connection::open_with_flags(
        path,
        OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )
    .context("create database file")?;
    apply_pragmas(&conn, config.busy_timeout, config.cache_size_kib)
        .context("configure new database")?;
    Ok(conn)
}

/// Create a pool over an existing database file.
///
/// Fails with [`StoreError::Missing`] if nothing exists at `path`; the pool
/// opens connections without the create flag so a racing delete cannot
/// resurrect an empty store either.
pub fn new_file(path: &Path, config: &ConnectionConfig) -> Result<ConnectionPool> {
    if !path.is_file() {
        return Err(StoreError::Missing(path.to_path_buf()));
    }
    let manager = SqliteConnectionManager::file(path)
        .with_flags(OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_NO_MUTEX);
    Pool::builder()
        .max_size(config.pool_size)
        .connection_timeout(config.connection_timeout)
        .connection_customizer(Box::new(PragmaCustomizer {
            busy_timeout: config.busy_timeout,
            cache_size_kib: config.cache_size_kib,
        }))
        .build(manager)
        .map_err(|source| StoreError::Pool {
            op: "open connection pool",
            source,
        })
}

/// Verify pragmas are set correctly on a connection.
pub fn verify_pragmas(conn: &Connection) -> Result<PragmaState> {
    let journal_mode: String = conn
        .query_row("PRAGMA journal_mode", [], |row| row.get(0))
        .context("read journal_mode")?;
    let foreign_keys: i32 = conn
        .query_row("PRAGMA foreign_keys", [], |row| row.get(0))
        .context("read foreign_keys")?;
    let busy_timeout_ms: i64 = conn
        .query_row("PRAGMA busy_timeout", [], |row| row.get(0))
        .context("read busy_timeout")?;
    Ok(PragmaState {
        journal_mode,
        foreign_keys_enabled: foreign_keys == 1,
        busy_timeout_ms,
    })
}

/// Pragma state for verification.
#[derive(Debug)]
pub struct PragmaState {
    /// Journal mode (should be "wal").
    pub journal_mode: String,
    /// Whether foreign keys are enabled.
    pub foreign_keys_enabled: bool,
    /// Busy timeout in milliseconds.
    pub busy_timeout_ms: i64,
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn create_file_enables_wal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("events.db");
        let conn = create_file(&path, &ConnectionConfig::default()).unwrap();
        let pragmas = verify_pragmas(&conn).unwrap();
        assert_eq!(pragmas.journal_mode, "wal");
        assert!(path.exists());
    }

    #[test]
    fn create_file_refuses_existing_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.db");
        std::fs::write(&path, b"").unwrap();
        assert_matches!(
            create_file(&path, &ConnectionConfig::default()),
            Err(StoreError::AlreadyExists(p)) if p == path
        );
    }

    #[test]
    fn new_file_refuses_missing_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.db");
        assert_matches!(
            new_file(&path, &ConnectionConfig::default()),
            Err(StoreError::Missing(_))
        );
        assert!(!path.exists());
    }

    #[test]
    fn file_pool_applies_pragmas() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.db");
        drop(create_file(&path, &ConnectionConfig::default()).unwrap());

        let config = ConnectionConfig {
            busy_timeout: Duration::from_millis(1234),
            ..ConnectionConfig::default()
        };
        let pool = new_file(&path, &config).unwrap();
        let conn = pool.get().unwrap();
        let pragmas = verify_pragmas(&conn).unwrap();
        assert_eq!(pragmas.journal_mode, "wal");
        assert!(pragmas.foreign_keys_enabled);
        assert_eq!(pragmas.busy_timeout_ms, 1234);
    }

    #[test]
    fn concurrent_connections() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.db");
        drop(create_file(&path, &ConnectionConfig::default()).unwrap());

        let config = ConnectionConfig {
            pool_size: 4,
            ..ConnectionConfig::default()
        };
        let pool = new_file(&path, &config).unwrap();
        let conns: Vec<_> = (0..4).map(|_| pool.get().unwrap()).collect();
        assert_eq!(conns.len(), 4);
        assert_eq!(pool.max_size(), 4);
    }

    #[test]
    fn config_from_settings() {
        let settings = StoreSettings {
            pool_size: 3,
            cache_size_kib: 1024,
            ..StoreSettings::default()
        };
        let config = ConnectionConfig::from(&settings);
        assert_eq!(config.pool_size, 3);
        assert_eq!(config.cache_size_kib, 1024);
        assert_eq!(config.busy_timeout, Duration::from_secs(5));
        assert_eq!(config.connection_timeout, Duration::from_secs(5));
    }
}

//! Schema migration runner for the event store database.
//!
//! Migrations are embedded at compile time via [`include_str!`] and executed
//! in version order. Each migration runs inside a transaction together with
//! its `schema_version` row, so a failure rolls back cleanly and no version
//! is recorded for it.
//!
//! The `schema_version` ledger is authoritative: a recorded version is never
//! re-run, whatever the schema currently looks like.

use rusqlite::{Connection, Transaction, TransactionBehavior};
use tracing::{debug, info};

use crate::errors::{Result, StoreError};

/// A single migration with a version number and SQL to execute.
#[derive(Debug)]
pub(crate) struct Migration {
    version: u32,
    description: &'static str,
    sql: &'static str,
}

/// All migrations in version order.
const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        description: "Base events table and indexes",
        sql: include_str!("v001_events.sql"),
    },
    Migration {
        version: 2,
        description: "Epoch-millisecond timestamps, stable row ids, full-text index",
        sql: include_str!("v002_epoch_timestamps_fts.sql"),
    },
    Migration {
        version: 3,
        description: "Sessions and session-event associations",
        sql: include_str!("v003_sessions.sql"),
    },
];

/// Run all pending migrations on the given connection.
///
/// Creates the `schema_version` table if it doesn't exist, then applies
/// each migration whose version exceeds the current maximum. Returns the
/// number of migrations applied.
///
/// # Errors
///
/// Returns [`StoreError::Migration`] if any migration SQL fails. Earlier
/// migrations in the same run stay applied.
pub fn run_migrations(conn: &Connection) -> Result<u32> {
    run_migration_list(conn, MIGRATIONS)
}

/// Return the highest applied migration version, or 0 if none.
pub fn current_version(conn: &Connection) -> Result<u32> {
    conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |row| row.get(0),
    )
    .map_err(|e| StoreError::Migration {
        message: format!("failed to read schema_version: {e}"),
    })
}

/// Return the latest migration version defined in code.
pub fn latest_version() -> u32 {
    MIGRATIONS.last().map_or(0, |m| m.version)
}

/// Create the empty version ledger (version 0) if it is absent.
pub fn ensure_version_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
           version     INTEGER PRIMARY KEY,
           applied_at  TEXT    NOT NULL,
           description TEXT
         );",
    )
    .map_err(|e| StoreError::Migration {
        message: format!("failed to create schema_version table: {e}"),
    })
}

// ─────────────────────────────────────────────────────────────────────────────
// Internal
// ─────────────────────────────────────────────────────────────────────────────

pub(crate) fn run_migration_list(conn: &Connection, migrations: &[Migration]) -> Result<u32> {
    ensure_version_table(conn)?;
    let current = current_version(conn)?;
    let mut applied = 0;

    for migration in migrations {
        if migration.version <= current {
            debug!(
                version = migration.version,
                description = migration.description,
                "migration already applied, skipping"
            );
            continue;
        }

        if apply_migration(conn, migration)? {
            applied += 1;
        }
    }

    if applied > 0 {
        info!(applied, version = current_version(conn)?, "migrations complete");
    }

    Ok(applied)
}

/// Apply one migration under the database write lock.
///
/// The ledger is re-read after the lock is taken, so when several
/// connections race to open the same file only the first applies each
/// version. Returns `false` if another connection got there first.
fn apply_migration(conn: &Connection, migration: &Migration) -> Result<bool> {
    let tx = Transaction::new_unchecked(conn, TransactionBehavior::Immediate).map_err(|e| {
        StoreError::Migration {
            message: format!("failed to begin transaction for v{}: {e}", migration.version),
        }
    })?;

    if current_version(&tx)? >= migration.version {
        debug!(
            version = migration.version,
            "migration applied by another connection, skipping"
        );
        return Ok(false);
    }

    info!(
        version = migration.version,
        description = migration.description,
        "applying migration"
    );

    tx.execute_batch(migration.sql)
        .map_err(|e| StoreError::Migration {
            message: format!(
                "migration v{} ({}) failed: {e}",
                migration.version, migration.description
            ),
        })?;

    let _ = tx
        .execute(
            "INSERT INTO schema_version (version, applied_at, description)
             VALUES (?1, strftime('%Y-%m-%dT%H:%M:%fZ', 'now'), ?2)",
            rusqlite::params![migration.version, migration.description],
        )
        .map_err(|e| StoreError::Migration {
            message: format!("failed to record v{} in schema_version: {e}", migration.version),
        })?;

    tx.commit().map_err(|e| StoreError::Migration {
        message: format!("failed to commit v{}: {e}", migration.version),
    })?;
    Ok(true)
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
#[allow(unused_results)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn open_memory() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("PRAGMA foreign_keys = ON;").unwrap();
        conn
    }

    fn names(conn: &Connection, kind: &str) -> Vec<String> {
        conn.prepare("SELECT name FROM sqlite_master WHERE type = ?1 ORDER BY name")
            .unwrap()
            .query_map([kind], |row| row.get(0))
            .unwrap()
            .filter_map(|r| r.ok())
            .collect()
    }

    #[test]
    fn fresh_ledger_is_version_zero() {
        let conn = open_memory();
        ensure_version_table(&conn).unwrap();
        assert_eq!(current_version(&conn).unwrap(), 0);
    }

    #[test]
    fn run_migrations_creates_all_tables() {
        let conn = open_memory();
        assert_eq!(run_migrations(&conn).unwrap(), 3);

        let tables = names(&conn, "table");
        for table in ["events", "events_fts", "schema_version", "session_events", "sessions"] {
            assert!(tables.contains(&table.to_string()), "missing table: {table}");
        }
        assert!(!tables.contains(&"events_v2".to_string()));
    }

    #[test]
    fn run_migrations_is_idempotent() {
        let conn = open_memory();
        assert_eq!(run_migrations(&conn).unwrap(), 3);
        assert_eq!(run_migrations(&conn).unwrap(), 0);
        assert_eq!(current_version(&conn).unwrap(), latest_version());
    }

    #[test]
    fn latest_version_matches_migrations() {
        assert_eq!(latest_version(), 3);
    }

    #[test]
    fn versions_are_strictly_ascending() {
        assert!(MIGRATIONS.windows(2).all(|w| w[0].version < w[1].version));
    }

    #[test]
    fn triggers_are_created() {
        let conn = open_memory();
        run_migrations(&conn).unwrap();
        let triggers = names(&conn, "trigger");
        for t in ["events_fts_delete", "events_fts_insert", "events_fts_update"] {
            assert!(triggers.contains(&t.to_string()), "missing trigger: {t}");
        }
    }

    #[test]
    fn timestamp_column_is_integer_after_v2() {
        let conn = open_memory();
        run_migrations(&conn).unwrap();
        let ty: String = conn
            .query_row(
                "SELECT type FROM pragma_table_info('events') WHERE name = 'timestamp'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(ty, "INTEGER");
    }

    #[test]
    fn v002_converts_text_timestamps_and_indexes_rows() {
        let conn = open_memory();
        run_migration_list(&conn, &MIGRATIONS[..1]).unwrap();
        conn.execute_batch(
            r#"INSERT INTO events (id, timestamp, source, type, payload, created_at) VALUES
                 ('e1', '2024-01-02T03:04:05.678Z', 'shell', 'command', '{"command":"git status"}', '2024-01-02T03:04:06Z'),
                 ('e2', '2024-01-02T05:04:05+02:00', 'git', 'commit', '{"message":"fix bug"}', '2024-01-02T03:04:06Z'),
                 ('e3', 'not a time', 'manual', 'note', '{}', '2024-01-02T03:04:06Z');"#,
        )
        .unwrap();

        assert_eq!(run_migrations(&conn).unwrap(), 2);

        let ts = |id: &str| -> i64 {
            conn.query_row("SELECT timestamp FROM events WHERE id = ?1", [id], |r| r.get(0))
                .unwrap()
        };
        assert_eq!(ts("e1"), 1_704_164_645_678);
        assert_eq!(ts("e2"), 1_704_164_645_000);
        assert_eq!(ts("e3"), 1_704_164_646_000);

        let hits: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM events_fts WHERE events_fts MATCH 'git'",
                [],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(hits, 2);
    }

    #[test]
    fn fts_tracks_insert_update_delete() {
        let conn = open_memory();
        run_migrations(&conn).unwrap();
        let count = |q: &str| -> i64 {
            conn.query_row(
                "SELECT COUNT(*) FROM events_fts WHERE events_fts MATCH ?1",
                [q],
                |r| r.get(0),
            )
            .unwrap()
        };

        conn.execute(
            r#"INSERT INTO events (id, timestamp, source, type, payload)
               VALUES ('e1', 0, 'shell', 'command', '{"command":"cargo build"}')"#,
            [],
        )
        .unwrap();
        assert_eq!(count("cargo"), 1);

        conn.execute(
            r#"UPDATE events SET payload = '{"command":"make"}' WHERE id = 'e1'"#,
            [],
        )
        .unwrap();
        assert_eq!(count("cargo"), 0);
        assert_eq!(count("make"), 1);

        conn.execute("DELETE FROM events WHERE id = 'e1'", []).unwrap();
        assert_eq!(count("make"), 0);
    }

    #[test]
    fn session_end_time_check_enforced() {
        let conn = open_memory();
        run_migrations(&conn).unwrap();
        let bad = conn.execute(
            "INSERT INTO sessions (id, start_time, end_time, status, start_trigger)
             VALUES ('s1', 0, 10, 'active', 'manual')",
            [],
        );
        assert!(bad.is_err());
        let bad = conn.execute(
            "INSERT INTO sessions (id, start_time, status, start_trigger)
             VALUES ('s2', 0, 'completed', 'manual')",
            [],
        );
        assert!(bad.is_err());
    }

    #[test]
    fn association_requires_existing_event() {
        let conn = open_memory();
        run_migrations(&conn).unwrap();
        conn.execute(
            "INSERT INTO sessions (id, start_time, start_trigger) VALUES ('s1', 0, 'manual')",
            [],
        )
        .unwrap();
        let res = conn.execute(
            "INSERT INTO session_events (session_id, event_id, associated_at) VALUES ('s1', 'nope', 0)",
            [],
        );
        assert!(res.is_err());
    }

    #[test]
    fn failed_migration_records_no_version() {
        const BROKEN: &[Migration] = &[
            Migration {
                version: 1,
                description: "ok",
                sql: "CREATE TABLE a (x INTEGER);",
            },
            Migration {
                version: 2,
                description: "broken",
                sql: "CREATE TABLE b (x INTEGER); CREATE TABLE a (x INTEGER);",
            },
        ];
        let conn = open_memory();
        let err = run_migration_list(&conn, BROKEN).unwrap_err();
        assert_matches!(err, StoreError::Migration { ref message } if message.contains("v2"));
        assert_eq!(current_version(&conn).unwrap(), 1);
        assert!(!names(&conn, "table").contains(&"b".to_string()));
    }

    #[test]
    fn ledger_is_authoritative_over_schema() {
        let conn = open_memory();
        ensure_version_table(&conn).unwrap();
        conn.execute(
            "INSERT INTO schema_version (version, applied_at) VALUES (1, 'x')",
            [],
        )
        .unwrap();
        // v1 is recorded but its table is absent; it must not be re-run,
        // so v2 has nothing to rebuild from.
        assert_matches!(run_migrations(&conn), Err(StoreError::Migration { .. }));
        assert_eq!(current_version(&conn).unwrap(), 1);
    }

    #[test]
    fn racing_connections_apply_each_version_once() {
        use crate::sqlite::connection::{self, ConnectionConfig};
        use std::sync::{Arc, Barrier};

        for round in 0..20 {
            let dir = tempfile::tempdir().unwrap();
            let path = dir.path().join("events.db");
            let config = ConnectionConfig::default();
            let created = connection::create_file(&path, &config).unwrap();
            ensure_version_table(&created).unwrap();
            drop(created);

            let pool = connection::new_file(&path, &config).unwrap();
            let barrier = Arc::new(Barrier::new(2));
            let workers: Vec<_> = (0..2)
                .map(|_| {
                    let conn = pool.get().unwrap();
                    let barrier = Arc::clone(&barrier);
                    std::thread::spawn(move || {
                        barrier.wait();
                        run_migrations(&conn)
                    })
                })
                .collect();

            let applied: Vec<u32> = workers
                .into_iter()
                .map(|w| w.join().unwrap().unwrap_or_else(|e| panic!("round {round}: {e}")))
                .collect();
            assert_eq!(applied.iter().sum::<u32>(), latest_version(), "round {round}");

            let conn = pool.get().unwrap();
            assert_eq!(current_version(&conn).unwrap(), latest_version());
            let recorded: u32 = conn
                .query_row("SELECT COUNT(*) FROM schema_version", [], |row| row.get(0))
                .unwrap();
            assert_eq!(recorded, latest_version());
        }
    }
}

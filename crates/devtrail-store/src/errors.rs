//! Error types for the event store.
//!
//! [`StoreError`] is returned by every store operation. Variants fall into
//! five coarse kinds (see [`ErrorKind`]) that callers map onto their own
//! responses: bad input, duplicate insert, missing entity, corrupt cursor,
//! and everything the backend can throw at us.

use std::path::PathBuf;
use std::time::Duration;

use rusqlite::ErrorCode;
use thiserror::Error;

/// Errors that can occur during event store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Caller input was rejected. Never retried.
    #[error("validation error: {0}")]
    Validation(String),

    /// An entity with this ID already exists. Ingest callers treat this as success.
    #[error("duplicate id: {0}")]
    Duplicate(String),

    /// A get/update targeted an ID that does not exist.
    #[error("{entity} not found: {id}")]
    NotFound {
        /// Entity kind (`"event"`, `"session"`).
        entity: &'static str,
        /// The missing identifier.
        id: String,
    },

    /// A pagination cursor could not be decoded.
    #[error("malformed cursor: {0}")]
    MalformedCursor(String),

    /// `SQLite` failure, tagged with the logical step that failed.
    #[error("{op} failed: {source}")]
    Backend {
        /// Logical operation (e.g. `"insert event"`).
        op: &'static str,
        /// Underlying driver error.
        #[source]
        source: rusqlite::Error,
    },

    /// Could not obtain a pooled connection.
    #[error("{op}: connection pool error: {source}")]
    Pool {
        /// Logical operation that needed the connection.
        op: &'static str,
        /// Underlying pool error.
        #[source]
        source: r2d2::Error,
    },

    /// Schema migration failed; no version was recorded for it.
    #[error("migration error: {message}")]
    Migration {
        /// Which migration failed and why.
        message: String,
    },

    /// A stored row could not be decoded.
    #[error("corrupt row in {table}.{column}: {detail}")]
    CorruptRow {
        /// Table name.
        table: &'static str,
        /// Column name.
        column: &'static str,
        /// What was wrong with the value.
        detail: String,
    },

    /// The operation exceeded its deadline.
    #[error("{op} timed out after {after:?}")]
    Timeout {
        /// Logical operation.
        op: &'static str,
        /// The deadline that elapsed.
        after: Duration,
    },

    /// The caller cancelled the operation.
    #[error("{op} cancelled")]
    Cancelled {
        /// Logical operation.
        op: &'static str,
    },

    /// `initialize` was pointed at a path that already exists.
    #[error("store already exists at {}", .0.display())]
    AlreadyExists(PathBuf),

    /// `open` was pointed at a path with no store.
    #[error("no store at {}", .0.display())]
    Missing(PathBuf),

    /// Filesystem error while preparing the store location.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error.
    #[error("serde error: {0}")]
    Serde(#[from] serde_json::Error),

    /// Internal error (e.g. a panicked worker task).
    #[error("internal error: {0}")]
    Internal(String),
}

/// Coarse classification used by callers to pick a response.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad caller input.
    Validation,
    /// Insert collision; idempotent success for the caller.
    Duplicate,
    /// Missing entity.
    NotFound,
    /// Corrupt pagination token.
    MalformedCursor,
    /// I/O, timeout, lock contention, corruption.
    Backend,
}

impl StoreError {
    /// Shorthand for a missing event.
    pub fn event_not_found(id: impl Into<String>) -> Self {
        Self::NotFound {
            entity: "event",
            id: id.into(),
        }
    }

    /// Shorthand for a missing session.
    pub fn session_not_found(id: impl Into<String>) -> Self {
        Self::NotFound {
            entity: "session",
            id: id.into(),
        }
    }

    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) | Self::AlreadyExists(_) => ErrorKind::Validation,
            Self::Duplicate(_) => ErrorKind::Duplicate,
            Self::NotFound { .. } | Self::Missing(_) => ErrorKind::NotFound,
            Self::MalformedCursor(_) => ErrorKind::MalformedCursor,
            Self::Backend { .. }
            | Self::Pool { .. }
            | Self::Migration { .. }
            | Self::CorruptRow { .. }
            | Self::Timeout { .. }
            | Self::Cancelled { .. }
            | Self::Io(_)
            | Self::Serde(_)
            | Self::Internal(_) => ErrorKind::Backend,
        }
    }

    /// Whether the caller is at fault (bad input or bad cursor).
    pub fn is_client_fault(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::Validation | ErrorKind::MalformedCursor | ErrorKind::NotFound
        )
    }

    /// Whether this is a duplicate-insert collision.
    pub fn is_duplicate(&self) -> bool {
        matches!(self, Self::Duplicate(_))
    }

    /// Whether the backend reported lock contention (`SQLITE_BUSY`/`SQLITE_LOCKED`).
    ///
    /// These are surfaced as-is; retrying is the caller's decision.
    pub fn is_busy(&self) -> bool {
        match self {
            Self::Backend { source, .. } => matches!(
                source.sqlite_error_code(),
                Some(ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked)
            ),
            _ => false,
        }
    }
}

/// Convenience type alias for store results.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Attach a logical operation name to a raw `rusqlite` result.
pub(crate) trait SqlContext<T> {
    /// Wrap an error as [`StoreError::Backend`] tagged with `op`.
    fn context(self, op: &'static str) -> Result<T>;
}

impl<T> SqlContext<T> for rusqlite::Result<T> {
    fn context(self, op: &'static str) -> Result<T> {
        self.map_err(|source| StoreError::Backend { op, source })
    }
}

/// Whether a driver error is a UNIQUE / PRIMARY KEY constraint violation.
pub(crate) fn is_unique_violation(err: &rusqlite::Error) -> bool {
    match err {
        rusqlite::Error::SqliteFailure(e, _) => {
            e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
                || e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY
        }
        _ => false,
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

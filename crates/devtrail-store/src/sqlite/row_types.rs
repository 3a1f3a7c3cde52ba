//! Database row types and the single row decoders for them.
//!
//! These represent the raw database row shape, not the public API types.
//! Each row type has exactly one `from_row` used by every single-row and
//! multi-row query, and one conversion into the public type. The conversion
//! parses enums and JSON but does not re-run write-time validation.

use chrono::{DateTime, Utc};
use rusqlite::Row;
use serde_json::Value;

use crate::errors::{Result, StoreError};
use crate::types::event::Event;
use crate::types::session::Session;

/// Column list matching [`EventRow::from_row`], qualified with alias `e`.
pub const EVENT_COLUMNS: &str =
    "e.row_id, e.id, e.timestamp, e.source, e.type, e.repo, e.branch, e.payload, e.created_at";

/// Column list matching [`SessionRow::from_row`].
pub const SESSION_COLUMNS: &str = "id, start_time, end_time, status, start_trigger, end_trigger, \
     description, primary_repo, branch, metadata";

/// Raw event row from the `events` table.
#[derive(Clone, Debug)]
pub struct EventRow {
    /// Integer row identity (full-text index linkage).
    pub row_id: i64,
    /// Event ID.
    pub id: String,
    /// Event time, epoch milliseconds.
    pub timestamp_ms: i64,
    /// Source string.
    pub source: String,
    /// Event type string.
    pub event_type: String,
    /// Repository, NULL when absent.
    pub repo: Option<String>,
    /// Branch, NULL when absent.
    pub branch: Option<String>,
    /// Payload JSON text.
    pub payload: String,
    /// Ingest time, epoch milliseconds.
    pub created_at_ms: i64,
}

impl EventRow {
    /// Decode columns laid out as in [`EVENT_COLUMNS`], starting at index 0.
    pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            row_id: row.get(0)?,
            id: row.get(1)?,
            timestamp_ms: row.get(2)?,
            source: row.get(3)?,
            event_type: row.get(4)?,
            repo: row.get(5)?,
            branch: row.get(6)?,
            payload: row.get(7)?,
            created_at_ms: row.get(8)?,
        })
    }

    /// Rebuild the public event: structured columns set on a decoded payload.
    pub fn into_event(self) -> Result<Event> {
        Ok(Event {
            timestamp: from_millis(self.timestamp_ms, "events", "timestamp")?,
            source: parse_enum(&self.source, "events", "source")?,
            event_type: parse_enum(&self.event_type, "events", "type")?,
            payload: parse_json(&self.payload, "events", "payload")?,
            created_at: Some(from_millis(self.created_at_ms, "events", "created_at")?),
            id: self.id,
            repo: self.repo,
            branch: self.branch,
        })
    }
}

/// Raw session row from the `sessions` table.
#[derive(Clone, Debug)]
pub struct SessionRow {
    /// Session ID.
    pub id: String,
    /// Start, epoch milliseconds.
    pub start_time_ms: i64,
    /// End, epoch milliseconds.
    pub end_time_ms: Option<i64>,
    /// Status string.
    pub status: String,
    /// Start trigger string.
    pub start_trigger: String,
    /// End trigger string.
    pub end_trigger: Option<String>,
    /// Description.
    pub description: Option<String>,
    /// Primary repository.
    pub primary_repo: Option<String>,
    /// Branch.
    pub branch: Option<String>,
    /// Metadata JSON text.
    pub metadata: String,
}

impl SessionRow {
    /// Decode columns laid out as in [`SESSION_COLUMNS`].
    pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            start_time_ms: row.get(1)?,
            end_time_ms: row.get(2)?,
            status: row.get(3)?,
            start_trigger: row.get(4)?,
            end_trigger: row.get(5)?,
            description: row.get(6)?,
            primary_repo: row.get(7)?,
            branch: row.get(8)?,
            metadata: row.get(9)?,
        })
    }

    /// Convert to the public session with the given attached event IDs.
    pub fn into_session(self, event_ids: Vec<String>) -> Result<Session> {
        Ok(Session {
            start_time: from_millis(self.start_time_ms, "sessions", "start_time")?,
            end_time: self
                .end_time_ms
                .map(|ms| from_millis(ms, "sessions", "end_time"))
                .transpose()?,
            status: parse_enum(&self.status, "sessions", "status")?,
            start_trigger: parse_enum(&self.start_trigger, "sessions", "start_trigger")?,
            end_trigger: self
                .end_trigger
                .as_deref()
                .map(|t| parse_enum(t, "sessions", "end_trigger"))
                .transpose()?,
            metadata: parse_json(&self.metadata, "sessions", "metadata")?,
            id: self.id,
            description: self.description,
            primary_repo: self.primary_repo,
            branch: self.branch,
            event_ids,
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Column helpers
// ─────────────────────────────────────────────────────────────────────────────

/// Epoch milliseconds for storage.
pub fn to_millis(ts: DateTime<Utc>) -> i64 {
    ts.timestamp_millis()
}

/// Parse stored epoch milliseconds, returning `CorruptRow` when out of range.
pub fn from_millis(ms: i64, table: &'static str, column: &'static str) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms).ok_or_else(|| StoreError::CorruptRow {
        table,
        column,
        detail: format!("timestamp out of range: {ms}"),
    })
}

/// Parse a JSON string column, returning `CorruptRow` on parse failure.
pub fn parse_json(raw: &str, table: &'static str, column: &'static str) -> Result<Value> {
    serde_json::from_str(raw).map_err(|e| StoreError::CorruptRow {
        table,
        column,
        detail: format!("invalid JSON: {e}"),
    })
}

/// Parse a string into an enum, returning `CorruptRow` on failure.
pub fn parse_enum<T: std::str::FromStr>(
    raw: &str,
    table: &'static str,
    column: &'static str,
) -> Result<T> {
    raw.parse().map_err(|_| StoreError::CorruptRow {
        table,
        column,
        detail: format!("unknown variant: {raw}"),
    })
}

/// Escape LIKE special characters for use with `ESCAPE '\'`.
pub fn escape_like(s: &str) -> String {
    s.replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
}

//! Event repository: the insert path plus point and range reads.
//!
//! Events are immutable and append-only. Nothing here updates or deletes rows.

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use tracing::debug;

use super::{query_events, sql_limit};
use crate::errors::{Result, SqlContext, StoreError, is_unique_violation};
use crate::sqlite::row_types::{EVENT_COLUMNS, EventRow, to_millis};
use crate::types::event::Event;

/// Event repository. Stateless, every method takes `&Connection`.
pub struct EventRepo;

impl EventRepo {
    /// Validate and insert a single event.
    ///
    /// `created_at` is always the ingestion time; whatever the caller set is
    /// ignored. A second insert with the same ID fails with
    /// [`StoreError::Duplicate`] and leaves the first row untouched.
    pub fn insert(conn: &Connection, event: &Event) -> Result<()> {
        event.validate()?;
        let payload = serde_json::to_string(&event.payload)?;

        let inserted = conn.execute(
            "INSERT INTO events (id, timestamp, source, type, repo, branch, payload, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                event.id,
                to_millis(event.timestamp),
                event.source.as_str(),
                event.event_type.as_str(),
                event.repo,
                event.branch,
                payload,
                to_millis(Utc::now()),
            ],
        );

        match inserted {
            Ok(_) => Ok(()),
            Err(e) if is_unique_violation(&e) => {
                debug!(event_id = %event.id, "duplicate event ignored");
                Err(StoreError::Duplicate(event.id.clone()))
            }
            Err(source) => Err(StoreError::Backend {
                op: "insert event",
                source,
            }),
        }
    }

    /// Get a single event by ID.
    pub fn get_by_id(conn: &Connection, event_id: &str) -> Result<Option<Event>> {
        let row = conn
            .query_row(
                &format!("SELECT {EVENT_COLUMNS} FROM events e WHERE e.id = ?1"),
                params![event_id],
                EventRow::from_row,
            )
            .optional()
            .context("get event")?;
        row.map(EventRow::into_event).transpose()
    }

    /// Whether an event with this ID exists.
    pub fn exists(conn: &Connection, event_id: &str) -> Result<bool> {
        conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM events WHERE id = ?1)",
            params![event_id],
            |row| row.get(0),
        )
        .context("check event exists")
    }

    /// Total number of events.
    pub fn count(conn: &Connection) -> Result<u64> {
        let n: i64 = conn
            .query_row("SELECT COUNT(*) FROM events", [], |row| row.get(0))
            .context("count events")?;
        Ok(u64::try_from(n).unwrap_or(0))
    }

    /// Events with `since <= timestamp < until`, oldest first.
    pub fn between(
        conn: &Connection,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Event>> {
        if until < since {
            return Err(StoreError::Validation(
                "range end precedes range start".into(),
            ));
        }
        query_events(
            conn,
            &format!(
                "SELECT {EVENT_COLUMNS} FROM events e
                 WHERE e.timestamp >= ?1 AND e.timestamp < ?2
                 ORDER BY e.timestamp ASC, e.row_id ASC
                 LIMIT ?3"
            ),
            params![to_millis(since), to_millis(until), sql_limit(limit)],
            "list events in range",
        )
    }

    /// The most recent events, newest first.
    pub fn recent(conn: &Connection, limit: usize) -> Result<Vec<Event>> {
        query_events(
            conn,
            &format!(
                "SELECT {EVENT_COLUMNS} FROM events e
                 ORDER BY e.timestamp DESC, e.row_id DESC
                 LIMIT ?1"
            ),
            params![sql_limit(limit)],
            "list recent events",
        )
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

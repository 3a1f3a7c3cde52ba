//! Session repository: session lifecycle and ordered event associations.
//!
//! Sessions are never hard-deleted here. Reading a session always loads its
//! full list of attached event IDs, in attach order.

use std::fmt::Write;

use chrono::Utc;
use rusqlite::types::ToSql;
use rusqlite::{Connection, OptionalExtension, params};
use tracing::debug;

use super::{query_events, sql_limit};
use crate::errors::{Result, SqlContext, StoreError, is_unique_violation};
use crate::sqlite::row_types::{
    EVENT_COLUMNS, SESSION_COLUMNS, SessionRow, parse_enum, to_millis,
};
use crate::types::event::Event;
use crate::types::session::{Session, SessionFilter, SessionStatus};

/// Session repository. Stateless, every method takes `&Connection`.
pub struct SessionRepo;

impl SessionRepo {
    /// Insert a new session. It must be `active` with no end time.
    pub fn create(conn: &Connection, session: &Session) -> Result<()> {
        session.validate()?;
        if session.status != SessionStatus::Active {
            return Err(StoreError::Validation(format!(
                "new sessions must be active, got {}",
                session.status
            )));
        }
        let metadata = serde_json::to_string(&session.metadata)?;

        let inserted = conn.execute(
            "INSERT INTO sessions (id, start_time, end_time, status, start_trigger, end_trigger,
                                   description, primary_repo, branch, metadata)
             VALUES (?1, ?2, NULL, ?3, ?4, NULL, ?5, ?6, ?7, ?8)",
            params![
                session.id,
                to_millis(session.start_time),
                session.status.as_str(),
                session.start_trigger.as_str(),
                session.description,
                session.primary_repo,
                session.branch,
                metadata,
            ],
        );
        match inserted {
            Ok(_) => Ok(()),
            Err(e) if is_unique_violation(&e) => Err(StoreError::Duplicate(session.id.clone())),
            Err(source) => Err(StoreError::Backend {
                op: "create session",
                source,
            }),
        }
    }

    /// Get a session with its attached event IDs.
    pub fn get_by_id(conn: &Connection, session_id: &str) -> Result<Option<Session>> {
        let row = conn
            .query_row(
                &format!("SELECT {SESSION_COLUMNS} FROM sessions WHERE id = ?1"),
                params![session_id],
                SessionRow::from_row,
            )
            .optional()
            .context("get session")?;
        match row {
            Some(row) => {
                let event_ids = Self::event_ids(conn, session_id)?;
                Ok(Some(row.into_session(event_ids)?))
            }
            None => Ok(None),
        }
    }

    /// Replace a session's mutable fields.
    ///
    /// The session must exist and the status change must be a legal
    /// transition. `event_ids` on the argument is ignored; use
    /// [`SessionRepo::attach_events`].
    pub fn update(conn: &Connection, session: &Session) -> Result<()> {
        session.validate()?;
        let tx = conn.unchecked_transaction().context("update session")?;

        let current: Option<String> = tx
            .query_row(
                "SELECT status FROM sessions WHERE id = ?1",
                params![session.id],
                |row| row.get(0),
            )
            .optional()
            .context("update session")?;
        let Some(current) = current else {
            return Err(StoreError::session_not_found(&session.id));
        };
        let current: SessionStatus = parse_enum(&current, "sessions", "status")?;
        if !current.can_transition_to(session.status) {
            return Err(StoreError::Validation(format!(
                "session {} cannot move from {current} to {}",
                session.id, session.status
            )));
        }

        let metadata = serde_json::to_string(&session.metadata)?;
        let _ = tx
            .execute(
                "UPDATE sessions SET start_time = ?2, end_time = ?3, status = ?4,
                        start_trigger = ?5, end_trigger = ?6, description = ?7,
                        primary_repo = ?8, branch = ?9, metadata = ?10
                 WHERE id = ?1",
                params![
                    session.id,
                    to_millis(session.start_time),
                    session.end_time.map(to_millis),
                    session.status.as_str(),
                    session.start_trigger.as_str(),
                    session.end_trigger.map(|t| t.as_str()),
                    session.description,
                    session.primary_repo,
                    session.branch,
                    metadata,
                ],
            )
            .context("update session")?;
        tx.commit().context("update session")?;

        debug!(session_id = %session.id, from = %current, to = %session.status, "session updated");
        Ok(())
    }

    /// List sessions, newest start first.
    pub fn list(conn: &Connection, filter: &SessionFilter) -> Result<Vec<Session>> {
        let mut sql = format!("SELECT {SESSION_COLUMNS} FROM sessions WHERE 1 = 1");
        let mut param_values: Vec<Box<dyn ToSql>> = Vec::new();

        if let Some(status) = filter.status {
            let _ = write!(sql, " AND status = ?{}", param_values.len() + 1);
            param_values.push(Box::new(status.as_str()));
        }
        if let Some(ref repo) = filter.primary_repo {
            let _ = write!(sql, " AND primary_repo = ?{}", param_values.len() + 1);
            param_values.push(Box::new(repo.clone()));
        }
        if let Some(after) = filter.started_after {
            let _ = write!(sql, " AND start_time >= ?{}", param_values.len() + 1);
            param_values.push(Box::new(to_millis(after)));
        }
        sql.push_str(" ORDER BY start_time DESC, id DESC");
        if let Some(limit) = filter.limit {
            let _ = write!(sql, " LIMIT ?{}", param_values.len() + 1);
            param_values.push(Box::new(sql_limit(limit)));
        }

        let rows = {
            let mut stmt = conn.prepare(&sql).context("list sessions")?;
            let params_refs: Vec<&dyn ToSql> = param_values.iter().map(Box::as_ref).collect();
            stmt.query_map(params_refs.as_slice(), SessionRow::from_row)
                .context("list sessions")?
                .collect::<rusqlite::Result<Vec<_>>>()
                .context("list sessions")?
        };

        rows.into_iter()
            .map(|row| {
                let event_ids = Self::event_ids(conn, &row.id)?;
                row.into_session(event_ids)
            })
            .collect()
    }

    /// The most recently started active session, if any.
    pub fn active(conn: &Connection) -> Result<Option<Session>> {
        let filter = SessionFilter {
            status: Some(SessionStatus::Active),
            limit: Some(1),
            ..SessionFilter::default()
        };
        Ok(Self::list(conn, &filter)?.into_iter().next())
    }

    /// Attach events to a session, preserving call order.
    ///
    /// Already-attached IDs are skipped. Fails with `NotFound` (and attaches
    /// nothing) if the session or any event is missing. Returns how many
    /// associations were added.
    pub fn attach_events(conn: &Connection, session_id: &str, event_ids: &[String]) -> Result<usize> {
        let tx = conn.unchecked_transaction().context("attach events")?;

        let exists: bool = tx
            .query_row(
                "SELECT EXISTS(SELECT 1 FROM sessions WHERE id = ?1)",
                params![session_id],
                |row| row.get(0),
            )
            .context("attach events")?;
        if !exists {
            return Err(StoreError::session_not_found(session_id));
        }

        let now = to_millis(Utc::now());
        let mut added = 0;
        {
            let mut check = tx
                .prepare("SELECT EXISTS(SELECT 1 FROM events WHERE id = ?1)")
                .context("attach events")?;
            let mut insert = tx
                .prepare(
                    "INSERT OR IGNORE INTO session_events (session_id, event_id, associated_at)
                     VALUES (?1, ?2, ?3)",
                )
                .context("attach events")?;
            for event_id in event_ids {
                let found: bool = check
                    .query_row(params![event_id], |row| row.get(0))
                    .context("attach events")?;
                if !found {
                    return Err(StoreError::event_not_found(event_id));
                }
                added += insert
                    .execute(params![session_id, event_id, now])
                    .context("attach events")?;
            }
        }
        tx.commit().context("attach events")?;

        debug!(session_id, requested = event_ids.len(), added, "events attached");
        Ok(added)
    }

    /// IDs of the events attached to a session, in attach order.
    pub fn event_ids(conn: &Connection, session_id: &str) -> Result<Vec<String>> {
        let mut stmt = conn
            .prepare("SELECT event_id FROM session_events WHERE session_id = ?1 ORDER BY row_id ASC")
            .context("list session event ids")?;
        let ids = stmt
            .query_map(params![session_id], |row| row.get(0))
            .context("list session event ids")?
            .collect::<rusqlite::Result<Vec<String>>>()
            .context("list session event ids")?;
        Ok(ids)
    }

    /// Full events attached to a session, in attach order.
    pub fn events(conn: &Connection, session_id: &str) -> Result<Vec<Event>> {
        if !Self::exists(conn, session_id)? {
            return Err(StoreError::session_not_found(session_id));
        }
        query_events(
            conn,
            &format!(
                "SELECT {EVENT_COLUMNS} FROM session_events se
                 JOIN events e ON e.id = se.event_id
                 WHERE se.session_id = ?1
                 ORDER BY se.row_id ASC"
            ),
            params![session_id],
            "list session events",
        )
    }

    /// IDs of the sessions an event is attached to, in attach order.
    pub fn sessions_for_event(conn: &Connection, event_id: &str) -> Result<Vec<String>> {
        let mut stmt = conn
            .prepare("SELECT session_id FROM session_events WHERE event_id = ?1 ORDER BY row_id ASC")
            .context("list sessions for event")?;
        let ids = stmt
            .query_map(params![event_id], |row| row.get(0))
            .context("list sessions for event")?
            .collect::<rusqlite::Result<Vec<String>>>()
            .context("list sessions for event")?;
        Ok(ids)
    }

    /// Whether a session exists.
    pub fn exists(conn: &Connection, session_id: &str) -> Result<bool> {
        conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM sessions WHERE id = ?1)",
            params![session_id],
            |row| row.get(0),
        )
        .context("check session exists")
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

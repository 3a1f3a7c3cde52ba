//! Stateless repositories. Every method takes `&Connection` and runs SQL;
//! none of them hold state between calls.

pub mod event;
pub mod search;
pub mod session;
pub mod stats;

use std::sync::LazyLock;

use regex::Regex;
use rusqlite::{Connection, Params};

use crate::errors::{Result, SqlContext, StoreError};
use crate::sqlite::row_types::EventRow;
use crate::types::event::Event;

pub use event::EventRepo;
pub use search::{SearchRepo, sanitize_query};
pub use session::SessionRepo;
pub use stats::StatsRepo;

static FIELD_PATH: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*(\.[A-Za-z_][A-Za-z0-9_]*)*$").expect("static regex")
});

/// Turn a dotted payload field (`meta.exit_code`) into a JSON path (`$.meta.exit_code`).
///
/// Only identifier segments are accepted, so the path can never carry
/// JSON-path syntax of its own.
pub(crate) fn json_path(field: &str) -> Result<String> {
    if FIELD_PATH.is_match(field) {
        Ok(format!("$.{field}"))
    } else {
        Err(StoreError::Validation(format!(
            "invalid payload field {field:?}: expected dotted identifiers"
        )))
    }
}

/// Saturating `usize` to SQL integer.
pub(crate) fn sql_limit(n: usize) -> i64 {
    i64::try_from(n).unwrap_or(i64::MAX)
}

/// Run a query selecting `EVENT_COLUMNS` and decode every row.
pub(crate) fn query_events<P: Params>(
    conn: &Connection,
    sql: &str,
    params: P,
    op: &'static str,
) -> Result<Vec<Event>> {
    let mut stmt = conn.prepare(sql).context(op)?;
    let rows = stmt
        .query_map(params, EventRow::from_row)
        .context(op)?
        .collect::<rusqlite::Result<Vec<_>>>()
        .context(op)?;
    rows.into_iter().map(EventRow::into_event).collect()
}

//! Search repository: FTS5 full-text search plus structured filters over events.
//!
//! The `events_fts` shadow index is kept in step with `events` by triggers,
//! so a committed insert is searchable immediately. This repository builds
//! one parameterised statement per request. User input only ever reaches
//! SQL as a bound parameter; the statement text is assembled from fixed
//! fragments and placeholder numbers.

use std::fmt::Write;
use std::sync::LazyLock;

use regex::Regex;
use rusqlite::types::ToSql;
use rusqlite::{Connection, ErrorCode};
use serde_json::Value;
use tracing::{debug, warn};

use super::{json_path, sql_limit};
use crate::errors::{Result, SqlContext, StoreError};
use crate::sqlite::row_types::{EVENT_COLUMNS, EventRow, escape_like, to_millis};
use crate::types::cursor::Cursor;
use crate::types::search::{PayloadFilter, SearchHit, SearchPage, SearchQuery, SortOrder};

static NON_WORD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"[^\w\s"]"#).expect("static regex"));
static WHITESPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").expect("static regex"));

/// Clean free text into an FTS5 query.
///
/// A query wrapped in double quotes passes through unchanged so callers can
/// use phrases and boolean operators. Anything else loses every character
/// outside word, whitespace and quote classes, has whitespace collapsed, and
/// drops all quotes if they are unbalanced. `None` means "match everything".
pub fn sanitize_query(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.len() >= 2 && trimmed.starts_with('"') && trimmed.ends_with('"') {
        return Some(trimmed.to_owned());
    }

    let stripped = NON_WORD.replace_all(trimmed, "");
    let collapsed = WHITESPACE.replace_all(stripped.trim(), " ");
    let cleaned = if collapsed.matches('"').count() % 2 == 1 {
        let unquoted = collapsed.replace('"', "");
        WHITESPACE.replace_all(unquoted.trim(), " ").into_owned()
    } else {
        collapsed.into_owned()
    };

    (!cleaned.is_empty()).then_some(cleaned)
}

/// Search repository. Stateless, every method takes `&Connection`.
pub struct SearchRepo;

impl SearchRepo {
    /// Run one page of a search.
    ///
    /// `page_size` must already be resolved (non-zero, clamped). One extra
    /// row is fetched to decide whether a next cursor is emitted.
    pub fn search(conn: &Connection, query: &SearchQuery, page_size: usize) -> Result<SearchPage> {
        let fts = query.text.as_deref().and_then(sanitize_query);
        if fts.is_none() && !query.has_filters() {
            return Err(StoreError::Validation(
                "search requires a text query or at least one filter".into(),
            ));
        }
        if page_size == 0 {
            return Err(StoreError::Validation("page size must be positive".into()));
        }

        let cursor = Cursor::decode_opt(query.cursor.as_deref())?;
        let offset = i64::try_from(cursor.offset())
            .map_err(|_| StoreError::MalformedCursor(format!("offset {}", cursor.offset())))?;

        let mut sort = query.sort.unwrap_or_default();
        if sort == SortOrder::Relevance && fts.is_none() {
            warn!("relevance order requested without a text query, using time descending");
            sort = SortOrder::TimeDesc;
        }

        let score = if fts.is_some() { "-bm25(events_fts)" } else { "0.0" };
        let mut sql = format!("SELECT {EVENT_COLUMNS}, {score} AS score FROM events e");
        let mut param_values: Vec<Box<dyn ToSql>> = Vec::new();

        if let Some(ref text) = fts {
            sql.push_str(" JOIN events_fts ON events_fts.rowid = e.row_id WHERE events_fts MATCH ?1");
            param_values.push(Box::new(text.clone()));
        } else {
            sql.push_str(" WHERE 1 = 1");
        }

        if !query.sources.is_empty() {
            push_in_list(
                &mut sql,
                &mut param_values,
                "e.source",
                query.sources.iter().map(|s| s.as_str()),
            );
        }
        if !query.types.is_empty() {
            push_in_list(
                &mut sql,
                &mut param_values,
                "e.type",
                query.types.iter().map(|t| t.as_str()),
            );
        }
        if let Some(repo) = query.repo.as_deref().filter(|r| !r.is_empty()) {
            push_contains(&mut sql, &mut param_values, "e.repo", repo);
        }
        if let Some(branch) = query.branch.as_deref().filter(|b| !b.is_empty()) {
            push_contains(&mut sql, &mut param_values, "e.branch", branch);
        }
        if let Some(ref filter) = query.payload {
            push_payload(&mut sql, &mut param_values, filter)?;
        }
        if let Some(since) = query.since {
            let _ = write!(sql, " AND e.timestamp >= ?{}", param_values.len() + 1);
            param_values.push(Box::new(to_millis(since)));
        }

        sql.push_str(match sort {
            SortOrder::Relevance => " ORDER BY bm25(events_fts) ASC, e.row_id ASC",
            SortOrder::TimeAsc => " ORDER BY e.timestamp ASC, e.row_id ASC",
            SortOrder::TimeDesc => " ORDER BY e.timestamp DESC, e.row_id DESC",
        });
        let _ = write!(
            sql,
            " LIMIT ?{} OFFSET ?{}",
            param_values.len() + 1,
            param_values.len() + 2
        );
        param_values.push(Box::new(sql_limit(page_size).saturating_add(1)));
        param_values.push(Box::new(offset));

        let rows = run(conn, &sql, &param_values, fts.is_some())?;
        let has_more = rows.len() > page_size;

        let mut hits = Vec::with_capacity(rows.len().min(page_size));
        for (row, score) in rows.into_iter().take(page_size) {
            hits.push(SearchHit {
                event: row.into_event()?,
                score,
            });
        }

        let next_cursor =
            has_more.then(|| Cursor::at(cursor.offset() + page_size as u64).encode());
        debug!(
            hits = hits.len(),
            offset = cursor.offset(),
            has_more,
            sort = ?sort,
            "search page"
        );
        Ok(SearchPage { hits, next_cursor })
    }

    /// Rebuild the full-text index from the base rows.
    pub fn rebuild_index(conn: &Connection) -> Result<()> {
        conn.execute_batch("INSERT INTO events_fts (events_fts) VALUES ('rebuild');")
            .context("rebuild search index")
    }

    /// Whether the full-text index agrees with the base rows.
    pub fn index_consistent(conn: &Connection) -> Result<bool> {
        let checked = conn.execute_batch(
            "INSERT INTO events_fts (events_fts, rank) VALUES ('integrity-check', 1);",
        );
        match checked {
            Ok(()) => Ok(true),
            Err(e) if e.sqlite_error_code() == Some(ErrorCode::DatabaseCorrupt) => {
                warn!(error = %e, "search index is out of step with events");
                Ok(false)
            }
            Err(source) => Err(StoreError::Backend {
                op: "check search index",
                source,
            }),
        }
    }
}

fn run(
    conn: &Connection,
    sql: &str,
    param_values: &[Box<dyn ToSql>],
    has_fts: bool,
) -> Result<Vec<(EventRow, f64)>> {
    let backend = |source: rusqlite::Error| StoreError::Backend {
        op: "search events",
        source,
    };
    // Schema faults surface at prepare time; only errors raised while
    // evaluating the MATCH expression are the caller's.
    let evaluate = |source: rusqlite::Error| match source {
        rusqlite::Error::SqliteFailure(ref e, Some(ref msg))
            if has_fts && e.code == ErrorCode::Unknown && is_fts_query_error(msg) =>
        {
            StoreError::Validation(format!("invalid search query: {msg}"))
        }
        source => backend(source),
    };

    let mut stmt = conn.prepare(sql).map_err(backend)?;
    let params_refs: Vec<&dyn ToSql> = param_values.iter().map(Box::as_ref).collect();
    stmt.query_map(params_refs.as_slice(), |row| {
        Ok((EventRow::from_row(row)?, row.get::<_, f64>(9)?))
    })
    .map_err(evaluate)?
    .collect::<rusqlite::Result<Vec<_>>>()
    .map_err(evaluate)
}

/// Messages FTS5 raises for a malformed query expression.
fn is_fts_query_error(msg: &str) -> bool {
    msg.starts_with("fts5: syntax error")
        || msg.starts_with("unterminated string")
        || msg.starts_with("no such column")
        || msg.starts_with("unknown special query")
}

fn push_in_list<'a>(
    sql: &mut String,
    param_values: &mut Vec<Box<dyn ToSql>>,
    column: &str,
    values: impl Iterator<Item = &'a str>,
) {
    let start = param_values.len();
    for v in values {
        param_values.push(Box::new(v.to_owned()));
    }
    let placeholders: Vec<String> = (start..param_values.len())
        .map(|i| format!("?{}", i + 1))
        .collect();
    let _ = write!(sql, " AND {column} IN ({})", placeholders.join(", "));
}

fn push_contains(
    sql: &mut String,
    param_values: &mut Vec<Box<dyn ToSql>>,
    column: &str,
    needle: &str,
) {
    let _ = write!(sql, " AND {column} LIKE ?{} ESCAPE '\\'", param_values.len() + 1);
    param_values.push(Box::new(format!("%{}%", escape_like(needle))));
}

fn push_payload(
    sql: &mut String,
    param_values: &mut Vec<Box<dyn ToSql>>,
    filter: &PayloadFilter,
) -> Result<()> {
    let path = json_path(&filter.field)?;
    let n = param_values.len();
    match &filter.value {
        Value::String(s) => {
            let _ = write!(
                sql,
                " AND json_type(e.payload, ?{p}) = 'text' AND json_extract(e.payload, ?{p}) = ?{v}",
                p = n + 1,
                v = n + 2
            );
            param_values.push(Box::new(path));
            param_values.push(Box::new(s.clone()));
        }
        Value::Number(num) => {
            let _ = write!(
                sql,
                " AND json_type(e.payload, ?{p}) IN ('integer', 'real') AND json_extract(e.payload, ?{p}) = ?{v}",
                p = n + 1,
                v = n + 2
            );
            param_values.push(Box::new(path));
            if let Some(i) = num.as_i64() {
                param_values.push(Box::new(i));
            } else if let Some(f) = num.as_f64() {
                param_values.push(Box::new(f));
            } else {
                return Err(StoreError::Validation(format!(
                    "payload filter number out of range: {num}"
                )));
            }
        }
        Value::Bool(b) => {
            let _ = write!(sql, " AND json_type(e.payload, ?{}) = ?{}", n + 1, n + 2);
            param_values.push(Box::new(path));
            param_values.push(Box::new(if *b { "true" } else { "false" }));
        }
        Value::Null | Value::Array(_) | Value::Object(_) => {
            return Err(StoreError::Validation(format!(
                "payload filter on {} must compare a string, number or boolean",
                filter.field
            )));
        }
    }
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

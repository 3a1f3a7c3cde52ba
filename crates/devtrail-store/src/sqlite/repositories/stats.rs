//! Aggregation queries over the event table.
//!
//! Every result is ordered by count descending with the group key as a
//! tie-breaker, so equal counts come back in a stable order.

use chrono::{DateTime, Duration, Utc};
use rusqlite::{Connection, params};

use super::{json_path, sql_limit};
use crate::errors::{Result, SqlContext};
use crate::sqlite::row_types::{from_millis, to_millis};
use crate::types::event::{EventType, Source};
use crate::types::stats::{GroupCount, TimelineBucket};

/// Trailing window covered by [`StatsRepo::timeline`].
pub const TIMELINE_WINDOW_DAYS: i64 = 7;

/// Maximum number of hourly buckets [`StatsRepo::timeline`] returns.
pub const TIMELINE_MAX_BUCKETS: usize = 168;

const HOUR_MS: i64 = 3_600_000;

/// Aggregation repository. Stateless, every method takes `&Connection`.
pub struct StatsRepo;

impl StatsRepo {
    /// Event counts per source.
    pub fn count_by_source(conn: &Connection) -> Result<Vec<GroupCount>> {
        group_counts(
            conn,
            "SELECT source, COUNT(*) AS n FROM events
             GROUP BY source ORDER BY n DESC, source ASC",
            [],
            "count events by source",
        )
    }

    /// Event counts per type.
    pub fn count_by_type(conn: &Connection) -> Result<Vec<GroupCount>> {
        group_counts(
            conn,
            "SELECT type, COUNT(*) AS n FROM events
             GROUP BY type ORDER BY n DESC, type ASC",
            [],
            "count events by type",
        )
    }

    /// Hourly event counts over the 7 days before `now`, newest bucket first.
    ///
    /// Hours with no events are absent; buckets are not contiguous.
    pub fn timeline(conn: &Connection, now: DateTime<Utc>) -> Result<Vec<TimelineBucket>> {
        let since = to_millis(now - Duration::days(TIMELINE_WINDOW_DAYS));
        let mut stmt = conn
            .prepare(
                "SELECT (timestamp / ?1) * ?1 AS bucket, COUNT(*) AS n FROM events
                 WHERE timestamp >= ?2 AND timestamp <= ?3
                 GROUP BY bucket ORDER BY bucket DESC
                 LIMIT ?4",
            )
            .context("build timeline")?;
        let rows = stmt
            .query_map(
                params![HOUR_MS, since, to_millis(now), sql_limit(TIMELINE_MAX_BUCKETS)],
                |row| Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?)),
            )
            .context("build timeline")?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("build timeline")?;

        rows.into_iter()
            .map(|(bucket, n)| {
                Ok(TimelineBucket {
                    bucket_start: from_millis(bucket, "events", "timestamp")?,
                    count: u64::try_from(n).unwrap_or(0),
                })
            })
            .collect()
    }

    /// Most frequent repositories (events with no repo are skipped).
    pub fn top_repos(conn: &Connection, limit: usize) -> Result<Vec<GroupCount>> {
        group_counts(
            conn,
            "SELECT repo, COUNT(*) AS n FROM events
             WHERE repo IS NOT NULL
             GROUP BY repo ORDER BY n DESC, repo ASC
             LIMIT ?1",
            params![sql_limit(limit)],
            "count top repos",
        )
    }

    /// Most frequent values of one payload field among events of a given
    /// source and type. Events lacking the field are skipped.
    pub fn top_payload_values(
        conn: &Connection,
        source: Source,
        event_type: EventType,
        field: &str,
        limit: usize,
    ) -> Result<Vec<GroupCount>> {
        let path = json_path(field)?;
        group_counts(
            conn,
            "SELECT CAST(json_extract(payload, ?1) AS TEXT) AS v, COUNT(*) AS n FROM events
             WHERE source = ?2 AND type = ?3 AND json_extract(payload, ?1) IS NOT NULL
             GROUP BY v ORDER BY n DESC, v ASC
             LIMIT ?4",
            params![path, source.as_str(), event_type.as_str(), sql_limit(limit)],
            "count top payload values",
        )
    }

    /// Most frequent shell commands.
    pub fn top_commands(conn: &Connection, limit: usize) -> Result<Vec<GroupCount>> {
        Self::top_payload_values(conn, Source::Shell, EventType::Command, "command", limit)
    }
}

fn group_counts<P: rusqlite::Params>(
    conn: &Connection,
    sql: &str,
    params: P,
    op: &'static str,
) -> Result<Vec<GroupCount>> {
    let mut stmt = conn.prepare(sql).context(op)?;
    let rows = stmt
        .query_map(params, |row| {
            Ok(GroupCount {
                key: row.get(0)?,
                count: u64::try_from(row.get::<_, i64>(1)?).unwrap_or(0),
            })
        })
        .context(op)?
        .collect::<rusqlite::Result<Vec<_>>>()
        .context(op)?;
    Ok(rows)
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

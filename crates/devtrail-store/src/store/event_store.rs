use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{Connection, InterruptHandle};
use tracing::{info, instrument, warn};

use super::OpContext;
use crate::errors::{Result, StoreError};
use crate::settings::StoreSettings;
use crate::sqlite::connection::{self, ConnectionConfig, ConnectionPool};
use crate::sqlite::migrations;
use crate::sqlite::repositories::{EventRepo, SearchRepo, SessionRepo, StatsRepo};
use crate::types::event::{Event, EventDraft, EventType, Source};
use crate::types::search::{SearchPage, SearchQuery};
use crate::types::session::{Session, SessionFilter};
use crate::types::stats::{GroupCount, TimelineBucket};

/// Handle to an opened, fully migrated store.
///
/// Cheap to clone; clones share the connection pool. There is no in-process
/// lock around the tables: `SQLite`'s WAL mode serialises writers and lets
/// readers run alongside them. A writer that loses the race gets a
/// `Backend` error with [`StoreError::is_busy`] set; it is not retried here.
#[derive(Clone)]
pub struct EventStore {
    pool: ConnectionPool,
    settings: Arc<StoreSettings>,
    path: PathBuf,
}

impl std::fmt::Debug for EventStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventStore")
            .field("path", &self.path)
            .field("pool_size", &self.pool.max_size())
            .finish_non_exhaustive()
    }
}

impl EventStore {
    // ─────────────────────────────────────────────────────────────────────
    // Construction
    // ─────────────────────────────────────────────────────────────────────

    /// Create a new, empty store at `path` (schema version 0).
    ///
    /// Fails with [`StoreError::AlreadyExists`] if anything is at `path`.
    /// Call [`EventStore::open`] afterwards to migrate and use it.
    #[instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub async fn initialize(path: impl AsRef<Path>, settings: &StoreSettings) -> Result<()> {
        let path = path.as_ref().to_path_buf();
        let config = ConnectionConfig::from(settings);
        tokio::task::spawn_blocking(move || {
            let conn = connection::create_file(&path, &config)?;
            migrations::ensure_version_table(&conn)?;
            info!(path = %path.display(), "store initialized");
            Ok::<_, StoreError>(())
        })
        .await
        .map_err(|e| StoreError::Internal(format!("initialize worker failed: {e}")))?
    }

    /// Open an existing store and apply any pending migrations.
    ///
    /// Fails with [`StoreError::Missing`] if nothing is at `path`; no file
    /// is created.
    #[instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub async fn open(path: impl AsRef<Path>, settings: StoreSettings) -> Result<Self> {
        settings
            .validate()
            .map_err(|e| StoreError::Validation(e.to_string()))?;
        let path = path.as_ref().to_path_buf();
        let config = ConnectionConfig::from(&settings);

        let open_path = path.clone();
        let pool = tokio::task::spawn_blocking(move || {
            let pool = connection::new_file(&open_path, &config)?;
            let conn = pool.get().map_err(|source| StoreError::Pool {
                op: "open store",
                source,
            })?;
            let applied = migrations::run_migrations(&conn)?;
            let version = migrations::current_version(&conn)?;
            info!(path = %open_path.display(), applied, version, "store opened");
            Ok::<_, StoreError>(pool)
        })
        .await
        .map_err(|e| StoreError::Internal(format!("open worker failed: {e}")))??;

        Ok(Self {
            pool,
            settings: Arc::new(settings),
            path,
        })
    }

    /// Open the store at the configured `dbPath`, creating it first if absent.
    pub async fn open_or_initialize(settings: StoreSettings) -> Result<Self> {
        let path = settings.db_path.clone();
        if !path.exists() {
            Self::initialize(&path, &settings).await?;
        }
        Self::open(path, settings).await
    }

    /// A context using the configured default deadline.
    pub fn ctx(&self) -> OpContext {
        OpContext::new(self.settings.operation_timeout())
    }

    /// Settings this store was opened with.
    pub fn settings(&self) -> &StoreSettings {
        &self.settings
    }

    /// Database file location.
    pub fn path(&self) -> &Path {
        &self.path
    }

    // ─────────────────────────────────────────────────────────────────────
    // Events
    // ─────────────────────────────────────────────────────────────────────

    /// Validate and insert one event.
    ///
    /// A repeated ID yields [`StoreError::Duplicate`]; the stored row is unchanged.
    #[instrument(skip_all, fields(op = "insert event", event_id = %event.id))]
    pub async fn insert_event(&self, ctx: &OpContext, event: Event) -> Result<()> {
        self.run(ctx, "insert event", move |conn| EventRepo::insert(conn, &event))
            .await
    }

    /// Convert an unchecked submission and insert it. Returns the stored event.
    #[instrument(skip_all, fields(op = "ingest event"))]
    pub async fn ingest(&self, ctx: &OpContext, draft: EventDraft) -> Result<Event> {
        let event = Event::try_from(draft)?;
        let stored = event.clone();
        self.run(ctx, "insert event", move |conn| EventRepo::insert(conn, &event))
            .await?;
        Ok(stored)
    }

    /// Get one event. Missing IDs are [`StoreError::NotFound`].
    #[instrument(skip_all, fields(op = "get event", event_id = %id))]
    pub async fn get_event(&self, ctx: &OpContext, id: &str) -> Result<Event> {
        let id = id.to_owned();
        self.run(ctx, "get event", move |conn| {
            EventRepo::get_by_id(conn, &id)?.ok_or_else(|| StoreError::event_not_found(id))
        })
        .await
    }

    /// Whether an event exists.
    pub async fn event_exists(&self, ctx: &OpContext, id: &str) -> Result<bool> {
        let id = id.to_owned();
        self.run(ctx, "check event exists", move |conn| EventRepo::exists(conn, &id))
            .await
    }

    /// Total number of events.
    pub async fn count_events(&self, ctx: &OpContext) -> Result<u64> {
        self.run(ctx, "count events", EventRepo::count).await
    }

    /// Events with `since <= timestamp < until`, oldest first.
    #[instrument(skip_all, fields(op = "list events in range"))]
    pub async fn events_between(
        &self,
        ctx: &OpContext,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Event>> {
        self.run(ctx, "list events in range", move |conn| {
            EventRepo::between(conn, since, until, limit)
        })
        .await
    }

    /// Most recent events, newest first.
    pub async fn recent_events(&self, ctx: &OpContext, limit: usize) -> Result<Vec<Event>> {
        self.run(ctx, "list recent events", move |conn| EventRepo::recent(conn, limit))
            .await
    }

    // ─────────────────────────────────────────────────────────────────────
    // Search
    // ─────────────────────────────────────────────────────────────────────

    /// Run one page of a search. A zero page size means the configured default.
    #[instrument(skip_all, fields(op = "search events", sort = ?query.sort, limit = query.limit))]
    pub async fn search(&self, ctx: &OpContext, query: SearchQuery) -> Result<SearchPage> {
        let page_size = self.settings.page_size(query.limit);
        self.run(ctx, "search events", move |conn| {
            SearchRepo::search(conn, &query, page_size)
        })
        .await
    }

    /// Rebuild the full-text index from the event rows.
    #[instrument(skip_all, fields(op = "rebuild search index"))]
    pub async fn rebuild_search_index(&self, ctx: &OpContext) -> Result<()> {
        self.run(ctx, "rebuild search index", SearchRepo::rebuild_index)
            .await?;
        info!("search index rebuilt");
        Ok(())
    }

    /// Whether the full-text index agrees with the event rows.
    pub async fn search_index_consistent(&self, ctx: &OpContext) -> Result<bool> {
        self.run(ctx, "check search index", SearchRepo::index_consistent)
            .await
    }

    // ─────────────────────────────────────────────────────────────────────
    // Aggregations
    // ─────────────────────────────────────────────────────────────────────

    /// Event counts per source, largest first.
    pub async fn count_by_source(&self, ctx: &OpContext) -> Result<Vec<GroupCount>> {
        self.run(ctx, "count events by source", StatsRepo::count_by_source)
            .await
    }

    /// Event counts per type, largest first.
    pub async fn count_by_type(&self, ctx: &OpContext) -> Result<Vec<GroupCount>> {
        self.run(ctx, "count events by type", StatsRepo::count_by_type)
            .await
    }

    /// Hourly counts over the trailing 7 days, newest first, gaps omitted.
    pub async fn timeline(&self, ctx: &OpContext) -> Result<Vec<TimelineBucket>> {
        let now = Utc::now();
        self.run(ctx, "build timeline", move |conn| StatsRepo::timeline(conn, now))
            .await
    }

    /// Most active repositories.
    pub async fn top_repos(&self, ctx: &OpContext, limit: usize) -> Result<Vec<GroupCount>> {
        self.run(ctx, "count top repos", move |conn| StatsRepo::top_repos(conn, limit))
            .await
    }

    /// Most frequent shell commands.
    pub async fn top_commands(&self, ctx: &OpContext, limit: usize) -> Result<Vec<GroupCount>> {
        self.run(ctx, "count top commands", move |conn| {
            StatsRepo::top_commands(conn, limit)
        })
        .await
    }

    /// Most frequent values of `field` among events of one source and type.
    pub async fn top_payload_values(
        &self,
        ctx: &OpContext,
        source: Source,
        event_type: EventType,
        field: &str,
        limit: usize,
    ) -> Result<Vec<GroupCount>> {
        let field = field.to_owned();
        self.run(ctx, "count top payload values", move |conn| {
            StatsRepo::top_payload_values(conn, source, event_type, &field, limit)
        })
        .await
    }

    // ─────────────────────────────────────────────────────────────────────
    // Sessions
    // ─────────────────────────────────────────────────────────────────────

    /// Store a new active session.
    #[instrument(skip_all, fields(op = "create session", session_id = %session.id))]
    pub async fn create_session(&self, ctx: &OpContext, session: Session) -> Result<()> {
        self.run(ctx, "create session", move |conn| {
            SessionRepo::create(conn, &session)
        })
        .await
    }

    /// Get a session with its attached event IDs. Missing IDs are `NotFound`.
    pub async fn get_session(&self, ctx: &OpContext, id: &str) -> Result<Session> {
        let id = id.to_owned();
        self.run(ctx, "get session", move |conn| {
            SessionRepo::get_by_id(conn, &id)?.ok_or_else(|| StoreError::session_not_found(id))
        })
        .await
    }

    /// Update an existing session. Never inserts.
    #[instrument(skip_all, fields(op = "update session", session_id = %session.id))]
    pub async fn update_session(&self, ctx: &OpContext, session: Session) -> Result<()> {
        self.run(ctx, "update session", move |conn| {
            SessionRepo::update(conn, &session)
        })
        .await
    }

    /// List sessions, newest first.
    pub async fn list_sessions(&self, ctx: &OpContext, filter: SessionFilter) -> Result<Vec<Session>> {
        self.run(ctx, "list sessions", move |conn| SessionRepo::list(conn, &filter))
            .await
    }

    /// The most recently started active session.
    pub async fn active_session(&self, ctx: &OpContext) -> Result<Option<Session>> {
        self.run(ctx, "get active session", SessionRepo::active).await
    }

    /// Attach events to a session in the given order. Returns how many were new.
    #[instrument(skip_all, fields(op = "attach events", session_id = %session_id, count = event_ids.len()))]
    pub async fn attach_events(
        &self,
        ctx: &OpContext,
        session_id: &str,
        event_ids: Vec<String>,
    ) -> Result<usize> {
        let session_id = session_id.to_owned();
        self.run(ctx, "attach events", move |conn| {
            SessionRepo::attach_events(conn, &session_id, &event_ids)
        })
        .await
    }

    /// A session's events in attach order.
    pub async fn session_events(&self, ctx: &OpContext, session_id: &str) -> Result<Vec<Event>> {
        let session_id = session_id.to_owned();
        self.run(ctx, "list session events", move |conn| {
            SessionRepo::events(conn, &session_id)
        })
        .await
    }

    /// IDs of the sessions an event belongs to.
    pub async fn sessions_for_event(&self, ctx: &OpContext, event_id: &str) -> Result<Vec<String>> {
        let event_id = event_id.to_owned();
        self.run(ctx, "list sessions for event", move |conn| {
            SessionRepo::sessions_for_event(conn, &event_id)
        })
        .await
    }

    // ─────────────────────────────────────────────────────────────────────
    // Schema
    // ─────────────────────────────────────────────────────────────────────

    /// Highest applied migration.
    pub async fn schema_version(&self, ctx: &OpContext) -> Result<u32> {
        self.run(ctx, "read schema version", migrations::current_version)
            .await
    }

    /// Highest migration this build knows about.
    pub fn latest_schema_version() -> u32 {
        migrations::latest_version()
    }

    // ─────────────────────────────────────────────────────────────────────
    // Internal
    // ─────────────────────────────────────────────────────────────────────

    /// Run `f` on a pooled connection under `ctx`'s deadline and token.
    ///
    /// On timeout or cancellation the running statement is interrupted and
    /// the call returns at once; the worker finishes in the background and
    /// its result is dropped.
    async fn run<T, F>(&self, ctx: &OpContext, op: &'static str, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
    {
        if ctx.is_cancelled() {
            return Err(StoreError::Cancelled { op });
        }

        let pool = self.pool.clone();
        let inflight = Arc::new(Inflight::default());
        let worker = Arc::clone(&inflight);

        let task = tokio::task::spawn_blocking(move || {
            let conn = pool.get().map_err(|source| StoreError::Pool { op, source })?;
            if !worker.arm(conn.get_interrupt_handle()) {
                return Err(StoreError::Cancelled { op });
            }
            let out = f(&conn);
            worker.disarm();
            out
        });

        tokio::select! {
            joined = task => {
                joined.map_err(|e| StoreError::Internal(format!("{op} worker failed: {e}")))?
            }
            () = ctx.cancel_token().cancelled() => {
                inflight.abandon();
                warn!(op, "operation cancelled");
                Err(StoreError::Cancelled { op })
            }
            () = tokio::time::sleep(ctx.timeout()) => {
                inflight.abandon();
                warn!(op, timeout_ms = ctx.timeout().as_millis(), "operation timed out");
                Err(StoreError::Timeout { op, after: ctx.timeout() })
            }
        }
    }
}

/// Interrupt slot shared between a caller and its blocking worker.
///
/// The worker holds the handle only while its statement runs, and the lock
/// is held while interrupting, so an interrupt can never land on a
/// connection that has already gone back to the pool.
#[derive(Default)]
struct Inflight {
    state: Mutex<InflightState>,
}

#[derive(Default)]
struct InflightState {
    handle: Option<InterruptHandle>,
    abandoned: bool,
}

impl Inflight {
    /// Store the handle. `false` if the caller already gave up.
    fn arm(&self, handle: InterruptHandle) -> bool {
        let mut state = self.state.lock();
        if state.abandoned {
            return false;
        }
        state.handle = Some(handle);
        true
    }

    fn disarm(&self) {
        self.state.lock().handle = None;
    }

    fn abandon(&self) {
        let mut state = self.state.lock();
        state.abandoned = true;
        if let Some(handle) = state.handle.take() {
            handle.interrupt();
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::session::SessionTrigger;
    use assert_matches::assert_matches;
    use serde_json::json;
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;

    const SLOW_SQL: &str = "WITH RECURSIVE c(x) AS (SELECT 1 UNION ALL SELECT x + 1 FROM c)
                            SELECT COUNT(*) FROM c";

    fn settings() -> StoreSettings {
        StoreSettings {
            pool_size: 2,
            ..StoreSettings::default()
        }
    }

    async fn fresh(dir: &tempfile::TempDir) -> EventStore {
        let path = dir.path().join("events.db");
        EventStore::initialize(&path, &settings()).await.unwrap();
        EventStore::open(&path, settings()).await.unwrap()
    }

    fn slow(conn: &Connection) -> Result<i64> {
        conn.query_row(SLOW_SQL, [], |row| row.get(0))
            .map_err(|source| StoreError::Backend { op: "slow", source })
    }

    #[tokio::test]
    async fn initialize_then_open_migrates() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.db");
        EventStore::initialize(&path, &settings()).await.unwrap();

        let raw = Connection::open(&path).unwrap();
        assert_eq!(migrations::current_version(&raw).unwrap(), 0);
        drop(raw);

        let store = EventStore::open(&path, settings()).await.unwrap();
        let ctx = store.ctx();
        assert_eq!(
            store.schema_version(&ctx).await.unwrap(),
            EventStore::latest_schema_version()
        );
    }

    #[tokio::test]
    async fn initialize_refuses_existing_path() {
        let dir = tempfile::tempdir().unwrap();
        let store = fresh(&dir).await;
        assert_matches!(
            EventStore::initialize(store.path(), &settings()).await,
            Err(StoreError::AlreadyExists(_))
        );
    }

    #[tokio::test]
    async fn open_refuses_missing_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.db");
        assert_matches!(
            EventStore::open(&path, settings()).await,
            Err(StoreError::Missing(_))
        );
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn open_or_initialize_creates_once() {
        let dir = tempfile::tempdir().unwrap();
        let s = StoreSettings {
            db_path: dir.path().join("sub").join("events.db"),
            ..settings()
        };
        let store = EventStore::open_or_initialize(s.clone()).await.unwrap();
        let ctx = store.ctx();
        store
            .insert_event(&ctx, Event::new(Source::Manual, EventType::Note, json!({})))
            .await
            .unwrap();
        drop(store);

        let again = EventStore::open_or_initialize(s).await.unwrap();
        assert_eq!(again.count_events(&again.ctx()).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn open_rejects_invalid_settings() {
        let dir = tempfile::tempdir().unwrap();
        let store = fresh(&dir).await;
        let bad = StoreSettings {
            pool_size: 0,
            ..settings()
        };
        assert_matches!(
            EventStore::open(store.path(), bad).await,
            Err(StoreError::Validation(_))
        );
    }

    #[tokio::test]
    async fn ingest_draft_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = fresh(&dir).await;
        let ctx = store.ctx();

        let draft = EventDraft {
            id: Some("e1".into()),
            source: "shell".into(),
            event_type: "command".into(),
            payload: json!({"command": "git status"}),
            ..EventDraft::default()
        };
        let stored = store.ingest(&ctx, draft.clone()).await.unwrap();
        assert_eq!(stored.id, "e1");

        let got = store.get_event(&ctx, "e1").await.unwrap();
        assert_eq!(got.source, Source::Shell);
        assert_eq!(got.payload, json!({"command": "git status"}));

        assert_matches!(store.ingest(&ctx, draft).await, Err(StoreError::Duplicate(_)));
        assert_matches!(
            store.get_event(&ctx, "nope").await,
            Err(StoreError::NotFound { entity: "event", .. })
        );
    }

    #[tokio::test]
    async fn ingest_rejects_unknown_source() {
        let dir = tempfile::tempdir().unwrap();
        let store = fresh(&dir).await;
        let draft = EventDraft {
            source: "fax".into(),
            event_type: "note".into(),
            ..EventDraft::default()
        };
        assert_matches!(
            store.ingest(&store.ctx(), draft).await,
            Err(StoreError::Validation(_))
        );
    }

    #[tokio::test]
    async fn search_uses_default_page_size() {
        let dir = tempfile::tempdir().unwrap();
        let s = StoreSettings {
            default_page_size: 2,
            max_page_size: 3,
            ..settings()
        };
        let path = dir.path().join("events.db");
        EventStore::initialize(&path, &s).await.unwrap();
        let store = EventStore::open(&path, s).await.unwrap();
        let ctx = store.ctx();
        for i in 0..5 {
            store
                .insert_event(&ctx, Event::new(Source::Git, EventType::Commit, json!({"n": i})))
                .await
                .unwrap();
        }

        let q = SearchQuery::default().with_sources([Source::Git]);
        let page = store.search(&ctx, q.clone()).await.unwrap();
        assert_eq!(page.hits.len(), 2);
        assert!(page.next_cursor.is_some());

        let page = store.search(&ctx, q.limit(100)).await.unwrap();
        assert_eq!(page.hits.len(), 3);
    }

    #[tokio::test]
    async fn sessions_through_facade() {
        let dir = tempfile::tempdir().unwrap();
        let store = fresh(&dir).await;
        let ctx = store.ctx();
        let e = Event::new(Source::Git, EventType::Commit, json!({}));
        let event_id = e.id.clone();
        store.insert_event(&ctx, e).await.unwrap();

        let mut s = Session::start(SessionTrigger::Manual);
        store.create_session(&ctx, s.clone()).await.unwrap();
        assert_eq!(store.attach_events(&ctx, &s.id, vec![event_id.clone()]).await.unwrap(), 1);

        let got = store.get_session(&ctx, &s.id).await.unwrap();
        assert_eq!(got.event_ids, vec![event_id.clone()]);
        assert_eq!(store.active_session(&ctx).await.unwrap().unwrap().id, s.id);
        assert_eq!(store.sessions_for_event(&ctx, &event_id).await.unwrap(), vec![s.id.clone()]);
        assert_eq!(store.session_events(&ctx, &s.id).await.unwrap().len(), 1);

        s.complete(Utc::now(), SessionTrigger::Shutdown);
        store.update_session(&ctx, s.clone()).await.unwrap();
        assert!(store.active_session(&ctx).await.unwrap().is_none());
        assert_eq!(
            store.list_sessions(&ctx, SessionFilter::default()).await.unwrap().len(),
            1
        );
    }

    #[tokio::test]
    async fn pre_cancelled_context_does_no_work() {
        let dir = tempfile::tempdir().unwrap();
        let store = fresh(&dir).await;
        let ctx = store.ctx();
        ctx.cancel();
        assert_matches!(
            store
                .insert_event(&ctx, Event::new(Source::Manual, EventType::Note, json!({})))
                .await,
            Err(StoreError::Cancelled { op: "insert event" })
        );
        assert_eq!(store.count_events(&store.ctx()).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn deadline_interrupts_running_statement() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.db");
        let s = StoreSettings {
            pool_size: 1,
            ..settings()
        };
        EventStore::initialize(&path, &s).await.unwrap();
        let store = EventStore::open(&path, s).await.unwrap();

        let ctx = store.ctx().with_timeout(Duration::from_millis(50));
        assert_matches!(
            store.run(&ctx, "slow", slow).await,
            Err(StoreError::Timeout { op: "slow", .. })
        );

        // The single pooled connection was interrupted and handed back.
        let n = store
            .count_events(&store.ctx().with_timeout(Duration::from_secs(5)))
            .await
            .unwrap();
        assert_eq!(n, 0);
    }

    #[tokio::test]
    async fn cancellation_returns_promptly() {
        let dir = tempfile::tempdir().unwrap();
        let store = fresh(&dir).await;
        let token = CancellationToken::new();
        let ctx = store
            .ctx()
            .with_timeout(Duration::from_secs(60))
            .with_cancel(token.clone());

        let canceller = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            token.cancel();
        });
        let started = std::time::Instant::now();
        assert_matches!(
            store.run(&ctx, "slow", slow).await,
            Err(StoreError::Cancelled { op: "slow" })
        );
        assert!(started.elapsed() < Duration::from_secs(10));
        canceller.await.unwrap();
    }

    #[test]
    fn abandon_before_arm_refuses_work() {
        let conn = Connection::open_in_memory().unwrap();
        let inflight = Inflight::default();
        inflight.abandon();
        assert!(!inflight.arm(conn.get_interrupt_handle()));
    }
}

//! # devtrail-store
//!
//! Event storage and search engine with `SQLite` backend for devtrail.
//!
//! Responsible for:
//!
//! - **Events**: typed records from eight sources (git, shell, editor, ...) with a
//!   free-form JSON payload, stored with millisecond timestamps
//! - **Search**: FTS5 full-text search over source, type and payload, combined with
//!   structured filters, three sort orders and opaque pagination cursors
//! - **Aggregations**: counts by source and type, an hourly 7-day timeline, and
//!   top-N repositories, commands and payload values
//! - **Sessions**: work sessions with a forward-only lifecycle and ordered event
//!   association
//! - **Migrations**: version-tracked SQL schema evolution, applied on open
//! - **Async facade**: [`EventStore`] runs every call on the blocking pool under a
//!   deadline and a cancellation token

#![deny(unsafe_code)]

pub mod errors;
pub mod settings;
pub mod sqlite;
pub mod store;
pub mod types;

pub use errors::{ErrorKind, Result, StoreError};
pub use settings::{StoreSettings, load_settings, load_settings_from_path};
pub use store::{EventStore, OpContext};
pub use types::{
    Cursor, Event, EventDraft, EventType, GroupCount, PayloadFilter, SearchHit, SearchPage,
    SearchQuery, Session, SessionFilter, SessionStatus, SessionTrigger, SortOrder, Source,
    TimelineBucket,
};

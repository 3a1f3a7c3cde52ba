//! Domain types shared by the repositories and the store facade.

pub mod cursor;
pub mod event;
pub mod search;
pub mod session;
pub mod stats;

pub use cursor::Cursor;
pub use event::{ALL_EVENT_TYPES, ALL_SOURCES, Event, EventDraft, EventType, Source};
pub use search::{PayloadFilter, SearchHit, SearchPage, SearchQuery, SortOrder};
pub use session::{Session, SessionFilter, SessionStatus, SessionTrigger};
pub use stats::{GroupCount, TimelineBucket};

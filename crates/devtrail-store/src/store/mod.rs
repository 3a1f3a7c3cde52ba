//! Async `EventStore` facade.
//!
//! The [`EventStore`] owns the connection pool and exposes every storage
//! operation as an `async` method bounded by an [`OpContext`] deadline and
//! cancellation token. `SQLite` work runs on the blocking thread pool; the
//! async side only waits.

mod context;
mod event_store;

pub use context::OpContext;
pub use event_store::EventStore;

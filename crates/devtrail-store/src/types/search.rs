//! Search inputs and results.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::event::{Event, EventType, Source};

/// Result ordering.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortOrder {
    /// Best text match first. Falls back to [`SortOrder::TimeDesc`] without a text query.
    Relevance,
    /// Oldest first.
    #[default]
    TimeAsc,
    /// Newest first.
    TimeDesc,
}

/// Exact match on one field inside the event payload.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PayloadFilter {
    /// Dotted path into the payload object, e.g. `command` or `meta.exit_code`.
    pub field: String,
    /// Scalar to compare against (string, number or bool).
    pub value: Value,
}

impl PayloadFilter {
    /// Filter `field == value`.
    pub fn new(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            field: field.into(),
            value: value.into(),
        }
    }
}

/// A search request. All active predicates are ANDed.
///
/// At least one of a non-blank `text` or a structured filter is required.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SearchQuery {
    /// Free-text query against source, type and payload.
    pub text: Option<String>,
    /// Allowed sources (empty = any).
    pub sources: Vec<Source>,
    /// Allowed types (empty = any).
    pub types: Vec<EventType>,
    /// Substring of the repo.
    pub repo: Option<String>,
    /// Substring of the branch.
    pub branch: Option<String>,
    /// Structured payload match.
    pub payload: Option<PayloadFilter>,
    /// Lower time bound (inclusive).
    pub since: Option<DateTime<Utc>>,
    /// Ordering. Defaults to time ascending.
    pub sort: Option<SortOrder>,
    /// Page size. 0 means the configured default.
    pub limit: usize,
    /// Opaque cursor from a previous page.
    pub cursor: Option<String>,
}

impl SearchQuery {
    /// Query with free text only.
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            ..Self::default()
        }
    }

    /// Restrict to these sources.
    #[must_use]
    pub fn with_sources(mut self, sources: impl IntoIterator<Item = Source>) -> Self {
        self.sources = sources.into_iter().collect();
        self
    }

    /// Restrict to these types.
    #[must_use]
    pub fn with_types(mut self, types: impl IntoIterator<Item = EventType>) -> Self {
        self.types = types.into_iter().collect();
        self
    }

    /// Repo substring filter.
    #[must_use]
    pub fn with_repo(mut self, repo: impl Into<String>) -> Self {
        self.repo = Some(repo.into());
        self
    }

    /// Branch substring filter.
    #[must_use]
    pub fn with_branch(mut self, branch: impl Into<String>) -> Self {
        self.branch = Some(branch.into());
        self
    }

    /// Payload equality filter.
    #[must_use]
    pub fn with_payload(mut self, filter: PayloadFilter) -> Self {
        self.payload = Some(filter);
        self
    }

    /// Lower time bound.
    #[must_use]
    pub fn since(mut self, since: DateTime<Utc>) -> Self {
        self.since = Some(since);
        self
    }

    /// Ordering.
    #[must_use]
    pub fn sorted(mut self, sort: SortOrder) -> Self {
        self.sort = Some(sort);
        self
    }

    /// Page size.
    #[must_use]
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    /// Resume from a cursor.
    #[must_use]
    pub fn after(mut self, cursor: impl Into<String>) -> Self {
        self.cursor = Some(cursor.into());
        self
    }

    /// Whether any structured filter is set.
    pub fn has_filters(&self) -> bool {
        !self.sources.is_empty()
            || !self.types.is_empty()
            || self.repo.as_deref().is_some_and(|r| !r.is_empty())
            || self.branch.as_deref().is_some_and(|b| !b.is_empty())
            || self.payload.is_some()
            || self.since.is_some()
    }
}

/// One matching event.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    /// The reconstructed event.
    pub event: Event,
    /// Relevance (higher is better). Zero for non-text searches.
    pub score: f64,
}

/// One page of search results.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchPage {
    /// Hits on this page.
    pub hits: Vec<SearchHit>,
    /// Cursor for the next page, present only when more rows remain.
    pub next_cursor: Option<String>,
}

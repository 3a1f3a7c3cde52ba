//! Aggregation result rows.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Event count for one group key.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupCount {
    /// Group key (source, type, repo, or payload value).
    pub key: String,
    /// Number of events in the group.
    pub count: u64,
}

/// Event count for one hour.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimelineBucket {
    /// Start of the hour (UTC).
    pub bucket_start: DateTime<Utc>,
    /// Events in that hour.
    pub count: u64,
}

//! Work sessions: a named grouping of events with its own lifecycle.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::errors::{Result, StoreError};

/// Session lifecycle state.
///
/// Transitions only move forward: `active → completed → archived`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// Work in progress. No end time.
    Active,
    /// Finished. Has an end time.
    Completed,
    /// Finished and filed away.
    Archived,
}

impl SessionStatus {
    /// Canonical string form.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Completed => "completed",
            Self::Archived => "archived",
        }
    }

    /// Whether moving from `self` to `next` is allowed.
    ///
    /// Staying in the same state is allowed so that other fields can be updated.
    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Active, Self::Active | Self::Completed)
                | (Self::Completed, Self::Completed | Self::Archived)
                | (Self::Archived, Self::Archived)
        )
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SessionStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "active" => Ok(Self::Active),
            "completed" => Ok(Self::Completed),
            "archived" => Ok(Self::Archived),
            other => Err(format!("unknown session status: {other}")),
        }
    }
}

/// What caused a session to start or end.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionTrigger {
    /// User started/stopped it explicitly.
    Manual,
    /// Activity resumed after, or stopped for, an idle gap.
    IdleTimeout,
    /// The working branch changed.
    BranchSwitch,
    /// The working repository changed.
    RepoSwitch,
    /// A calendar day rolled over.
    DayBoundary,
    /// The daemon shut down.
    Shutdown,
}

impl SessionTrigger {
    /// Canonical string form.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Manual => "manual",
            Self::IdleTimeout => "idle_timeout",
            Self::BranchSwitch => "branch_switch",
            Self::RepoSwitch => "repo_switch",
            Self::DayBoundary => "day_boundary",
            Self::Shutdown => "shutdown",
        }
    }
}

impl fmt::Display for SessionTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SessionTrigger {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "manual" => Ok(Self::Manual),
            "idle_timeout" => Ok(Self::IdleTimeout),
            "branch_switch" => Ok(Self::BranchSwitch),
            "repo_switch" => Ok(Self::RepoSwitch),
            "day_boundary" => Ok(Self::DayBoundary),
            "shutdown" => Ok(Self::Shutdown),
            other => Err(format!("unknown session trigger: {other}")),
        }
    }
}

/// A work session and the IDs of the events attached to it.
///
/// `event_ids` is always fully loaded and ordered by attach time, which is
/// not necessarily the events' own timestamp order.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    /// Session ID.
    pub id: String,
    /// When work started.
    pub start_time: DateTime<Utc>,
    /// When work ended. Set iff status is not active.
    pub end_time: Option<DateTime<Utc>>,
    /// Lifecycle state.
    pub status: SessionStatus,
    /// Why the session started.
    pub start_trigger: SessionTrigger,
    /// Why the session ended.
    pub end_trigger: Option<SessionTrigger>,
    /// Human description.
    pub description: Option<String>,
    /// Main repository worked on.
    pub primary_repo: Option<String>,
    /// Main branch worked on.
    pub branch: Option<String>,
    /// Arbitrary JSON object.
    pub metadata: Value,
    /// Attached event IDs, in attach order. Read-only; see `attach_events`.
    #[serde(default)]
    pub event_ids: Vec<String>,
}

impl Session {
    /// New active session starting now.
    pub fn start(trigger: SessionTrigger) -> Self {
        Self {
            id: Uuid::now_v7().to_string(),
            start_time: Utc::now(),
            end_time: None,
            status: SessionStatus::Active,
            start_trigger: trigger,
            end_trigger: None,
            description: None,
            primary_repo: None,
            branch: None,
            metadata: Value::Object(serde_json::Map::new()),
            event_ids: Vec::new(),
        }
    }

    /// Move to `completed`, stamping the end time.
    pub fn complete(&mut self, at: DateTime<Utc>, trigger: SessionTrigger) {
        self.status = SessionStatus::Completed;
        self.end_time = Some(at);
        self.end_trigger = Some(trigger);
    }

    /// Move to `archived`.
    pub fn archive(&mut self) {
        self.status = SessionStatus::Archived;
    }

    /// Check field-level invariants.
    pub fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(StoreError::Validation("session id is required".into()));
        }
        if !self.metadata.is_object() {
            return Err(StoreError::Validation(
                "session metadata must be a JSON object".into(),
            ));
        }
        match (self.status, self.end_time) {
            (SessionStatus::Active, Some(_)) => Err(StoreError::Validation(
                "active session must not have an end time".into(),
            )),
            (SessionStatus::Completed | SessionStatus::Archived, None) => Err(
                StoreError::Validation(format!("{} session requires an end time", self.status)),
            ),
            (_, Some(end)) if end < self.start_time => Err(StoreError::Validation(
                "session end time precedes start time".into(),
            )),
            _ => Ok(()),
        }
    }
}

/// Filter for listing sessions.
#[derive(Clone, Debug, Default)]
pub struct SessionFilter {
    /// Only sessions in this state.
    pub status: Option<SessionStatus>,
    /// Only sessions whose primary repo equals this.
    pub primary_repo: Option<String>,
    /// Only sessions starting at or after this instant.
    pub started_after: Option<DateTime<Utc>>,
    /// Maximum results (newest first).
    pub limit: Option<usize>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use chrono::Duration;

    #[test]
    fn status_transitions() {
        use SessionStatus::{Active, Archived, Completed};
        assert!(Active.can_transition_to(Completed));
        assert!(Completed.can_transition_to(Archived));
        assert!(Active.can_transition_to(Active));
        assert!(!Active.can_transition_to(Archived));
        assert!(!Completed.can_transition_to(Active));
        assert!(!Archived.can_transition_to(Completed));
        assert!(!Archived.can_transition_to(Active));
    }

    #[test]
    fn status_parse() {
        assert_eq!("archived".parse::<SessionStatus>().unwrap(), SessionStatus::Archived);
        assert!("paused".parse::<SessionStatus>().is_err());
    }

    #[test]
    fn trigger_parse() {
        assert_eq!(
            "branch_switch".parse::<SessionTrigger>().unwrap(),
            SessionTrigger::BranchSwitch
        );
        assert_eq!(SessionTrigger::DayBoundary.to_string(), "day_boundary");
        assert!("whim".parse::<SessionTrigger>().is_err());
    }

    #[test]
    fn trigger_and_status_strings_match_serde() {
        use SessionTrigger::{BranchSwitch, DayBoundary, IdleTimeout, Manual, RepoSwitch, Shutdown};
        for t in [Manual, IdleTimeout, BranchSwitch, RepoSwitch, DayBoundary, Shutdown] {
            assert_eq!(t.as_str().parse::<SessionTrigger>().unwrap(), t);
            assert_eq!(serde_json::to_value(t).unwrap(), Value::String(t.as_str().into()));
        }
        for st in [SessionStatus::Active, SessionStatus::Completed, SessionStatus::Archived] {
            assert_eq!(st.as_str().parse::<SessionStatus>().unwrap(), st);
            assert_eq!(serde_json::to_value(st).unwrap(), Value::String(st.as_str().into()));
        }
    }

    #[test]
    fn new_session_is_valid_and_active() {
        let s = Session::start(SessionTrigger::Manual);
        assert_eq!(s.status, SessionStatus::Active);
        assert!(s.end_time.is_none());
        assert!(s.validate().is_ok());
    }

    #[test]
    fn complete_sets_end_time() {
        let mut s = Session::start(SessionTrigger::Manual);
        s.complete(s.start_time + Duration::minutes(30), SessionTrigger::IdleTimeout);
        assert_eq!(s.status, SessionStatus::Completed);
        assert!(s.end_time.is_some());
        assert!(s.validate().is_ok());
    }

    #[test]
    fn active_with_end_time_is_invalid() {
        let mut s = Session::start(SessionTrigger::Manual);
        s.end_time = Some(Utc::now());
        assert_matches!(s.validate(), Err(StoreError::Validation(_)));
    }

    #[test]
    fn completed_without_end_time_is_invalid() {
        let mut s = Session::start(SessionTrigger::Manual);
        s.status = SessionStatus::Completed;
        assert_matches!(s.validate(), Err(StoreError::Validation(msg)) if msg.contains("completed"));
    }

    #[test]
    fn end_before_start_is_invalid() {
        let mut s = Session::start(SessionTrigger::Manual);
        s.complete(s.start_time - Duration::hours(1), SessionTrigger::Manual);
        assert_matches!(s.validate(), Err(StoreError::Validation(_)));
    }

    #[test]
    fn non_object_metadata_is_invalid() {
        let mut s = Session::start(SessionTrigger::Manual);
        s.metadata = Value::String("x".into());
        assert_matches!(s.validate(), Err(StoreError::Validation(_)));
    }
}

//! The [`Event`] record and its closed [`Source`] / [`EventType`] enums.
//!
//! Both enums serialize to `snake_case` strings, which is also how they are
//! stored in the `events` table and indexed for full-text search.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::errors::{Result, StoreError};

/// Longest accepted event ID.
pub const MAX_EVENT_ID_LEN: usize = 256;

/// The system that captured an event.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Source {
    /// Git hooks (commit, push, checkout, ...).
    Git,
    /// Shell wrapper capturing commands.
    Shell,
    /// Claude Code conversation hooks.
    ClaudeCode,
    /// Editor plugins.
    Editor,
    /// tmux session/window switches.
    Tmux,
    /// `WakaTime` heartbeats.
    Wakatime,
    /// GitHub webhooks / polling.
    Github,
    /// Hand-entered notes.
    Manual,
}

/// Every [`Source`] variant.
pub const ALL_SOURCES: [Source; 8] = [
    Source::Git,
    Source::Shell,
    Source::ClaudeCode,
    Source::Editor,
    Source::Tmux,
    Source::Wakatime,
    Source::Github,
    Source::Manual,
];

impl Source {
    /// Canonical string form (e.g. `"claude_code"`).
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Git => "git",
            Self::Shell => "shell",
            Self::ClaudeCode => "claude_code",
            Self::Editor => "editor",
            Self::Tmux => "tmux",
            Self::Wakatime => "wakatime",
            Self::Github => "github",
            Self::Manual => "manual",
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Source {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "git" => Ok(Self::Git),
            "shell" => Ok(Self::Shell),
            "claude_code" => Ok(Self::ClaudeCode),
            "editor" => Ok(Self::Editor),
            "tmux" => Ok(Self::Tmux),
            "wakatime" => Ok(Self::Wakatime),
            "github" => Ok(Self::Github),
            "manual" => Ok(Self::Manual),
            other => Err(format!("unknown source: {other}")),
        }
    }
}

/// What kind of action an event records.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    // -- Git --
    /// A commit was created.
    Commit,
    /// Commits were pushed.
    Push,
    /// Commits were pulled.
    Pull,
    /// A merge completed.
    Merge,
    /// A rebase completed.
    Rebase,
    /// HEAD moved to another branch/commit.
    Checkout,
    /// Changes were stashed.
    Stash,
    /// A branch was created.
    BranchCreate,
    /// A branch was deleted.
    BranchDelete,

    // -- Shell / editor --
    /// A shell command ran.
    Command,
    /// A file was edited.
    FileEdit,

    // -- Assistant --
    /// An assistant conversation turn.
    Conversation,
    /// An assistant tool invocation.
    ToolUse,

    // -- Forge --
    /// A pull request was opened.
    PrCreated,
    /// A pull request was merged.
    PrMerged,
    /// An issue was opened.
    IssueCreated,

    // -- Misc --
    /// Focus moved to another window/project.
    ContextSwitch,
    /// Free-form note.
    Note,
    /// Periodic activity heartbeat.
    Heartbeat,
}

/// Every [`EventType`] variant.
pub const ALL_EVENT_TYPES: [EventType; 19] = [
    EventType::Commit,
    EventType::Push,
    EventType::Pull,
    EventType::Merge,
    EventType::Rebase,
    EventType::Checkout,
    EventType::Stash,
    EventType::BranchCreate,
    EventType::BranchDelete,
    EventType::Command,
    EventType::FileEdit,
    EventType::Conversation,
    EventType::ToolUse,
    EventType::PrCreated,
    EventType::PrMerged,
    EventType::IssueCreated,
    EventType::ContextSwitch,
    EventType::Note,
    EventType::Heartbeat,
];

impl EventType {
    /// Canonical string form (e.g. `"branch_create"`).
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Commit => "commit",
            Self::Push => "push",
            Self::Pull => "pull",
            Self::Merge => "merge",
            Self::Rebase => "rebase",
            Self::Checkout => "checkout",
            Self::Stash => "stash",
            Self::BranchCreate => "branch_create",
            Self::BranchDelete => "branch_delete",
            Self::Command => "command",
            Self::FileEdit => "file_edit",
            Self::Conversation => "conversation",
            Self::ToolUse => "tool_use",
            Self::PrCreated => "pr_created",
            Self::PrMerged => "pr_merged",
            Self::IssueCreated => "issue_created",
            Self::ContextSwitch => "context_switch",
            Self::Note => "note",
            Self::Heartbeat => "heartbeat",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "commit" => Ok(Self::Commit),
            "push" => Ok(Self::Push),
            "pull" => Ok(Self::Pull),
            "merge" => Ok(Self::Merge),
            "rebase" => Ok(Self::Rebase),
            "checkout" => Ok(Self::Checkout),
            "stash" => Ok(Self::Stash),
            "branch_create" => Ok(Self::BranchCreate),
            "branch_delete" => Ok(Self::BranchDelete),
            "command" => Ok(Self::Command),
            "file_edit" => Ok(Self::FileEdit),
            "conversation" => Ok(Self::Conversation),
            "tool_use" => Ok(Self::ToolUse),
            "pr_created" => Ok(Self::PrCreated),
            "pr_merged" => Ok(Self::PrMerged),
            "issue_created" => Ok(Self::IssueCreated),
            "context_switch" => Ok(Self::ContextSwitch),
            "note" => Ok(Self::Note),
            "heartbeat" => Ok(Self::Heartbeat),
            other => Err(format!("unknown event type: {other}")),
        }
    }
}

/// A captured developer action.
///
/// Events are immutable once stored. `timestamp` is the instant the event
/// claims to describe; `created_at` is when the store ingested it, so events
/// may be backdated.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    /// Globally unique ID.
    pub id: String,
    /// Claimed event instant.
    pub timestamp: DateTime<Utc>,
    /// Origin system.
    pub source: Source,
    /// Kind of action.
    #[serde(rename = "type")]
    pub event_type: EventType,
    /// Repository, if any. `Some("")` is distinct from `None`.
    #[serde(default)]
    pub repo: Option<String>,
    /// Branch, if any. `Some("")` is distinct from `None`.
    #[serde(default)]
    pub branch: Option<String>,
    /// Opaque JSON object.
    pub payload: Value,
    /// Ingestion instant. Assigned by the store; ignored on insert.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

impl Event {
    /// New event with a fresh UUIDv7 ID, stamped now.
    pub fn new(source: Source, event_type: EventType, payload: Value) -> Self {
        Self {
            id: Uuid::now_v7().to_string(),
            timestamp: Utc::now(),
            source,
            event_type,
            repo: None,
            branch: None,
            payload,
            created_at: None,
        }
    }

    /// Replace the ID.
    #[must_use]
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    /// Replace the timestamp.
    #[must_use]
    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Set the repository.
    #[must_use]
    pub fn with_repo(mut self, repo: impl Into<String>) -> Self {
        self.repo = Some(repo.into());
        self
    }

    /// Set the branch.
    #[must_use]
    pub fn with_branch(mut self, branch: impl Into<String>) -> Self {
        self.branch = Some(branch.into());
        self
    }

    /// Check required fields before a write.
    pub fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(StoreError::Validation("event id is required".into()));
        }
        if self.id.len() > MAX_EVENT_ID_LEN {
            return Err(StoreError::Validation(format!(
                "event id exceeds {MAX_EVENT_ID_LEN} bytes"
            )));
        }
        if !self.payload.is_object() {
            return Err(StoreError::Validation(
                "event payload must be a JSON object".into(),
            ));
        }
        Ok(())
    }
}

/// An event submission with unchecked source/type strings.
///
/// This is the shape ingestion receives from hooks and wrappers. Converting
/// it into an [`Event`] checks enum membership and fills in a generated ID
/// and the current time when those are absent.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventDraft {
    /// Caller-supplied ID.
    #[serde(default)]
    pub id: Option<String>,
    /// Claimed instant.
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    /// Source name.
    pub source: String,
    /// Event type name.
    #[serde(rename = "type")]
    pub event_type: String,
    /// Repository.
    #[serde(default)]
    pub repo: Option<String>,
    /// Branch.
    #[serde(default)]
    pub branch: Option<String>,
    /// Payload object.
    #[serde(default)]
    pub payload: Value,
}

impl TryFrom<EventDraft> for Event {
    type Error = StoreError;

    fn try_from(draft: EventDraft) -> Result<Self> {
        if draft.source.is_empty() {
            return Err(StoreError::Validation("event source is required".into()));
        }
        if draft.event_type.is_empty() {
            return Err(StoreError::Validation("event type is required".into()));
        }
        let source: Source = draft.source.parse().map_err(StoreError::Validation)?;
        let event_type: EventType = draft.event_type.parse().map_err(StoreError::Validation)?;
        let payload = if draft.payload.is_null() {
            Value::Object(serde_json::Map::new())
        } else {
            draft.payload
        };

        let event = Self {
            id: draft.id.unwrap_or_else(|| Uuid::now_v7().to_string()),
            timestamp: draft.timestamp.unwrap_or_else(Utc::now),
            source,
            event_type,
            repo: draft.repo,
            branch: draft.branch,
            payload,
            created_at: None,
        };
        event.validate()?;
        Ok(event)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

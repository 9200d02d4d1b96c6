use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::PathBuf;

use crate::message::Message;

/// Message field a repair may mutate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RepairField {
    ParentId,
    Role,
}

impl RepairField {
    pub fn as_str(&self) -> &'static str {
        match self {
            RepairField::ParentId => "parent_id",
            RepairField::Role => "role",
        }
    }
}

/// Intent to mutate a single field on a single message. Immutable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepairOperation {
    pub target_id: String,
    pub field: RepairField,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old_value: Option<String>,
    pub new_value: String,
    pub reason: String,
    /// Ranked similarity of the chosen candidate, when the repair came from ranking
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub similarity: Option<f64>,
}

impl RepairOperation {
    pub fn reparent(
        target_id: impl Into<String>,
        old_parent: Option<String>,
        new_parent: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            target_id: target_id.into(),
            field: RepairField::ParentId,
            old_value: old_parent,
            new_value: new_parent.into(),
            reason: reason.into(),
            similarity: None,
        }
    }
}

/// Event type stored in the event log
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    RepairParent,
    RepairRole,
    AddMessage,
    MarkInvalid,
    RevertEvent,
    ValidateSession,
    DedupToolResult,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::RepairParent => "repair_parent",
            EventKind::RepairRole => "repair_role",
            EventKind::AddMessage => "add_message",
            EventKind::MarkInvalid => "mark_invalid",
            EventKind::RevertEvent => "revert_event",
            EventKind::ValidateSession => "validate_session",
            EventKind::DedupToolResult => "dedup_tool_result",
        }
    }

    pub fn parse(s: &str) -> Option<EventKind> {
        match s {
            "repair_parent" => Some(EventKind::RepairParent),
            "repair_role" => Some(EventKind::RepairRole),
            "add_message" => Some(EventKind::AddMessage),
            "mark_invalid" => Some(EventKind::MarkInvalid),
            "revert_event" => Some(EventKind::RevertEvent),
            "validate_session" => Some(EventKind::ValidateSession),
            "dedup_tool_result" => Some(EventKind::DedupToolResult),
            _ => None,
        }
    }
}

/// Immutable record of one applied repair.
///
/// Once inserted, the only permitted mutation is the controlled revert-flag
/// transition performed by the revert path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepairEvent {
    pub event_id: String,
    pub session_id: String,
    /// None for session-wide events (e.g. validate_session)
    pub target_id: Option<String>,
    pub kind: EventKind,
    pub timestamp: DateTime<Utc>,
    pub operator: String,
    pub old_state: Value,
    pub new_state: Value,
    pub reason: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validation: Option<Value>,
    #[serde(default)]
    pub reverted: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reverted_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reverted_at: Option<DateTime<Utc>>,
}

/// Per-check outcome of repair validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub target_exists: bool,
    pub parent_exists: bool,
    pub not_self: bool,
    pub no_cycle: bool,
    pub timestamp_ok: bool,
    pub ids_unique: bool,
}

impl ValidationResult {
    pub fn passed(&self) -> bool {
        self.target_exists
            && self.parent_exists
            && self.not_self
            && self.no_cycle
            && self.timestamp_ok
            && self.ids_unique
    }

    /// Names of the checks that failed, in a fixed order.
    pub fn failed_checks(&self) -> Vec<&'static str> {
        let mut failed = Vec::new();
        if !self.target_exists {
            failed.push("target_exists");
        }
        if !self.parent_exists {
            failed.push("parent_exists");
        }
        if !self.not_self {
            failed.push("not_self");
        }
        if !self.no_cycle {
            failed.push("no_cycle");
        }
        if !self.timestamp_ok {
            failed.push("timestamp_ok");
        }
        if !self.ids_unique {
            failed.push("ids_unique");
        }
        failed
    }
}

/// Aggregate corruption figures stored with a snapshot.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SnapshotStats {
    pub message_count: usize,
    pub orphan_count: usize,
    pub corruption: f64,
}

/// Materialized view of a session after event replay.
///
/// Invalidated by any event insertion for the session; rebuilt lazily on the
/// next read.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub session_id: String,
    /// Count of applied non-reverted events at build time; monotonically increasing
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub messages: Vec<Message>,
    pub stats: SnapshotStats,
    pub last_event_id: Option<String>,
}

/// Diagnostic raised while materializing a session from events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplayDiagnosticKind {
    DuplicateId,
    Cycle,
    TimestampInversion,
    MissingTarget,
    IdCollision,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplayDiagnostic {
    pub kind: ReplayDiagnosticKind,
    pub detail: String,
}

/// Session state as seen through a persistence provider's canonical path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RestoredState {
    pub messages: Vec<Message>,
    pub version: i64,
    pub last_event_id: Option<String>,
    /// Set when post-replay invariants do not hold; the state is still returned
    pub degraded: bool,
    pub diagnostics: Vec<ReplayDiagnostic>,
    pub from_cache: bool,
}

impl RestoredState {
    pub fn baseline(messages: Vec<Message>) -> Self {
        Self {
            messages,
            version: 0,
            last_event_id: None,
            degraded: false,
            diagnostics: Vec::new(),
            from_cache: false,
        }
    }
}

/// One applied batch recorded by the archive-file provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UndoEntry {
    pub operations: Vec<RepairOperation>,
    pub timestamp: DateTime<Utc>,
    /// Snapshot taken before the batch was applied
    pub snapshot_path: PathBuf,
    /// Set for non-field changes (dedup, rollback) that carry no operations
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Provider-agnostic view of one history record, most useful for display.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operator: Option<String>,
    pub description: String,
    pub operations: Vec<RepairOperation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snapshot_path: Option<PathBuf>,
    #[serde(default)]
    pub reverted: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_kind_round_trip() {
        for kind in [
            EventKind::RepairParent,
            EventKind::RepairRole,
            EventKind::AddMessage,
            EventKind::MarkInvalid,
            EventKind::RevertEvent,
            EventKind::ValidateSession,
            EventKind::DedupToolResult,
        ] {
            assert_eq!(EventKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(EventKind::parse("unknown_kind"), None);
    }

    #[test]
    fn test_validation_result_failed_checks() {
        let mut result = ValidationResult {
            target_exists: true,
            parent_exists: true,
            not_self: true,
            no_cycle: true,
            timestamp_ok: true,
            ids_unique: true,
        };
        assert!(result.passed());
        assert!(result.failed_checks().is_empty());

        result.no_cycle = false;
        result.timestamp_ok = false;
        assert!(!result.passed());
        assert_eq!(result.failed_checks(), vec!["no_cycle", "timestamp_ok"]);
    }
}

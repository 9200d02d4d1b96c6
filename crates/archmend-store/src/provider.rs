use chrono::{DateTime, Utc};
use std::path::PathBuf;

use archmend_types::{Control, HistoryEntry, RepairOperation, RestoredState, ValidationResult};

use crate::error::Result;

/// One session as a persistence target: its id and the archive that holds
/// the baseline record stream.
#[derive(Debug, Clone)]
pub struct SessionRef {
    pub session_id: String,
    pub archive_path: PathBuf,
}

impl SessionRef {
    pub fn new(session_id: impl Into<String>, archive_path: impl Into<PathBuf>) -> Self {
        Self {
            session_id: session_id.into(),
            archive_path: archive_path.into(),
        }
    }
}

/// Where a backup's pre-change state lives
#[derive(Debug, Clone)]
pub enum BackupLocation {
    /// Physical snapshot copy of the archive
    SnapshotFile(PathBuf),
    /// Virtual marker: the event log position at backup time
    EventMarker { last_event_id: Option<String> },
}

/// Handle usable to restore pre-change state
#[derive(Debug, Clone)]
pub struct BackupHandle {
    pub session_id: String,
    pub created_at: DateTime<Utc>,
    pub location: BackupLocation,
}

/// Repair commit/undo contract shared by both backends.
///
/// Callers hold the provider by capability and never branch on backend
/// identity. `apply_repair` and `apply_dedup` are all-or-nothing with respect
/// to observable state on every exit path, including interrupts raised
/// through `control`.
pub trait RepairProvider: Send + Sync {
    fn name(&self) -> &'static str;

    fn create_backup(&self, session: &SessionRef, control: &Control) -> Result<BackupHandle>;

    /// Atomically record one field repair. Returns false when the target
    /// message does not exist; state is unchanged in that case.
    fn apply_repair(
        &self,
        session: &SessionRef,
        op: &RepairOperation,
        operator: &str,
        reason: &str,
        validation: Option<&ValidationResult>,
        control: &Control,
    ) -> Result<bool>;

    /// Atomically record removal of duplicated tool_result blocks on one
    /// message, preserving first occurrences.
    fn apply_dedup(
        &self,
        session: &SessionRef,
        target_id: &str,
        block_ids: &[String],
        operator: &str,
        reason: &str,
        control: &Control,
    ) -> Result<bool>;

    fn rollback_to_backup(
        &self,
        session: &SessionRef,
        backup: &BackupHandle,
        control: &Control,
    ) -> Result<bool>;

    /// Undo the most recent applied change. Returns false when there is
    /// nothing to undo.
    fn undo_last(&self, session: &SessionRef, operator: &str, control: &Control) -> Result<bool>;

    /// History of applied changes, most recent first.
    fn undo_history(&self, session_id: &str) -> Result<Vec<HistoryEntry>>;

    /// Canonical current state of the session. May be served from a
    /// materialization cache.
    fn current_state(&self, session: &SessionRef, control: &Control) -> Result<RestoredState>;
}

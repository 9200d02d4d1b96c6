//! Archive-file backend: repairs target the archive directly while
//! preserving undo capability through timestamped snapshots and a per-session
//! undo state file.

use chrono::Utc;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use archmend_types::{
    Control, HistoryEntry, RepairOperation, RestoredState, UndoEntry, ValidationResult,
};

use crate::error::{Error, Result};
use crate::fs::{LockGuard, atomic_write, snapshot_file_name, temp_sibling};
use crate::provider::{BackupHandle, BackupLocation, RepairProvider, SessionRef};
use crate::undo::UndoLog;

pub struct ArchiveFileProvider {
    backup_root: PathBuf,
    state_root: PathBuf,
}

impl ArchiveFileProvider {
    pub fn new(backup_root: impl Into<PathBuf>, state_root: impl Into<PathBuf>) -> Self {
        Self {
            backup_root: backup_root.into(),
            state_root: state_root.into(),
        }
    }

    fn undo_log(&self, session_id: &str) -> UndoLog {
        UndoLog::for_session(&self.state_root, session_id)
    }

    /// Copy the archive to `<backup_root>/<session_id>/<timestamp>.snap`.
    fn snapshot(&self, session: &SessionRef) -> Result<PathBuf> {
        let dir = self.backup_root.join(&session.session_id);
        std::fs::create_dir_all(&dir)?;
        let path = dir.join(snapshot_file_name(Utc::now()));
        std::fs::copy(&session.archive_path, &path)?;
        Ok(path)
    }

    /// Rewrite the archive with `mutate` applied to the matching record.
    ///
    /// Step order is load → temp write + fsync → snapshot → rename → undo
    /// entry. A failure before the rename leaves the old archive; a failure
    /// after it leaves the new archive with the snapshot already on disk.
    fn rewrite<F>(
        &self,
        session: &SessionRef,
        entry_ops: Vec<RepairOperation>,
        description: Option<String>,
        control: &Control,
        mutate: F,
    ) -> Result<bool>
    where
        F: Fn(&mut serde_json::Value) -> bool,
    {
        control.checkpoint()?;
        let _lock = LockGuard::acquire(&session.archive_path)?;

        let mut lines = archmend_loader::read_raw_lines(&session.archive_path)?;
        let mut changed = false;
        for line in &mut lines {
            control.checkpoint()?;
            let record_changed = match &mut line.record {
                Some(record) => mutate(record),
                None => false,
            };
            if record_changed {
                line.mark_dirty();
                changed = true;
            }
        }
        if !changed {
            return Ok(false);
        }

        let image = archmend_loader::write_raw_lines(&lines)?;
        let temp = temp_sibling(&session.archive_path);
        {
            use std::io::Write;
            let mut file = std::fs::File::create(&temp)?;
            file.write_all(image.as_bytes())?;
            file.sync_all()?;
        }

        control.checkpoint().inspect_err(|_| {
            let _ = std::fs::remove_file(&temp);
        })?;

        let snapshot_path = self.snapshot(session).inspect_err(|_| {
            let _ = std::fs::remove_file(&temp);
        })?;

        std::fs::rename(&temp, &session.archive_path).inspect_err(|_| {
            let _ = std::fs::remove_file(&temp);
        })?;

        self.undo_log(&session.session_id).append(UndoEntry {
            operations: entry_ops,
            timestamp: Utc::now(),
            snapshot_path,
            description,
        })?;

        Ok(true)
    }

    /// Restore the archive from a snapshot, recording a reciprocal undo
    /// entry so history is preserved.
    fn restore_snapshot(&self, session: &SessionRef, snapshot: &Path) -> Result<()> {
        if !snapshot.exists() {
            return Err(Error::NotFound(format!(
                "snapshot missing: {}",
                snapshot.display()
            )));
        }
        let _lock = LockGuard::acquire(&session.archive_path)?;

        // Snapshot the pre-rollback state first; the reciprocal entry points
        // at it so the rollback itself can be undone
        let pre_rollback = self.snapshot(session)?;
        let contents = std::fs::read(snapshot)?;
        atomic_write(&session.archive_path, &contents)?;

        self.undo_log(&session.session_id).append(UndoEntry {
            operations: Vec::new(),
            timestamp: Utc::now(),
            snapshot_path: pre_rollback,
            description: Some(format!("rollback to {}", snapshot.display())),
        })?;
        Ok(())
    }
}

impl RepairProvider for ArchiveFileProvider {
    fn name(&self) -> &'static str {
        "archive_file"
    }

    fn create_backup(&self, session: &SessionRef, control: &Control) -> Result<BackupHandle> {
        control.checkpoint()?;
        let path = self.snapshot(session)?;
        Ok(BackupHandle {
            session_id: session.session_id.clone(),
            created_at: Utc::now(),
            location: BackupLocation::SnapshotFile(path),
        })
    }

    fn apply_repair(
        &self,
        session: &SessionRef,
        op: &RepairOperation,
        _operator: &str,
        _reason: &str,
        _validation: Option<&ValidationResult>,
        control: &Control,
    ) -> Result<bool> {
        let target_id = op.target_id.clone();
        let field = op.field;
        let new_value = op.new_value.clone();
        self.rewrite(
            session,
            vec![op.clone()],
            None,
            control,
            move |record| {
                if archmend_loader::record_id(record) != Some(target_id.as_str()) {
                    return false;
                }
                archmend_loader::set_record_field(record, field, &new_value)
            },
        )
    }

    fn apply_dedup(
        &self,
        session: &SessionRef,
        target_id: &str,
        block_ids: &[String],
        _operator: &str,
        _reason: &str,
        control: &Control,
    ) -> Result<bool> {
        let target_id = target_id.to_string();
        let ids = block_ids.to_vec();
        self.rewrite(
            session,
            Vec::new(),
            Some(format!(
                "dedup tool_result blocks [{}] on {}",
                ids.join(", "),
                target_id
            )),
            control,
            move |record| {
                if archmend_loader::record_id(record) != Some(target_id.as_str()) {
                    return false;
                }
                let before = serde_json::to_string(record).unwrap_or_default();
                archmend_loader::dedup_blocks_in_value(record, &ids);
                serde_json::to_string(record).unwrap_or_default() != before
            },
        )
    }

    fn rollback_to_backup(
        &self,
        session: &SessionRef,
        backup: &BackupHandle,
        control: &Control,
    ) -> Result<bool> {
        control.checkpoint()?;
        match &backup.location {
            BackupLocation::SnapshotFile(path) => {
                self.restore_snapshot(session, path)?;
                Ok(true)
            }
            BackupLocation::EventMarker { .. } => Err(Error::Storage(
                "archive_file provider cannot restore an event marker".to_string(),
            )),
        }
    }

    fn undo_last(&self, session: &SessionRef, _operator: &str, control: &Control) -> Result<bool> {
        control.checkpoint()?;
        let entries = self.undo_log(&session.session_id).read()?;
        let Some(last) = entries.last() else {
            return Ok(false);
        };
        self.restore_snapshot(session, &last.snapshot_path)?;
        Ok(true)
    }

    fn undo_history(&self, session_id: &str) -> Result<Vec<HistoryEntry>> {
        let entries = self.undo_log(session_id).read()?;
        Ok(entries
            .into_iter()
            .rev()
            .map(|entry| {
                let description = entry.description.clone().unwrap_or_else(|| {
                    entry
                        .operations
                        .iter()
                        .map(|op| {
                            format!("{} {} -> {}", op.field.as_str(), op.target_id, op.new_value)
                        })
                        .collect::<Vec<_>>()
                        .join("; ")
                });
                HistoryEntry {
                    timestamp: entry.timestamp,
                    operator: None,
                    description,
                    operations: entry.operations,
                    event_id: None,
                    snapshot_path: Some(entry.snapshot_path),
                    reverted: false,
                }
            })
            .collect())
    }

    fn current_state(&self, session: &SessionRef, control: &Control) -> Result<RestoredState> {
        control.checkpoint()?;
        let archive = archmend_loader::load_archive_with_session(
            &session.archive_path,
            &session.session_id,
        )?;
        let entries = self.undo_log(&session.session_id).read()?;
        let mut state = RestoredState::baseline(archive.messages);
        state.version = entries.len() as i64;
        Ok(state)
    }
}

/// Sessions that have at least one snapshot under the backup root.
/// Sorted for deterministic listings.
pub fn discover_backed_up_sessions(backup_root: &Path) -> Result<Vec<String>> {
    if !backup_root.exists() {
        return Ok(Vec::new());
    }
    let mut sessions = Vec::new();
    for entry in WalkDir::new(backup_root)
        .min_depth(2)
        .max_depth(2)
        .into_iter()
        .filter_map(|e| e.ok())
    {
        let path = entry.path();
        if path.is_file()
            && path.extension().is_some_and(|ext| ext == "snap")
            && let Some(session) = path.parent().and_then(|p| p.file_name())
        {
            let session = session.to_string_lossy().to_string();
            if !sessions.contains(&session) {
                sessions.push(session);
            }
        }
    }
    sessions.sort();
    Ok(sessions)
}

use std::path::{Path, PathBuf};

use archmend_types::UndoEntry;

use crate::error::Result;
use crate::fs::atomic_write;

/// Per-session undo state file: `<state_root>/<session_id>.undo.json`.
/// Rewritten atomically on every append.
#[derive(Debug, Clone)]
pub struct UndoLog {
    path: PathBuf,
}

impl UndoLog {
    pub fn for_session(state_root: &Path, session_id: &str) -> Self {
        Self {
            path: state_root.join(format!("{}.undo.json", session_id)),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Entries in append order. A missing state file is an empty history.
    pub fn read(&self) -> Result<Vec<UndoEntry>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let contents = std::fs::read_to_string(&self.path)?;
        Ok(serde_json::from_str(&contents)?)
    }

    pub fn append(&self, entry: UndoEntry) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut entries = self.read()?;
        entries.push(entry);
        let contents = serde_json::to_string_pretty(&entries)?;
        atomic_write(&self.path, contents.as_bytes())
    }
}

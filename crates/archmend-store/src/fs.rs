//! Filesystem primitives for the archive-file provider.
//!
//! All writes follow the temp-sibling + fsync + atomic-rename pattern so a
//! crash between steps leaves either the old or the new file, never a
//! partial one.

use chrono::{DateTime, SecondsFormat, Utc};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Write `contents` to `path` atomically via a fsynced temp sibling.
pub(crate) fn atomic_write(path: &Path, contents: &[u8]) -> Result<()> {
    let temp = temp_sibling(path);
    {
        let mut file = File::create(&temp)?;
        file.write_all(contents)?;
        file.sync_all()?;
    }
    if let Err(err) = std::fs::rename(&temp, path) {
        let _ = std::fs::remove_file(&temp);
        return Err(err.into());
    }
    Ok(())
}

pub(crate) fn temp_sibling(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "archive".to_string());
    path.with_file_name(format!(".{}.tmp", name))
}

/// Snapshot file name: ISO-8601 timestamp with colons replaced by
/// underscores, `.snap` extension.
pub(crate) fn snapshot_file_name(at: DateTime<Utc>) -> String {
    let stamp = at
        .to_rfc3339_opts(SecondsFormat::Micros, true)
        .replace(':', "_");
    format!("{}.snap", stamp)
}

/// Advisory lock file sibling to the archive, held for the duration of a
/// repair. Dropped on scope exit.
pub(crate) struct LockGuard {
    path: PathBuf,
}

impl LockGuard {
    pub(crate) fn acquire(archive: &Path) -> Result<Self> {
        let name = archive
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "archive".to_string());
        let path = archive.with_file_name(format!(".{}.lock", name));
        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(_) => Ok(Self { path }),
            Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => Err(
                Error::LockContention(format!("lock file exists: {}", path.display())),
            ),
            Err(err) => Err(err.into()),
        }
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::TempDir;

    #[test]
    fn test_atomic_write_replaces_contents() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("data.jsonl");
        std::fs::write(&path, "old").unwrap();

        atomic_write(&path, b"new contents").unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "new contents");
        assert!(!temp_sibling(&path).exists());
    }

    #[test]
    fn test_snapshot_file_name_has_no_colons() {
        let at = Utc.with_ymd_and_hms(2025, 3, 1, 12, 30, 45).unwrap();
        let name = snapshot_file_name(at);
        assert!(!name.contains(':'));
        assert!(name.ends_with(".snap"));
        assert!(name.starts_with("2025-03-01T12_30_45"));
    }

    #[test]
    fn test_lock_guard_exclusive_and_released() {
        let dir = TempDir::new().unwrap();
        let archive = dir.path().join("session.jsonl");
        std::fs::write(&archive, "").unwrap();

        let guard = LockGuard::acquire(&archive).unwrap();
        match LockGuard::acquire(&archive) {
            Err(Error::LockContention(_)) => {}
            other => panic!("expected contention, got {:?}", other.map(|_| ())),
        }
        drop(guard);
        let _second = LockGuard::acquire(&archive).unwrap();
    }
}

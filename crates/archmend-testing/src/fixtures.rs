//! Archive fixture builders for integration tests.
//!
//! Composes JSONL session archives line by line with controllable
//! identifiers, parents, timestamps, roles, and content blocks, including
//! the corruption shapes the toolkit repairs (orphans, duplicated
//! tool_result blocks, cycles, unparseable lines).

use anyhow::Result;
use serde_json::{Value, json};
use std::path::{Path, PathBuf};

pub fn text_block(text: &str) -> Value {
    json!({"type": "text", "text": text})
}

pub fn tool_use_block(id: &str, name: &str) -> Value {
    json!({"type": "tool_use", "id": id, "name": name, "input": {}})
}

pub fn tool_result_block(id: &str) -> Value {
    json!({"type": "tool_result", "tool_use_id": id, "content": "output"})
}

/// Fluent builder for one session archive
#[derive(Debug, Clone)]
pub struct ArchiveBuilder {
    session_id: String,
    lines: Vec<String>,
}

impl ArchiveBuilder {
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            lines: Vec::new(),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    fn push_record(&mut self, record: Value) {
        self.lines
            .push(serde_json::to_string(&record).expect("fixture records serialize"));
    }

    /// Append a conversation record with scalar text content.
    pub fn message(
        mut self,
        record_type: &str,
        id: &str,
        parent: Option<&str>,
        timestamp: &str,
        text: &str,
    ) -> Self {
        self.push_record(json!({
            "uuid": id,
            "parentUuid": parent,
            "sessionId": self.session_id,
            "type": record_type,
            "message": {"role": record_type, "content": text},
            "timestamp": timestamp,
            "isSidechain": false,
        }));
        self
    }

    pub fn user(self, id: &str, parent: Option<&str>, timestamp: &str, text: &str) -> Self {
        self.message("user", id, parent, timestamp, text)
    }

    pub fn assistant(self, id: &str, parent: Option<&str>, timestamp: &str, text: &str) -> Self {
        self.message("assistant", id, parent, timestamp, text)
    }

    pub fn system(self, id: &str, parent: Option<&str>, timestamp: &str, text: &str) -> Self {
        self.message("system", id, parent, timestamp, text)
    }

    /// Append a sidechain record.
    pub fn sidechain(
        mut self,
        record_type: &str,
        id: &str,
        parent: Option<&str>,
        timestamp: &str,
        text: &str,
    ) -> Self {
        self.push_record(json!({
            "uuid": id,
            "parentUuid": parent,
            "sessionId": self.session_id,
            "type": record_type,
            "message": {"role": record_type, "content": text},
            "timestamp": timestamp,
            "isSidechain": true,
        }));
        self
    }

    /// Append a record whose content is a block list (see the block helpers).
    pub fn with_blocks(
        mut self,
        record_type: &str,
        id: &str,
        parent: Option<&str>,
        timestamp: &str,
        blocks: Vec<Value>,
    ) -> Self {
        self.push_record(json!({
            "uuid": id,
            "parentUuid": parent,
            "sessionId": self.session_id,
            "type": record_type,
            "message": {"role": record_type, "content": blocks},
            "timestamp": timestamp,
            "isSidechain": false,
        }));
        self
    }

    /// Append a raw line verbatim, for malformed-input cases.
    pub fn raw_line(mut self, line: &str) -> Self {
        self.lines.push(line.to_string());
        self
    }

    pub fn build(&self) -> String {
        let mut out = self.lines.join("\n");
        out.push('\n');
        out
    }

    pub fn write_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, self.build())?;
        Ok(())
    }

    /// Write the archive as `<session_id>.jsonl` under `dir`.
    pub fn write_into(&self, dir: &Path) -> Result<PathBuf> {
        let path = dir.join(format!("{}.jsonl", self.session_id));
        self.write_to(&path)?;
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_builder_produces_one_line_per_record() {
        let archive = ArchiveBuilder::new("fixture-1")
            .user("m1", None, "2025-01-01T10:00:00Z", "hello")
            .assistant("m2", Some("m1"), "2025-01-01T10:00:05Z", "hi")
            .raw_line("garbage");
        let built = archive.build();
        assert_eq!(built.lines().count(), 3);
        assert!(built.ends_with('\n'));
    }

    #[test]
    fn test_write_into_uses_session_id() {
        let dir = TempDir::new().unwrap();
        let path = ArchiveBuilder::new("fixture-2")
            .user("m1", None, "2025-01-01T10:00:00Z", "hello")
            .write_into(dir.path())
            .unwrap();
        assert!(path.ends_with("fixture-2.jsonl"));
        assert!(path.exists());
    }
}

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::message::{CorruptionScore, Message};

/// Thread classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThreadKind {
    Main,
    Side,
    Orphan,
}

/// Stable thread identifier derived from the thread root's message id.
pub fn thread_id_for_root(root_id: &str) -> String {
    let digest = Sha256::digest(root_id.as_bytes());
    let hex: String = digest.iter().map(|b| format!("{:02x}", b)).collect();
    hex[..16].to_string()
}

/// A connected sequence of messages identified by the analyzer.
///
/// Messages are listed in ancestry order; the first entry is the thread root.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Thread {
    pub id: String,
    pub kind: ThreadKind,
    pub message_ids: Vec<String>,
    /// Reserved for external collaborators; never set by the core
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topic: Option<String>,
    pub corruption: CorruptionScore,
    /// Thread id of the main thread this side thread branches from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_thread_id: Option<String>,
}

impl Thread {
    pub fn root_id(&self) -> Option<&str> {
        self.message_ids.first().map(|s| s.as_str())
    }

    pub fn len(&self) -> usize {
        self.message_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.message_ids.is_empty()
    }
}

/// All messages of one archive plus the analyzer's thread assignment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub session_id: String,
    pub messages: Vec<Message>,
    pub threads: Vec<Thread>,
    pub corruption: CorruptionScore,
    /// Deterministic fingerprint of the parsed message stream, for change detection
    pub content_hash: String,
}

impl Session {
    /// Fingerprint of a message stream: stable across loads of identical content.
    pub fn content_hash_of(messages: &[Message]) -> String {
        let mut hasher = Sha256::new();
        for msg in messages {
            hasher.update(msg.id.as_bytes());
            hasher.update(b"\x1f");
            hasher.update(msg.parent().unwrap_or("").as_bytes());
            hasher.update(b"\x1f");
            hasher.update(msg.role.as_str().as_bytes());
            hasher.update(b"\x1f");
            hasher.update(msg.timestamp.to_rfc3339().as_bytes());
            hasher.update(b"\x1f");
            hasher.update(msg.content.text().as_bytes());
            hasher.update(b"\x1e");
        }
        hasher
            .finalize()
            .iter()
            .map(|b| format!("{:02x}", b))
            .collect()
    }

    pub fn message(&self, id: &str) -> Option<&Message> {
        self.messages.iter().find(|m| m.id == id)
    }

    pub fn main_thread(&self) -> Option<&Thread> {
        self.threads.iter().find(|t| t.kind == ThreadKind::Main)
    }

    pub fn orphan_count(&self) -> usize {
        self.messages.iter().filter(|m| m.is_orphan).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{Content, Role};
    use chrono::{TimeZone, Utc};

    #[test]
    fn test_thread_id_is_stable() {
        let a = thread_id_for_root("uuid-1234");
        let b = thread_id_for_root("uuid-1234");
        assert_eq!(a, b);
        assert_eq!(a.len(), 16);
        assert_ne!(a, thread_id_for_root("uuid-1235"));
    }

    #[test]
    fn test_content_hash_tracks_changes() {
        let ts = Utc.timestamp_opt(100, 0).unwrap();
        let mut msg = Message::new(
            "m1",
            None,
            Role::User,
            Content::PlainText("hello".to_string()),
            ts,
            "s1",
        )
        .unwrap();

        let before = Session::content_hash_of(std::slice::from_ref(&msg));
        msg.parent_id = Some("m0".to_string());
        let after = Session::content_hash_of(std::slice::from_ref(&msg));
        assert_ne!(before, after);
    }
}

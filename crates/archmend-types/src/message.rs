use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};

/// Role of the record actor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Role {
    User,
    Assistant,
    System,
    Summary,
    FileHistory,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
            Role::Summary => "summary",
            Role::FileHistory => "file-history",
        }
    }

    /// Parse a wire role/type name. Accepts the host's record-type spellings.
    pub fn parse(s: &str) -> Option<Role> {
        match s {
            "user" => Some(Role::User),
            "assistant" => Some(Role::Assistant),
            "system" => Some(Role::System),
            "summary" => Some(Role::Summary),
            "file-history" | "file_history" | "file-history-snapshot" => Some(Role::FileHistory),
            _ => None,
        }
    }
}

/// One typed block inside a content list
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
#[serde(rename_all = "snake_case")]
pub enum Block {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
    },
    ToolResult {
        #[serde(rename = "tool_use_id")]
        id: String,
    },
}

/// Message content: a scalar string on the wire, or an ordered block list
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Content {
    PlainText(String),
    Blocks(Vec<Block>),
}

impl Content {
    /// Concatenated textual portions of the content. Empty string is valid.
    pub fn text(&self) -> String {
        match self {
            Content::PlainText(s) => s.clone(),
            Content::Blocks(blocks) => blocks
                .iter()
                .filter_map(|b| match b {
                    Block::Text { text } => Some(text.as_str()),
                    _ => None,
                })
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }

    /// Identifiers of tool_result blocks, in order of appearance.
    pub fn tool_result_ids(&self) -> Vec<&str> {
        match self {
            Content::PlainText(_) => Vec::new(),
            Content::Blocks(blocks) => blocks
                .iter()
                .filter_map(|b| match b {
                    Block::ToolResult { id } => Some(id.as_str()),
                    _ => None,
                })
                .collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Content::PlainText(s) => s.is_empty(),
            Content::Blocks(blocks) => blocks.is_empty(),
        }
    }
}

impl Default for Content {
    fn default() -> Self {
        Content::PlainText(String::new())
    }
}

/// Corruption score in [0.0, 1.0]. Construction clamps out-of-range values.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorruptionScore(f64);

impl CorruptionScore {
    pub fn new(value: f64) -> Self {
        Self(value.clamp(0.0, 1.0))
    }

    pub fn get(&self) -> f64 {
        self.0
    }
}

/// One record of a session archive.
///
/// Created by the loader, mutated only through repair events, never destroyed.
/// `raw` carries the original wire record so rewrites preserve unknown fields
/// verbatim.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub parent_id: Option<String>,
    pub role: Role,
    pub content: Content,
    pub timestamp: DateTime<Utc>,
    pub session_id: String,
    #[serde(default)]
    pub is_sidechain: bool,

    /// Original wire record (unknown fields preserved for write-back)
    #[serde(default)]
    pub raw: Value,

    // Derived fields, populated by the analyzer
    /// Reserved for external collaborators; never set by the core
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topic: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<String>,
    #[serde(default)]
    pub is_orphan: bool,
    #[serde(default)]
    pub corruption: CorruptionScore,
}

impl Message {
    pub fn new(
        id: impl Into<String>,
        parent_id: Option<String>,
        role: Role,
        content: Content,
        timestamp: DateTime<Utc>,
        session_id: impl Into<String>,
    ) -> Result<Self> {
        let id = id.into();
        if id.trim().is_empty() {
            return Err(Error::InvalidMessage(
                "message identifier must be non-empty".to_string(),
            ));
        }
        Ok(Self {
            id,
            parent_id: parent_id.filter(|p| !p.is_empty()),
            role,
            content,
            timestamp,
            session_id: session_id.into(),
            is_sidechain: false,
            raw: Value::Null,
            topic: None,
            thread_id: None,
            is_orphan: false,
            corruption: CorruptionScore::default(),
        })
    }

    /// Parent identifier if present and non-empty.
    pub fn parent(&self) -> Option<&str> {
        self.parent_id.as_deref().filter(|p| !p.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    #[test]
    fn test_message_rejects_empty_id() {
        let result = Message::new(
            "",
            None,
            Role::User,
            Content::PlainText("hi".to_string()),
            ts(0),
            "s1",
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_empty_parent_treated_as_root() {
        let msg = Message::new(
            "m1",
            Some(String::new()),
            Role::User,
            Content::default(),
            ts(0),
            "s1",
        )
        .unwrap();
        assert_eq!(msg.parent(), None);
    }

    #[test]
    fn test_corruption_score_clamps() {
        assert_eq!(CorruptionScore::new(1.7).get(), 1.0);
        assert_eq!(CorruptionScore::new(-0.3).get(), 0.0);
        assert_eq!(CorruptionScore::new(0.45).get(), 0.45);
    }

    #[test]
    fn test_content_text_concatenation() {
        let content = Content::Blocks(vec![
            Block::Text {
                text: "hi".to_string(),
            },
            Block::ToolResult {
                id: "TR1".to_string(),
            },
            Block::Text {
                text: "ok".to_string(),
            },
        ]);
        assert_eq!(content.text(), "hi\nok");
        assert_eq!(content.tool_result_ids(), vec!["TR1"]);
    }

    #[test]
    fn test_role_parse_wire_names() {
        assert_eq!(Role::parse("user"), Some(Role::User));
        assert_eq!(Role::parse("file-history-snapshot"), Some(Role::FileHistory));
        assert_eq!(Role::parse("tool"), None);
    }
}

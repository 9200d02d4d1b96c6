//! Field extraction over raw wire records.
//!
//! Archive records are host-produced JSON objects whose field names vary
//! across host versions. Extraction works on `serde_json::Value` so unknown
//! fields survive untouched for write-back.

use archmend_types::{Block, Content, Role};
use serde_json::Value;

/// Recognized identifier field names, in lookup order.
const ID_FIELDS: &[&str] = &["uuid", "id"];

/// Recognized parent identifier field names, in lookup order.
const PARENT_FIELDS: &[&str] = &["parentUuid", "parent_id"];

const SESSION_FIELDS: &[&str] = &["sessionId", "session_id"];

const SIDECHAIN_FIELDS: &[&str] = &["isSidechain", "is_sidechain"];

fn string_field<'a>(record: &'a Value, names: &[&str]) -> Option<&'a str> {
    names.iter().find_map(|name| record.get(name)?.as_str())
}

/// Record identifier, if present and non-empty.
pub fn record_id(record: &Value) -> Option<&str> {
    string_field(record, ID_FIELDS).filter(|s| !s.trim().is_empty())
}

/// Parent identifier, if present and non-empty. A JSON null parent is a root.
pub fn record_parent_id(record: &Value) -> Option<&str> {
    string_field(record, PARENT_FIELDS).filter(|s| !s.is_empty())
}

/// Session identifier carried on the record, if any.
pub fn record_session_id(record: &Value) -> Option<&str> {
    string_field(record, SESSION_FIELDS)
}

/// Role from the record's `type` field, falling back to `role`.
pub fn record_role(record: &Value) -> Option<Role> {
    string_field(record, &["type", "role"]).and_then(Role::parse)
}

pub(crate) fn record_timestamp(record: &Value) -> Option<&str> {
    record.get("timestamp")?.as_str()
}

pub(crate) fn record_sidechain(record: &Value) -> bool {
    SIDECHAIN_FIELDS
        .iter()
        .find_map(|name| record.get(name)?.as_bool())
        .unwrap_or(false)
}

/// Locate the content value: nested under `message.content` for conversation
/// records, top-level `content` otherwise.
pub(crate) fn content_value(record: &Value) -> Option<&Value> {
    record
        .get("message")
        .and_then(|m| m.get("content"))
        .or_else(|| record.get("content"))
}

/// Normalize a record's content into the typed sum representation.
///
/// A scalar string becomes `PlainText`; a list becomes `Blocks`. Returns
/// `Err(())` when a list entry is structurally invalid (non-object, missing
/// type tag, or a known type missing its required fields). Well-formed blocks
/// of unknown type carry no text and are skipped; they stay in the raw record.
pub fn record_content(record: &Value) -> std::result::Result<Content, ()> {
    let value = match content_value(record) {
        Some(v) => v,
        None => return Ok(Content::PlainText(String::new())),
    };

    match value {
        Value::String(s) => Ok(Content::PlainText(s.clone())),
        Value::Array(items) => {
            let mut blocks = Vec::new();
            for item in items {
                let obj = item.as_object().ok_or(())?;
                let block_type = obj.get("type").and_then(|t| t.as_str()).ok_or(())?;
                match block_type {
                    "text" => {
                        let text = obj.get("text").and_then(|t| t.as_str()).ok_or(())?;
                        blocks.push(Block::Text {
                            text: text.to_string(),
                        });
                    }
                    "tool_use" => {
                        let id = obj.get("id").and_then(|v| v.as_str()).ok_or(())?;
                        let name = obj.get("name").and_then(|v| v.as_str()).unwrap_or("");
                        blocks.push(Block::ToolUse {
                            id: id.to_string(),
                            name: name.to_string(),
                        });
                    }
                    "tool_result" => {
                        // Block identifier may be absent or non-string on
                        // corrupted archives; such blocks are kept raw and
                        // never subject to dedup (see dedup module).
                        if let Some(id) = tool_result_block_id(item) {
                            blocks.push(Block::ToolResult { id: id.to_string() });
                        }
                    }
                    _ => {}
                }
            }
            Ok(Content::Blocks(blocks))
        }
        Value::Null => Ok(Content::PlainText(String::new())),
        _ => Err(()),
    }
}

/// Identifier of a tool_result block value, if validly typed.
pub(crate) fn tool_result_block_id(block: &Value) -> Option<&str> {
    block
        .get("tool_use_id")
        .or_else(|| block.get("id"))
        .and_then(|v| v.as_str())
}

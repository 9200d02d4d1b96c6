//! Line-preserving archive access for the rewrite path.
//!
//! The archive-file provider mutates a single field of a single record and
//! must leave every other byte of the file intact: unknown fields, field
//! order, and even unparseable lines are carried through verbatim. Lines are
//! therefore kept as text and only re-serialized when actually modified.

use serde_json::Value;
use std::io::{BufRead, BufReader};
use std::path::Path;

use crate::error::Result;
use archmend_types::RepairField;

/// One physical archive line. `record` is None for lines that are not JSON
/// objects; those are copied through untouched on write.
#[derive(Debug, Clone)]
pub struct RawLine {
    pub line_no: usize,
    pub text: String,
    pub record: Option<Value>,
    dirty: bool,
}

impl RawLine {
    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }
}

pub fn read_raw_lines(path: &Path) -> Result<Vec<RawLine>> {
    let file = std::fs::File::open(path)?;
    let reader = BufReader::new(file);

    let mut lines = Vec::new();
    for (idx, line) in reader.lines().enumerate() {
        let text = line?;
        let record = match serde_json::from_str::<Value>(&text) {
            Ok(value @ Value::Object(_)) => Some(value),
            _ => None,
        };
        lines.push(RawLine {
            line_no: idx + 1,
            text,
            record,
            dirty: false,
        });
    }
    Ok(lines)
}

/// Render lines back into the archive byte image. Unmodified lines keep their
/// original bytes; modified records are re-serialized (field order preserved).
pub fn write_raw_lines(lines: &[RawLine]) -> Result<String> {
    let mut out = String::new();
    for line in lines {
        match (&line.record, line.dirty) {
            (Some(record), true) => out.push_str(&serde_json::to_string(record)?),
            _ => out.push_str(&line.text),
        }
        out.push('\n');
    }
    Ok(out)
}

/// Apply a field mutation to a wire record, using whichever spelling the
/// record already carries. Returns false if the record shape is not an object.
pub fn set_record_field(record: &mut Value, field: RepairField, new_value: &str) -> bool {
    let Some(obj) = record.as_object_mut() else {
        return false;
    };

    match field {
        RepairField::ParentId => {
            let key = if obj.contains_key("parent_id") && !obj.contains_key("parentUuid") {
                "parent_id"
            } else {
                "parentUuid"
            };
            obj.insert(key.to_string(), Value::String(new_value.to_string()));
        }
        RepairField::Role => {
            if obj.contains_key("type") || !obj.contains_key("role") {
                obj.insert("type".to_string(), Value::String(new_value.to_string()));
            } else {
                obj.insert("role".to_string(), Value::String(new_value.to_string()));
            }
            if let Some(message) = obj.get_mut("message")
                && let Some(inner) = message.as_object_mut()
                && inner.contains_key("role")
            {
                inner.insert("role".to_string(), Value::String(new_value.to_string()));
            }
        }
    }
    true
}

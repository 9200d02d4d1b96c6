use chrono::{DateTime, Utc};
use serde_json::Value;
use std::io::BufRead;
use std::path::Path;

use crate::error::Result;
use crate::schema;
use archmend_types::Message;

/// Why a line could not be parsed into a Message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseErrorKind {
    /// Line is not a JSON object
    Malformed,
    MissingId,
    BadTimestamp,
    UnknownRole,
    InvalidBlocks,
}

impl ParseErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ParseErrorKind::Malformed => "malformed",
            ParseErrorKind::MissingId => "missing_id",
            ParseErrorKind::BadTimestamp => "bad_timestamp",
            ParseErrorKind::UnknownRole => "unknown_role",
            ParseErrorKind::InvalidBlocks => "invalid_blocks",
        }
    }
}

/// Structured diagnostic for one malformed line. The stream continues.
#[derive(Debug, Clone)]
pub struct ParseDiagnostic {
    pub line: usize,
    pub byte_offset: u64,
    pub kind: ParseErrorKind,
    pub detail: String,
}

/// Outcome of parsing one non-blank line
#[derive(Debug)]
pub enum ParsedLine {
    Message(Box<Message>),
    Skipped(ParseDiagnostic),
}

/// Streaming record reader.
///
/// Yields one item per non-blank line without materializing the archive;
/// memory stays O(single record). Only I/O errors on the underlying stream
/// terminate iteration with an error.
pub struct RecordStream<R: BufRead> {
    reader: R,
    default_session: String,
    line_no: usize,
    byte_offset: u64,
    buf: String,
}

impl<R: BufRead> RecordStream<R> {
    pub fn new(reader: R, default_session: impl Into<String>) -> Self {
        Self {
            reader,
            default_session: default_session.into(),
            line_no: 0,
            byte_offset: 0,
            buf: String::new(),
        }
    }

    fn parse_line(&self, line: &str, line_no: usize, offset: u64) -> ParsedLine {
        let skip = |kind, detail: String| {
            ParsedLine::Skipped(ParseDiagnostic {
                line: line_no,
                byte_offset: offset,
                kind,
                detail,
            })
        };

        let record: Value = match serde_json::from_str(line) {
            Ok(Value::Object(map)) => Value::Object(map),
            Ok(_) => return skip(ParseErrorKind::Malformed, "record is not an object".into()),
            Err(err) => return skip(ParseErrorKind::Malformed, err.to_string()),
        };

        let id = match schema::record_id(&record) {
            Some(id) => id.to_string(),
            None => return skip(ParseErrorKind::MissingId, "no uuid/id field".into()),
        };

        let role = match schema::record_role(&record) {
            Some(role) => role,
            None => {
                let found = record
                    .get("type")
                    .or_else(|| record.get("role"))
                    .and_then(|v| v.as_str())
                    .unwrap_or("<absent>");
                return skip(ParseErrorKind::UnknownRole, format!("role '{}'", found));
            }
        };

        let timestamp = match schema::record_timestamp(&record)
            .and_then(|ts| DateTime::parse_from_rfc3339(ts).ok())
        {
            Some(ts) => ts.with_timezone(&Utc),
            None => {
                return skip(
                    ParseErrorKind::BadTimestamp,
                    "missing or non-RFC3339 timestamp".into(),
                );
            }
        };

        let content = match schema::record_content(&record) {
            Ok(content) => content,
            Err(()) => {
                return skip(ParseErrorKind::InvalidBlocks, "invalid content block".into());
            }
        };

        let parent_id = schema::record_parent_id(&record).map(|s| s.to_string());
        let session_id = schema::record_session_id(&record)
            .map(|s| s.to_string())
            .unwrap_or_else(|| self.default_session.clone());
        let is_sidechain = schema::record_sidechain(&record);

        match Message::new(id, parent_id, role, content, timestamp, session_id) {
            Ok(mut msg) => {
                msg.is_sidechain = is_sidechain;
                msg.raw = record;
                ParsedLine::Message(Box::new(msg))
            }
            Err(err) => skip(ParseErrorKind::MissingId, err.to_string()),
        }
    }
}

impl<R: BufRead> Iterator for RecordStream<R> {
    type Item = Result<ParsedLine>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            self.buf.clear();
            let offset = self.byte_offset;
            match self.reader.read_line(&mut self.buf) {
                Ok(0) => return None,
                Ok(n) => {
                    self.byte_offset += n as u64;
                    self.line_no += 1;
                    let line = self.buf.trim_end_matches(['\n', '\r']);
                    if line.trim().is_empty() {
                        continue;
                    }
                    return Some(Ok(self.parse_line(line, self.line_no, offset)));
                }
                Err(err) => return Some(Err(err.into())),
            }
        }
    }
}

/// A fully loaded archive: messages plus the diagnostics collected alongside.
#[derive(Debug)]
pub struct LoadedArchive {
    pub session_id: String,
    pub messages: Vec<Message>,
    pub diagnostics: Vec<ParseDiagnostic>,
}

impl LoadedArchive {
    pub fn is_degraded(&self) -> bool {
        !self.diagnostics.is_empty()
    }
}

/// Load an archive file. The file stem seeds the session id until a record
/// carries its own.
pub fn load_archive(path: &Path) -> Result<LoadedArchive> {
    let default_session = path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "unknown".to_string());
    load_archive_with_session(path, &default_session)
}

pub fn load_archive_with_session(path: &Path, default_session: &str) -> Result<LoadedArchive> {
    let file = std::fs::File::open(path)?;
    let reader = std::io::BufReader::new(file);

    let mut messages = Vec::new();
    let mut diagnostics = Vec::new();
    let mut session_id: Option<String> = None;

    for item in RecordStream::new(reader, default_session) {
        match item? {
            ParsedLine::Message(msg) => {
                if session_id.is_none() && msg.session_id != default_session {
                    session_id = Some(msg.session_id.clone());
                }
                messages.push(*msg);
            }
            ParsedLine::Skipped(diag) => diagnostics.push(diag),
        }
    }

    let session_id = session_id.unwrap_or_else(|| default_session.to_string());
    Ok(LoadedArchive {
        session_id,
        messages,
        diagnostics,
    })
}

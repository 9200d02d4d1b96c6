//! Duplicate tool-result detection and removal.
//!
//! Resume failures in the host make it re-append tool_result blocks that were
//! already written, always with the same block identifier. Detection scans an
//! ordered record stream and counts identifiers; removal keeps the first
//! occurrence and drops the rest. Blocks that fail validation are protected:
//! they are counted in the metrics but never removed.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};

use crate::error::{Error, Result};

/// Guard configuration for the detector
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DedupConfig {
    pub max_duplicate_blocks: usize,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            max_duplicate_blocks: 10_000,
        }
    }
}

/// Validation failure classes for tool_result blocks
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum BlockFailure {
    MissingId,
    NonStringId,
    EmptyId,
}

impl BlockFailure {
    pub fn as_str(&self) -> &'static str {
        match self {
            BlockFailure::MissingId => "missing_id",
            BlockFailure::NonStringId => "non_string_id",
            BlockFailure::EmptyId => "empty_id",
        }
    }
}

/// Structured scan metrics
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DedupMetrics {
    pub blocks_processed: usize,
    pub blocks_valid: usize,
    pub blocks_invalid: usize,
    /// Validation-failure breakdown, keyed by failure class
    pub failures: BTreeMap<String, usize>,
}

/// Scan result: identifiers seen at least twice, plus metrics
#[derive(Debug, Clone, Default)]
pub struct DuplicateReport {
    /// Block identifier → total occurrence count (only entries with count >= 2)
    pub counts: BTreeMap<String, usize>,
    pub metrics: DedupMetrics,
}

impl DuplicateReport {
    pub fn has_duplicates(&self) -> bool {
        !self.counts.is_empty()
    }

    /// Sum of all occurrences of duplicated identifiers
    pub fn duplicated_total(&self) -> usize {
        self.counts.values().sum()
    }
}

fn classify_block_id(block: &Value) -> std::result::Result<&str, BlockFailure> {
    let id_value = block
        .get("tool_use_id")
        .or_else(|| block.get("id"))
        .ok_or(BlockFailure::MissingId)?;
    let id = id_value.as_str().ok_or(BlockFailure::NonStringId)?;
    let trimmed = id.trim();
    if trimmed.is_empty() {
        return Err(BlockFailure::EmptyId);
    }
    Ok(trimmed)
}

fn content_array(record: &Value) -> Option<&Vec<Value>> {
    crate::schema::content_value(record).and_then(|v| v.as_array())
}

fn content_array_mut(record: &mut Value) -> Option<&mut Vec<Value>> {
    let has_nested = record
        .get("message")
        .and_then(|m| m.get("content"))
        .is_some_and(|v| v.is_array());
    if has_nested {
        record
            .get_mut("message")
            .and_then(|m| m.get_mut("content"))
            .and_then(|v| v.as_array_mut())
    } else {
        record.get_mut("content").and_then(|v| v.as_array_mut())
    }
}

fn is_tool_result(block: &Value) -> bool {
    block.get("type").and_then(|t| t.as_str()) == Some("tool_result")
}

/// Scan an ordered record stream for duplicated tool_result identifiers.
///
/// Never fails on partial corruption; malformed blocks are tallied and
/// skipped. The only failure is the OOM guard: when the total volume of
/// duplicated blocks exceeds `max_duplicate_blocks`.
pub fn scan_duplicates(records: &[Value], config: &DedupConfig) -> Result<DuplicateReport> {
    let mut all_counts: BTreeMap<String, usize> = BTreeMap::new();
    let mut metrics = DedupMetrics::default();

    for record in records {
        let Some(blocks) = content_array(record) else {
            continue;
        };
        for block in blocks {
            if !is_tool_result(block) {
                continue;
            }
            metrics.blocks_processed += 1;
            match classify_block_id(block) {
                Ok(id) => {
                    metrics.blocks_valid += 1;
                    *all_counts.entry(id.to_string()).or_insert(0) += 1;
                }
                Err(failure) => {
                    metrics.blocks_invalid += 1;
                    *metrics.failures.entry(failure.as_str().to_string()).or_insert(0) += 1;
                }
            }
        }
    }

    let counts: BTreeMap<String, usize> =
        all_counts.into_iter().filter(|(_, n)| *n >= 2).collect();

    let total: usize = counts.values().sum();
    if total > config.max_duplicate_blocks {
        return Err(Error::ExcessiveDuplication {
            total,
            max: config.max_duplicate_blocks,
        });
    }

    Ok(DuplicateReport { counts, metrics })
}

/// Emit a new record sequence keeping only the first occurrence of each
/// duplicated identifier. Non-tool_result blocks and invalid blocks are
/// always preserved. O(n) over blocks, O(m) in duplicated identifiers.
pub fn dedup_records(records: &[Value], report: &DuplicateReport) -> Vec<Value> {
    if !report.has_duplicates() {
        return records.to_vec();
    }

    let mut seen: HashSet<String> = HashSet::with_capacity(report.counts.len());
    let mut out = Vec::with_capacity(records.len());

    for record in records {
        let mut record = record.clone();
        if let Some(blocks) = content_array_mut(&mut record) {
            blocks.retain(|block| {
                if !is_tool_result(block) {
                    return true;
                }
                let Ok(id) = classify_block_id(block) else {
                    return true;
                };
                if !report.counts.contains_key(id) {
                    return true;
                }
                seen.insert(id.to_string())
            });
        }
        out.push(record);
    }

    out
}

/// Remove later occurrences of the listed identifiers from one record's
/// content blocks, preserving the first occurrence of each. Used by event
/// replay for `dedup_tool_result` events.
pub fn dedup_blocks_in_value(record: &mut Value, ids: &[String]) {
    let targeted: HashSet<&str> = ids.iter().map(|s| s.as_str()).collect();
    let mut seen: HashSet<String> = HashSet::new();

    if let Some(blocks) = content_array_mut(record) {
        blocks.retain(|block| {
            if !is_tool_result(block) {
                return true;
            }
            let Ok(id) = classify_block_id(block) else {
                return true;
            };
            if !targeted.contains(id) {
                return true;
            }
            seen.insert(id.to_string())
        });
    }
}

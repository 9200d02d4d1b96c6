//! Deterministic event replay.
//!
//! The materialized state of a session is a pure function of the baseline
//! message stream and the non-reverted events applied in (timestamp, event
//! id) order. Transformations never abort the replay: a broken event yields
//! a diagnostic and the remaining events still apply.

use std::collections::HashMap;

use archmend_types::{
    Block, Content, Control, CorruptionScore, EventKind, Message, RepairField, ReplayDiagnostic,
    ReplayDiagnosticKind, RepairEvent, Role,
};

use crate::error::Result;

/// Apply events to a baseline, in the order given. Callers are responsible
/// for ordering events by (timestamp, event id) and filtering reverted ones.
/// Checks `control` between events.
pub fn replay_events(
    baseline: Vec<Message>,
    events: &[RepairEvent],
    control: &Control,
) -> Result<(Vec<Message>, Vec<ReplayDiagnostic>)> {
    let mut messages = baseline;
    let mut index: HashMap<String, usize> = messages
        .iter()
        .enumerate()
        .map(|(i, m)| (m.id.clone(), i))
        .collect();
    let mut diagnostics = Vec::new();

    for event in events {
        control.checkpoint()?;
        apply_event(event, &mut messages, &mut index, &mut diagnostics);
    }

    Ok((messages, diagnostics))
}

fn apply_event(
    event: &RepairEvent,
    messages: &mut Vec<Message>,
    index: &mut HashMap<String, usize>,
    diagnostics: &mut Vec<ReplayDiagnostic>,
) {
    match event.kind {
        // Metadata-only kinds: no effect on message state
        EventKind::RevertEvent | EventKind::ValidateSession => {}

        EventKind::AddMessage => {
            match serde_json::from_value::<Message>(event.new_state.clone()) {
                Ok(msg) => {
                    if index.contains_key(&msg.id) {
                        diagnostics.push(ReplayDiagnostic {
                            kind: ReplayDiagnosticKind::IdCollision,
                            detail: format!(
                                "add_message {} collides with an existing id",
                                msg.id
                            ),
                        });
                    } else {
                        index.insert(msg.id.clone(), messages.len());
                        messages.push(msg);
                    }
                }
                Err(err) => diagnostics.push(ReplayDiagnostic {
                    kind: ReplayDiagnosticKind::MissingTarget,
                    detail: format!("add_message payload invalid: {}", err),
                }),
            }
        }

        EventKind::RepairParent
        | EventKind::RepairRole
        | EventKind::MarkInvalid
        | EventKind::DedupToolResult => {
            let Some(target) = event
                .target_id
                .as_ref()
                .and_then(|id| index.get(id).copied())
            else {
                diagnostics.push(ReplayDiagnostic {
                    kind: ReplayDiagnosticKind::MissingTarget,
                    detail: format!(
                        "{} targets unknown message {:?}",
                        event.kind.as_str(),
                        event.target_id
                    ),
                });
                return;
            };
            let msg = &mut messages[target];

            match event.kind {
                EventKind::RepairParent => {
                    match event.new_state.get("parent_id").and_then(|v| v.as_str()) {
                        Some(parent) => {
                            msg.parent_id = Some(parent.to_string());
                            archmend_loader::set_record_field(
                                &mut msg.raw,
                                RepairField::ParentId,
                                parent,
                            );
                        }
                        None => diagnostics.push(ReplayDiagnostic {
                            kind: ReplayDiagnosticKind::MissingTarget,
                            detail: format!(
                                "repair_parent {} has no parent_id payload",
                                event.event_id
                            ),
                        }),
                    }
                }
                EventKind::RepairRole => {
                    match event
                        .new_state
                        .get("role")
                        .and_then(|v| v.as_str())
                        .and_then(Role::parse)
                    {
                        Some(role) => {
                            msg.role = role;
                            archmend_loader::set_record_field(
                                &mut msg.raw,
                                RepairField::Role,
                                role.as_str(),
                            );
                        }
                        None => diagnostics.push(ReplayDiagnostic {
                            kind: ReplayDiagnosticKind::MissingTarget,
                            detail: format!(
                                "repair_role {} has no valid role payload",
                                event.event_id
                            ),
                        }),
                    }
                }
                EventKind::MarkInvalid => {
                    let score = event
                        .new_state
                        .get("corruption")
                        .and_then(|v| v.as_f64())
                        .unwrap_or(1.0);
                    msg.corruption = CorruptionScore::new(score);
                }
                EventKind::DedupToolResult => {
                    let ids: Vec<String> = event
                        .new_state
                        .get("block_ids")
                        .and_then(|v| v.as_array())
                        .map(|arr| {
                            arr.iter()
                                .filter_map(|v| v.as_str().map(|s| s.to_string()))
                                .collect()
                        })
                        .unwrap_or_default();
                    dedup_content(&mut msg.content, &ids);
                    archmend_loader::dedup_blocks_in_value(&mut msg.raw, &ids);
                }
                _ => unreachable!("outer match covers only targeted kinds"),
            }
        }
    }
}

/// Drop later occurrences of the listed tool_result ids from typed content,
/// preserving the first occurrence of each.
fn dedup_content(content: &mut Content, ids: &[String]) {
    let Content::Blocks(blocks) = content else {
        return;
    };
    let mut seen: std::collections::HashSet<String> = std::collections::HashSet::new();
    blocks.retain(|block| match block {
        Block::ToolResult { id } if ids.contains(id) => seen.insert(id.clone()),
        _ => true,
    });
}

use chrono::{DateTime, Utc};
use serde_json::json;
use std::path::{Path, PathBuf};

use archmend_runtime::{CoreConfig, Error, RepairManager, Result, resolve_workspace_path};
use archmend_store::{
    ArchiveFileProvider, EventStoreProvider, RepairProvider, SessionRef,
    discover_backed_up_sessions,
};
use archmend_types::{Control, RepairOperation};

use crate::args::{Backend, Cli, Commands};

/// Map a runtime error to the documented process exit code.
pub fn exit_code(err: &Error) -> i32 {
    match err {
        Error::Validation(_) => 3,
        Error::Loader(_) | Error::Config(_) | Error::Baseline { .. } | Error::InvalidOperation(_) => 2,
        Error::Store(store_err) => match store_err {
            archmend_store::Error::LockContention(_)
            | archmend_store::Error::Cancelled
            | archmend_store::Error::Timeout => 5,
            _ => 4,
        },
    }
}

fn load_config(cli: &Cli) -> Result<CoreConfig> {
    let mut config = match &cli.config {
        Some(path) => CoreConfig::load_from(path)?,
        None => CoreConfig::load()?,
    };
    if let Some(data_dir) = &cli.data_dir {
        let base = resolve_workspace_path(Some(data_dir))?;
        config.storage.backup_root = base.join("backups");
        config.storage.state_root = base.join("state");
        config.storage.event_store_dsn = base.join("events.db");
    }
    Ok(config)
}

fn session_id_for(cli: &Cli, archive: &Path) -> String {
    cli.session.clone().unwrap_or_else(|| {
        archive
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| "unknown".to_string())
    })
}

fn make_provider(cli: &Cli, config: &CoreConfig) -> Result<Box<dyn RepairProvider>> {
    match cli.backend {
        Backend::Archive => Ok(Box::new(ArchiveFileProvider::new(
            config.storage.backup_root.clone(),
            config.storage.state_root.clone(),
        ))),
        Backend::Events => Ok(Box::new(EventStoreProvider::open(
            &config.storage.event_store_dsn,
            config.replay.clone(),
        )?)),
    }
}

fn open_manager(cli: &Cli, archive: &PathBuf) -> Result<RepairManager> {
    let config = load_config(cli)?;
    let provider = make_provider(cli, &config)?;
    let session_id = session_id_for(cli, archive);
    RepairManager::open(&session_id, archive, provider, config)
}

fn emit(json_mode: bool, value: serde_json::Value, plain: String) {
    if json_mode {
        println!("{}", serde_json::to_string_pretty(&value).unwrap_or_default());
    } else {
        println!("{}", plain);
    }
}

pub fn run(cli: Cli) -> Result<()> {
    match &cli.command {
        Commands::Analyze { archive } => {
            let manager = open_manager(&cli, archive)?;
            let session = manager.session();
            let threads: Vec<serde_json::Value> = session
                .threads
                .iter()
                .map(|t| {
                    json!({
                        "id": t.id,
                        "kind": t.kind,
                        "messages": t.message_ids.len(),
                        "corruption": t.corruption.get(),
                        "parent_thread_id": t.parent_thread_id,
                    })
                })
                .collect();
            let mut plain = format!(
                "session {} | {} messages | {} threads | {} orphans | corruption {:.3}",
                session.session_id,
                session.messages.len(),
                session.threads.len(),
                session.orphan_count(),
                session.corruption.get(),
            );
            for thread in &session.threads {
                plain.push_str(&format!(
                    "\n  {:?} thread {} ({} messages, corruption {:.3})",
                    thread.kind,
                    thread.id,
                    thread.message_ids.len(),
                    thread.corruption.get(),
                ));
            }
            emit(
                cli.json,
                json!({
                    "session_id": session.session_id,
                    "message_count": session.messages.len(),
                    "orphan_count": session.orphan_count(),
                    "corruption": session.corruption.get(),
                    "content_hash": session.content_hash,
                    "threads": threads,
                }),
                plain,
            );
            Ok(())
        }

        Commands::Doctor { archive } => {
            let manager = open_manager(&cli, archive)?;
            let stats = manager.dag().statistics();
            let records: Vec<serde_json::Value> = manager
                .state()
                .messages
                .iter()
                .map(|m| m.raw.clone())
                .collect();
            let config = load_config(&cli)?;
            let report = archmend_loader::scan_duplicates(&records, &config.dedup)
                .map_err(Error::Loader)?;

            let parse_errors: Vec<serde_json::Value> = manager
                .parse_diagnostics()
                .iter()
                .map(|d| {
                    json!({
                        "line": d.line,
                        "byte_offset": d.byte_offset,
                        "kind": d.kind.as_str(),
                        "detail": d.detail,
                    })
                })
                .collect();

            let plain = format!(
                "{} messages, {} roots, {} leaves, {} orphans, depth {}, branching {:.2}\n\
                 parse errors: {} | cycles: {} | duplicated tool_results: {}",
                stats.message_count,
                stats.root_count,
                stats.leaf_count,
                stats.orphan_count,
                stats.max_depth,
                stats.avg_branching,
                manager.parse_diagnostics().len(),
                manager.dag().has_cycles(),
                report.counts.len(),
            );
            emit(
                cli.json,
                json!({
                    "statistics": {
                        "message_count": stats.message_count,
                        "root_count": stats.root_count,
                        "leaf_count": stats.leaf_count,
                        "orphan_count": stats.orphan_count,
                        "max_depth": stats.max_depth,
                        "avg_branching": stats.avg_branching,
                    },
                    "has_cycles": manager.dag().has_cycles(),
                    "cycle_offenders": manager.dag().cycle_offenders(),
                    "parse_errors": parse_errors,
                    "duplicates": report.counts,
                    "dedup_metrics": report.metrics,
                }),
                plain,
            );
            Ok(())
        }

        Commands::Suggest { archive, orphan_id } => {
            let manager = open_manager(&cli, archive)?;
            let candidates = manager.suggest_parents(orphan_id);
            let mut plain = format!("{} candidates for {}", candidates.len(), orphan_id);
            for c in &candidates {
                plain.push_str(&format!(
                    "\n  {} score {:.3} (content {:.3}, temporal {:.3}, role {:.3}, delta {}s)",
                    c.id, c.score, c.content_score, c.temporal_score, c.role_score, c.delta_seconds,
                ));
            }
            emit(cli.json, json!({ "orphan_id": orphan_id, "candidates": candidates }), plain);
            Ok(())
        }

        Commands::Repair {
            archive,
            target,
            parent,
            operator,
            reason,
        } => {
            let mut manager = open_manager(&cli, archive)?;
            let old_parent = manager
                .dag()
                .get(target)
                .and_then(|m| m.parent())
                .map(|p| p.to_string());
            let op = RepairOperation::reparent(target.clone(), old_parent, parent.clone(), reason);
            manager.apply_repair(&op, operator, reason)?;
            let session = manager.session();
            emit(
                cli.json,
                json!({
                    "repaired": target,
                    "new_parent": parent,
                    "orphan_count": session.orphan_count(),
                    "corruption": session.corruption.get(),
                }),
                format!(
                    "re-parented {} under {} | orphans now {} | corruption {:.3}",
                    target,
                    parent,
                    session.orphan_count(),
                    session.corruption.get(),
                ),
            );
            Ok(())
        }

        Commands::Dedup { archive, operator } => {
            let mut manager = open_manager(&cli, archive)?;
            let summary =
                manager.dedup_tool_results(operator, "dedup duplicated tool_result blocks")?;
            emit(
                cli.json,
                json!({
                    "duplicates": summary.report.counts,
                    "metrics": summary.report.metrics,
                    "changes_applied": summary.events_applied,
                }),
                format!(
                    "{} duplicated identifiers, {} changes applied",
                    summary.report.counts.len(),
                    summary.events_applied,
                ),
            );
            Ok(())
        }

        Commands::History { archive } => {
            let manager = open_manager(&cli, archive)?;
            let entries = manager.history()?;
            let mut plain = format!("{} entries", entries.len());
            for entry in &entries {
                plain.push_str(&format!(
                    "\n  {} {}{}",
                    entry.timestamp.to_rfc3339(),
                    entry.description,
                    if entry.reverted { " (reverted)" } else { "" },
                ));
            }
            emit(cli.json, json!({ "entries": entries }), plain);
            Ok(())
        }

        Commands::Undo { archive, operator } => {
            let mut manager = open_manager(&cli, archive)?;
            let undone = manager.undo_last(operator)?;
            emit(
                cli.json,
                json!({ "undone": undone }),
                if undone {
                    "undid most recent change".to_string()
                } else {
                    "nothing to undo".to_string()
                },
            );
            Ok(())
        }

        Commands::Restore { archive, at } => {
            if cli.backend != Backend::Events {
                return Err(Error::InvalidOperation(
                    "restore requires --backend events".to_string(),
                ));
            }
            let config = load_config(&cli)?;
            let provider =
                EventStoreProvider::open(&config.storage.event_store_dsn, config.replay.clone())?;
            let bound: Option<DateTime<Utc>> = match at {
                Some(raw) => Some(
                    DateTime::parse_from_rfc3339(raw)
                        .map_err(|e| Error::InvalidOperation(format!("bad --at instant: {}", e)))?
                        .with_timezone(&Utc),
                ),
                None => None,
            };
            let session = SessionRef::new(session_id_for(&cli, archive), archive.clone());
            let state = provider.restore_at(&session, bound, &Control::new())?;
            emit(
                cli.json,
                json!({
                    "session_id": session.session_id,
                    "message_count": state.messages.len(),
                    "version": state.version,
                    "degraded": state.degraded,
                    "from_cache": state.from_cache,
                    "diagnostics": state.diagnostics,
                }),
                format!(
                    "{} messages at version {}{}{}",
                    state.messages.len(),
                    state.version,
                    if state.from_cache { " (cached)" } else { "" },
                    if state.degraded { " DEGRADED" } else { "" },
                ),
            );
            Ok(())
        }

        Commands::Sessions => {
            let config = load_config(&cli)?;
            let sessions = discover_backed_up_sessions(&config.storage.backup_root)?;
            emit(
                cli.json,
                json!({ "sessions": sessions }),
                sessions.join("\n"),
            );
            Ok(())
        }
    }
}

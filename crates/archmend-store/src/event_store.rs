//! Event-store backend: append-only repair log in SQLite with materialized
//! session snapshots and deterministic replay.
//!
//! Immutability is enforced at the storage layer: triggers reject deletes and
//! every update except the controlled revert-flag transition. The archive
//! file is a frozen baseline; this provider never writes to it.

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

use archmend_types::{
    Control, EventKind, HistoryEntry, Message, RepairEvent, RepairField, RepairOperation,
    ReplayDiagnostic, ReplayDiagnosticKind, RestoredState, SessionSnapshot, SnapshotStats,
    ValidationResult,
};

use crate::error::{Error, Result};
use crate::provider::{BackupHandle, BackupLocation, RepairProvider, SessionRef};
use crate::replay::replay_events;

/// Increment when changing table definitions; recorded in the meta table.
pub const SCHEMA_VERSION: i32 = 1;

/// Materialization cache behavior
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplayConfig {
    pub cache_ttl_seconds: i64,
    pub degraded_fail_fast: bool,
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            cache_ttl_seconds: 300,
            degraded_fail_fast: false,
        }
    }
}

fn ts_str(ts: DateTime<Utc>) -> String {
    // Fixed-width UTC form so lexicographic order is chronological order
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_ts(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|d| d.with_timezone(&Utc))
        .map_err(|e| Error::Storage(format!("unparseable stored timestamp '{}': {}", s, e)))
}

fn map_write_error(err: rusqlite::Error) -> Error {
    let text = err.to_string();
    if text.contains("immutable") || text.contains("append-only") {
        Error::Immutable(text)
    } else {
        Error::Database(err)
    }
}

pub struct EventStore {
    conn: Connection,
}

impl EventStore {
    pub fn open(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(db_path)?;
        let store = Self { conn };
        store.init_schema()?;
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self { conn };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<()> {
        self.conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS meta (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS repair_event (
                event_id TEXT PRIMARY KEY,
                session_id TEXT NOT NULL,
                target_id TEXT,
                kind TEXT NOT NULL,
                ts TEXT NOT NULL,
                operator TEXT NOT NULL,
                old_state TEXT,
                new_state TEXT,
                reason TEXT,
                validation TEXT,
                reverted INTEGER NOT NULL DEFAULT 0,
                reverted_by TEXT,
                reverted_at TEXT
            );

            CREATE TABLE IF NOT EXISTS session_snapshot (
                session_id TEXT PRIMARY KEY,
                version INTEGER NOT NULL,
                created_at TEXT NOT NULL,
                last_event_id TEXT,
                messages TEXT NOT NULL,
                stats TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_event_session ON repair_event(session_id);
            CREATE INDEX IF NOT EXISTS idx_event_target ON repair_event(target_id);
            CREATE INDEX IF NOT EXISTS idx_event_ts ON repair_event(session_id, ts, event_id);
            CREATE INDEX IF NOT EXISTS idx_event_kind ON repair_event(kind);

            CREATE TRIGGER IF NOT EXISTS repair_event_no_update
            BEFORE UPDATE ON repair_event
            WHEN NOT (
                NEW.reverted = 1 AND OLD.reverted = 0
                AND NEW.event_id = OLD.event_id
                AND NEW.session_id = OLD.session_id
                AND NEW.target_id IS OLD.target_id
                AND NEW.kind = OLD.kind
                AND NEW.ts = OLD.ts
                AND NEW.operator = OLD.operator
                AND NEW.old_state IS OLD.old_state
                AND NEW.new_state IS OLD.new_state
                AND NEW.reason IS OLD.reason
                AND NEW.validation IS OLD.validation
            )
            BEGIN
                SELECT RAISE(ABORT, 'repair_event records are immutable');
            END;

            CREATE TRIGGER IF NOT EXISTS repair_event_no_delete
            BEFORE DELETE ON repair_event
            BEGIN
                SELECT RAISE(ABORT, 'repair_event records are append-only');
            END;
            "#,
        )?;

        self.conn.execute(
            "INSERT OR REPLACE INTO meta (key, value) VALUES ('schema_version', ?1)",
            params![SCHEMA_VERSION.to_string()],
        )?;
        Ok(())
    }

    pub fn schema_version(&self) -> Result<i32> {
        let value: String = self.conn.query_row(
            "SELECT value FROM meta WHERE key = 'schema_version'",
            [],
            |row| row.get(0),
        )?;
        value
            .parse()
            .map_err(|_| Error::Storage(format!("bad schema version '{}'", value)))
    }

    /// Insert one immutable event and invalidate the session's snapshot,
    /// atomically.
    pub fn record_event(&mut self, event: &RepairEvent) -> Result<()> {
        let tx = self.conn.transaction()?;
        insert_event(&tx, event)?;
        tx.execute(
            "DELETE FROM session_snapshot WHERE session_id = ?1",
            params![event.session_id],
        )?;
        tx.commit()?;
        Ok(())
    }

    /// Non-reverted events for replay, ordered (timestamp, event id)
    /// ascending, optionally bounded by an upper timestamp.
    pub fn events_for(
        &self,
        session_id: &str,
        bound: Option<DateTime<Utc>>,
    ) -> Result<Vec<RepairEvent>> {
        let mut sql = String::from(
            "SELECT event_id, session_id, target_id, kind, ts, operator, old_state, new_state,
                    reason, validation, reverted, reverted_by, reverted_at
             FROM repair_event WHERE session_id = ?1 AND reverted = 0",
        );
        if bound.is_some() {
            sql.push_str(" AND ts <= ?2");
        }
        sql.push_str(" ORDER BY ts ASC, event_id ASC");

        let mut stmt = self.conn.prepare(&sql)?;
        let rows = match bound {
            Some(bound) => stmt.query(params![session_id, ts_str(bound)])?,
            None => stmt.query(params![session_id])?,
        };
        collect_events(rows)
    }

    /// Full audit trail, most recent first, reverted events included.
    pub fn history(&self, session_id: &str) -> Result<Vec<RepairEvent>> {
        let mut stmt = self.conn.prepare(
            "SELECT event_id, session_id, target_id, kind, ts, operator, old_state, new_state,
                    reason, validation, reverted, reverted_by, reverted_at
             FROM repair_event WHERE session_id = ?1
             ORDER BY ts DESC, event_id DESC",
        )?;
        let rows = stmt.query(params![session_id])?;
        collect_events(rows)
    }

    pub fn event_by_id(&self, event_id: &str) -> Result<Option<RepairEvent>> {
        let mut stmt = self.conn.prepare(
            "SELECT event_id, session_id, target_id, kind, ts, operator, old_state, new_state,
                    reason, validation, reverted, reverted_by, reverted_at
             FROM repair_event WHERE event_id = ?1",
        )?;
        let rows = stmt.query(params![event_id])?;
        Ok(collect_events(rows)?.into_iter().next())
    }

    /// Current maximum event id for a session in (timestamp, event id) order.
    /// Cheap index lookup; used for the snapshot freshness check.
    pub fn max_event_id(&self, session_id: &str) -> Result<Option<String>> {
        let id = self
            .conn
            .query_row(
                "SELECT event_id FROM repair_event WHERE session_id = ?1
                 ORDER BY ts DESC, event_id DESC LIMIT 1",
                params![session_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(id)
    }

    pub fn event_count(&self, session_id: &str) -> Result<usize> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM repair_event WHERE session_id = ?1",
            params![session_id],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    /// Revert a previously applied event.
    ///
    /// Inserts a `revert_event` whose new-state names the target, then
    /// performs the controlled flag transition on the target record. This is
    /// the only mutation the storage layer permits.
    pub fn revert(
        &mut self,
        session_id: &str,
        target_event_id: &str,
        operator: &str,
    ) -> Result<RepairEvent> {
        let target = self
            .event_by_id(target_event_id)?
            .ok_or_else(|| Error::NotFound(format!("event {}", target_event_id)))?;
        if target.session_id != session_id {
            return Err(Error::Storage(format!(
                "event {} belongs to session {}, not {}",
                target_event_id, target.session_id, session_id
            )));
        }
        if target.reverted {
            return Err(Error::Storage(format!(
                "event {} is already reverted",
                target_event_id
            )));
        }
        if target.kind == EventKind::RevertEvent {
            return Err(Error::Storage("cannot revert a revert event".to_string()));
        }

        let now = Utc::now();
        let revert = RepairEvent {
            event_id: Uuid::new_v4().to_string(),
            session_id: session_id.to_string(),
            target_id: target.target_id.clone(),
            kind: EventKind::RevertEvent,
            timestamp: now,
            operator: operator.to_string(),
            old_state: serde_json::json!({ "event_id": target_event_id, "reverted": false }),
            new_state: serde_json::json!({ "event_id": target_event_id, "reverted": true }),
            reason: format!("revert of {}", target_event_id),
            validation: None,
            reverted: false,
            reverted_by: None,
            reverted_at: None,
        };

        let tx = self.conn.transaction()?;
        insert_event(&tx, &revert)?;
        let updated = tx
            .execute(
                "UPDATE repair_event
                 SET reverted = 1, reverted_by = ?1, reverted_at = ?2
                 WHERE event_id = ?3 AND reverted = 0",
                params![revert.event_id, ts_str(now), target_event_id],
            )
            .map_err(map_write_error)?;
        if updated != 1 {
            return Err(Error::Storage(format!(
                "revert of {} updated {} rows",
                target_event_id, updated
            )));
        }
        tx.execute(
            "DELETE FROM session_snapshot WHERE session_id = ?1",
            params![session_id],
        )?;
        tx.commit()?;
        Ok(revert)
    }

    pub fn load_snapshot(&self, session_id: &str) -> Result<Option<SessionSnapshot>> {
        let row = self
            .conn
            .query_row(
                "SELECT version, created_at, last_event_id, messages, stats
                 FROM session_snapshot WHERE session_id = ?1",
                params![session_id],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, Option<String>>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, String>(4)?,
                    ))
                },
            )
            .optional()?;

        let Some((version, created_at, last_event_id, messages, stats)) = row else {
            return Ok(None);
        };
        Ok(Some(SessionSnapshot {
            session_id: session_id.to_string(),
            version,
            created_at: parse_ts(&created_at)?,
            messages: serde_json::from_str(&messages)?,
            stats: serde_json::from_str(&stats)?,
            last_event_id,
        }))
    }

    pub fn upsert_snapshot(&self, snapshot: &SessionSnapshot) -> Result<()> {
        self.conn.execute(
            "INSERT INTO session_snapshot
                 (session_id, version, created_at, last_event_id, messages, stats)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(session_id) DO UPDATE SET
                 version = ?2, created_at = ?3, last_event_id = ?4,
                 messages = ?5, stats = ?6",
            params![
                snapshot.session_id,
                snapshot.version,
                ts_str(snapshot.created_at),
                snapshot.last_event_id,
                serde_json::to_string(&snapshot.messages)?,
                serde_json::to_string(&snapshot.stats)?,
            ],
        )?;
        Ok(())
    }

    /// Materialize the session: baseline + replay, with snapshot caching on
    /// the unbounded path. Post-replay invariant violations set `degraded`
    /// but do not abort unless `degraded_fail_fast` is configured.
    pub fn restore(
        &mut self,
        session: &SessionRef,
        bound: Option<DateTime<Utc>>,
        config: &ReplayConfig,
        control: &Control,
    ) -> Result<RestoredState> {
        control.checkpoint()?;

        if bound.is_none()
            && config.cache_ttl_seconds > 0
            && let Some(snapshot) = self.load_snapshot(&session.session_id)?
        {
            let max = self.max_event_id(&session.session_id)?;
            let age = (Utc::now() - snapshot.created_at).num_seconds();
            if snapshot.last_event_id == max && age <= config.cache_ttl_seconds {
                return Ok(RestoredState {
                    messages: snapshot.messages,
                    version: snapshot.version,
                    last_event_id: snapshot.last_event_id,
                    degraded: false,
                    diagnostics: Vec::new(),
                    from_cache: true,
                });
            }
        }

        let archive = archmend_loader::load_archive_with_session(
            &session.archive_path,
            &session.session_id,
        )?;
        let events = self.events_for(&session.session_id, bound)?;
        let (messages, mut diagnostics) = replay_events(archive.messages, &events, control)?;

        check_invariants(&messages, &mut diagnostics);
        let degraded = !diagnostics.is_empty();
        if degraded && config.degraded_fail_fast {
            return Err(Error::Storage(format!(
                "degraded materialization of {}: {}",
                session.session_id,
                diagnostics
                    .iter()
                    .map(|d| d.detail.clone())
                    .collect::<Vec<_>>()
                    .join("; ")
            )));
        }

        let version = events.len() as i64;
        let last_event_id = self.max_event_id(&session.session_id)?;

        if bound.is_none() && !degraded {
            let dag = archmend_engine::MessageDag::build(&messages);
            let stats = SnapshotStats {
                message_count: messages.len(),
                orphan_count: dag.orphans().len(),
                corruption: archmend_engine::analyze(
                    &dag,
                    &session.session_id,
                    &archmend_engine::CorruptionConfig::default(),
                )
                .corruption
                .get(),
            };
            self.upsert_snapshot(&SessionSnapshot {
                session_id: session.session_id.clone(),
                version,
                created_at: Utc::now(),
                messages: messages.clone(),
                stats,
                last_event_id: last_event_id.clone(),
            })?;
        }

        Ok(RestoredState {
            messages,
            version,
            last_event_id,
            degraded,
            diagnostics,
            from_cache: false,
        })
    }
}

/// Post-replay invariant check: unique ids, no cycles, timestamp monotonicity.
fn check_invariants(messages: &[Message], diagnostics: &mut Vec<ReplayDiagnostic>) {
    let dag = archmend_engine::MessageDag::build(messages);
    for dup in dag.duplicate_ids() {
        diagnostics.push(ReplayDiagnostic {
            kind: ReplayDiagnosticKind::DuplicateId,
            detail: format!("duplicate message id {}", dup),
        });
    }
    if dag.has_cycles() {
        diagnostics.push(ReplayDiagnostic {
            kind: ReplayDiagnosticKind::Cycle,
            detail: format!("cycle through [{}]", dag.cycle_offenders().join(", ")),
        });
    }
    for msg in messages {
        if let Some(parent) = msg.parent().and_then(|p| dag.get(p))
            && msg.timestamp < parent.timestamp
        {
            diagnostics.push(ReplayDiagnostic {
                kind: ReplayDiagnosticKind::TimestampInversion,
                detail: format!("{} predates its parent {}", msg.id, parent.id),
            });
        }
    }
}

fn insert_event(conn: &Connection, event: &RepairEvent) -> Result<()> {
    conn.execute(
        "INSERT INTO repair_event
             (event_id, session_id, target_id, kind, ts, operator, old_state, new_state,
              reason, validation, reverted, reverted_by, reverted_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
        params![
            event.event_id,
            event.session_id,
            event.target_id,
            event.kind.as_str(),
            ts_str(event.timestamp),
            event.operator,
            serde_json::to_string(&event.old_state)?,
            serde_json::to_string(&event.new_state)?,
            event.reason,
            event
                .validation
                .as_ref()
                .map(serde_json::to_string)
                .transpose()?,
            event.reverted as i64,
            event.reverted_by,
            event.reverted_at.map(ts_str),
        ],
    )
    .map_err(map_write_error)?;
    Ok(())
}

fn collect_events(mut rows: rusqlite::Rows<'_>) -> Result<Vec<RepairEvent>> {
    let mut events = Vec::new();
    while let Some(row) = rows.next()? {
        let kind_str: String = row.get(3)?;
        let kind = EventKind::parse(&kind_str)
            .ok_or_else(|| Error::Storage(format!("unknown event kind '{}'", kind_str)))?;
        let ts: String = row.get(4)?;
        let old_state: Option<String> = row.get(6)?;
        let new_state: Option<String> = row.get(7)?;
        let validation: Option<String> = row.get(9)?;
        let reverted_at: Option<String> = row.get(12)?;

        events.push(RepairEvent {
            event_id: row.get(0)?,
            session_id: row.get(1)?,
            target_id: row.get(2)?,
            kind,
            timestamp: parse_ts(&ts)?,
            operator: row.get(5)?,
            old_state: old_state
                .map(|s| serde_json::from_str(&s))
                .transpose()?
                .unwrap_or(serde_json::Value::Null),
            new_state: new_state
                .map(|s| serde_json::from_str(&s))
                .transpose()?
                .unwrap_or(serde_json::Value::Null),
            reason: row.get::<_, Option<String>>(8)?.unwrap_or_default(),
            validation: validation.map(|s| serde_json::from_str(&s)).transpose()?,
            reverted: row.get::<_, i64>(10)? != 0,
            reverted_by: row.get(11)?,
            reverted_at: reverted_at.map(|s| parse_ts(&s)).transpose()?,
        });
    }
    Ok(events)
}

/// Event-sourced implementation of the provider contract.
pub struct EventStoreProvider {
    store: Mutex<EventStore>,
    replay: ReplayConfig,
}

impl EventStoreProvider {
    pub fn new(store: EventStore, replay: ReplayConfig) -> Self {
        Self {
            store: Mutex::new(store),
            replay,
        }
    }

    pub fn open(db_path: &Path, replay: ReplayConfig) -> Result<Self> {
        Ok(Self::new(EventStore::open(db_path)?, replay))
    }

    fn lock(&self) -> Result<MutexGuard<'_, EventStore>> {
        self.store
            .lock()
            .map_err(|_| Error::Storage("event store lock poisoned".to_string()))
    }

    /// Time-travel read: materialize the session as of `bound`.
    pub fn restore_at(
        &self,
        session: &SessionRef,
        bound: Option<DateTime<Utc>>,
        control: &Control,
    ) -> Result<RestoredState> {
        self.lock()?.restore(session, bound, &self.replay, control)
    }

    /// Revert a specific event by id.
    pub fn revert_event(
        &self,
        session: &SessionRef,
        event_id: &str,
        operator: &str,
        control: &Control,
    ) -> Result<()> {
        control.checkpoint()?;
        self.lock()?
            .revert(&session.session_id, event_id, operator)?;
        Ok(())
    }

    fn build_event(
        kind: EventKind,
        session_id: &str,
        target_id: Option<String>,
        old_state: serde_json::Value,
        new_state: serde_json::Value,
        operator: &str,
        reason: &str,
        validation: Option<&ValidationResult>,
    ) -> Result<RepairEvent> {
        Ok(RepairEvent {
            event_id: Uuid::new_v4().to_string(),
            session_id: session_id.to_string(),
            target_id,
            kind,
            timestamp: Utc::now(),
            operator: operator.to_string(),
            old_state,
            new_state,
            reason: reason.to_string(),
            validation: validation.map(serde_json::to_value).transpose()?,
            reverted: false,
            reverted_by: None,
            reverted_at: None,
        })
    }
}

impl RepairProvider for EventStoreProvider {
    fn name(&self) -> &'static str {
        "event_store"
    }

    fn create_backup(&self, session: &SessionRef, control: &Control) -> Result<BackupHandle> {
        control.checkpoint()?;
        let last_event_id = self.lock()?.max_event_id(&session.session_id)?;
        Ok(BackupHandle {
            session_id: session.session_id.clone(),
            created_at: Utc::now(),
            location: BackupLocation::EventMarker { last_event_id },
        })
    }

    fn apply_repair(
        &self,
        session: &SessionRef,
        op: &RepairOperation,
        operator: &str,
        reason: &str,
        validation: Option<&ValidationResult>,
        control: &Control,
    ) -> Result<bool> {
        control.checkpoint()?;
        let mut store = self.lock()?;

        // Old state reads the live materialized view
        let state = store.restore(session, None, &self.replay, control)?;
        let Some(target) = state.messages.iter().find(|m| m.id == op.target_id) else {
            return Ok(false);
        };

        let (kind, old_state, new_state) = match op.field {
            RepairField::ParentId => (
                EventKind::RepairParent,
                serde_json::json!({ "parent_id": target.parent_id }),
                serde_json::json!({ "parent_id": op.new_value }),
            ),
            RepairField::Role => (
                EventKind::RepairRole,
                serde_json::json!({ "role": target.role.as_str() }),
                serde_json::json!({ "role": op.new_value }),
            ),
        };

        let event = Self::build_event(
            kind,
            &session.session_id,
            Some(op.target_id.clone()),
            old_state,
            new_state,
            operator,
            reason,
            validation,
        )?;
        store.record_event(&event)?;
        Ok(true)
    }

    fn apply_dedup(
        &self,
        session: &SessionRef,
        target_id: &str,
        block_ids: &[String],
        operator: &str,
        reason: &str,
        control: &Control,
    ) -> Result<bool> {
        control.checkpoint()?;
        let mut store = self.lock()?;

        let state = store.restore(session, None, &self.replay, control)?;
        let Some(target) = state.messages.iter().find(|m| m.id == target_id) else {
            return Ok(false);
        };
        let before: Vec<&str> = target.content.tool_result_ids();

        let event = Self::build_event(
            EventKind::DedupToolResult,
            &session.session_id,
            Some(target_id.to_string()),
            serde_json::json!({ "block_ids": before }),
            serde_json::json!({ "block_ids": block_ids }),
            operator,
            reason,
            None,
        )?;
        store.record_event(&event)?;
        Ok(true)
    }

    fn rollback_to_backup(
        &self,
        session: &SessionRef,
        backup: &BackupHandle,
        control: &Control,
    ) -> Result<bool> {
        control.checkpoint()?;
        let BackupLocation::EventMarker { last_event_id } = &backup.location else {
            return Err(Error::Storage(
                "event_store provider cannot restore a snapshot file".to_string(),
            ));
        };

        let mut store = self.lock()?;
        let marker = match last_event_id {
            Some(id) => {
                let event = store
                    .event_by_id(id)?
                    .ok_or_else(|| Error::NotFound(format!("marker event {}", id)))?;
                Some((ts_str(event.timestamp), event.event_id))
            }
            None => None,
        };

        // Revert everything applied after the marker, newest first
        let mut to_revert: Vec<RepairEvent> = store
            .history(&session.session_id)?
            .into_iter()
            .filter(|e| !e.reverted && e.kind != EventKind::RevertEvent)
            .filter(|e| match &marker {
                Some((marker_ts, marker_id)) => {
                    (ts_str(e.timestamp), e.event_id.clone()) > (marker_ts.clone(), marker_id.clone())
                }
                None => true,
            })
            .collect();
        to_revert.sort_by(|a, b| {
            (ts_str(b.timestamp), &b.event_id).cmp(&(ts_str(a.timestamp), &a.event_id))
        });

        for event in &to_revert {
            control.checkpoint()?;
            store.revert(&session.session_id, &event.event_id, "rollback")?;
        }
        Ok(true)
    }

    fn undo_last(&self, session: &SessionRef, operator: &str, control: &Control) -> Result<bool> {
        control.checkpoint()?;
        let mut store = self.lock()?;
        let latest = store
            .history(&session.session_id)?
            .into_iter()
            .find(|e| !e.reverted && e.kind != EventKind::RevertEvent);
        match latest {
            Some(event) => {
                store.revert(&session.session_id, &event.event_id, operator)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn undo_history(&self, session_id: &str) -> Result<Vec<HistoryEntry>> {
        let store = self.lock()?;
        let events = store.history(session_id)?;
        Ok(events
            .into_iter()
            .map(|event| {
                let operations = reconstruct_operation(&event).into_iter().collect();
                HistoryEntry {
                    timestamp: event.timestamp,
                    operator: Some(event.operator),
                    description: format!("{}: {}", event.kind.as_str(), event.reason),
                    operations,
                    event_id: Some(event.event_id),
                    snapshot_path: None,
                    reverted: event.reverted,
                }
            })
            .collect())
    }

    fn current_state(&self, session: &SessionRef, control: &Control) -> Result<RestoredState> {
        self.restore_at(session, None, control)
    }
}

/// Rebuild a RepairOperation from a field-repair event, for display.
fn reconstruct_operation(event: &RepairEvent) -> Option<RepairOperation> {
    let (field, key) = match event.kind {
        EventKind::RepairParent => (RepairField::ParentId, "parent_id"),
        EventKind::RepairRole => (RepairField::Role, "role"),
        _ => return None,
    };
    Some(RepairOperation {
        target_id: event.target_id.clone()?,
        field,
        old_value: event
            .old_state
            .get(key)
            .and_then(|v| v.as_str())
            .map(|s| s.to_string()),
        new_value: event
            .new_state
            .get(key)
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string(),
        reason: event.reason.clone(),
        similarity: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample_event(id: &str, session: &str, secs: i64) -> RepairEvent {
        RepairEvent {
            event_id: id.to_string(),
            session_id: session.to_string(),
            target_id: Some("m3".to_string()),
            kind: EventKind::RepairParent,
            timestamp: Utc.timestamp_opt(secs, 0).unwrap(),
            operator: "tester".to_string(),
            old_state: serde_json::json!({ "parent_id": null }),
            new_state: serde_json::json!({ "parent_id": "m2" }),
            reason: "reattach".to_string(),
            validation: None,
            reverted: false,
            reverted_by: None,
            reverted_at: None,
        }
    }

    #[test]
    fn test_insert_and_query_order() {
        let mut store = EventStore::open_in_memory().unwrap();
        // Inserted out of order; replay order must be (ts, event_id)
        store.record_event(&sample_event("b", "s1", 200)).unwrap();
        store.record_event(&sample_event("a", "s1", 100)).unwrap();
        store.record_event(&sample_event("c", "s1", 100)).unwrap();

        let events = store.events_for("s1", None).unwrap();
        let ids: Vec<&str> = events.iter().map(|e| e.event_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "c", "b"]);
        assert_eq!(store.max_event_id("s1").unwrap(), Some("b".to_string()));
    }

    #[test]
    fn test_update_rejected_by_trigger() {
        let mut store = EventStore::open_in_memory().unwrap();
        store.record_event(&sample_event("e1", "s1", 100)).unwrap();

        let result = store.conn.execute(
            "UPDATE repair_event SET reason = 'tampered' WHERE event_id = 'e1'",
            [],
        );
        assert!(result.is_err());

        // Original record is intact
        let event = store.event_by_id("e1").unwrap().unwrap();
        assert_eq!(event.reason, "reattach");
    }

    #[test]
    fn test_delete_rejected_by_trigger() {
        let mut store = EventStore::open_in_memory().unwrap();
        store.record_event(&sample_event("e1", "s1", 100)).unwrap();

        let result = store
            .conn
            .execute("DELETE FROM repair_event WHERE event_id = 'e1'", []);
        assert!(result.is_err());
        assert_eq!(store.event_count("s1").unwrap(), 1);
    }

    #[test]
    fn test_revert_flags_target_and_keeps_both() {
        let mut store = EventStore::open_in_memory().unwrap();
        store.record_event(&sample_event("e1", "s1", 100)).unwrap();

        let revert = store.revert("s1", "e1", "tester").unwrap();
        assert_eq!(revert.kind, EventKind::RevertEvent);

        let target = store.event_by_id("e1").unwrap().unwrap();
        assert!(target.reverted);
        assert_eq!(target.reverted_by, Some(revert.event_id.clone()));
        assert!(target.reverted_at.is_some());

        // Both events remain; replay sees neither the reverted one
        assert_eq!(store.event_count("s1").unwrap(), 2);
        let for_replay = store.events_for("s1", None).unwrap();
        assert_eq!(for_replay.len(), 1);
        assert_eq!(for_replay[0].kind, EventKind::RevertEvent);
    }

    #[test]
    fn test_double_revert_rejected() {
        let mut store = EventStore::open_in_memory().unwrap();
        store.record_event(&sample_event("e1", "s1", 100)).unwrap();
        store.revert("s1", "e1", "tester").unwrap();
        assert!(store.revert("s1", "e1", "tester").is_err());
    }

    #[test]
    fn test_snapshot_roundtrip_and_invalidation() {
        let mut store = EventStore::open_in_memory().unwrap();
        let snapshot = SessionSnapshot {
            session_id: "s1".to_string(),
            version: 1,
            created_at: Utc::now(),
            messages: Vec::new(),
            stats: SnapshotStats::default(),
            last_event_id: Some("e0".to_string()),
        };
        store.upsert_snapshot(&snapshot).unwrap();
        assert!(store.load_snapshot("s1").unwrap().is_some());

        // Any event insertion invalidates the snapshot
        store.record_event(&sample_event("e1", "s1", 100)).unwrap();
        assert!(store.load_snapshot("s1").unwrap().is_none());
    }

    #[test]
    fn test_schema_version_recorded() {
        let store = EventStore::open_in_memory().unwrap();
        assert_eq!(store.schema_version().unwrap(), SCHEMA_VERSION);
    }

    #[test]
    fn test_event_count_monotonic() {
        let mut store = EventStore::open_in_memory().unwrap();
        assert_eq!(store.event_count("s1").unwrap(), 0);
        store.record_event(&sample_event("e1", "s1", 100)).unwrap();
        assert_eq!(store.event_count("s1").unwrap(), 1);
        store.revert("s1", "e1", "tester").unwrap();
        // Revert adds an event; nothing disappears
        assert_eq!(store.event_count("s1").unwrap(), 2);
    }
}

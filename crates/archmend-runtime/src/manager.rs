use std::collections::BTreeMap;
use std::path::Path;

use archmend_engine::{MessageDag, ParentCandidate, analyze, rank_candidates, validate_reparent};
use archmend_loader::{DuplicateReport, ParseDiagnostic};
use archmend_store::{BackupHandle, RepairProvider, SessionRef};
use archmend_types::{
    Control, HistoryEntry, Message, RepairField, RepairOperation, RestoredState, Session,
};

use crate::config::CoreConfig;
use crate::error::{Error, Result};

type SimilarityFn = dyn Fn(&str, &str) -> f64 + Send + Sync;

/// Outcome of a session-wide dedup pass
#[derive(Debug)]
pub struct DedupSummary {
    pub report: DuplicateReport,
    pub events_applied: usize,
}

/// Facade over loader, engine, and a persistence provider. One manager owns
/// one session handle; the in-memory view is rebuilt from the provider's
/// canonical state after every mutation.
pub struct RepairManager {
    session_ref: SessionRef,
    provider: Box<dyn RepairProvider>,
    config: CoreConfig,
    control: Control,
    state: RestoredState,
    dag: MessageDag,
    session: Session,
    parse_diagnostics: Vec<ParseDiagnostic>,
    similarity: Option<Box<SimilarityFn>>,
}

impl RepairManager {
    /// Load the baseline, construct the initial view through the provider,
    /// and analyze it. Refuses to open an archive that yields no messages
    /// but does yield parse errors.
    pub fn open(
        session_id: &str,
        archive_path: &Path,
        provider: Box<dyn RepairProvider>,
        config: CoreConfig,
    ) -> Result<Self> {
        config.validate()?;
        let session_ref = SessionRef::new(session_id, archive_path);
        let control = Control::new();

        let baseline = archmend_loader::load_archive_with_session(archive_path, session_id)?;
        if baseline.messages.is_empty() && !baseline.diagnostics.is_empty() {
            return Err(Error::Baseline {
                parse_errors: baseline.diagnostics.len(),
            });
        }

        let state = provider.current_state(&session_ref, &control)?;
        let dag = MessageDag::build(&state.messages);
        let session = analyze(&dag, session_id, &config.corruption);

        Ok(Self {
            session_ref,
            provider,
            config,
            control,
            state,
            dag,
            session,
            parse_diagnostics: baseline.diagnostics,
            similarity: None,
        })
    }

    pub fn with_control(mut self, control: Control) -> Self {
        self.control = control;
        self
    }

    /// Inject the lexical similarity function used for candidate ranking.
    pub fn set_similarity(&mut self, similarity: Box<SimilarityFn>) {
        self.similarity = Some(similarity);
    }

    fn reload(&mut self) -> Result<()> {
        self.state = self.provider.current_state(&self.session_ref, &self.control)?;
        self.dag = MessageDag::build(&self.state.messages);
        self.session = analyze(&self.dag, &self.session_ref.session_id, &self.config.corruption);
        Ok(())
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn dag(&self) -> &MessageDag {
        &self.dag
    }

    pub fn state(&self) -> &RestoredState {
        &self.state
    }

    pub fn parse_diagnostics(&self) -> &[ParseDiagnostic] {
        &self.parse_diagnostics
    }

    pub fn provider_name(&self) -> &'static str {
        self.provider.name()
    }

    pub fn orphans(&self) -> Vec<&Message> {
        self.session.messages.iter().filter(|m| m.is_orphan).collect()
    }

    /// Ranked parent candidates for an orphan (delegates to the engine).
    pub fn suggest_parents(&self, orphan_id: &str) -> Vec<ParentCandidate> {
        rank_candidates(
            &self.dag,
            orphan_id,
            &self.config.ranking,
            self.similarity.as_deref(),
        )
    }

    /// Validate and commit one repair. On validation failure the typed check
    /// results are returned and no state changes; on provider failure the
    /// view is left untouched.
    pub fn apply_repair(
        &mut self,
        op: &RepairOperation,
        operator: &str,
        reason: &str,
    ) -> Result<()> {
        let validation = match op.field {
            RepairField::ParentId => {
                let result = validate_reparent(&self.dag, &op.target_id, &op.new_value);
                if !result.passed() {
                    return Err(Error::Validation(result));
                }
                Some(result)
            }
            // Role transitions are unconstrained; see config for rationale
            RepairField::Role => None,
        };

        let applied = self.provider.apply_repair(
            &self.session_ref,
            op,
            operator,
            reason,
            validation.as_ref(),
            &self.control,
        )?;
        if !applied {
            return Err(Error::InvalidOperation(format!(
                "target message {} not found",
                op.target_id
            )));
        }
        self.reload()
    }

    /// Apply repairs one by one. Each item is individually atomic; the batch
    /// is not transactional across items.
    pub fn apply_repairs_batch(
        &mut self,
        ops: &[RepairOperation],
        operator: &str,
        reason: &str,
    ) -> Vec<Result<()>> {
        ops.iter()
            .map(|op| self.apply_repair(op, operator, reason))
            .collect()
    }

    /// Detect duplicated tool_result blocks in the current state and commit
    /// one dedup change per affected message.
    pub fn dedup_tool_results(&mut self, operator: &str, reason: &str) -> Result<DedupSummary> {
        let records: Vec<serde_json::Value> =
            self.state.messages.iter().map(|m| m.raw.clone()).collect();
        let report = archmend_loader::scan_duplicates(&records, &self.config.dedup)?;
        if !report.has_duplicates() {
            return Ok(DedupSummary {
                report,
                events_applied: 0,
            });
        }

        // Emit one change per message that repeats an identifier internally
        let mut per_message: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for msg in &self.state.messages {
            let ids = msg.content.tool_result_ids();
            let mut repeated: Vec<String> = Vec::new();
            for dup_id in report.counts.keys() {
                if ids.iter().filter(|i| *i == dup_id).count() >= 2 {
                    repeated.push(dup_id.clone());
                }
            }
            if !repeated.is_empty() {
                per_message.insert(msg.id.clone(), repeated);
            }
        }

        let mut events_applied = 0;
        for (target_id, block_ids) in &per_message {
            let applied = self.provider.apply_dedup(
                &self.session_ref,
                target_id,
                block_ids,
                operator,
                reason,
                &self.control,
            )?;
            if applied {
                events_applied += 1;
            }
        }
        if events_applied > 0 {
            self.reload()?;
        }
        Ok(DedupSummary {
            report,
            events_applied,
        })
    }

    pub fn create_backup(&self) -> Result<BackupHandle> {
        Ok(self.provider.create_backup(&self.session_ref, &self.control)?)
    }

    pub fn rollback_to_backup(&mut self, backup: &BackupHandle) -> Result<bool> {
        let rolled = self
            .provider
            .rollback_to_backup(&self.session_ref, backup, &self.control)?;
        if rolled {
            self.reload()?;
        }
        Ok(rolled)
    }

    /// Undo the most recent change and reload the view.
    pub fn undo_last(&mut self, operator: &str) -> Result<bool> {
        let undone = self
            .provider
            .undo_last(&self.session_ref, operator, &self.control)?;
        if undone {
            self.reload()?;
        }
        Ok(undone)
    }

    /// Chronological list of applied operations, oldest first.
    pub fn history(&self) -> Result<Vec<HistoryEntry>> {
        let mut entries = self.provider.undo_history(&self.session_ref.session_id)?;
        entries.reverse();
        Ok(entries)
    }

    /// Re-read the canonical state through the provider (which may hit the
    /// snapshot cache) and return the freshly analyzed session.
    pub fn current_state(&mut self) -> Result<&Session> {
        self.reload()?;
        Ok(&self.session)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use archmend_store::ArchiveFileProvider;
    use tempfile::TempDir;

    fn write_archive(dir: &Path) -> std::path::PathBuf {
        let path = dir.join("sess-1.jsonl");
        let contents = concat!(
            r#"{"uuid":"m1","parentUuid":null,"type":"user","message":{"role":"user","content":"fix the loader"},"timestamp":"2025-01-01T10:00:10Z"}"#,
            "\n",
            r#"{"uuid":"m2","parentUuid":"m1","type":"assistant","message":{"role":"assistant","content":"loader fixed"},"timestamp":"2025-01-01T10:00:20Z"}"#,
            "\n",
            r#"{"uuid":"m3","parentUuid":null,"type":"user","message":{"role":"user","content":"loader looks fixed now"},"timestamp":"2025-01-01T10:00:22Z"}"#,
            "\n",
        );
        std::fs::write(&path, contents).unwrap();
        path
    }

    fn open_manager(dir: &TempDir) -> RepairManager {
        let archive = write_archive(dir.path());
        let provider = Box::new(ArchiveFileProvider::new(
            dir.path().join("backups"),
            dir.path().join("state"),
        ));
        RepairManager::open("sess-1", &archive, provider, CoreConfig::default()).unwrap()
    }

    #[test]
    fn test_open_builds_view() {
        let dir = TempDir::new().unwrap();
        let manager = open_manager(&dir);
        assert_eq!(manager.session().messages.len(), 3);
        assert_eq!(manager.orphans().len(), 1);
        assert_eq!(manager.provider_name(), "archive_file");
    }

    #[test]
    fn test_refuses_unreadable_baseline() {
        let dir = TempDir::new().unwrap();
        let archive = dir.path().join("bad.jsonl");
        std::fs::write(&archive, "not json\nstill not json\n").unwrap();
        let provider = Box::new(ArchiveFileProvider::new(
            dir.path().join("backups"),
            dir.path().join("state"),
        ));
        match RepairManager::open("bad", &archive, provider, CoreConfig::default()) {
            Err(Error::Baseline { parse_errors }) => assert_eq!(parse_errors, 2),
            other => panic!("expected Baseline error, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_validation_failure_leaves_state() {
        let dir = TempDir::new().unwrap();
        let mut manager = open_manager(&dir);
        let before = std::fs::read_to_string(&manager.session_ref.archive_path).unwrap();

        // Timestamp inversion: m2 (:20) proposed under m3 (:22)
        let op = RepairOperation::reparent("m2", Some("m1".to_string()), "m3", "bad idea");
        match manager.apply_repair(&op, "tester", "test") {
            Err(Error::Validation(result)) => assert!(!result.timestamp_ok),
            other => panic!("expected validation failure, got {:?}", other.map(|_| ())),
        }
        assert_eq!(
            std::fs::read_to_string(&manager.session_ref.archive_path).unwrap(),
            before
        );
        assert!(manager.history().unwrap().is_empty());
    }

    #[test]
    fn test_repair_and_undo_round_trip() {
        let dir = TempDir::new().unwrap();
        let mut manager = open_manager(&dir);
        assert_eq!(manager.orphans().len(), 1);

        let op = RepairOperation::reparent("m3", None, "m2", "reattach");
        manager.apply_repair(&op, "tester", "reattach orphan").unwrap();
        assert_eq!(manager.orphans().len(), 0);
        assert!(manager.session().corruption.get() < 0.05);

        assert!(manager.undo_last("tester").unwrap());
        assert_eq!(manager.orphans().len(), 1);
    }

    #[test]
    fn test_suggest_parents_ranks_reply() {
        let dir = TempDir::new().unwrap();
        let manager = open_manager(&dir);
        let candidates = manager.suggest_parents("m3");
        assert!(!candidates.is_empty());
        assert_eq!(candidates[0].id, "m2");
    }

    #[test]
    fn test_batch_reports_per_item() {
        let dir = TempDir::new().unwrap();
        let mut manager = open_manager(&dir);
        let ops = vec![
            RepairOperation::reparent("m3", None, "m2", "good"),
            RepairOperation::reparent("ghost", None, "m1", "bad target"),
        ];
        let results = manager.apply_repairs_batch(&ops, "tester", "batch");
        assert!(results[0].is_ok());
        assert!(results[1].is_err());
        assert_eq!(manager.orphans().len(), 0);
    }
}

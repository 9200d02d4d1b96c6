use archmend_types::ValidationResult;

use crate::dag::MessageDag;

/// Validate a proposed re-parenting against the current DAG.
///
/// All checks are evaluated so callers can report every failure at once.
/// `no_cycle` is also false while the baseline graph already contains a
/// cycle: repairs stay refused until the cycle is broken.
pub fn validate_reparent(dag: &MessageDag, orphan_id: &str, parent_id: &str) -> ValidationResult {
    let target = dag.get(orphan_id);
    let parent = dag.get(parent_id);

    let target_exists = target.is_some();
    let parent_exists = parent.is_some();
    let not_self = orphan_id != parent_id;

    // Cycle prevention: the proposed parent must not be reachable from the
    // orphan across current children
    let no_cycle = !dag.has_cycles()
        && (!parent_exists
            || !target_exists
            || !dag.subtree(orphan_id).iter().any(|m| m.id == parent_id));

    let timestamp_ok = match (target, parent) {
        (Some(child), Some(parent)) => parent.timestamp <= child.timestamp,
        _ => false,
    };

    let ids_unique = dag.duplicate_ids().is_empty();

    ValidationResult {
        target_exists,
        parent_exists,
        not_self,
        no_cycle,
        timestamp_ok,
        ids_unique,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use archmend_types::{Content, Message, Role};
    use chrono::{DateTime, TimeZone, Utc};

    fn ts(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    fn msg(id: &str, parent: Option<&str>, secs: i64) -> Message {
        Message::new(
            id,
            parent.map(|p| p.to_string()),
            Role::User,
            Content::PlainText(String::new()),
            ts(secs),
            "s1",
        )
        .unwrap()
    }

    #[test]
    fn test_valid_reparent_passes() {
        let dag = MessageDag::build(&[
            msg("m1", None, 10),
            msg("m2", Some("m1"), 20),
            msg("m3", None, 22),
        ]);
        let result = validate_reparent(&dag, "m3", "m2");
        assert!(result.passed(), "failed: {:?}", result.failed_checks());
    }

    #[test]
    fn test_reparent_onto_descendant_rejected() {
        // m1 -> m2 -> m3; attaching m1 under m3 closes a loop
        let dag = MessageDag::build(&[
            msg("m1", None, 10),
            msg("m2", Some("m1"), 20),
            msg("m3", Some("m2"), 30),
        ]);
        let result = validate_reparent(&dag, "m1", "m3");
        assert!(!result.no_cycle);
        assert!(!result.passed());
    }

    #[test]
    fn test_timestamp_inversion_rejected() {
        let dag = MessageDag::build(&[msg("parent", None, 100), msg("child", None, 90)]);
        let result = validate_reparent(&dag, "child", "parent");
        assert!(!result.timestamp_ok);
        assert!(result.no_cycle);
        assert!(!result.passed());
    }

    #[test]
    fn test_missing_parent_rejected() {
        let dag = MessageDag::build(&[msg("m1", None, 10)]);
        let result = validate_reparent(&dag, "m1", "ghost");
        assert!(!result.parent_exists);
        assert!(!result.passed());
    }

    #[test]
    fn test_self_parent_rejected() {
        let dag = MessageDag::build(&[msg("m1", None, 10)]);
        let result = validate_reparent(&dag, "m1", "m1");
        assert!(!result.not_self);
        // m1 is in its own subtree, so the cycle check fires too
        assert!(!result.no_cycle);
    }

    #[test]
    fn test_baseline_cycle_blocks_all_repairs() {
        let dag = MessageDag::build(&[
            msg("a", Some("b"), 10),
            msg("b", Some("a"), 20),
            msg("fresh", None, 5),
            msg("target", None, 30),
        ]);
        assert!(dag.has_cycles());
        let result = validate_reparent(&dag, "target", "fresh");
        assert!(!result.no_cycle);
        assert!(!result.passed());
    }
}

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

use archmend_types::{
    CorruptionScore, Message, Session, Thread, ThreadKind, thread_id_for_root,
};

use crate::dag::MessageDag;

/// Weights and markers for corruption scoring
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CorruptionConfig {
    pub weight_missing_parent: f64,
    pub weight_timestamp_violation: f64,
    pub weight_disconnected_sidechain: f64,
    pub weight_content_marker: f64,
    /// Sentinel strings whose presence in content contributes to the score
    pub markers: Vec<String>,
}

impl Default for CorruptionConfig {
    fn default() -> Self {
        Self {
            weight_missing_parent: 0.40,
            weight_timestamp_violation: 0.20,
            weight_disconnected_sidechain: 0.30,
            weight_content_marker: 0.10,
            markers: vec![
                "[Request interrupted".to_string(),
                "No conversation found to resume".to_string(),
                "API Error:".to_string(),
            ],
        }
    }
}

/// Assign threads and corruption scores to a session's messages.
///
/// Never fails on valid messages; every message lands in exactly one thread.
pub fn analyze(dag: &MessageDag, session_id: &str, config: &CorruptionConfig) -> Session {
    if dag.is_empty() {
        return Session {
            session_id: session_id.to_string(),
            messages: Vec::new(),
            threads: Vec::new(),
            corruption: CorruptionScore::new(0.0),
            content_hash: Session::content_hash_of(&[]),
        };
    }

    let main_path = select_main_path(dag);
    let main_set: HashSet<&str> = main_path.iter().map(|s| s.as_str()).collect();
    let main_root = main_path.first().cloned();

    let mut threads: Vec<Thread> = Vec::new();
    let main_thread_id = main_path
        .first()
        .map(|root| thread_id_for_root(root));
    if let Some(root) = main_path.first() {
        threads.push(Thread {
            id: thread_id_for_root(root),
            kind: ThreadKind::Main,
            message_ids: main_path.clone(),
            topic: None,
            corruption: CorruptionScore::new(0.0),
            parent_thread_id: None,
        });
    }

    for component in off_main_components(dag, &main_set) {
        let Some(root) = component.first().and_then(|id| dag.get(id)) else {
            continue;
        };
        let root_id = root.id.clone();

        let parent_resolves = root.parent().map(|p| dag.contains(p)).unwrap_or(false);
        let kind = if parent_resolves || (root.parent().is_none() && root.is_sidechain) {
            ThreadKind::Side
        } else {
            ThreadKind::Orphan
        };
        let parent_thread_id = root
            .parent()
            .filter(|p| main_set.contains(p))
            .and(main_thread_id.as_deref())
            .map(|s| s.to_string());

        threads.push(Thread {
            id: thread_id_for_root(&root_id),
            kind,
            message_ids: component,
            topic: None,
            corruption: CorruptionScore::new(0.0),
            parent_thread_id,
        });
    }

    // Score messages, then roll scores up into threads and the session
    let mut scored: HashMap<String, f64> = HashMap::with_capacity(dag.len());
    for msg in dag.messages() {
        scored.insert(
            msg.id.clone(),
            message_score(dag, msg, &main_set, main_root.as_deref(), config),
        );
    }

    let mut weighted_sum = 0.0;
    let mut total_messages = 0usize;
    for thread in &mut threads {
        let member_sum: f64 = thread
            .message_ids
            .iter()
            .map(|id| scored.get(id).copied().unwrap_or(0.0))
            .sum();
        let mean = if thread.message_ids.is_empty() {
            0.0
        } else {
            member_sum / thread.message_ids.len() as f64
        };
        let bonus = if thread.kind == ThreadKind::Orphan { 0.2 } else { 0.0 };
        thread.corruption = CorruptionScore::new(mean + bonus);

        weighted_sum += thread.corruption.get() * thread.message_ids.len() as f64;
        total_messages += thread.message_ids.len();
    }
    let session_score = if total_messages == 0 {
        0.0
    } else {
        weighted_sum / total_messages as f64
    };

    // Write derived fields back onto the session's message copies
    let thread_of: HashMap<&str, &Thread> = threads
        .iter()
        .flat_map(|t| t.message_ids.iter().map(move |id| (id.as_str(), t)))
        .collect();
    let mut messages = dag.messages().to_vec();
    for msg in &mut messages {
        msg.corruption = CorruptionScore::new(scored.get(&msg.id).copied().unwrap_or(0.0));
        msg.thread_id = thread_of.get(msg.id.as_str()).map(|t| t.id.clone());
        msg.is_orphan = has_missing_parent_defect(dag, msg, main_root.as_deref());
    }

    let content_hash = Session::content_hash_of(&messages);
    Session {
        session_id: session_id.to_string(),
        messages,
        threads,
        corruption: CorruptionScore::new(session_score),
        content_hash,
    }
}

/// The main thread is the longest root-to-leaf path through non-sidechain
/// messages; ties broken by earliest root timestamp, then root id.
fn select_main_path(dag: &MessageDag) -> Vec<String> {
    let mut best: Option<(Vec<String>, &Message)> = None;
    for root in dag.roots() {
        if root.is_sidechain || root.parent().is_some() {
            continue;
        }
        let path = longest_path_from(dag, root);
        let better = match &best {
            None => true,
            Some((best_path, best_root)) => {
                path.len() > best_path.len()
                    || (path.len() == best_path.len()
                        && (root.timestamp, &root.id) < (best_root.timestamp, &best_root.id))
            }
        };
        if better {
            best = Some((path, root));
        }
    }
    best.map(|(path, _)| path).unwrap_or_default()
}

/// Longest downward path from `root` restricted to non-sidechain messages.
/// Iterative: preorder with tree-edge tracking, depths folded in reverse.
fn longest_path_from(dag: &MessageDag, root: &Message) -> Vec<String> {
    let mut order: Vec<String> = Vec::new();
    let mut tree_children: HashMap<String, Vec<String>> = HashMap::new();
    let mut visited: HashSet<String> = HashSet::new();
    let mut stack = vec![root.id.clone()];
    while let Some(id) = stack.pop() {
        if !visited.insert(id.clone()) {
            continue;
        }
        let mut entered = Vec::new();
        for child in dag.children_of(&id) {
            if !child.is_sidechain && !visited.contains(&child.id) {
                entered.push(child.id.clone());
            }
        }
        for child_id in entered.iter().rev() {
            stack.push(child_id.clone());
        }
        tree_children.insert(id.clone(), entered);
        order.push(id);
    }

    let mut depth: HashMap<&str, usize> = HashMap::with_capacity(order.len());
    for id in order.iter().rev() {
        let best_child = tree_children[id.as_str()]
            .iter()
            .map(|c| depth.get(c.as_str()).copied().unwrap_or(0))
            .max()
            .unwrap_or(0);
        depth.insert(id.as_str(), best_child + 1);
    }

    // Walk down picking the deepest child; children are already in
    // (timestamp, id) order, so the first maximal child is the tie-break
    let mut path = vec![root.id.clone()];
    let mut cursor = root.id.clone();
    loop {
        let kids = &tree_children[cursor.as_str()];
        let mut next: Option<(&String, usize)> = None;
        for child in kids {
            let d = depth.get(child.as_str()).copied().unwrap_or(0);
            if next.is_none_or(|(_, best)| d > best) {
                next = Some((child, d));
            }
        }
        let Some((child, _)) = next else {
            break;
        };
        let child = child.clone();
        path.push(child.clone());
        cursor = child;
    }
    path
}

/// Connected components of messages not on the main path, each ordered
/// root-first in ancestry order. Components are sorted by (root timestamp,
/// root id) for determinism.
fn off_main_components(dag: &MessageDag, main_set: &HashSet<&str>) -> Vec<Vec<String>> {
    let remaining: Vec<&Message> = dag
        .messages()
        .iter()
        .filter(|m| !main_set.contains(m.id.as_str()))
        .collect();
    let remaining_set: HashSet<&str> = remaining.iter().map(|m| m.id.as_str()).collect();

    // Undirected adjacency over parent-child edges internal to the remainder
    let mut adjacency: HashMap<&str, Vec<&str>> = HashMap::new();
    for msg in &remaining {
        if let Some(parent) = msg.parent()
            && remaining_set.contains(parent)
        {
            adjacency.entry(msg.id.as_str()).or_default().push(parent);
            adjacency.entry(parent).or_default().push(msg.id.as_str());
        }
    }

    let mut seen: HashSet<&str> = HashSet::new();
    let mut components: Vec<Vec<String>> = Vec::new();
    for msg in &remaining {
        if seen.contains(msg.id.as_str()) {
            continue;
        }
        let mut members: Vec<&Message> = Vec::new();
        let mut stack = vec![msg.id.as_str()];
        while let Some(id) = stack.pop() {
            if !seen.insert(id) {
                continue;
            }
            if let Some(member) = dag.get(id) {
                members.push(member);
            }
            if let Some(neighbors) = adjacency.get(id) {
                for &n in neighbors {
                    stack.push(n);
                }
            }
        }

        // Root = earliest member, remainder follows in (timestamp, id) order
        members.sort_by(|a, b| {
            a.timestamp
                .cmp(&b.timestamp)
                .then_with(|| a.id.cmp(&b.id))
        });
        components.push(members.into_iter().map(|m| m.id.clone()).collect());
    }

    components.sort_by(|a, b| {
        let key = |c: &Vec<String>| {
            c.first()
                .and_then(|id| dag.get(id))
                .map(|m| (m.timestamp, m.id.clone()))
        };
        key(a).cmp(&key(b))
    });
    components
}

/// Whether the message carries the missing-parent defect: a dangling parent
/// reference, or a surplus null-parent root that is neither the main root nor
/// a sidechain root.
fn has_missing_parent_defect(dag: &MessageDag, msg: &Message, main_root: Option<&str>) -> bool {
    match msg.parent() {
        Some(parent) => !dag.contains(parent),
        None => !msg.is_sidechain && main_root != Some(msg.id.as_str()),
    }
}

fn message_score(
    dag: &MessageDag,
    msg: &Message,
    main_set: &HashSet<&str>,
    main_root: Option<&str>,
    config: &CorruptionConfig,
) -> f64 {
    let mut score = 0.0;

    if has_missing_parent_defect(dag, msg, main_root) {
        score += config.weight_missing_parent;
    }

    if let Some(parent) = msg.parent().and_then(|p| dag.get(p))
        && msg.timestamp < parent.timestamp
    {
        score += config.weight_timestamp_violation;
    }

    if msg.is_sidechain {
        let connected = dag
            .ancestry(&msg.id)
            .iter()
            .any(|a| main_set.contains(a.id.as_str()));
        if !connected {
            score += config.weight_disconnected_sidechain;
        }
    }

    if config.weight_content_marker > 0.0 {
        let text = msg.content.text();
        if config.markers.iter().any(|m| text.contains(m.as_str())) {
            score += config.weight_content_marker;
        }
    }

    score.clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use archmend_types::{Content, Role};
    use chrono::{DateTime, TimeZone, Utc};

    fn ts(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    fn msg(id: &str, parent: Option<&str>, role: Role, secs: i64) -> Message {
        Message::new(
            id,
            parent.map(|p| p.to_string()),
            role,
            Content::PlainText(format!("text {}", id)),
            ts(secs),
            "s1",
        )
        .unwrap()
    }

    fn analyze_default(messages: &[Message]) -> Session {
        let dag = MessageDag::build(messages);
        analyze(&dag, "s1", &CorruptionConfig::default())
    }

    #[test]
    fn test_empty_session() {
        let session = analyze_default(&[]);
        assert!(session.threads.is_empty());
        assert_eq!(session.corruption.get(), 0.0);
    }

    #[test]
    fn test_single_message_session() {
        let session = analyze_default(&[msg("m1", None, Role::User, 10)]);
        assert_eq!(session.threads.len(), 1);
        assert_eq!(session.threads[0].kind, ThreadKind::Main);
        assert_eq!(session.threads[0].message_ids, vec!["m1"]);
        assert_eq!(session.orphan_count(), 0);
        assert_eq!(session.corruption.get(), 0.0);
    }

    #[test]
    fn test_main_thread_is_longest_path() {
        let messages = vec![
            msg("m1", None, Role::User, 10),
            msg("m2", Some("m1"), Role::Assistant, 20),
            msg("m3", Some("m2"), Role::User, 30),
            // Short competing branch off m1
            msg("b1", Some("m1"), Role::Assistant, 21),
        ];
        let session = analyze_default(&messages);
        let main = session.main_thread().unwrap();
        assert_eq!(main.message_ids, vec!["m1", "m2", "m3"]);

        // The branch becomes a side thread pointing back at main
        let side: Vec<_> = session
            .threads
            .iter()
            .filter(|t| t.kind == ThreadKind::Side)
            .collect();
        assert_eq!(side.len(), 1);
        assert_eq!(side[0].message_ids, vec!["b1"]);
        assert_eq!(side[0].parent_thread_id.as_deref(), Some(main.id.as_str()));
    }

    #[test]
    fn test_orphan_detection_null_parent_extra_root() {
        // Scenario A shape: M3 has a null parent but is not the main root
        let messages = vec![
            msg("m1", None, Role::User, 10),
            msg("m2", Some("m1"), Role::Assistant, 20),
            msg("m3", None, Role::User, 22),
        ];
        let session = analyze_default(&messages);
        assert_eq!(session.orphan_count(), 1);
        let orphan_thread = session
            .threads
            .iter()
            .find(|t| t.kind == ThreadKind::Orphan)
            .unwrap();
        assert_eq!(orphan_thread.message_ids, vec!["m3"]);
        assert!(session.corruption.get() > 0.0);
    }

    #[test]
    fn test_dangling_parent_orphan_thread() {
        let messages = vec![
            msg("m1", None, Role::User, 10),
            msg("x1", Some("ghost"), Role::User, 30),
            msg("x2", Some("x1"), Role::Assistant, 40),
        ];
        let session = analyze_default(&messages);
        let orphan = session
            .threads
            .iter()
            .find(|t| t.kind == ThreadKind::Orphan)
            .unwrap();
        assert_eq!(orphan.message_ids, vec!["x1", "x2"]);
        // Root carries the missing-parent weight, the child does not
        let x1 = session.message("x1").unwrap();
        let x2 = session.message("x2").unwrap();
        assert!((x1.corruption.get() - 0.4).abs() < 1e-9);
        assert_eq!(x2.corruption.get(), 0.0);
        // Thread mean 0.2 plus the orphan bonus
        assert!((orphan.corruption.get() - 0.4).abs() < 1e-9);
    }

    #[test]
    fn test_all_orphans_session_score() {
        let messages = vec![
            msg("a", Some("ghost1"), Role::User, 10),
            msg("b", Some("ghost2"), Role::User, 20),
        ];
        let session = analyze_default(&messages);
        assert!(session.main_thread().is_none());
        assert!(session.corruption.get() >= 0.4);
        assert_eq!(session.orphan_count(), 2);
    }

    #[test]
    fn test_timestamp_violation_scored() {
        let messages = vec![
            msg("m1", None, Role::User, 100),
            msg("m2", Some("m1"), Role::Assistant, 90),
        ];
        let session = analyze_default(&messages);
        let m2 = session.message("m2").unwrap();
        assert!((m2.corruption.get() - 0.2).abs() < 1e-9);
    }

    #[test]
    fn test_disconnected_sidechain_scored() {
        let mut side = msg("sc1", None, Role::Assistant, 50);
        side.is_sidechain = true;
        let messages = vec![msg("m1", None, Role::User, 10), side];
        let session = analyze_default(&messages);

        let sc1 = session.message("sc1").unwrap();
        assert!((sc1.corruption.get() - 0.3).abs() < 1e-9);
        // Sidechain null-parent root is a side thread, not an orphan
        let thread = session
            .threads
            .iter()
            .find(|t| t.message_ids.contains(&"sc1".to_string()))
            .unwrap();
        assert_eq!(thread.kind, ThreadKind::Side);
        assert_eq!(session.orphan_count(), 0);
    }

    #[test]
    fn test_content_marker_scored() {
        let mut m = msg("m1", None, Role::User, 10);
        m.content = Content::PlainText("[Request interrupted by user]".to_string());
        let session = analyze_default(&[m]);
        let scored = session.message("m1").unwrap();
        assert!((scored.corruption.get() - 0.1).abs() < 1e-9);
    }

    #[test]
    fn test_every_message_in_exactly_one_thread() {
        let mut side = msg("sc1", None, Role::Assistant, 50);
        side.is_sidechain = true;
        let messages = vec![
            msg("m1", None, Role::User, 10),
            msg("m2", Some("m1"), Role::Assistant, 20),
            msg("o1", Some("ghost"), Role::User, 30),
            side,
        ];
        let session = analyze_default(&messages);
        let total: usize = session.threads.iter().map(|t| t.message_ids.len()).sum();
        assert_eq!(total, session.messages.len());
        for msg in &session.messages {
            assert!(msg.thread_id.is_some());
        }
    }

    #[test]
    fn test_scores_clamped() {
        let mut m = msg("bad", Some("ghost"), Role::User, 10);
        m.is_sidechain = true;
        m.content = Content::PlainText("API Error: [Request interrupted".to_string());
        let session = analyze_default(&[m]);
        let scored = session.message("bad").unwrap();
        assert!(scored.corruption.get() <= 1.0);
        for thread in &session.threads {
            assert!(thread.corruption.get() <= 1.0);
        }
    }
}

use std::collections::{BTreeSet, HashMap, HashSet};

use archmend_types::Message;

/// Diagnostic: a child references a parent id absent from the index
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MissingParent {
    pub child_id: String,
    pub parent_id: String,
}

/// Aggregate graph shape figures
#[derive(Debug, Clone, PartialEq)]
pub struct DagStats {
    pub message_count: usize,
    pub root_count: usize,
    pub leaf_count: usize,
    pub orphan_count: usize,
    pub max_depth: usize,
    pub avg_branching: f64,
}

/// Parent→children graph over one session's messages.
///
/// Corrupted inputs can contain cycles; the graph stays queryable with the
/// cycle flag set and never panics. All child lists are sorted (timestamp,
/// then id) so iteration order is deterministic.
#[derive(Debug, Clone)]
pub struct MessageDag {
    messages: Vec<Message>,
    by_id: HashMap<String, usize>,
    children: HashMap<String, Vec<usize>>,
    roots: Vec<usize>,
    missing_parents: Vec<MissingParent>,
    duplicate_ids: Vec<String>,
    cycle_offenders: Vec<String>,
}

impl MessageDag {
    pub fn build(messages: &[Message]) -> Self {
        let messages: Vec<Message> = messages.to_vec();

        let mut by_id: HashMap<String, usize> = HashMap::with_capacity(messages.len());
        let mut duplicate_ids = Vec::new();
        for (idx, msg) in messages.iter().enumerate() {
            if by_id.contains_key(&msg.id) {
                duplicate_ids.push(msg.id.clone());
            } else {
                by_id.insert(msg.id.clone(), idx);
            }
        }

        let mut children: HashMap<String, Vec<usize>> = HashMap::new();
        let mut missing_parents = Vec::new();
        let mut roots = Vec::new();
        for (idx, msg) in messages.iter().enumerate() {
            match msg.parent() {
                Some(parent_id) => {
                    if by_id.contains_key(parent_id) {
                        children.entry(parent_id.to_string()).or_default().push(idx);
                    } else {
                        missing_parents.push(MissingParent {
                            child_id: msg.id.clone(),
                            parent_id: parent_id.to_string(),
                        });
                        roots.push(idx);
                    }
                }
                None => roots.push(idx),
            }
        }

        for child_list in children.values_mut() {
            child_list.sort_by(|&a, &b| {
                messages[a]
                    .timestamp
                    .cmp(&messages[b].timestamp)
                    .then_with(|| messages[a].id.cmp(&messages[b].id))
            });
        }

        let mut dag = Self {
            messages,
            by_id,
            children,
            roots,
            missing_parents,
            duplicate_ids,
            cycle_offenders: Vec::new(),
        };
        dag.cycle_offenders = dag.detect_cycles();
        dag
    }

    /// Three-color walk over the parent relation. Returns the identifiers on
    /// any back-edge cycle, sorted for determinism.
    fn detect_cycles(&self) -> Vec<String> {
        const WHITE: u8 = 0;
        const GRAY: u8 = 1;
        const BLACK: u8 = 2;

        let n = self.messages.len();
        let mut color = vec![WHITE; n];
        let mut offenders: BTreeSet<String> = BTreeSet::new();

        for start in 0..n {
            if color[start] != WHITE {
                continue;
            }
            let mut path: Vec<usize> = Vec::new();
            let mut cursor = Some(start);
            while let Some(idx) = cursor {
                match color[idx] {
                    WHITE => {
                        color[idx] = GRAY;
                        path.push(idx);
                        cursor = self.messages[idx]
                            .parent()
                            .and_then(|p| self.by_id.get(p).copied());
                    }
                    GRAY => {
                        // Back-edge: everything from the re-entry point on is a cycle
                        if let Some(pos) = path.iter().position(|&p| p == idx) {
                            for &p in &path[pos..] {
                                offenders.insert(self.messages[p].id.clone());
                            }
                        }
                        break;
                    }
                    _ => break,
                }
            }
            for idx in path {
                color[idx] = BLACK;
            }
        }

        offenders.into_iter().collect()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn get(&self, id: &str) -> Option<&Message> {
        self.by_id.get(id).map(|&idx| &self.messages[idx])
    }

    pub fn contains(&self, id: &str) -> bool {
        self.by_id.contains_key(id)
    }

    pub fn children_of(&self, id: &str) -> Vec<&Message> {
        self.children
            .get(id)
            .map(|indices| indices.iter().map(|&i| &self.messages[i]).collect())
            .unwrap_or_default()
    }

    pub fn parent_of(&self, id: &str) -> Option<&Message> {
        let msg = self.get(id)?;
        let parent_id = msg.parent()?;
        self.get(parent_id)
    }

    /// Root→id chain. Stops at the first repeated node when a cycle is present.
    pub fn ancestry(&self, id: &str) -> Vec<&Message> {
        let mut chain = Vec::new();
        let mut visited: HashSet<&str> = HashSet::new();
        let mut cursor = self.get(id);
        while let Some(msg) = cursor {
            if !visited.insert(msg.id.as_str()) {
                break;
            }
            chain.push(msg);
            cursor = msg.parent().and_then(|p| self.get(p));
        }
        chain.reverse();
        chain
    }

    /// Preorder traversal of the subtree rooted at `id`.
    pub fn subtree(&self, id: &str) -> Vec<&Message> {
        let Some(root) = self.get(id) else {
            return Vec::new();
        };
        let mut out = Vec::new();
        let mut visited: HashSet<&str> = HashSet::new();
        let mut stack = vec![root];
        while let Some(msg) = stack.pop() {
            if !visited.insert(msg.id.as_str()) {
                continue;
            }
            out.push(msg);
            let kids = self.children_of(&msg.id);
            for child in kids.into_iter().rev() {
                stack.push(child);
            }
        }
        out
    }

    pub fn has_cycles(&self) -> bool {
        !self.cycle_offenders.is_empty()
    }

    pub fn cycle_offenders(&self) -> &[String] {
        &self.cycle_offenders
    }

    pub fn missing_parents(&self) -> &[MissingParent] {
        &self.missing_parents
    }

    pub fn duplicate_ids(&self) -> &[String] {
        &self.duplicate_ids
    }

    pub fn roots(&self) -> Vec<&Message> {
        self.roots.iter().map(|&i| &self.messages[i]).collect()
    }

    /// Orphaned: parent id present and non-empty but unresolvable. A root
    /// (absent/empty parent) is not orphaned.
    pub fn is_orphan(&self, id: &str) -> bool {
        self.get(id)
            .and_then(|m| m.parent())
            .map(|p| !self.by_id.contains_key(p))
            .unwrap_or(false)
    }

    pub fn orphans(&self) -> Vec<&Message> {
        self.messages
            .iter()
            .filter(|m| m.parent().is_some_and(|p| !self.by_id.contains_key(p)))
            .collect()
    }

    pub fn statistics(&self) -> DagStats {
        let orphan_count = self.orphans().len();
        let leaf_count = self
            .messages
            .iter()
            .filter(|m| self.children.get(&m.id).is_none_or(|c| c.is_empty()))
            .count();

        let mut max_depth = 0usize;
        for root in &self.roots {
            max_depth = max_depth.max(self.depth_from(*root));
        }

        let branching_nodes = self
            .children
            .values()
            .filter(|c| !c.is_empty())
            .count();
        let edge_count: usize = self.children.values().map(|c| c.len()).sum();
        let avg_branching = if branching_nodes == 0 {
            0.0
        } else {
            edge_count as f64 / branching_nodes as f64
        };

        DagStats {
            message_count: self.messages.len(),
            root_count: self.roots.len(),
            leaf_count,
            orphan_count,
            max_depth,
            avg_branching,
        }
    }

    fn depth_from(&self, root: usize) -> usize {
        let mut best = 0usize;
        let mut visited: HashSet<usize> = HashSet::new();
        let mut stack = vec![(root, 1usize)];
        while let Some((idx, depth)) = stack.pop() {
            if !visited.insert(idx) {
                continue;
            }
            best = best.max(depth);
            if let Some(kids) = self.children.get(&self.messages[idx].id) {
                for &kid in kids {
                    stack.push((kid, depth + 1));
                }
            }
        }
        best
    }
}

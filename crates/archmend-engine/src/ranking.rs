use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use archmend_types::{Message, Role, jaccard_similarity};

use crate::dag::MessageDag;

/// Weights and bounds for parent-candidate ranking.
/// Weights are expected to sum to 1.0; `CoreConfig::validate` enforces it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RankingConfig {
    pub weight_content: f64,
    pub weight_temporal: f64,
    pub weight_role: f64,
    pub temporal_window_seconds: i64,
    pub min_score_floor: f64,
    pub max_candidates: usize,
}

impl Default for RankingConfig {
    fn default() -> Self {
        Self {
            weight_content: 0.5,
            weight_temporal: 0.3,
            weight_role: 0.2,
            temporal_window_seconds: 300,
            min_score_floor: 0.2,
            max_candidates: 5,
        }
    }
}

/// One ranked re-parenting candidate
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParentCandidate {
    pub id: String,
    pub score: f64,
    pub content_score: f64,
    pub temporal_score: f64,
    pub role_score: f64,
    pub delta_seconds: i64,
}

/// Parent→child role compatibility table
static ROLE_COMPAT: Lazy<HashMap<(Role, Role), f64>> = Lazy::new(|| {
    let mut table = HashMap::new();
    table.insert((Role::User, Role::Assistant), 1.0);
    table.insert((Role::Assistant, Role::User), 1.0);
    for child in [
        Role::User,
        Role::Assistant,
        Role::System,
        Role::Summary,
        Role::FileHistory,
    ] {
        table.insert((Role::System, child), 1.0);
    }
    table.insert((Role::Assistant, Role::Assistant), 0.3);
    table.insert((Role::User, Role::User), 0.3);
    table
});

const ROLE_COMPAT_DEFAULT: f64 = 0.5;
const SIDECHAIN_COMPAT: f64 = 0.5;

fn role_compatibility(parent: &Message, child: &Message) -> f64 {
    if parent.is_sidechain || child.is_sidechain {
        return SIDECHAIN_COMPAT;
    }
    ROLE_COMPAT
        .get(&(parent.role, child.role))
        .copied()
        .unwrap_or(ROLE_COMPAT_DEFAULT)
}

/// Rank candidate parents for an orphaned message.
///
/// Every non-orphan message in the session except the orphan itself is a
/// candidate. Never fails: an unknown orphan id or an empty result is a valid
/// outcome. `similarity` injects the lexical similarity function; the default
/// is token-set Jaccard.
pub fn rank_candidates(
    dag: &MessageDag,
    orphan_id: &str,
    config: &RankingConfig,
    similarity: Option<&(dyn Fn(&str, &str) -> f64 + Send + Sync)>,
) -> Vec<ParentCandidate> {
    let Some(orphan) = dag.get(orphan_id) else {
        return Vec::new();
    };
    let sim: &(dyn Fn(&str, &str) -> f64 + Send + Sync) =
        similarity.unwrap_or(&jaccard_similarity);
    let orphan_text = orphan.content.text();
    let window = config.temporal_window_seconds.max(1) as f64;

    let mut candidates: Vec<ParentCandidate> = dag
        .messages()
        .iter()
        .filter(|m| m.id != orphan_id && !dag.is_orphan(&m.id))
        .map(|candidate| {
            let content_score = sim(&orphan_text, &candidate.content.text()).clamp(0.0, 1.0);
            let delta_seconds = (orphan.timestamp - candidate.timestamp).num_seconds().abs();
            let temporal_score = (1.0 - delta_seconds as f64 / window).max(0.0);
            let role_score = role_compatibility(candidate, orphan);
            let score = config.weight_content * content_score
                + config.weight_temporal * temporal_score
                + config.weight_role * role_score;
            ParentCandidate {
                id: candidate.id.clone(),
                score,
                content_score,
                temporal_score,
                role_score,
                delta_seconds,
            }
        })
        .filter(|c| c.score >= config.min_score_floor)
        .collect();

    candidates.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.delta_seconds.cmp(&b.delta_seconds))
            .then_with(|| a.id.cmp(&b.id))
    });
    candidates.truncate(config.max_candidates);
    candidates
}

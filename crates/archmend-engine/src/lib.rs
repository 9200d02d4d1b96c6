// Engine module - pure in-memory processing (graph reconstruction, analysis,
// repair ranking). This layer sits between loaded messages and persistence;
// it performs no I/O and never fails on valid messages.

mod analyzer;
mod dag;
mod ranking;
mod validate;

pub use analyzer::{CorruptionConfig, analyze};
pub use dag::{DagStats, MessageDag, MissingParent};
pub use ranking::{ParentCandidate, RankingConfig, rank_candidates};
pub use validate::validate_reparent;

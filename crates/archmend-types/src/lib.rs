mod cancel;
mod error;
mod message;
mod repair;
mod session;
mod util;

pub use cancel::{CancelToken, Control, Interrupt};
pub use error::{Error, Result};
pub use message::{Block, Content, CorruptionScore, Message, Role};
pub use repair::{
    EventKind, HistoryEntry, ReplayDiagnostic, ReplayDiagnosticKind, RepairEvent, RepairField,
    RepairOperation, RestoredState, SessionSnapshot, SnapshotStats, UndoEntry, ValidationResult,
};
pub use session::{Session, Thread, ThreadKind, thread_id_for_root};
pub use util::*;

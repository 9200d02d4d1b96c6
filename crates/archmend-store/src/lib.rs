mod archive_file;
mod error;
mod event_store;
mod fs;
mod provider;
mod replay;
mod undo;

pub use archive_file::{ArchiveFileProvider, discover_backed_up_sessions};
pub use error::{Error, Result};
pub use event_store::{EventStore, EventStoreProvider, ReplayConfig, SCHEMA_VERSION};
pub use provider::{BackupHandle, BackupLocation, RepairProvider, SessionRef};
pub use replay::replay_events;
pub use undo::UndoLog;

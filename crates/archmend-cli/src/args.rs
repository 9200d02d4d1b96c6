use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Backend {
    /// Rewrite the archive in place with snapshots and an undo file
    Archive,
    /// Append-only event log with deterministic replay
    Events,
}

#[derive(Debug, Parser)]
#[command(name = "archmend", version, about = "Repair and analyze conversation archives")]
pub struct Cli {
    /// Workspace data directory (backups, state, event store)
    #[arg(long, global = true)]
    pub data_dir: Option<String>,

    /// Config file path (defaults to <workspace>/config.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Persistence backend
    #[arg(long, global = true, value_enum, default_value = "archive")]
    pub backend: Backend,

    /// Session id (defaults to the archive file stem)
    #[arg(long, global = true)]
    pub session: Option<String>,

    /// Emit JSON instead of plain text
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Thread structure and corruption scores for an archive
    Analyze { archive: PathBuf },

    /// Parse diagnostics, graph statistics, and duplicate tool_result report
    Doctor { archive: PathBuf },

    /// Ranked parent candidates for an orphaned message
    Suggest {
        archive: PathBuf,
        /// Identifier of the orphaned message
        orphan_id: String,
    },

    /// Re-parent a message after validation
    Repair {
        archive: PathBuf,
        /// Identifier of the message to re-parent
        target: String,
        /// Identifier of the new parent
        parent: String,
        #[arg(long, default_value = "cli")]
        operator: String,
        #[arg(long, default_value = "manual repair via cli")]
        reason: String,
    },

    /// Remove duplicated tool_result blocks
    Dedup {
        archive: PathBuf,
        #[arg(long, default_value = "cli")]
        operator: String,
    },

    /// Applied operations, oldest first
    History { archive: PathBuf },

    /// Undo the most recent change
    Undo {
        archive: PathBuf,
        #[arg(long, default_value = "cli")]
        operator: String,
    },

    /// Materialize session state, optionally as of a past instant
    /// (events backend only)
    Restore {
        archive: PathBuf,
        /// RFC 3339 upper bound for time travel
        #[arg(long)]
        at: Option<String>,
    },

    /// Sessions with snapshots under the backup root
    Sessions,
}

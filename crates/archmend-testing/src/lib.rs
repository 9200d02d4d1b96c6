mod fixtures;

pub use fixtures::{ArchiveBuilder, text_block, tool_result_block, tool_use_block};

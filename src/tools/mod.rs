//! Tool registry: the declared set of tools, their input contracts, and
//! where each one executes.

pub mod registry;
pub mod schemas;

pub use registry::{ToolDescriptor, ToolRegistry, ToolRoute, ValidatedInput};

/// Read a file from the project.
pub const READ_FILE: &str = "read_file";
/// Replace text in a project file.
pub const EDIT_FILE: &str = "edit_file";
/// List a directory.
pub const LIST_DIR: &str = "list_dir";
/// Find files by glob pattern.
pub const SEARCH_FILES: &str = "search_files";
/// Search file contents by regular expression.
pub const GREP: &str = "grep";
/// Run a shell command in the project directory.
pub const BASH: &str = "bash";
/// Run several tool calls concurrently.
pub const BATCH: &str = "batch";
/// Delegate an investigation to the read-only sub-agent.
pub const EXPLORE: &str = "explore";

/// Tools available to the explore sub-agent. None of them mutate the
/// project.
pub const EXPLORE_TOOLS: [&str; 5] = [READ_FILE, LIST_DIR, SEARCH_FILES, GREP, BATCH];

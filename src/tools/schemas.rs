//! Closed input types for each tool.
//!
//! Raw arguments from the agent are deserialised into these structs with
//! `deny_unknown_fields`, then checked for semantic constraints. The
//! normalised struct (defaults filled in) is what goes on the wire.

use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Upper bound for an explicit `bash` timeout argument, in seconds.
pub const MAX_BASH_TIMEOUT_SECONDS: u64 = 1800;

/// Behaviour shared by every tool input type.
pub trait ToolInput: DeserializeOwned + Serialize {
    /// Semantic checks beyond the type shape. Returns the violation text.
    fn check(&self) -> Result<(), String> {
        Ok(())
    }

    /// Caller-requested deadline carried in the arguments, if any.
    fn requested_timeout(&self) -> Option<Duration> {
        None
    }
}

/// Deserialise and check raw arguments as `T`.
///
/// Returns the normalised argument map and any requested timeout, or the
/// violation text.
pub(crate) fn parse_input<T: ToolInput>(
    raw: Value,
) -> Result<(Map<String, Value>, Option<Duration>), String> {
    if !raw.is_object() {
        return Err("arguments must be a JSON object".into());
    }
    let input: T = serde_json::from_value(raw).map_err(|e| e.to_string())?;
    input.check()?;
    let timeout = input.requested_timeout();
    match serde_json::to_value(&input).map_err(|e| e.to_string())? {
        Value::Object(map) => Ok((map, timeout)),
        _ => Err("arguments did not normalise to an object".into()),
    }
}

fn require_non_empty(field: &str, value: &str) -> Result<(), String> {
    if value.trim().is_empty() {
        Err(format!("`{field}` must not be empty"))
    } else {
        Ok(())
    }
}

/// `read_file` arguments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReadFileInput {
    /// File path, relative to the project directory or absolute.
    pub path: String,
    /// First line to return (0-based).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offset: Option<u64>,
    /// Maximum number of lines to return.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<u64>,
}

impl ToolInput for ReadFileInput {
    fn check(&self) -> Result<(), String> {
        require_non_empty("path", &self.path)?;
        if self.limit == Some(0) {
            return Err("`limit` must be greater than zero".into());
        }
        Ok(())
    }
}

/// `edit_file` arguments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EditFileInput {
    /// File to edit.
    pub path: String,
    /// Exact text to replace.
    pub old_string: String,
    /// Replacement text.
    pub new_string: String,
    /// Replace every occurrence instead of requiring a unique match.
    #[serde(default)]
    pub replace_all: bool,
}

impl ToolInput for EditFileInput {
    fn check(&self) -> Result<(), String> {
        require_non_empty("path", &self.path)?;
        if self.old_string == self.new_string {
            return Err("`old_string` and `new_string` must differ".into());
        }
        Ok(())
    }
}

fn default_dir() -> String {
    ".".into()
}

/// `list_dir` arguments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ListDirInput {
    /// Directory to list.
    #[serde(default = "default_dir")]
    pub path: String,
    /// Glob patterns to leave out.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ignore: Vec<String>,
}

impl ToolInput for ListDirInput {
    fn check(&self) -> Result<(), String> {
        require_non_empty("path", &self.path)
    }
}

/// `search_files` arguments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SearchFilesInput {
    /// Glob pattern, e.g. `src/**/*.rs`.
    pub pattern: String,
    /// Directory to search from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

impl ToolInput for SearchFilesInput {
    fn check(&self) -> Result<(), String> {
        require_non_empty("pattern", &self.pattern)
    }
}

/// `grep` arguments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GrepInput {
    /// Regular expression to search for.
    pub pattern: String,
    /// Directory or file to search.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    /// Glob restricting which files are searched.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub include: Option<String>,
    /// Match without regard to case.
    #[serde(default)]
    pub case_insensitive: bool,
}

impl ToolInput for GrepInput {
    fn check(&self) -> Result<(), String> {
        require_non_empty("pattern", &self.pattern)
    }
}

/// `bash` arguments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BashInput {
    /// Command line passed to the shell.
    pub command: String,
    /// Seconds the daemon should allow the command to run.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
    /// Short description of what the command does.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl ToolInput for BashInput {
    fn check(&self) -> Result<(), String> {
        require_non_empty("command", &self.command)?;
        match self.timeout {
            Some(0) => Err("`timeout` must be greater than zero".into()),
            Some(secs) if secs > MAX_BASH_TIMEOUT_SECONDS => Err(format!(
                "`timeout` must not exceed {MAX_BASH_TIMEOUT_SECONDS} seconds"
            )),
            _ => Ok(()),
        }
    }

    fn requested_timeout(&self) -> Option<Duration> {
        self.timeout.map(Duration::from_secs)
    }
}

fn empty_args() -> Value {
    Value::Object(Map::new())
}

/// One entry of a `batch` call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BatchEntry {
    /// Tool to invoke.
    pub tool: String,
    /// Raw arguments for that tool; validated when the entry is dispatched.
    #[serde(default = "empty_args")]
    pub args: Value,
}

/// `batch` arguments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BatchInput {
    /// Calls to run concurrently, in the order results are reported.
    pub calls: Vec<BatchEntry>,
}

impl ToolInput for BatchInput {}

/// `explore` arguments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExploreInput {
    /// The question or investigation to delegate.
    pub task: String,
    /// Directory to focus on.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

impl ToolInput for ExploreInput {
    fn check(&self) -> Result<(), String> {
        require_non_empty("task", &self.task)
    }
}

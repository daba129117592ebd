//! Tool descriptors and the registry that holds them.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::Serialize;
use serde_json::{json, Map, Value};

use super::schemas::{
    parse_input, BashInput, BatchInput, EditFileInput, ExploreInput, GrepInput, ListDirInput,
    ReadFileInput, SearchFilesInput, ToolInput, MAX_BASH_TIMEOUT_SECONDS,
};
use super::{BASH, BATCH, EDIT_FILE, EXPLORE, EXPLORE_TOOLS, GREP, LIST_DIR, READ_FILE, SEARCH_FILES};
use crate::config::TimeoutConfig;
use crate::{AppError, Result};

/// Where a tool call is carried out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolRoute {
    /// Sent to the daemon as a call envelope.
    Remote,
    /// Fanned out by the batch coordinator into remote calls.
    Batch,
    /// Run by the explore sub-agent as a stream.
    Explore,
}

/// Arguments that passed validation.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedInput {
    /// Normalised argument map, ready for the wire.
    pub input: Map<String, Value>,
    /// Deadline requested by the arguments themselves (`bash` `timeout`).
    pub requested_timeout: Option<Duration>,
}

type Validator = fn(Value) -> std::result::Result<(Map<String, Value>, Option<Duration>), String>;

/// Contract for one tool: name, input schema, description, route, default
/// deadline.
///
/// The JSON schema is what the agent sees; the closed input type behind
/// `validator` is what actually rejects malformed arguments.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDescriptor {
    /// Tool name, also the envelope `method`.
    pub name: String,
    /// Human-readable description for the agent.
    pub description: String,
    /// JSON schema of the arguments.
    pub input_schema: Value,
    /// Where calls to this tool go.
    pub route: ToolRoute,
    /// Deadline when the caller does not request one.
    #[serde(skip)]
    pub default_timeout: Duration,
    #[serde(skip)]
    validator: Validator,
}

impl ToolDescriptor {
    /// Build a descriptor validated by the input type `T`.
    #[must_use]
    pub fn new<T: ToolInput>(
        name: &str,
        description: &str,
        input_schema: Value,
        route: ToolRoute,
        default_timeout: Duration,
    ) -> Self {
        Self {
            name: name.to_owned(),
            description: description.to_owned(),
            input_schema,
            route,
            default_timeout,
            validator: parse_input::<T>,
        }
    }

    /// Validate raw arguments against this tool's input type.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::InvalidArguments`] naming the tool and the
    /// violation.
    pub fn validate(&self, raw: Value) -> Result<ValidatedInput> {
        let (input, requested_timeout) = (self.validator)(raw)
            .map_err(|detail| AppError::InvalidArguments(format!("{}: {detail}", self.name)))?;
        Ok(ValidatedInput {
            input,
            requested_timeout,
        })
    }
}

/// Immutable-after-construction set of tool descriptors.
#[derive(Debug, Clone, Default)]
pub struct ToolRegistry {
    tools: BTreeMap<String, ToolDescriptor>,
}

impl ToolRegistry {
    /// Empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every built-in tool, deadlines taken from `timeouts`.
    #[must_use]
    pub fn builtin(timeouts: &TimeoutConfig) -> Self {
        let tools = builtin_tools(timeouts)
            .into_iter()
            .map(|tool| (tool.name.clone(), tool))
            .collect();
        Self { tools }
    }

    /// Add a descriptor.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Config`] if a tool with the same name exists.
    pub fn register(&mut self, descriptor: ToolDescriptor) -> Result<()> {
        if self.tools.contains_key(&descriptor.name) {
            return Err(AppError::Config(format!(
                "tool '{}' is already registered",
                descriptor.name
            )));
        }
        self.tools.insert(descriptor.name.clone(), descriptor);
        Ok(())
    }

    /// Look up a descriptor.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&ToolDescriptor> {
        self.tools.get(name)
    }

    /// Whether `name` is registered.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// Registered tool names in sorted order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.tools.keys().map(String::as_str)
    }

    /// Registered descriptors in name order.
    pub fn descriptors(&self) -> impl Iterator<Item = &ToolDescriptor> {
        self.tools.values()
    }

    /// Number of registered tools.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Whether the registry is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// A narrower registry holding only the named tools that exist here.
    #[must_use]
    pub fn restricted(&self, names: &[&str]) -> Self {
        let tools = self
            .tools
            .iter()
            .filter(|(name, _)| names.contains(&name.as_str()))
            .map(|(name, tool)| (name.clone(), tool.clone()))
            .collect();
        Self { tools }
    }

    /// The read-only subset available to the explore sub-agent.
    #[must_use]
    pub fn explore_subset(&self) -> Self {
        self.restricted(&EXPLORE_TOOLS)
    }

    /// Descriptors as a JSON array, for exposing to the agent.
    #[must_use]
    pub fn to_json(&self) -> Value {
        Value::Array(
            self.descriptors()
                .filter_map(|tool| serde_json::to_value(tool).ok())
                .collect(),
        )
    }
}

#[allow(clippy::too_many_lines)] // Tool definitions are intentionally verbose for clarity.
fn builtin_tools(timeouts: &TimeoutConfig) -> Vec<ToolDescriptor> {
    let default = Duration::from_secs(timeouts.default_seconds);
    vec![
        ToolDescriptor::new::<ReadFileInput>(
            READ_FILE,
            "Read a file from the project directory. Supports reading a window of \
             lines with `offset` and `limit`.",
            json!({
                "type": "object",
                "properties": {
                    "path": { "type": "string" },
                    "offset": { "type": "integer", "minimum": 0 },
                    "limit": { "type": "integer", "minimum": 1 }
                },
                "required": ["path"],
                "additionalProperties": false
            }),
            ToolRoute::Remote,
            default,
        ),
        ToolDescriptor::new::<EditFileInput>(
            EDIT_FILE,
            "Replace an exact string in a project file. Fails unless `old_string` \
             matches exactly once, or `replace_all` is set.",
            json!({
                "type": "object",
                "properties": {
                    "path": { "type": "string" },
                    "old_string": { "type": "string" },
                    "new_string": { "type": "string" },
                    "replace_all": { "type": "boolean", "default": false }
                },
                "required": ["path", "old_string", "new_string"],
                "additionalProperties": false
            }),
            ToolRoute::Remote,
            default,
        ),
        ToolDescriptor::new::<ListDirInput>(
            LIST_DIR,
            "List the entries of a directory in the project.",
            json!({
                "type": "object",
                "properties": {
                    "path": { "type": "string", "default": "." },
                    "ignore": { "type": "array", "items": { "type": "string" } }
                },
                "additionalProperties": false
            }),
            ToolRoute::Remote,
            default,
        ),
        ToolDescriptor::new::<SearchFilesInput>(
            SEARCH_FILES,
            "Find files whose paths match a glob pattern.",
            json!({
                "type": "object",
                "properties": {
                    "pattern": { "type": "string" },
                    "path": { "type": "string" }
                },
                "required": ["pattern"],
                "additionalProperties": false
            }),
            ToolRoute::Remote,
            default,
        ),
        ToolDescriptor::new::<GrepInput>(
            GREP,
            "Search file contents with a regular expression and return matching lines.",
            json!({
                "type": "object",
                "properties": {
                    "pattern": { "type": "string" },
                    "path": { "type": "string" },
                    "include": { "type": "string" },
                    "case_insensitive": { "type": "boolean", "default": false }
                },
                "required": ["pattern"],
                "additionalProperties": false
            }),
            ToolRoute::Remote,
            default,
        ),
        ToolDescriptor::new::<BashInput>(
            BASH,
            "Run a shell command in the project directory and return its output. \
             Long-running commands should pass `timeout` in seconds.",
            json!({
                "type": "object",
                "properties": {
                    "command": { "type": "string" },
                    "timeout": { "type": "integer", "minimum": 1, "maximum": MAX_BASH_TIMEOUT_SECONDS },
                    "description": { "type": "string" }
                },
                "required": ["command"],
                "additionalProperties": false
            }),
            ToolRoute::Remote,
            Duration::from_secs(timeouts.bash_seconds),
        ),
        ToolDescriptor::new::<BatchInput>(
            BATCH,
            "Run several independent tool calls concurrently. Results are returned \
             in input order; one failing call does not fail the others.",
            json!({
                "type": "object",
                "properties": {
                    "calls": {
                        "type": "array",
                        "items": {
                            "type": "object",
                            "properties": {
                                "tool": { "type": "string" },
                                "args": { "type": "object" }
                            },
                            "required": ["tool"]
                        }
                    }
                },
                "required": ["calls"],
                "additionalProperties": false
            }),
            ToolRoute::Batch,
            default,
        ),
        ToolDescriptor::new::<ExploreInput>(
            EXPLORE,
            "Delegate a focused investigation to a read-only sub-agent that can \
             read, list, search and grep the project. Streams its progress.",
            json!({
                "type": "object",
                "properties": {
                    "task": { "type": "string" },
                    "path": { "type": "string" }
                },
                "required": ["task"],
                "additionalProperties": false
            }),
            ToolRoute::Explore,
            Duration::from_secs(timeouts.explore_seconds),
        ),
    ]
}

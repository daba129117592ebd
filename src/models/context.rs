//! Execution context carried with every tool call.

use std::fmt::{Debug, Formatter};
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Identity and project metadata the daemon needs to know *where* and *as
/// whom* a tool call acts.
///
/// Carried per call rather than per connection so one channel can serve
/// several projects. Never persisted. The bridge treats it as opaque; only
/// daemon-side executors interpret it.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionContext {
    /// Caller identity token.
    pub identity_token: String,
    /// Project the call is scoped to, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
    /// Project working directory on the daemon's machine, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_cwd: Option<PathBuf>,
}

impl ExecutionContext {
    /// Context carrying only an identity token.
    #[must_use]
    pub fn new(identity_token: impl Into<String>) -> Self {
        Self {
            identity_token: identity_token.into(),
            project_id: None,
            project_cwd: None,
        }
    }

    /// Scope the context to a project.
    #[must_use]
    pub fn with_project(mut self, project_id: impl Into<String>) -> Self {
        self.project_id = Some(project_id.into());
        self
    }

    /// Set the project working directory.
    #[must_use]
    pub fn with_cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.project_cwd = Some(cwd.into());
        self
    }
}

// The identity token must never end up in logs.
impl Debug for ExecutionContext {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("identity_token", &"<redacted>")
            .field("project_id", &self.project_id)
            .field("project_cwd", &self.project_cwd)
            .finish()
    }
}

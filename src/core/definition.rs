//! Authored task definitions.
//!
//! A [`TaskDefinition`] is the static, nested record read from a task file.
//! It carries no runtime state; [`GraphLoader`](super::graph::GraphLoader)
//! validates a tree of them and turns it into a [`TaskGraph`](super::graph::TaskGraph).

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::graph::GraphError;

/// Field names starting with this marker are treated as comments.
pub const COMMENT_MARKER: char = '_';

/// Reserved so that "automate nothing" can be spelled `none` on a command line.
const RESERVED_NAME: &str = "none";

/// A task as authored in a task file.
///
/// A leaf has a description and no subtasks. A composite has subtasks and
/// no description; it is never executed itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskDefinition {
    pub name: String,

    /// Instructions shown to a human completing the task manually.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub prerequisites: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub subtasks: Vec<TaskDefinition>,

    /// The task has no valid manual path.
    #[serde(
        default,
        alias = "only_auto",
        alias = "automationOnly",
        skip_serializing_if = "std::ops::Not::not"
    )]
    pub automation_only: bool,

    /// Everything else. Only comment fields are accepted here.
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_yaml::Value>,
}

impl TaskDefinition {
    /// Create a leaf task.
    pub fn leaf(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: Some(description.into()),
            prerequisites: Vec::new(),
            subtasks: Vec::new(),
            automation_only: false,
            extra: BTreeMap::new(),
        }
    }

    /// Create a composite task.
    pub fn composite(name: impl Into<String>, subtasks: Vec<TaskDefinition>) -> Self {
        Self {
            name: name.into(),
            description: None,
            prerequisites: Vec::new(),
            subtasks,
            automation_only: false,
            extra: BTreeMap::new(),
        }
    }

    /// Builder: set prerequisites.
    pub fn with_prerequisites<I, S>(mut self, prerequisites: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.prerequisites = prerequisites.into_iter().map(Into::into).collect();
        self
    }

    /// Builder: mark as automation-only.
    pub fn automation_only(mut self) -> Self {
        self.automation_only = true;
        self
    }

    /// Name with surrounding whitespace removed.
    pub fn trimmed_name(&self) -> &str {
        self.name.trim()
    }

    /// Prerequisite names with surrounding whitespace removed.
    pub fn trimmed_prerequisites(&self) -> impl Iterator<Item = &str> {
        self.prerequisites.iter().map(|p| p.trim())
    }

    pub fn is_leaf(&self) -> bool {
        self.subtasks.is_empty()
    }

    /// Check this node's own shape. Does not recurse into subtasks.
    pub fn validate_shape(&self) -> Result<(), GraphError> {
        let name = self.trimmed_name();
        let invalid = |reason: String| GraphError::InvalidTask {
            task: name.to_string(),
            reason,
        };

        if name.is_empty() {
            return Err(invalid("every task must have a non-blank name".into()));
        }
        if !is_identifier(name) {
            return Err(invalid(
                "names may only contain letters, digits and underscores, and must not start with a digit"
                    .into(),
            ));
        }
        if name.eq_ignore_ascii_case(RESERVED_NAME) {
            return Err(invalid(format!("'{}' is a reserved name", RESERVED_NAME)));
        }

        let has_description = self
            .description
            .as_deref()
            .is_some_and(|d| !d.trim().is_empty());
        if self.is_leaf() && !has_description {
            return Err(invalid(
                "tasks without subtasks must have a description".into(),
            ));
        }
        if !self.is_leaf() && has_description {
            return Err(invalid(
                "a task with subtasks must not have a description; prefix the field with '_' to keep it as a comment"
                    .into(),
            ));
        }
        if !self.is_leaf() && self.automation_only {
            return Err(invalid(
                "tasks with subtasks are never automated, so they cannot be automation-only".into(),
            ));
        }

        if let Some(p) = self.prerequisites.iter().find(|p| p.trim().is_empty()) {
            return Err(invalid(format!("blank prerequisite name '{}'", p)));
        }

        let unknown: Vec<&str> = self
            .extra
            .keys()
            .map(String::as_str)
            .filter(|k| !k.starts_with(COMMENT_MARKER))
            .collect();
        if !unknown.is_empty() {
            return Err(invalid(format!(
                "unknown fields: {}; prefix them with '_' if they are meant as comments",
                unknown.join(", ")
            )));
        }

        Ok(())
    }
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

//! Task file parsing.
//!
//! A task file holds one root [`TaskDefinition`]. YAML is a superset of
//! JSON, so both formats load through the same parser.

use std::path::Path;

use tracing::debug;

use super::error::ConfigError;
use crate::core::definition::TaskDefinition;
use crate::core::graph::{GraphLoader, Placeholders, TaskGraph};

/// Loader for task files.
pub struct TaskFile;

impl TaskFile {
    /// Parse a task tree from a YAML or JSON string.
    pub fn parse(content: &str) -> Result<TaskDefinition, ConfigError> {
        let root: TaskDefinition = serde_yaml::from_str(content)?;
        Ok(root)
    }

    /// Load a task tree from a file.
    pub fn load(path: impl AsRef<Path>) -> Result<TaskDefinition, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::FileReadError {
            path: path.to_path_buf(),
            source,
        })?;
        let root = serde_yaml::from_str(&content).map_err(|source| ConfigError::YamlFileError {
            path: path.to_path_buf(),
            source,
        })?;
        debug!(path = %path.display(), "loaded task file");
        Ok(root)
    }

    /// Parse a task tree and validate it into a graph.
    pub fn parse_graph(
        content: &str,
        placeholders: impl Into<Placeholders>,
    ) -> Result<TaskGraph, ConfigError> {
        let root = Self::parse(content)?;
        Ok(GraphLoader::new().with_placeholders(placeholders).load(&root)?)
    }

    /// Load a task file and validate it into a graph.
    pub fn load_graph(
        path: impl AsRef<Path>,
        placeholders: impl Into<Placeholders>,
    ) -> Result<TaskGraph, ConfigError> {
        let root = Self::load(path)?;
        Ok(GraphLoader::new().with_placeholders(placeholders).load(&root)?)
    }
}

//! Configuration loading and parsing.
//!
//! This module provides YAML-based loading for task files and engine settings.

mod error;
mod settings;
mod task_file;

pub use error::ConfigError;
pub use settings::EngineSettings;
pub use task_file::TaskFile;

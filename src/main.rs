//! handoff - a hybrid checklist engine.
//!
//! Usage:
//!   handoff validate <TASKS> [--settings FILE]   Validate a task file without running it
//!   handoff list <TASKS> [--settings FILE]       Print the task tree in run order
//!
//! Running a checklist needs a UI and automations, so it is a library call.

use clap::{Parser, Subcommand};
use handoff::{EngineSettings, Placeholders, TaskFile, TaskGraph, TaskId};
use std::path::{Path, PathBuf};
use tracing::{error, info};

/// handoff - a hybrid checklist engine
#[derive(Parser)]
#[command(name = "handoff")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a task file without running it
    Validate {
        /// Path to the task file (YAML or JSON)
        #[arg(value_name = "TASKS")]
        tasks: PathBuf,

        /// Engine settings file providing placeholder values
        #[arg(short, long, value_name = "FILE")]
        settings: Option<PathBuf>,
    },

    /// Print the task tree with leaf indices and prerequisites
    List {
        /// Path to the task file (YAML or JSON)
        #[arg(value_name = "TASKS")]
        tasks: PathBuf,

        /// Engine settings file providing placeholder values
        #[arg(short, long, value_name = "FILE")]
        settings: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Validate { tasks, settings } => {
            validate_tasks(&tasks, settings.as_deref())?;
        }
        Commands::List { tasks, settings } => {
            list_tasks(&tasks, settings.as_deref())?;
        }
    }

    Ok(())
}

fn load_graph(
    tasks: &Path,
    settings: Option<&Path>,
) -> Result<TaskGraph, Box<dyn std::error::Error>> {
    let placeholders = match settings {
        Some(path) => EngineSettings::load(path)?.placeholders(),
        None => Placeholders::new(),
    };
    Ok(TaskFile::load_graph(tasks, placeholders)?)
}

fn validate_tasks(
    tasks: &Path,
    settings: Option<&Path>,
) -> Result<(), Box<dyn std::error::Error>> {
    info!("Validating tasks in: {}", tasks.display());

    match load_graph(tasks, settings) {
        Ok(graph) => {
            info!(
                "Task file is valid: {} task(s), {} leaf task(s)",
                graph.len(),
                graph.leaf_count()
            );
            Ok(())
        }
        Err(e) => {
            error!("Validation failed: {}", e);
            Err(e)
        }
    }
}

fn list_tasks(tasks: &Path, settings: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    let graph = load_graph(tasks, settings)?;

    println!("Tasks in {}:", tasks.display());
    println!();

    for node in graph.nodes() {
        let indent = "  ".repeat(node.depth());
        let prerequisites: Vec<&str> = node
            .effective_prerequisites()
            .iter()
            .map(TaskId::as_str)
            .collect();

        match node.index() {
            Some(index) => {
                let only_auto = if node.automation_only() {
                    " [automation only]"
                } else {
                    ""
                };
                if prerequisites.is_empty() {
                    println!("{}{:>3}. {}{}", indent, index, node.id(), only_auto);
                } else {
                    println!(
                        "{}{:>3}. {}{} (after: {})",
                        indent,
                        index,
                        node.id(),
                        only_auto,
                        prerequisites.join(", ")
                    );
                }
            }
            None => println!("{}- {}", indent, node.id()),
        }
    }

    Ok(())
}

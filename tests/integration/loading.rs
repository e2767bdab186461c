//! Task file loading integration tests.
//!
//! Tests that read task files and settings from disk and check the
//! validated graph, or the error a broken file produces.

use handoff::{ConfigError, EngineSettings, GraphError, Placeholders, TaskFile, TaskId};
use std::collections::BTreeSet;
use std::io::Write;
use tempfile::NamedTempFile;

fn write_temp(content: &str, suffix: &str) -> NamedTempFile {
    let mut file = tempfile::Builder::new().suffix(suffix).tempfile().unwrap();
    file.write_all(content.as_bytes()).unwrap();
    file.flush().unwrap();
    file
}

fn graph_error(yaml: &str) -> GraphError {
    match TaskFile::parse_graph(yaml, Placeholders::new()) {
        Err(ConfigError::Graph(e)) => e,
        Err(other) => panic!("expected a graph error, got {}", other),
        Ok(_) => panic!("expected the task file to be rejected"),
    }
}

fn ids(names: &[&str]) -> BTreeSet<TaskId> {
    names.iter().map(|n| TaskId::new(*n)).collect()
}

const BROADCAST: &str = r#"
name: broadcast
_notes: Runs every Friday.
subtasks:
  - name: wrap_up
    description: Thank the audience
    prerequisites: [show]
  - name: setup
    subtasks:
      - name: lights
        description: Switch on the lights
      - name: mic
        description: Check the microphone
        prerequisites: [lights]
  - name: show
    description: Go live on %{CHANNEL}%
    prerequisites: [setup]
    automation_only: true
"#;

#[test]
fn test_load_yaml_task_file_from_disk() {
    let file = write_temp(BROADCAST, ".yaml");
    let placeholders = Placeholders::new().with("CHANNEL", "the main channel");

    let graph = TaskFile::load_graph(file.path(), placeholders).unwrap();

    assert_eq!(graph.len(), 6);
    assert_eq!(graph.leaf_count(), 4);
    assert_eq!(graph.root().id(), &TaskId::new("broadcast"));

    let index = |name: &str| graph.get(&TaskId::new(name)).unwrap().index();
    assert_eq!(index("lights"), Some(1));
    assert_eq!(index("mic"), Some(2));
    assert_eq!(index("show"), Some(3));
    assert_eq!(index("wrap_up"), Some(4));
    assert_eq!(index("setup"), None);

    let show = graph.get(&TaskId::new("show")).unwrap();
    assert_eq!(show.description(), Some("Go live on the main channel"));
    assert!(show.automation_only());
    assert_eq!(show.prerequisites(), &[TaskId::new("setup")]);
    // Composite prerequisites resolve to the composite's leaves.
    assert_eq!(show.effective_prerequisites(), &ids(&["lights", "mic"]));

    assert_eq!(
        graph.effective_prerequisites(&TaskId::new("wrap_up")),
        Some(&ids(&["show"]))
    );
    assert_eq!(
        graph.ancestors(&TaskId::new("mic")),
        vec![TaskId::new("setup"), TaskId::new("broadcast")]
    );
}

#[test]
fn test_load_json_task_file_from_disk() {
    let json = r#"{
        "name": "root",
        "subtasks": [
            {"name": "a", "description": "First"},
            {"name": "b", "description": "Second", "prerequisites": ["a"], "only_auto": true}
        ]
    }"#;
    let file = write_temp(json, ".json");

    let graph = TaskFile::load_graph(file.path(), Placeholders::new()).unwrap();

    let b = graph.get(&TaskId::new("b")).unwrap();
    assert!(b.automation_only());
    assert_eq!(b.index(), Some(2));
    assert_eq!(b.effective_prerequisites(), &ids(&["a"]));
}

#[test]
fn test_missing_task_file() {
    let result = TaskFile::load_graph("/nonexistent/broadcast.yaml", Placeholders::new());
    assert!(matches!(result, Err(ConfigError::FileReadError { .. })));
}

#[test]
fn test_invalid_yaml_task_file() {
    let file = write_temp("name: [unterminated", ".yaml");
    let result = TaskFile::load_graph(file.path(), Placeholders::new());
    assert!(matches!(result, Err(ConfigError::YamlFileError { .. })));
}

#[test]
fn test_duplicate_names_rejected() {
    let err = graph_error(
        r#"
name: root
subtasks:
  - name: a
    description: First
  - name: group
    subtasks:
      - name: a
        description: Again
"#,
    );
    assert_eq!(err, GraphError::DuplicateTask(TaskId::new("a")));
}

#[test]
fn test_missing_prerequisite_rejected() {
    let err = graph_error(
        r#"
name: root
subtasks:
  - name: a
    description: First
    prerequisites: [ghost]
"#,
    );
    assert_eq!(
        err,
        GraphError::MissingPrerequisite {
            task: TaskId::new("a"),
            prerequisite: TaskId::new("ghost"),
        }
    );
}

#[test]
fn test_self_prerequisite_rejected() {
    let err = graph_error(
        r#"
name: root
subtasks:
  - name: a
    description: First
    prerequisites: [" a "]
"#,
    );
    assert_eq!(err, GraphError::SelfPrerequisite(TaskId::new("a")));
}

#[test]
fn test_cycle_reported_with_path() {
    let err = graph_error(
        r#"
name: root
subtasks:
  - name: a
    description: First
    prerequisites: [b]
  - name: b
    description: Second
    prerequisites: [a]
"#,
    );
    assert_eq!(
        err.to_string(),
        "the task graph contains a cycle: a -> b -> a"
    );
}

#[test]
fn test_subtask_depending_on_its_parent_is_a_cycle() {
    let err = graph_error(
        r#"
name: root
subtasks:
  - name: group
    subtasks:
      - name: inner
        description: Inside
        prerequisites: [group]
"#,
    );
    assert!(matches!(err, GraphError::CycleDetected(_)));
}

#[test]
fn test_shape_errors() {
    let cases = [
        (
            r#"
name: root
subtasks:
  - name: 9lives
    description: Bad name
"#,
            "9lives",
            "names may only contain",
        ),
        (
            r#"
name: root
subtasks:
  - name: None
    description: Reserved
"#,
            "None",
            "reserved name",
        ),
        (
            r#"
name: root
subtasks:
  - name: a
    description: First
    timeout: 5
"#,
            "a",
            "unknown fields: timeout",
        ),
        (
            r#"
name: root
description: Composites have no instructions
subtasks:
  - name: a
    description: First
"#,
            "root",
            "must not have a description",
        ),
        (
            r#"
name: root
subtasks:
  - name: a
"#,
            "a",
            "must have a description",
        ),
    ];

    for (yaml, expected_task, expected_reason) in cases {
        match graph_error(yaml) {
            GraphError::InvalidTask { task, reason } => {
                assert_eq!(task, expected_task);
                assert!(
                    reason.contains(expected_reason),
                    "reason '{}' should mention '{}'",
                    reason,
                    expected_reason
                );
            }
            other => panic!("expected an invalid task error, got {}", other),
        }
    }
}

#[test]
fn test_unknown_placeholder_rejected() {
    let err = graph_error(
        r#"
name: root
subtasks:
  - name: stream
    description: Go live on %{CHANNEL}%
"#,
    );
    assert_eq!(
        err,
        GraphError::UnknownPlaceholder {
            task: TaskId::new("stream"),
            key: "CHANNEL".to_string(),
        }
    );
}

#[test]
fn test_settings_supply_placeholders() {
    let settings_file = write_temp(
        r#"
max_concurrent_automations: 2
auto_tasks: [show]
placeholders:
  CHANNEL: "%{NETWORK}% live"
  NETWORK: Community TV
"#,
        ".yaml",
    );
    let tasks_file = write_temp(BROADCAST, ".yaml");

    let settings = EngineSettings::load(settings_file.path()).unwrap();
    assert_eq!(settings.max_concurrent_automations, Some(2));
    assert_eq!(settings.auto_tasks, Some(vec!["show".to_string()]));

    let graph = TaskFile::load_graph(tasks_file.path(), settings.placeholders()).unwrap();
    assert_eq!(
        graph.get(&TaskId::new("show")).unwrap().description(),
        Some("Go live on Community TV live")
    );
}

#[test]
fn test_settings_reject_unknown_keys() {
    let file = write_temp("max_concurrency: 2\n", ".yaml");
    assert!(EngineSettings::load(file.path()).is_err());
}

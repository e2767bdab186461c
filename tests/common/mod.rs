//! Common test utilities shared across integration tests.

#![allow(dead_code)]

use handoff::{
    Automation, AutomationRegistry, AutomationResolver, RunHandle, ServicePool, TaskFile,
    TaskGraph, TaskId, TaskStatus,
};
use std::sync::Arc;
use std::time::Duration;

/// Parse and validate a task tree written as YAML.
pub fn graph(yaml: &str) -> TaskGraph {
    TaskFile::parse_graph(yaml, handoff::Placeholders::new()).unwrap()
}

/// A resolver over the given automations and an empty service pool.
pub fn resolver(automations: Vec<Arc<dyn Automation>>) -> AutomationResolver {
    let mut registry = AutomationRegistry::new();
    for automation in automations {
        registry.register(automation).unwrap();
    }
    AutomationResolver::new(registry, Arc::new(ServicePool::new()))
}

/// Wait for a task to reach an expected status, watching the run's change
/// broadcast.
///
/// # Panics
///
/// Panics if the timeout is reached before the task reaches the status.
pub async fn wait_for_status(
    handle: &RunHandle,
    task: &str,
    expected: TaskStatus,
    timeout: Duration,
) {
    let task = TaskId::new(task);
    let mut changes = handle.subscribe();
    let reached = tokio::time::timeout(timeout, async {
        loop {
            if handle.status(&task) == Some(expected) {
                return;
            }
            if changes.changed().await.is_err() {
                // The run is over; check one last time.
                if handle.status(&task) == Some(expected) {
                    return;
                }
                std::future::pending::<()>().await;
            }
        }
    })
    .await;

    if reached.is_err() {
        panic!(
            "Timeout waiting for task {} to reach {}, current status: {:?}",
            task,
            expected,
            handle.status(&task)
        );
    }
}

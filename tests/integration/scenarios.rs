//! End-to-end checklist scenarios.
//!
//! Tests that verify ordering, fallback to a human, and composite status
//! derivation over whole runs.

use crate::common::{graph, resolver, wait_for_status};
use handoff::testing::{FlakyAutomation, FnAutomation, ScriptedMessenger};
use handoff::{
    Automation, AutomationRegistry, AutomationResolver, EngineSettings, InputSlot, ProblemLevel,
    RunReport, Scheduler, ServicePool, TaskGraph, TaskId, TaskStatus, UserResponse,
};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Barrier;

fn id(name: &str) -> TaskId {
    TaskId::new(name)
}

const SHOW: &str = r#"
name: show
subtasks:
  - name: onStart
    description: Start the show
  - name: checkA
    description: Check camera A
    prerequisites: [onStart]
  - name: checkB
    description: Check camera B
    prerequisites: [onStart]
  - name: finish
    description: Wrap up
    prerequisites: [checkA, checkB]
"#;

#[tokio::test]
async fn test_automation_failure_then_retry_succeeds() {
    let check_b = Arc::new(FlakyAutomation::new("checkB", 1));
    let messenger = Arc::new(
        ScriptedMessenger::new()
            .with_action("checkA", UserResponse::Done)
            .with_action("checkB", UserResponse::Retry)
            .with_action("finish", UserResponse::Done),
    );

    let report = Scheduler::new(
        graph(SHOW),
        resolver(vec![
            Arc::new(FnAutomation::succeeding("onStart")) as Arc<dyn Automation>,
            check_b.clone() as Arc<dyn Automation>,
        ]),
        messenger.clone(),
    )
    .run()
    .await
    .unwrap();

    for task in ["onStart", "checkA", "checkB", "finish", "show"] {
        assert_eq!(report.status(&id(task)), Some(TaskStatus::Done), "{}", task);
    }
    assert!(report.fatal.is_none());
    assert_eq!(check_b.calls(), 2);
    assert_eq!(report.task(&id("checkB")).unwrap().attempts, 2);

    let problems = report.problems(&id("checkB"));
    assert_eq!(problems.len(), 1);
    assert_eq!(problems[0].level, ProblemLevel::Error);

    // finish waits for both checks to be terminal
    let finish_started = messenger
        .first_report(&id("finish"), TaskStatus::WaitingForUser)
        .unwrap();
    let a_done = messenger.first_report(&id("checkA"), TaskStatus::Done).unwrap();
    let b_done = messenger.first_report(&id("checkB"), TaskStatus::Done).unwrap();
    assert!(finish_started > a_done);
    assert!(finish_started > b_done);

    assert!(
        messenger
            .statuses(&id("checkB"))
            .contains(&(TaskStatus::Done, "Task completed automatically.".to_string()))
    );
    assert!(
        messenger
            .statuses(&id("checkA"))
            .contains(&(TaskStatus::Done, "Task completed manually.".to_string()))
    );
}

trait Encoder: Send + Sync {}
struct HardwareEncoder;
impl Encoder for HardwareEncoder {}

#[tokio::test]
async fn test_automation_only_task_is_never_marked_done_by_default() {
    let graph = graph(
        r#"
name: stream
subtasks:
  - name: go_live
    description: Start the encoder
    only_auto: true
"#,
    );
    // The encoder disappears during the first attempt, so the retry
    // cannot be resolved.
    let automation = FnAutomation::new("go_live", |ctx| async move {
        ctx.services().remove::<dyn Encoder>();
        Err(handoff::AutomationError::failed("encoder rejected the stream key"))
    })
    .with_requirements(vec![InputSlot::of::<dyn Encoder>()]);
    let registry = AutomationRegistry::new().with(Arc::new(automation)).unwrap();
    let services = ServicePool::new().with::<dyn Encoder>(Arc::new(HardwareEncoder));
    let messenger = Arc::new(
        ScriptedMessenger::new()
            .with_action("go_live", UserResponse::Retry)
            .with_action("go_live", UserResponse::Skip),
    );

    let report = Scheduler::new(
        graph,
        AutomationResolver::new(registry, Arc::new(services)),
        messenger.clone(),
    )
    .run()
    .await
    .unwrap();

    assert_eq!(report.status(&id("go_live")), Some(TaskStatus::Skipped));

    let items = messenger.action_items();
    assert_eq!(items.len(), 2);
    assert_eq!(
        items[0].allowed,
        BTreeSet::from([UserResponse::Retry, UserResponse::Skip])
    );
    assert_eq!(items[1].allowed, BTreeSet::from([UserResponse::Skip]));
    for item in &items {
        assert!(!item.allowed.contains(&UserResponse::Done));
    }

    let levels: Vec<ProblemLevel> = report
        .problems(&id("go_live"))
        .iter()
        .map(|p| p.level)
        .collect();
    assert_eq!(levels, vec![ProblemLevel::Error, ProblemLevel::Warn]);
}

#[tokio::test]
async fn test_every_task_completable_without_automation() {
    let messenger = Arc::new(ScriptedMessenger::new().with_default_action(UserResponse::Done));

    let report = Scheduler::new(graph(SHOW), AutomationResolver::manual_only(), messenger.clone())
        .run()
        .await
        .unwrap();

    assert!(report.is_complete());
    assert_eq!(report.done_count(), 4);
    assert_eq!(messenger.action_items().len(), 4);
    for item in messenger.action_items() {
        assert_eq!(
            item.allowed,
            BTreeSet::from([UserResponse::Done, UserResponse::Skip])
        );
    }
}

#[tokio::test]
async fn test_failing_automations_fall_back_to_human() {
    let automations: Vec<Arc<dyn Automation>> = ["onStart", "checkA", "checkB", "finish"]
        .into_iter()
        .map(|name| Arc::new(FnAutomation::failing(name, "device offline")) as Arc<dyn Automation>)
        .collect();
    let messenger = Arc::new(ScriptedMessenger::new().with_default_action(UserResponse::Done));

    let report = Scheduler::new(graph(SHOW), resolver(automations), messenger)
        .run()
        .await
        .unwrap();

    assert!(report.is_complete());
    assert_eq!(report.all_problems().count(), 4);
    assert!(
        report
            .all_problems()
            .all(|p| p.message.contains("device offline"))
    );
}

#[tokio::test]
async fn test_skip_satisfies_prerequisites() {
    let messenger = Arc::new(
        ScriptedMessenger::new()
            .with_action("onStart", UserResponse::Skip)
            .with_action("checkA", UserResponse::Skip)
            .with_default_action(UserResponse::Done),
    );

    let report = Scheduler::new(graph(SHOW), AutomationResolver::manual_only(), messenger)
        .run()
        .await
        .unwrap();

    assert!(report.is_complete());
    assert_eq!(report.skipped_count(), 2);
    assert_eq!(report.status(&id("finish")), Some(TaskStatus::Done));
    assert_eq!(report.status(&id("show")), Some(TaskStatus::Done));
}

#[tokio::test]
async fn test_composite_prerequisites_gate_all_subtasks() {
    let graph = graph(
        r#"
name: broadcast
subtasks:
  - name: setup
    description: Power on the equipment
  - name: checks
    prerequisites: [setup]
    subtasks:
      - name: audio
        description: Check audio
      - name: video
        description: Check video
"#,
    );
    let messenger = Arc::new(ScriptedMessenger::new().with_default_action(UserResponse::Done));

    let report = Scheduler::new(graph, AutomationResolver::manual_only(), messenger.clone())
        .run()
        .await
        .unwrap();

    assert!(report.is_complete());
    let setup_done = messenger.first_report(&id("setup"), TaskStatus::Done).unwrap();
    for task in ["audio", "video"] {
        let started = messenger
            .first_report(&id(task), TaskStatus::WaitingForUser)
            .unwrap();
        assert!(started > setup_done, "{} started before setup finished", task);
    }
    assert!(messenger.first_report(&id("checks"), TaskStatus::Done).is_some());
}

fn assert_composites_consistent(graph: &TaskGraph, report: &RunReport) {
    for node in graph.nodes().filter(|n| !n.is_leaf()) {
        let all_terminal = node
            .leaves()
            .iter()
            .all(|leaf| report.status(leaf).is_some_and(TaskStatus::is_terminal));
        let done = report.status(node.id()) == Some(TaskStatus::Done);
        assert_eq!(done, all_terminal, "composite {} is inconsistent", node.id());
    }
}

#[tokio::test]
async fn test_composite_status_consistent_throughout_run() {
    let graph = Arc::new(graph(
        r#"
name: root
subtasks:
  - name: first
    subtasks:
      - name: a
        description: Do a
      - name: b
        description: Do b
  - name: second
    prerequisites: [first]
    subtasks:
      - name: c
        description: Do c
      - name: d
        description: Do d
"#,
    ));
    let automations: Vec<Arc<dyn Automation>> = ["a", "b", "c", "d"]
        .into_iter()
        .map(|name| {
            Arc::new(FnAutomation::new(name, |ctx| async move {
                ctx.sleep(Duration::from_millis(5)).await
            })) as Arc<dyn Automation>
        })
        .collect();

    let (handle, driver) = Scheduler::new(
        Arc::clone(&graph),
        resolver(automations),
        Arc::new(ScriptedMessenger::new()),
    )
    .with_settings(EngineSettings::default().with_poll_interval(Duration::from_millis(1)))
    .start()
    .unwrap();

    let checker_graph = Arc::clone(&graph);
    let checker = tokio::spawn(async move {
        let mut changes = handle.subscribe();
        let mut checks = 0;
        loop {
            let snapshot = handle.snapshot();
            assert_composites_consistent(&checker_graph, &snapshot);
            checks += 1;
            if snapshot.is_complete() {
                return checks;
            }
            if changes.changed().await.is_err() {
                return checks;
            }
        }
    });

    let report = driver.await.unwrap();
    let checks = tokio::time::timeout(Duration::from_secs(5), checker)
        .await
        .unwrap()
        .unwrap();

    assert!(checks > 1);
    assert!(report.is_complete());
    assert_composites_consistent(&graph, &report);
}

#[tokio::test]
async fn test_independent_tasks_run_concurrently() {
    let barrier = Arc::new(Barrier::new(2));
    let automations: Vec<Arc<dyn Automation>> = ["checkA", "checkB"]
        .into_iter()
        .map(|name| {
            let barrier = Arc::clone(&barrier);
            Arc::new(FnAutomation::new(name, move |_ctx| {
                let barrier = Arc::clone(&barrier);
                async move {
                    barrier.wait().await;
                    Ok(())
                }
            })) as Arc<dyn Automation>
        })
        .chain([
            Arc::new(FnAutomation::succeeding("onStart")) as Arc<dyn Automation>,
            Arc::new(FnAutomation::succeeding("finish")) as Arc<dyn Automation>,
        ])
        .collect();

    let report = tokio::time::timeout(
        Duration::from_secs(5),
        Scheduler::new(graph(SHOW), resolver(automations), Arc::new(ScriptedMessenger::new()))
            .run(),
    )
    .await
    .expect("checkA and checkB should run at the same time")
    .unwrap();

    assert_eq!(report.done_count(), 4);
}

#[tokio::test]
async fn test_manual_wait_does_not_block_other_tasks() {
    let graph = graph(
        r#"
name: root
subtasks:
  - name: slow_human
    description: Take your time
  - name: quick
    description: Quick automated task
  - name: after_quick
    description: Runs after quick
    prerequisites: [quick]
"#,
    );
    let messenger = Arc::new(ScriptedMessenger::new().with_pending_actions());

    let (handle, driver) = Scheduler::new(
        graph,
        resolver(vec![
            Arc::new(FnAutomation::succeeding("quick")) as Arc<dyn Automation>,
            Arc::new(FnAutomation::succeeding("after_quick")) as Arc<dyn Automation>,
        ]),
        messenger,
    )
    .start()
    .unwrap();

    wait_for_status(&handle, "after_quick", TaskStatus::Done, Duration::from_secs(5)).await;
    assert_eq!(
        handle.status(&id("slow_human")),
        Some(TaskStatus::WaitingForUser)
    );

    handle.abort();
    let report = driver.await.unwrap();
    assert!(report.aborted);
    assert_eq!(report.unfinished(), vec![&id("slow_human")]);
}

//! Channel messenger integration tests.
//!
//! A UI event loop drives the run through [`ChannelMessenger`]: it receives
//! events, answers requests by key, and may close the channel.

use crate::common::{graph, resolver};
use handoff::testing::FnAutomation;
use handoff::{
    Automation, AutomationContext, AutomationError, AutomationResolver, ChannelMessenger,
    InvalidInput, ListChoice, MessengerEvent, ProblemLevel, ProgressKey, Reply, Scheduler, TaskId,
    TaskStatus, UserResponse,
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

type Answers = Arc<Mutex<HashMap<String, String>>>;

/// Ask the human for one non-empty value and remember the answer.
async fn ask(ctx: AutomationContext, answers: Answers) -> Result<(), AutomationError> {
    let label = ctx.task().as_str().to_string();
    let value = ctx
        .messenger()
        .request_single_input(&label, false, "Enter a value", |raw| {
            if raw.trim().is_empty() {
                Err(InvalidInput::new("must not be empty"))
            } else {
                Ok(raw.to_string())
            }
        })
        .await?;
    answers.lock().unwrap().insert(label, value);
    Ok(())
}

fn asking(name: &str, answers: &Answers) -> Arc<dyn Automation> {
    let answers = Arc::clone(answers);
    Arc::new(FnAutomation::new(name, move |ctx| {
        ask(ctx, Arc::clone(&answers))
    }))
}

#[tokio::test]
async fn test_concurrent_requests_are_routed_by_key() {
    let (messenger, mut events) = ChannelMessenger::new();
    let messenger = Arc::new(messenger);
    let answers: Answers = Arc::new(Mutex::new(HashMap::new()));

    let graph = graph(
        r#"
name: root
subtasks:
  - name: title
    description: Name the stream
  - name: tags
    description: Tag the stream
"#,
    );

    let ui_messenger = Arc::clone(&messenger);
    let ui = tokio::spawn(async move {
        let mut held = Vec::new();
        let mut reprompts = Vec::new();
        let mut answered = 0;
        while answered < 3 {
            let Some(event) = events.recv().await else {
                break;
            };
            let MessengerEvent::InputRequested { key, task, request } = event else {
                continue;
            };
            if let Some(error) = request.error {
                reprompts.push((task.clone(), error));
                ui_messenger
                    .respond(key, Reply::Input("live, music".to_string()))
                    .unwrap();
                answered += 1;
                continue;
            }
            held.push((key, task));
            if held.len() == 2 {
                // Answer in the opposite order they were asked.
                for (key, task) in held.drain(..).rev() {
                    let value = if task.as_str() == "title" {
                        "Friday Show"
                    } else {
                        ""
                    };
                    ui_messenger
                        .respond(key, Reply::Input(value.to_string()))
                        .unwrap();
                    answered += 1;
                }
            }
        }
        reprompts
    });

    let report = tokio::time::timeout(
        Duration::from_secs(5),
        Scheduler::new(
            graph,
            resolver(vec![asking("title", &answers), asking("tags", &answers)]),
            messenger.clone(),
        )
        .run(),
    )
    .await
    .unwrap()
    .unwrap();

    let reprompts = ui.await.unwrap();

    assert!(report.is_complete());
    assert_eq!(report.status(&TaskId::new("title")), Some(TaskStatus::Done));
    assert_eq!(report.status(&TaskId::new("tags")), Some(TaskStatus::Done));

    let answers = answers.lock().unwrap();
    assert_eq!(answers.get("title").map(String::as_str), Some("Friday Show"));
    assert_eq!(answers.get("tags").map(String::as_str), Some("live, music"));

    // Only the empty answer was rejected, and the re-prompt said why.
    assert_eq!(
        reprompts,
        vec![(TaskId::new("tags"), "must not be empty".to_string())]
    );
    assert_eq!(messenger.pending_count(), 0);
}

#[tokio::test]
async fn test_action_items_answered_through_channel() {
    let (messenger, mut events) = ChannelMessenger::new();
    let messenger = Arc::new(messenger);

    let graph = graph(
        r#"
name: root
subtasks:
  - name: lights
    description: Switch on the lights
  - name: mic
    description: Check the microphone
    prerequisites: [lights]
"#,
    );

    let ui_messenger = Arc::clone(&messenger);
    let ui = tokio::spawn(async move {
        let mut statuses = Vec::new();
        let mut answered = 0;
        while answered < 2 {
            let Some(event) = events.recv().await else {
                break;
            };
            match event {
                MessengerEvent::Status { task, status, .. } => statuses.push((task, status)),
                MessengerEvent::ActionItem { key, task, allowed, .. } => {
                    assert!(allowed.contains(&UserResponse::Done));
                    assert!(!allowed.contains(&UserResponse::Retry));
                    // A response outside the allowed set is refused and the
                    // request stays open.
                    assert!(
                        ui_messenger
                            .respond(key, Reply::Action(UserResponse::Retry))
                            .is_err()
                    );
                    let response = if task.as_str() == "lights" {
                        UserResponse::Done
                    } else {
                        UserResponse::Skip
                    };
                    ui_messenger.respond(key, Reply::Action(response)).unwrap();
                    answered += 1;
                }
                _ => {}
            }
        }
        statuses
    });

    let report = tokio::time::timeout(
        Duration::from_secs(5),
        Scheduler::new(graph, AutomationResolver::manual_only(), messenger.clone()).run(),
    )
    .await
    .unwrap()
    .unwrap();
    let statuses = ui.await.unwrap();

    assert!(report.is_complete());
    assert_eq!(report.done_count(), 1);
    assert_eq!(report.skipped_count(), 1);
    assert!(statuses.contains(&(TaskId::new("lights"), TaskStatus::WaitingForUser)));
    assert!(statuses.contains(&(TaskId::new("mic"), TaskStatus::WaitingForUser)));
}

#[tokio::test]
async fn test_closing_channel_is_fatal_for_the_run() {
    let (messenger, mut events) = ChannelMessenger::new();
    let messenger = Arc::new(messenger);

    let graph = graph(
        r#"
name: root
subtasks:
  - name: lights
    description: Switch on the lights
  - name: mic
    description: Check the microphone
    prerequisites: [lights]
"#,
    );

    let ui_messenger = Arc::clone(&messenger);
    let ui = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            if let MessengerEvent::ActionItem { .. } = event {
                ui_messenger.close();
                break;
            }
        }
    });

    let report = tokio::time::timeout(
        Duration::from_secs(5),
        Scheduler::new(graph, AutomationResolver::manual_only(), messenger.clone()).run(),
    )
    .await
    .unwrap()
    .unwrap();
    ui.await.unwrap();

    assert!(messenger.is_closed());
    assert!(!report.aborted);
    let fatal = report.fatal.as_ref().expect("closing the channel is fatal");
    assert_eq!(fatal.level, ProblemLevel::Fatal);
    assert_eq!(fatal.task, Some(TaskId::new("lights")));
    assert_eq!(fatal.cause.as_deref(), Some("the interaction channel is closed"));

    assert_eq!(
        report.status(&TaskId::new("lights")),
        Some(TaskStatus::WaitingForUser)
    );
    assert_eq!(
        report.status(&TaskId::new("mic")),
        Some(TaskStatus::NotStarted)
    );
    assert!(!report.is_complete());
}

/// Ask which camera to record, then report the upload through a progress bar.
async fn record(
    ctx: AutomationContext,
    chosen: Arc<Mutex<Option<&'static str>>>,
) -> Result<(), AutomationError> {
    let messenger = ctx.messenger();
    if !messenger
        .request_bool("Is the projector on?", "Projector")
        .await?
    {
        return Err(AutomationError::failed("the projector is off"));
    }
    let cameras = [
        ListChoice::new("pulpit", "Pulpit camera"),
        ListChoice::new("balcony", "Balcony camera"),
    ];
    let camera = messenger
        .request_from_list(&cameras, "Which camera should record?", "Camera")
        .await?;
    *chosen.lock().unwrap() = camera;

    let bar = messenger.create_progress_bar("Uploading", 20.0, "MB");
    messenger.update_progress_bar(bar, 5.0);
    messenger.update_progress_bar(bar, 20.0);
    messenger.delete_progress_bar(bar);
    Ok(())
}

#[derive(Debug, PartialEq)]
enum Progress {
    Created(ProgressKey, String, f64, String),
    Updated(ProgressKey, f64),
    Deleted(ProgressKey),
}

#[tokio::test]
async fn test_questions_choices_and_progress_through_channel() {
    let (messenger, mut events) = ChannelMessenger::new();
    let messenger = Arc::new(messenger);
    let chosen = Arc::new(Mutex::new(None));

    let graph = graph(
        r#"
name: root
subtasks:
  - name: record
    description: Start the recording
"#,
    );
    let recorder = Arc::clone(&chosen);
    let automation: Arc<dyn Automation> = Arc::new(FnAutomation::new("record", move |ctx| {
        record(ctx, Arc::clone(&recorder))
    }));

    let ui_messenger = Arc::clone(&messenger);
    let ui = tokio::spawn(async move {
        let mut progress = Vec::new();
        let mut offered = Vec::new();
        while let Some(event) = events.recv().await {
            match event {
                MessengerEvent::ConfirmRequested { key, request, .. } => {
                    assert_eq!(request.title, "Projector");
                    ui_messenger.respond(key, Reply::Confirm(true)).unwrap();
                }
                MessengerEvent::ChoiceRequested { key, request, .. } => {
                    offered = request.choices;
                    // Out of range: refused, and the request stays open.
                    assert!(ui_messenger.respond(key, Reply::Choice(Some(2))).is_err());
                    ui_messenger.respond(key, Reply::Choice(Some(1))).unwrap();
                }
                MessengerEvent::ProgressBarCreated { key, bar, .. } => {
                    let created =
                        Progress::Created(key, bar.display_name, bar.max_value, bar.units);
                    progress.push(created)
                }
                MessengerEvent::ProgressBarUpdated { key, progress: value, .. } => {
                    progress.push(Progress::Updated(key, value))
                }
                MessengerEvent::ProgressBarDeleted { key, .. } => {
                    progress.push(Progress::Deleted(key))
                }
                MessengerEvent::Status { task, status, .. }
                    if task.as_str() == "root" && status == TaskStatus::Done =>
                {
                    break;
                }
                _ => {}
            }
        }
        (offered, progress)
    });

    let report = tokio::time::timeout(
        Duration::from_secs(5),
        Scheduler::new(graph, resolver(vec![automation]), messenger.clone()).run(),
    )
    .await
    .unwrap()
    .unwrap();
    let (offered, progress) = ui.await.unwrap();

    assert!(report.is_complete());
    assert_eq!(report.status(&TaskId::new("record")), Some(TaskStatus::Done));
    assert_eq!(*chosen.lock().unwrap(), Some("balcony"));
    assert_eq!(offered, vec!["Pulpit camera", "Balcony camera"]);

    assert_eq!(progress.len(), 4);
    let Progress::Created(key, name, max, units) = &progress[0] else {
        panic!("the bar should be created first, got {:?}", progress[0]);
    };
    assert_eq!((name.as_str(), *max, units.as_str()), ("Uploading", 20.0, "MB"));
    assert_eq!(
        progress[1..],
        [
            Progress::Updated(*key, 5.0),
            Progress::Updated(*key, 20.0),
            Progress::Deleted(*key),
        ]
    );
    assert_eq!(messenger.pending_count(), 0);
}

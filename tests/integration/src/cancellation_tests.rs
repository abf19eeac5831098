//! Cancellation across the task lifecycle.

use crate::test_utils::{await_state, await_task_state, fast_config, gw_alert, spawn_stack};
use chrono::Utc;
use nova_core::{TaskId, TaskState};
use nova_dispatch::{ObservationOutcome, OutcomeEvent};
use nova_scheduler::ScheduleRequest;
use tokio::time::{timeout, Duration};

#[tokio::test]
async fn pending_task_cancels_cleanly() {
    let config = fast_config();
    // No telescopes, so the task cannot leave Pending on its own
    let mut stack = spawn_stack(&config, &[]).await;

    stack
        .scheduler
        .submit(ScheduleRequest::AlertArrived(gw_alert("S250830ef")))
        .await
        .unwrap();
    let created = await_state(&mut stack.audit, TaskState::Pending).await;

    stack
        .scheduler
        .submit(ScheduleRequest::Cancel(created.task))
        .await
        .unwrap();
    let cancelled =
        await_task_state(&mut stack.audit, Some(created.task), TaskState::Cancelled).await;
    assert_eq!(cancelled.from, Some(TaskState::Pending));
}

#[tokio::test]
async fn cancelling_an_unknown_task_is_harmless() {
    let config = fast_config();
    let mut stack = spawn_stack(&config, &["prompt-5"]).await;

    stack
        .scheduler
        .submit(ScheduleRequest::Cancel(TaskId::new()))
        .await
        .unwrap();

    // The engine keeps going: a real alert still schedules
    stack
        .scheduler
        .submit(ScheduleRequest::AlertArrived(gw_alert("S250830gh")))
        .await
        .unwrap();
    await_state(&mut stack.audit, TaskState::Assigned).await;
}

#[tokio::test]
async fn cancel_after_dispatch_stops_the_retry_loop() {
    let config = fast_config();
    let mut stack = spawn_stack(&config, &["prompt-5"]).await;

    stack
        .scheduler
        .submit(ScheduleRequest::AlertArrived(gw_alert("S250830ij")))
        .await
        .unwrap();
    let dispatched = await_state(&mut stack.audit, TaskState::Dispatched).await;
    let telescope = dispatched.telescope.clone().unwrap();

    // Too late to stop the exposure; the cancellation is recorded
    stack
        .scheduler
        .submit(ScheduleRequest::Cancel(dispatched.task))
        .await
        .unwrap();

    // The observation then dies at the telescope
    stack
        .monitor
        .outcome(OutcomeEvent {
            task: dispatched.task,
            telescope,
            outcome: ObservationOutcome::Faulted("mount slew failure".to_string()),
            at: Utc::now(),
        })
        .await;
    await_task_state(&mut stack.audit, Some(dispatched.task), TaskState::Failed).await;

    // The cancelled task must not come back as pending
    let requeued = timeout(Duration::from_millis(500), async {
        loop {
            let event = stack.audit.recv().await.expect("audit stream closed");
            if event.task == dispatched.task && event.to == TaskState::Pending {
                return event;
            }
        }
    })
    .await;
    assert!(requeued.is_err(), "cancelled task was re-queued");
}

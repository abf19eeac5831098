//! Execution feedback: weather, faults, and the silent-observation
//! watchdog, driven through the full component stack.

use crate::test_utils::{await_state, await_task_state, fast_config, gw_alert, spawn_stack};
use chrono::Utc;
use nova_core::TaskState;
use nova_dispatch::{ObservationOutcome, OutcomeEvent};
use nova_registry::Availability;
use nova_scheduler::ScheduleRequest;

#[tokio::test]
async fn weather_abort_holds_the_telescope_and_reassigns() {
    let config = fast_config();
    let mut stack = spawn_stack(&config, &["apollo", "boreas"]).await;

    stack
        .scheduler
        .submit(ScheduleRequest::AlertArrived(gw_alert("S250830kl")))
        .await
        .unwrap();
    let dispatched = await_state(&mut stack.audit, TaskState::Dispatched).await;
    let struck = dispatched.telescope.clone().unwrap();

    stack
        .monitor
        .outcome(OutcomeEvent {
            task: dispatched.task,
            telescope: struck.clone(),
            outcome: ObservationOutcome::WeatherAborted,
            at: Utc::now(),
        })
        .await;

    // The reporting telescope is out of the pool...
    let reassigned =
        await_task_state(&mut stack.audit, Some(dispatched.task), TaskState::Assigned).await;
    assert_eq!(
        stack.registry.availability(&struck).await.unwrap(),
        Availability::WeatherHold
    );
    // ...so the retry lands on the other one
    assert_ne!(reassigned.telescope, Some(struck));
}

#[tokio::test]
async fn fault_abort_retries_on_the_same_telescope() {
    let config = fast_config();
    let mut stack = spawn_stack(&config, &["prompt-5"]).await;

    stack
        .scheduler
        .submit(ScheduleRequest::AlertArrived(gw_alert("S250830mn")))
        .await
        .unwrap();
    let dispatched = await_state(&mut stack.audit, TaskState::Dispatched).await;
    let telescope = dispatched.telescope.clone().unwrap();

    stack
        .monitor
        .outcome(OutcomeEvent {
            task: dispatched.task,
            telescope: telescope.clone(),
            outcome: ObservationOutcome::Faulted("shutter jam".to_string()),
            at: Utc::now(),
        })
        .await;

    await_task_state(&mut stack.audit, Some(dispatched.task), TaskState::Failed).await;
    let retried =
        await_task_state(&mut stack.audit, Some(dispatched.task), TaskState::Assigned).await;
    // A fault does not ground the telescope; it stays available
    assert_eq!(retried.telescope, Some(telescope.clone()));
    assert_eq!(
        stack.registry.availability(&telescope).await.unwrap(),
        Availability::Available
    );
}

#[tokio::test]
async fn silent_observation_times_out_and_requeues() {
    let mut config = fast_config();
    config.dispatch.max_observation_secs = 1;
    let mut stack = spawn_stack(&config, &["prompt-5"]).await;

    stack
        .scheduler
        .submit(ScheduleRequest::AlertArrived(gw_alert("S250830op")))
        .await
        .unwrap();
    let dispatched = await_state(&mut stack.audit, TaskState::Dispatched).await;

    // No outcome ever arrives; the watchdog synthesizes a timeout
    await_task_state(&mut stack.audit, Some(dispatched.task), TaskState::Failed).await;
    await_task_state(&mut stack.audit, Some(dispatched.task), TaskState::Pending).await;
}

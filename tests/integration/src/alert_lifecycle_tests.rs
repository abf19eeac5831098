//! Alert arrival through dispatch and completion, with history checks.

use crate::test_utils::{await_state, await_task_state, fast_config, gw_alert, spawn_stack};
use chrono::Utc;
use nova_core::{AlertId, SkyPosition, TaskState, TelescopeId};
use nova_dispatch::{ObservationOutcome, OutcomeEvent};
use nova_ingest::{AlertFeed, AlertIngestor, FeedError, RawNotice};
use nova_scheduler::ScheduleRequest;
use std::collections::VecDeque;

#[tokio::test]
async fn alert_flows_to_completion_and_into_history() {
    let config = fast_config();
    let mut stack = spawn_stack(&config, &["prompt-5"]).await;

    stack
        .scheduler
        .submit(ScheduleRequest::AlertArrived(gw_alert("S250830ab")))
        .await
        .unwrap();

    let created = await_state(&mut stack.audit, TaskState::Pending).await;
    assert_eq!(created.alert, AlertId::new("S250830ab"));
    assert_eq!(created.from, None);

    let assigned = await_task_state(&mut stack.audit, Some(created.task), TaskState::Assigned).await;
    assert_eq!(assigned.telescope, Some(TelescopeId::new("prompt-5")));

    let dispatched =
        await_task_state(&mut stack.audit, Some(created.task), TaskState::Dispatched).await;
    let telescope = dispatched.telescope.clone().unwrap();
    assert!(!stack.network.submitted.lock().unwrap().is_empty());

    stack
        .monitor
        .outcome(OutcomeEvent {
            task: created.task,
            telescope: telescope.clone(),
            outcome: ObservationOutcome::Completed,
            at: Utc::now(),
        })
        .await;
    await_task_state(&mut stack.audit, Some(created.task), TaskState::Completed).await;

    // Reservation is gone once the observation is done
    assert!(stack.registry.queue(&telescope).await.unwrap().is_empty());

    // The archive journal holds the whole lifecycle in order
    let journal = stack.archive.events_for_task(created.task).unwrap();
    let states: Vec<TaskState> = journal.iter().map(|e| e.event.to).collect();
    assert_eq!(
        states,
        vec![
            TaskState::Pending,
            TaskState::Assigned,
            TaskState::Dispatched,
            TaskState::Completed,
        ]
    );
}

#[tokio::test]
async fn non_astrophysical_alerts_spawn_no_follow_up() {
    let config = fast_config();
    let mut stack = spawn_stack(&config, &["prompt-5"]).await;

    let mut noise = gw_alert("S250830noise");
    noise.astrophysical = false;
    stack
        .scheduler
        .submit(ScheduleRequest::AlertArrived(noise))
        .await
        .unwrap();
    stack
        .scheduler
        .submit(ScheduleRequest::AlertArrived(gw_alert("S250830real")))
        .await
        .unwrap();

    // The first Pending event belongs to the real trigger
    let created = await_state(&mut stack.audit, TaskState::Pending).await;
    assert_eq!(created.alert, AlertId::new("S250830real"));
}

#[tokio::test]
async fn retraction_cancels_pending_follow_up() {
    let config = fast_config();
    // No telescopes: the task stays pending until the retraction lands
    let mut stack = spawn_stack(&config, &[]).await;

    stack
        .scheduler
        .submit(ScheduleRequest::AlertArrived(gw_alert("S250830cd")))
        .await
        .unwrap();
    let created = await_state(&mut stack.audit, TaskState::Pending).await;

    let mut revised = gw_alert("S250830cd");
    revised.position = SkyPosition::new(151.2, 19.4, 0.01);
    stack
        .scheduler
        .submit(ScheduleRequest::AlertUpdated(revised))
        .await
        .unwrap();
    stack
        .scheduler
        .submit(ScheduleRequest::AlertRetracted(AlertId::new("S250830cd")))
        .await
        .unwrap();

    let cancelled =
        await_task_state(&mut stack.audit, Some(created.task), TaskState::Cancelled).await;
    assert_eq!(cancelled.alert, AlertId::new("S250830cd"));
}

/// Scripted in-memory feed for driving the ingestor end to end.
struct QueueFeed {
    notices: VecDeque<RawNotice>,
}

#[async_trait::async_trait]
impl AlertFeed for QueueFeed {
    async fn connect(&mut self) -> Result<(), FeedError> {
        Ok(())
    }

    async fn next_notice(&mut self) -> Result<RawNotice, FeedError> {
        self.notices.pop_front().ok_or(FeedError::Closed)
    }
}

fn wxt_notice(id: &str) -> RawNotice {
    let payload = serde_json::json!({
        "id": [id],
        "instrument": "WXT",
        "trigger_time": Utc::now().to_rfc3339(),
        "ra": 120.0,
        "dec": 40.0,
        "ra_dec_error": 0.02,
        "image_snr": 9.5,
    });
    RawNotice {
        topic: "gcn.notices.einstein_probe.wxt.alert".to_string(),
        payload: serde_json::to_vec(&payload).unwrap(),
        received_at: Utc::now(),
    }
}

#[tokio::test]
async fn ingested_notice_spawns_tasks_and_redelivery_does_not() {
    let config = fast_config();
    let mut stack = spawn_stack(&config, &["prompt-5"]).await;

    let feed = QueueFeed {
        // Same notice twice: broker redelivery must be absorbed
        notices: [wxt_notice("01708973486"), wxt_notice("01708973486")].into(),
    };
    AlertIngestor::new(feed, config.feed.clone(), stack.scheduler.clone())
        .run()
        .await
        .unwrap();

    let created = await_state(&mut stack.audit, TaskState::Pending).await;
    assert_eq!(created.alert, AlertId::new("01708973486"));

    // Fast X-ray policy spawns an early and a late epoch, nothing more
    let second = await_state(&mut stack.audit, TaskState::Pending).await;
    assert_eq!(second.alert, AlertId::new("01708973486"));
    assert_ne!(second.task, created.task);
}

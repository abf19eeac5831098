//! Window-gated submission of assigned tasks.

use crate::monitor::MonitorHandle;
use crate::{NetworkError, TelescopeNetwork};
use chrono::Utc;
use nova_core::config::DispatchPolicy;
use nova_core::{ObservationTask, TaskId};
use nova_scheduler::{DispatchCommand, ScheduleRequest, SchedulerHandle};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Consumes [`DispatchCommand`]s from the scheduling engine.
///
/// Every `Submit` spawns a submission job that waits for the reserved
/// window to open, then transmits with bounded retries. Jobs are keyed
/// by task id: a re-submission (after retargeting) replaces the queued
/// job, and a `Recall` aborts it and best-effort cancels at the
/// telescope.
pub struct ObservationDispatcher {
    network: Arc<dyn TelescopeNetwork>,
    policy: DispatchPolicy,
    scheduler: SchedulerHandle,
    monitor: MonitorHandle,
    jobs: HashMap<TaskId, JoinHandle<()>>,
}

impl ObservationDispatcher {
    pub fn new(
        network: Arc<dyn TelescopeNetwork>,
        policy: DispatchPolicy,
        scheduler: SchedulerHandle,
        monitor: MonitorHandle,
    ) -> Self {
        Self {
            network,
            policy,
            scheduler,
            monitor,
            jobs: HashMap::new(),
        }
    }

    /// Process commands until the engine goes away.
    pub async fn run(mut self, mut commands: mpsc::Receiver<DispatchCommand>) {
        info!("observation dispatcher started");
        while let Some(command) = commands.recv().await {
            match command {
                DispatchCommand::Submit(task) => self.submit(task),
                DispatchCommand::Recall { task, telescope } => {
                    if let Some(job) = self.jobs.remove(&task) {
                        job.abort();
                    }
                    debug!(task = %task, telescope = %telescope, "recalling task");
                    // Off the command loop: a stalled control link must
                    // not hold up submissions to other telescopes.
                    let network = self.network.clone();
                    tokio::spawn(async move {
                        if let Err(err) = network.cancel(&telescope, task).await {
                            warn!(task = %task, error = %err, "recall at telescope failed");
                        }
                    });
                }
            }
            self.jobs.retain(|_, job| !job.is_finished());
        }
        for job in self.jobs.values() {
            job.abort();
        }
        info!("observation dispatcher stopped");
    }

    fn submit(&mut self, task: ObservationTask) {
        let id = task.id;
        if let Some(previous) = self.jobs.remove(&id) {
            debug!(task = %id, "replacing queued submission");
            previous.abort();
        }
        let job = submission_job(
            self.network.clone(),
            self.policy.clone(),
            self.scheduler.clone(),
            self.monitor.clone(),
            task,
        );
        self.jobs.insert(id, tokio::spawn(job));
    }
}

/// One task's journey from assignment to submission acknowledgment.
async fn submission_job(
    network: Arc<dyn TelescopeNetwork>,
    policy: DispatchPolicy,
    scheduler: SchedulerHandle,
    monitor: MonitorHandle,
    task: ObservationTask,
) {
    let id = task.id;
    let (Some(telescope), Some(reserved)) = (task.assigned_to.clone(), task.reserved_window)
    else {
        warn!(task = %id, "submit command without an assignment, dropped");
        return;
    };

    // Hold the request until the reserved window opens.
    let wait = reserved.start - Utc::now();
    if wait > chrono::Duration::zero() {
        tokio::time::sleep(wait.to_std().unwrap_or_default()).await;
    }

    if task.valid_window.has_closed(Utc::now()) {
        warn!(task = %id, "valid window closed before submission");
        let _ = scheduler
            .submit(ScheduleRequest::SubmissionFailed(id))
            .await;
        return;
    }

    let retries = policy.submission_retries.max(1);
    for attempt in 1..=retries {
        match network.submit(&telescope, &task).await {
            Ok(ack) => {
                info!(
                    task = %id,
                    telescope = %telescope,
                    accepted_at = %ack.accepted_at,
                    "observation dispatched"
                );
                let deadline =
                    Utc::now() + chrono::Duration::seconds(policy.max_observation_secs as i64);
                monitor.watch(id, telescope.clone(), deadline).await;
                let _ = scheduler.submit(ScheduleRequest::Dispatched(id)).await;
                return;
            }
            Err(NetworkError::Unreachable(detail)) if attempt < retries => {
                warn!(task = %id, attempt, detail, "telescope unreachable, will retry");
                let backoff = policy.submission_backoff_ms.saturating_mul(attempt as u64);
                tokio::time::sleep(std::time::Duration::from_millis(backoff)).await;
            }
            Err(err) => {
                warn!(task = %id, telescope = %telescope, error = %err, "submission failed");
                break;
            }
        }
    }
    let _ = scheduler
        .submit(ScheduleRequest::SubmissionFailed(id))
        .await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitor::MonitorEvent;
    use crate::SubmissionAck;
    use async_trait::async_trait;
    use chrono::{DateTime, Duration};
    use nova_core::{AlertId, FollowUpEpoch, InstrumentConfig, SkyPosition, TelescopeId, TimeWindow};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    struct MockNetwork {
        fail_submissions: AtomicU32,
        stall_cancels: bool,
        submitted: Mutex<Vec<TaskId>>,
        cancelled: Mutex<Vec<TaskId>>,
    }

    impl MockNetwork {
        fn new(fail_submissions: u32) -> Arc<Self> {
            Arc::new(Self {
                fail_submissions: AtomicU32::new(fail_submissions),
                stall_cancels: false,
                submitted: Mutex::new(Vec::new()),
                cancelled: Mutex::new(Vec::new()),
            })
        }

        /// Cancels hang forever, like a black-holed control endpoint.
        fn stalling() -> Arc<Self> {
            Arc::new(Self {
                fail_submissions: AtomicU32::new(0),
                stall_cancels: true,
                submitted: Mutex::new(Vec::new()),
                cancelled: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl TelescopeNetwork for MockNetwork {
        async fn submit(
            &self,
            telescope: &TelescopeId,
            task: &ObservationTask,
        ) -> Result<SubmissionAck, NetworkError> {
            if self
                .fail_submissions
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(NetworkError::Unreachable("no route".into()));
            }
            self.submitted.lock().unwrap().push(task.id);
            Ok(SubmissionAck {
                task: task.id,
                telescope: telescope.clone(),
                accepted_at: Utc::now(),
            })
        }

        async fn cancel(&self, _telescope: &TelescopeId, task: TaskId) -> Result<(), NetworkError> {
            if self.stall_cancels {
                std::future::pending::<()>().await;
            }
            self.cancelled.lock().unwrap().push(task);
            Ok(())
        }
    }

    fn assigned_task(valid_until: DateTime<Utc>) -> ObservationTask {
        let now = Utc::now();
        let start = now - Duration::seconds(1);
        let mut task = ObservationTask::new(
            AlertId::new("EP-1"),
            SkyPosition::new(150.0, 20.0, 0.05),
            InstrumentConfig {
                instrument: "optical-imager".into(),
                filter: Some("r".into()),
                exposure_secs: 60.0,
                exposure_count: 5,
            },
            TimeWindow::new(valid_until - Duration::hours(2), valid_until).unwrap(),
            FollowUpEpoch::Early,
            now,
        );
        task.assign(
            TelescopeId::new("prompt-5"),
            TimeWindow::new(start, start + Duration::seconds(300)).unwrap(),
        )
        .unwrap();
        task
    }

    fn harness(
        network: Arc<MockNetwork>,
    ) -> (
        mpsc::Sender<DispatchCommand>,
        mpsc::Receiver<ScheduleRequest>,
        mpsc::Receiver<MonitorEvent>,
        tokio::task::JoinHandle<()>,
    ) {
        let (cmd_tx, cmd_rx) = mpsc::channel(16);
        let (sched_tx, sched_rx) = mpsc::channel(16);
        let (mon_tx, mon_rx) = mpsc::channel(16);
        let policy = DispatchPolicy {
            submission_backoff_ms: 1,
            ..DispatchPolicy::default()
        };
        let dispatcher = ObservationDispatcher::new(
            network,
            policy,
            SchedulerHandle::new(sched_tx),
            MonitorHandle::new(mon_tx),
        );
        let handle = tokio::spawn(dispatcher.run(cmd_rx));
        (cmd_tx, sched_rx, mon_rx, handle)
    }

    #[tokio::test]
    async fn open_window_submits_and_acknowledges() {
        let network = MockNetwork::new(0);
        let (cmd_tx, mut sched_rx, mut mon_rx, _handle) = harness(network.clone());

        let task = assigned_task(Utc::now() + Duration::hours(1));
        let id = task.id;
        cmd_tx.send(DispatchCommand::Submit(task)).await.unwrap();

        assert!(matches!(
            sched_rx.recv().await,
            Some(ScheduleRequest::Dispatched(acked)) if acked == id
        ));
        assert_eq!(network.submitted.lock().unwrap().as_slice(), &[id]);
        // Watchdog armed before the ack went back
        assert!(matches!(
            mon_rx.recv().await,
            Some(MonitorEvent::Watch { task, .. }) if task == id
        ));
    }

    #[tokio::test]
    async fn transient_network_errors_are_retried() {
        let network = MockNetwork::new(2);
        let (cmd_tx, mut sched_rx, _mon_rx, _handle) = harness(network.clone());

        let task = assigned_task(Utc::now() + Duration::hours(1));
        let id = task.id;
        cmd_tx.send(DispatchCommand::Submit(task)).await.unwrap();

        assert!(matches!(
            sched_rx.recv().await,
            Some(ScheduleRequest::Dispatched(acked)) if acked == id
        ));
    }

    #[tokio::test]
    async fn exhausted_retries_report_submission_failure() {
        let network = MockNetwork::new(100);
        let (cmd_tx, mut sched_rx, _mon_rx, _handle) = harness(network.clone());

        let task = assigned_task(Utc::now() + Duration::hours(1));
        let id = task.id;
        cmd_tx.send(DispatchCommand::Submit(task)).await.unwrap();

        assert!(matches!(
            sched_rx.recv().await,
            Some(ScheduleRequest::SubmissionFailed(failed)) if failed == id
        ));
        assert!(network.submitted.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn closed_window_is_never_submitted() {
        let network = MockNetwork::new(0);
        let (cmd_tx, mut sched_rx, _mon_rx, _handle) = harness(network.clone());

        let task = assigned_task(Utc::now() - Duration::seconds(5));
        let id = task.id;
        cmd_tx.send(DispatchCommand::Submit(task)).await.unwrap();

        assert!(matches!(
            sched_rx.recv().await,
            Some(ScheduleRequest::SubmissionFailed(failed)) if failed == id
        ));
        assert!(network.submitted.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn stalled_recall_does_not_block_submissions() {
        let network = MockNetwork::stalling();
        let (cmd_tx, mut sched_rx, _mon_rx, _handle) = harness(network.clone());

        // This cancel never returns at the telescope
        cmd_tx
            .send(DispatchCommand::Recall {
                task: TaskId::new(),
                telescope: TelescopeId::new("prompt-5"),
            })
            .await
            .unwrap();

        let task = assigned_task(Utc::now() + Duration::hours(1));
        let id = task.id;
        cmd_tx.send(DispatchCommand::Submit(task)).await.unwrap();

        let acked = tokio::time::timeout(std::time::Duration::from_secs(5), sched_rx.recv())
            .await
            .expect("submission stuck behind a hung recall");
        assert!(matches!(acked, Some(ScheduleRequest::Dispatched(acked)) if acked == id));
    }

    #[tokio::test]
    async fn recall_cancels_at_the_telescope() {
        let network = MockNetwork::new(0);
        let (cmd_tx, mut sched_rx, _mon_rx, _handle) = harness(network.clone());

        let task = assigned_task(Utc::now() + Duration::hours(1));
        let id = task.id;
        let telescope = task.assigned_to.clone().unwrap();
        cmd_tx.send(DispatchCommand::Submit(task)).await.unwrap();
        assert!(matches!(
            sched_rx.recv().await,
            Some(ScheduleRequest::Dispatched(_))
        ));

        cmd_tx
            .send(DispatchCommand::Recall { task: id, telescope })
            .await
            .unwrap();
        drop(cmd_tx);

        // run() exits once the command channel closes; by then the
        // recall has been forwarded
        loop {
            if network.cancelled.lock().unwrap().contains(&id) {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(1)).await;
        }
    }
}

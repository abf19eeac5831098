//! Execution feedback digestion and the silent-observation watchdog.

use crate::{ObservationOutcome, OutcomeEvent};
use chrono::{DateTime, Utc};
use nova_core::{TaskId, TelescopeId};
use nova_registry::{Availability, ResourceRegistry};
use nova_scheduler::{AbortReason, ScheduleRequest, SchedulerHandle};
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Input to the feedback monitor.
#[derive(Debug, Clone)]
pub enum MonitorEvent {
    /// A submission was acknowledged; expect an outcome by `deadline`.
    Watch {
        task: TaskId,
        telescope: TelescopeId,
        deadline: DateTime<Utc>,
    },
    /// The telescope network reported how an observation ended.
    Outcome(OutcomeEvent),
}

/// Cloneable inlet to the feedback monitor, shared by the dispatcher
/// and the telescope network transport.
#[derive(Clone)]
pub struct MonitorHandle {
    tx: mpsc::Sender<MonitorEvent>,
}

impl MonitorHandle {
    pub fn new(tx: mpsc::Sender<MonitorEvent>) -> Self {
        Self { tx }
    }

    pub async fn watch(&self, task: TaskId, telescope: TelescopeId, deadline: DateTime<Utc>) {
        let event = MonitorEvent::Watch {
            task,
            telescope,
            deadline,
        };
        if self.tx.send(event).await.is_err() {
            warn!(task = %task, "feedback monitor gone, watchdog not armed");
        }
    }

    pub async fn outcome(&self, event: OutcomeEvent) {
        if self.tx.send(MonitorEvent::Outcome(event)).await.is_err() {
            warn!("feedback monitor gone, outcome dropped");
        }
    }
}

/// Digests execution outcomes into scheduling requests.
///
/// A weather abort additionally flips the reporting telescope to
/// [`Availability::WeatherHold`], taking it out of feasibility queries
/// until an operator or a clearing report restores it. A dispatched
/// observation with no outcome by its deadline is synthesized into a
/// timeout abort so no task is stranded in `Dispatched` forever.
pub struct FeedbackMonitor {
    registry: Arc<ResourceRegistry>,
    scheduler: SchedulerHandle,
}

impl FeedbackMonitor {
    pub fn new(registry: Arc<ResourceRegistry>, scheduler: SchedulerHandle) -> Self {
        Self { registry, scheduler }
    }

    /// Process watch notices and outcomes until the inlet closes.
    pub async fn run(self, mut events: mpsc::Receiver<MonitorEvent>) {
        info!("feedback monitor started");
        // Outstanding observations and their outcome deadlines. The heap
        // may hold stale entries for resolved tasks; the map is the
        // truth and stale pops are skipped.
        let mut outstanding: HashMap<TaskId, DateTime<Utc>> = HashMap::new();
        let mut deadlines: BinaryHeap<Reverse<(DateTime<Utc>, TaskId)>> = BinaryHeap::new();

        loop {
            let next = deadlines.peek().map(|Reverse((at, _))| *at);
            tokio::select! {
                event = events.recv() => match event {
                    Some(MonitorEvent::Watch { task, telescope, deadline }) => {
                        debug!(task = %task, telescope = %telescope, deadline = %deadline, "watchdog armed");
                        outstanding.insert(task, deadline);
                        deadlines.push(Reverse((deadline, task)));
                    }
                    Some(MonitorEvent::Outcome(outcome)) => {
                        outstanding.remove(&outcome.task);
                        self.digest(outcome).await;
                    }
                    None => break,
                },
                _ = sleep_until(next.unwrap_or_else(far_future)), if next.is_some() => {
                    let now = Utc::now();
                    while let Some(Reverse((at, task))) = deadlines.peek().copied() {
                        if at > now {
                            break;
                        }
                        deadlines.pop();
                        if outstanding.get(&task) == Some(&at) {
                            outstanding.remove(&task);
                            warn!(task = %task, "no outcome within the observation budget, timing out");
                            let request = ScheduleRequest::Aborted {
                                task,
                                reason: AbortReason::Timeout,
                            };
                            if self.scheduler.submit(request).await.is_err() {
                                return;
                            }
                        }
                    }
                }
            }
        }
        info!("feedback monitor stopped");
    }

    async fn digest(&self, event: OutcomeEvent) {
        let request = match event.outcome {
            ObservationOutcome::Completed => {
                info!(task = %event.task, telescope = %event.telescope, "observation completed");
                ScheduleRequest::Completed(event.task)
            }
            ObservationOutcome::WeatherAborted => {
                warn!(task = %event.task, telescope = %event.telescope, "weather abort, placing telescope on hold");
                if let Err(err) = self
                    .registry
                    .set_availability(&event.telescope, Availability::WeatherHold)
                    .await
                {
                    warn!(telescope = %event.telescope, error = %err, "weather hold failed");
                }
                ScheduleRequest::Aborted {
                    task: event.task,
                    reason: AbortReason::Weather,
                }
            }
            ObservationOutcome::Faulted(detail) => {
                warn!(task = %event.task, telescope = %event.telescope, detail, "telescope fault");
                ScheduleRequest::Aborted {
                    task: event.task,
                    reason: AbortReason::Fault,
                }
            }
        };
        let _ = self.scheduler.submit(request).await;
    }
}

async fn sleep_until(deadline: DateTime<Utc>) {
    let wait = (deadline - Utc::now()).to_std().unwrap_or_default();
    tokio::time::sleep(wait).await;
}

fn far_future() -> DateTime<Utc> {
    Utc::now() + chrono::Duration::days(3650)
}

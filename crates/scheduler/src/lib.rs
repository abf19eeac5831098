//! Scheduling engine for transient follow-up observations.
//!
//! The engine owns the task table. Every other component talks to it
//! through a bounded [`ScheduleRequest`] channel: the ingestor delivers
//! alerts, the dispatcher and feedback monitor deliver execution
//! progress, the ops surface delivers cancellations, and a periodic
//! tick triggers re-evaluation. Scheduling computation never runs on
//! the ingest path.

pub mod engine;
pub mod priority;

pub use engine::SchedulingEngine;
pub use priority::{DecayCurve, Priority, PriorityClassifier};

use chrono::{DateTime, Utc};
use nova_core::{Alert, AlertId, Classify, ErrorClass, ObservationTask, TaskId, TaskState, TelescopeId};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::debug;

/// Why a dispatched observation did not complete.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AbortReason {
    /// Weather closed the dome mid-observation.
    Weather,
    /// Hardware or control fault at the telescope.
    Fault,
    /// No outcome arrived within the maximum observation duration.
    Timeout,
}

/// A request processed by the scheduling engine, one at a time.
#[derive(Debug, Clone)]
pub enum ScheduleRequest {
    /// A new normalized alert from the ingestor.
    AlertArrived(Alert),
    /// A revised notice for an already-known trigger.
    AlertUpdated(Alert),
    /// The originating observatory retracted the event.
    AlertRetracted(AlertId),
    /// Manual or retraction-driven cancellation of one task.
    Cancel(TaskId),
    /// Periodic re-evaluation. Dropped when the queue is full.
    Tick,
    /// The dispatcher got a submission acknowledgment.
    Dispatched(TaskId),
    /// The dispatcher exhausted its submission retries.
    SubmissionFailed(TaskId),
    /// The feedback monitor saw the observation complete.
    Completed(TaskId),
    /// The feedback monitor saw the observation abort.
    Aborted { task: TaskId, reason: AbortReason },
}

impl ScheduleRequest {
    /// Ticks are droppable under backpressure; nothing else is.
    pub fn droppable(&self) -> bool {
        matches!(self, ScheduleRequest::Tick)
    }
}

/// Command handed from the engine to the observation dispatcher.
#[derive(Debug, Clone)]
pub enum DispatchCommand {
    /// Transmit this assigned task to the telescope network. A second
    /// `Submit` for the same task replaces the queued one.
    Submit(ObservationTask),
    /// Withdraw a task: drop any queued submission and, if it already
    /// went out, ask the telescope to stop (best effort).
    Recall { task: TaskId, telescope: TelescopeId },
}

/// Audit record of one task lifecycle change, consumed write-behind by
/// the archive.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskEvent {
    pub task: TaskId,
    pub alert: AlertId,
    /// `None` marks task creation.
    pub from: Option<TaskState>,
    pub to: TaskState,
    pub telescope: Option<TelescopeId>,
    pub at: DateTime<Utc>,
}

/// Scheduler errors.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// The engine is gone; the service is shutting down.
    #[error("scheduling request queue closed")]
    QueueClosed,
}

impl Classify for SchedulerError {
    fn class(&self) -> ErrorClass {
        match self {
            SchedulerError::QueueClosed => ErrorClass::Fatal,
        }
    }
}

/// Cloneable sender half of the scheduling request queue.
#[derive(Clone)]
pub struct SchedulerHandle {
    tx: mpsc::Sender<ScheduleRequest>,
}

impl SchedulerHandle {
    pub fn new(tx: mpsc::Sender<ScheduleRequest>) -> Self {
        Self { tx }
    }

    /// Enqueue a request, waiting for queue space. Alert arrivals and
    /// execution feedback are delayed under backpressure, never dropped.
    pub async fn submit(&self, request: ScheduleRequest) -> Result<(), SchedulerError> {
        self.tx
            .send(request)
            .await
            .map_err(|_| SchedulerError::QueueClosed)
    }

    /// Enqueue a periodic tick. If the queue is full the tick is
    /// dropped; the next one will cover for it.
    pub fn tick(&self) {
        if let Err(err) = self.tx.try_send(ScheduleRequest::Tick) {
            debug!(error = %err, "tick dropped, scheduling queue busy");
        }
    }
}

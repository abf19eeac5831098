//! Observation tasks and their lifecycle state machine.
//!
//! A task is the schedulable unit of follow-up work derived from one
//! alert. The scheduler owns tasks until they are assigned; the
//! dispatcher owns the in-flight copy; the feedback monitor only drives
//! state transitions.

use crate::alert::InstrumentConfig;
use crate::error::CoreError;
use crate::types::{AlertId, SkyPosition, TaskId, TelescopeId, TimeWindow};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Which follow-up epoch a task covers.
///
/// Fast transients get an early observation to catch rapid temporal
/// evolution and a late one for the slow tail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FollowUpEpoch {
    Early,
    Late,
}

impl fmt::Display for FollowUpEpoch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FollowUpEpoch::Early => write!(f, "early"),
            FollowUpEpoch::Late => write!(f, "late"),
        }
    }
}

/// Lifecycle state of an observation task.
///
/// ```text
/// Pending -> Assigned -> Dispatched -> Completed
///    ^          |            |-------> Failed (terminal when retries spent)
///    |          |                         |
///    +----------+-------------------------+   (retry / preemption)
/// ```
///
/// Any state before `Dispatched` can reach `Cancelled`; any non-terminal
/// state can reach `Expired` when the valid window closes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Pending,
    Assigned,
    Dispatched,
    Completed,
    Failed,
    Expired,
    Cancelled,
}

impl TaskState {
    /// True for states with no outgoing edges.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskState::Completed | TaskState::Expired | TaskState::Cancelled
        )
    }

    /// Whether the edge `self -> next` exists in the lifecycle.
    ///
    /// `Failed` is special: it is terminal only once the retry budget is
    /// spent, which the caller decides, so `Failed -> Pending` is a legal
    /// edge here.
    pub fn can_transition_to(&self, next: TaskState) -> bool {
        use TaskState::*;
        match (self, next) {
            (Pending, Assigned) => true,
            (Assigned, Dispatched) => true,
            (Assigned, Pending) => true, // preemption
            (Assigned, Failed) => true,  // submission retries exhausted
            (Dispatched, Completed) => true,
            (Dispatched, Failed) => true,
            (Failed, Pending) => true, // retry
            (Pending | Assigned | Dispatched | Failed, Expired) => true,
            (Pending | Assigned, Cancelled) => true,
            _ => false,
        }
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskState::Pending => "pending",
            TaskState::Assigned => "assigned",
            TaskState::Dispatched => "dispatched",
            TaskState::Completed => "completed",
            TaskState::Failed => "failed",
            TaskState::Expired => "expired",
            TaskState::Cancelled => "cancelled",
        };
        write!(f, "{s}")
    }
}

/// A unit of requested follow-up work derived from one alert.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObservationTask {
    pub id: TaskId,
    pub alert_id: AlertId,
    /// Target coordinates; revised in place only while not dispatched.
    pub target: SkyPosition,
    pub instrument: InstrumentConfig,
    /// Earliest/latest valid execution time.
    pub valid_window: TimeWindow,
    pub epoch: FollowUpEpoch,
    pub state: TaskState,
    /// Set exactly while `Assigned` or `Dispatched`.
    pub assigned_to: Option<TelescopeId>,
    /// Reserved execution window on the assigned telescope.
    pub reserved_window: Option<TimeWindow>,
    /// Completed execution attempts that failed.
    pub retries: u32,
    /// Times this task has been displaced by a higher-priority one.
    pub preemptions: u32,
    /// Once pinned, the task is exempt from further preemption.
    pub pinned: bool,
    /// Cancellation arrived after dispatch; recorded, not enforced.
    pub cancel_requested: bool,
    pub created_at: DateTime<Utc>,
}

impl ObservationTask {
    pub fn new(
        alert_id: AlertId,
        target: SkyPosition,
        instrument: InstrumentConfig,
        valid_window: TimeWindow,
        epoch: FollowUpEpoch,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: TaskId::new(),
            alert_id,
            target,
            instrument,
            valid_window,
            epoch,
            state: TaskState::Pending,
            assigned_to: None,
            reserved_window: None,
            retries: 0,
            preemptions: 0,
            pinned: false,
            cancel_requested: false,
            created_at,
        }
    }

    /// Apply a lifecycle transition, enforcing legal edges and the
    /// telescope-reference invariant (assigned_to is Some exactly in
    /// `Assigned`/`Dispatched`).
    pub fn transition(&mut self, next: TaskState) -> Result<(), CoreError> {
        if !self.state.can_transition_to(next) {
            return Err(CoreError::InvalidTransition {
                task: self.id,
                from: self.state,
                to: next,
            });
        }
        self.state = next;
        if !matches!(next, TaskState::Assigned | TaskState::Dispatched) {
            self.assigned_to = None;
            self.reserved_window = None;
        }
        Ok(())
    }

    /// Bind the task to a telescope and reserved window.
    pub fn assign(
        &mut self,
        telescope: TelescopeId,
        window: TimeWindow,
    ) -> Result<(), CoreError> {
        self.transition(TaskState::Assigned)?;
        self.assigned_to = Some(telescope);
        self.reserved_window = Some(window);
        Ok(())
    }

    /// Undo an assignment (preemption or reservation rollback).
    pub fn return_to_pending(&mut self) -> Result<(), CoreError> {
        self.transition(TaskState::Pending)
    }

    /// True once the latest valid execution time has passed.
    pub fn window_closed(&self, now: DateTime<Utc>) -> bool {
        self.valid_window.has_closed(now)
    }
}

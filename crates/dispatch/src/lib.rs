//! Observation dispatch and execution feedback.
//!
//! The dispatcher turns committed assignments into submissions on the
//! telescope network, gated on each task's reserved window. The
//! feedback monitor digests raw execution outcomes into scheduling
//! requests, flips weather-stricken telescopes to hold, and synthesizes
//! a timeout for observations that go silent. Neither component touches
//! task state directly; everything flows back through the scheduling
//! queue.

pub mod dispatcher;
pub mod monitor;

pub use dispatcher::ObservationDispatcher;
pub use monitor::{FeedbackMonitor, MonitorEvent, MonitorHandle};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use nova_core::{Classify, ErrorClass, ObservationTask, TaskId, TelescopeId};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum NetworkError {
    /// The telescope did not answer; retrying may succeed.
    #[error("telescope unreachable: {0}")]
    Unreachable(String),
    /// The telescope answered and refused the request.
    #[error("submission rejected: {0}")]
    Rejected(String),
}

impl Classify for NetworkError {
    fn class(&self) -> ErrorClass {
        match self {
            NetworkError::Unreachable(_) => ErrorClass::Transient,
            NetworkError::Rejected(_) => ErrorClass::Infeasible,
        }
    }
}

/// Acknowledgment that a telescope accepted an observation request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmissionAck {
    pub task: TaskId,
    pub telescope: TelescopeId,
    pub accepted_at: DateTime<Utc>,
}

/// How a dispatched observation ended, as reported by the telescope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObservationOutcome {
    Completed,
    /// The dome closed on weather before the exposures finished.
    WeatherAborted,
    /// Hardware or control failure.
    Faulted(String),
}

/// One execution report from the telescope network.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutcomeEvent {
    pub task: TaskId,
    pub telescope: TelescopeId,
    pub outcome: ObservationOutcome,
    pub at: DateTime<Utc>,
}

/// Transport to the robotic telescopes.
///
/// Implementations report execution progress separately, by feeding
/// [`OutcomeEvent`]s to the feedback monitor.
#[async_trait]
pub trait TelescopeNetwork: Send + Sync {
    /// Submit an observation request.
    async fn submit(
        &self,
        telescope: &TelescopeId,
        task: &ObservationTask,
    ) -> Result<SubmissionAck, NetworkError>;

    /// Ask a telescope to stop an accepted observation. Best effort:
    /// the observation may already be running or done.
    async fn cancel(&self, telescope: &TelescopeId, task: TaskId) -> Result<(), NetworkError>;
}

//! Registry error types.

use nova_core::{Classify, ErrorClass, TaskId, TelescopeId, TimeWindow};
use thiserror::Error;

/// Errors from registry operations.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// The requested window overlaps an existing reservation.
    #[error("reservation conflict on {telescope}: task {task} window {start}..{end} is taken")]
    Conflict {
        /// Telescope whose queue rejected the reservation
        telescope: TelescopeId,
        /// Task that attempted to reserve
        task: TaskId,
        /// Requested window start
        start: chrono::DateTime<chrono::Utc>,
        /// Requested window end
        end: chrono::DateTime<chrono::Utc>,
    },

    /// No telescope with that id was discovered.
    #[error("unknown telescope {0}")]
    UnknownTelescope(TelescopeId),
}

impl RegistryError {
    pub fn conflict(telescope: TelescopeId, task: TaskId, window: TimeWindow) -> Self {
        RegistryError::Conflict {
            telescope,
            task,
            start: window.start,
            end: window.end,
        }
    }
}

impl Classify for RegistryError {
    fn class(&self) -> ErrorClass {
        match self {
            RegistryError::Conflict { .. } => ErrorClass::Conflict,
            RegistryError::UnknownTelescope(_) => ErrorClass::Fatal,
        }
    }
}

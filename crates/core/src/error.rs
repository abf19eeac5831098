//! Core error types and the shared error taxonomy.

use crate::types::TaskId;
use crate::task::TaskState;
use thiserror::Error;

/// How supervision code should react to an error, independent of which
/// component produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Retried with backoff; never surfaced as a failure.
    Transient,
    /// Reservation race; retried within the same scheduling pass, bounded.
    Conflict,
    /// No telescope can ever satisfy the constraints; the task expires.
    Infeasible,
    /// Halts the affected component and is surfaced prominently.
    Fatal,
}

/// Implemented by every Nova error enum so supervisors can branch on
/// class without matching component-specific variants.
pub trait Classify {
    fn class(&self) -> ErrorClass;
}

/// Errors produced by the core domain types.
#[derive(Debug, Error)]
pub enum CoreError {
    /// A lifecycle edge that does not exist was requested.
    #[error("invalid transition for task {task}: {from} -> {to}")]
    InvalidTransition {
        /// Task whose transition was rejected
        task: TaskId,
        /// Current state
        from: TaskState,
        /// Requested state
        to: TaskState,
    },

    /// Configuration could not be read or parsed.
    #[error("configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl Classify for CoreError {
    fn class(&self) -> ErrorClass {
        match self {
            CoreError::InvalidTransition { .. } => ErrorClass::Conflict,
            CoreError::Config(_) => ErrorClass::Fatal,
            CoreError::Io(_) => ErrorClass::Transient,
        }
    }
}

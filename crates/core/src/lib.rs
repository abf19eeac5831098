//! Nova core: shared domain types for the transient follow-up scheduler.
//!
//! Everything the other Nova crates agree on lives here: alert and task
//! records, the task lifecycle state machine, sky/time primitives, the
//! error taxonomy, configuration, and logging initialization.

pub mod alert;
pub mod config;
pub mod error;
pub mod logging;
pub mod task;
pub mod types;

pub use alert::{Alert, InstrumentConfig};
pub use config::NovaConfig;
pub use error::{Classify, CoreError, ErrorClass};
pub use task::{FollowUpEpoch, ObservationTask, TaskState};
pub use types::{AlertId, EventKind, PriorityClass, SkyPosition, TaskId, TelescopeId, TimeWindow};

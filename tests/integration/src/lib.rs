//! End-to-end tests for the Nova follow-up scheduling service.
//!
//! This suite runs every component together over real channels:
//! - alert ingestion through scheduling, dispatch, and completion
//! - cancellation and retraction across the task lifecycle
//! - execution feedback: weather holds, faults, and re-scheduling
//! - reservation non-overlap under randomized load

pub mod test_utils;

#[cfg(test)]
mod alert_lifecycle_tests;

#[cfg(test)]
mod cancellation_tests;

#[cfg(test)]
mod feedback_tests;

#[cfg(test)]
mod reservation_property_tests;

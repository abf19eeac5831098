//! History archive: durable record of alerts and task lifecycles.
//!
//! SQLite backend with WAL mode. Two tables: `alerts` keeps every
//! normalized notice (original and revisions as separate rows), and
//! `task_events` is the append-only task lifecycle journal. Nothing is
//! ever updated in place; current task state is derived from the latest
//! journal entry. Writes arrive write-behind through [`ArchiveWriter`],
//! off the scheduling path, so a slow disk can delay history but never
//! an assignment.

mod store;
mod writer;

pub use store::{Archive, ArchivedTaskEvent, TaskSummary};
pub use writer::{ArchiveRecord, ArchiveWriter, Recorder};

use nova_core::{Classify, ErrorClass};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ArchiveError {
    /// Underlying SQLite failure.
    #[error("archive database error: {0}")]
    Database(#[from] rusqlite::Error),
    /// Filesystem failure opening or creating the database.
    #[error("archive io error: {0}")]
    Io(#[from] std::io::Error),
    /// A stored row no longer round-trips to a domain value.
    #[error("unrecognized {field} value `{value}` in archive row")]
    Corrupt { field: &'static str, value: String },
}

impl Classify for ArchiveError {
    fn class(&self) -> ErrorClass {
        match self {
            ArchiveError::Database(_) => ErrorClass::Transient,
            ArchiveError::Io(_) | ArchiveError::Corrupt { .. } => ErrorClass::Fatal,
        }
    }
}

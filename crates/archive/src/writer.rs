//! Write-behind archiving.

use crate::store::Archive;
use nova_core::Alert;
use nova_scheduler::TaskEvent;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{info, warn};

/// One record bound for the archive.
#[derive(Debug, Clone)]
pub enum ArchiveRecord {
    Alert(Alert),
    TaskEvent(TaskEvent),
}

/// Cloneable inlet to the archive writer.
///
/// Recording never blocks the caller: if the archive queue is full the
/// record is dropped with a warning. History is an observability
/// surface, not a correctness dependency.
#[derive(Clone)]
pub struct Recorder {
    tx: mpsc::Sender<ArchiveRecord>,
}

impl Recorder {
    pub fn new(tx: mpsc::Sender<ArchiveRecord>) -> Self {
        Self { tx }
    }

    pub fn alert(&self, alert: Alert) {
        if self.tx.try_send(ArchiveRecord::Alert(alert)).is_err() {
            warn!("archive queue full, alert record dropped");
        }
    }

    pub fn task_event(&self, event: TaskEvent) {
        if self.tx.try_send(ArchiveRecord::TaskEvent(event)).is_err() {
            warn!("archive queue full, task event dropped");
        }
    }
}

/// Consumes archive records and persists them.
pub struct ArchiveWriter {
    archive: Arc<Archive>,
}

impl ArchiveWriter {
    pub fn new(archive: Arc<Archive>) -> Self {
        Self { archive }
    }

    /// Drain records until every sender is gone.
    pub async fn run(self, mut records: mpsc::Receiver<ArchiveRecord>) {
        info!("archive writer started");
        while let Some(record) = records.recv().await {
            let result = match &record {
                ArchiveRecord::Alert(alert) => self.archive.record_alert(alert),
                ArchiveRecord::TaskEvent(event) => {
                    self.archive.record_task_event(event).map(|_| ())
                }
            };
            if let Err(err) = result {
                warn!(error = %err, "archive write failed, record lost");
            }
        }
        info!("archive writer stopped");
    }
}

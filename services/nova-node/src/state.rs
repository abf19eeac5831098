use chrono::{DateTime, Utc};
use nova_archive::Archive;
use nova_dispatch::MonitorHandle;
use nova_registry::ResourceRegistry;
use nova_scheduler::SchedulerHandle;
use std::sync::Arc;

/// Shared state behind the ops surface.
pub struct AppState {
    pub registry: Arc<ResourceRegistry>,
    pub archive: Arc<Archive>,
    pub scheduler: SchedulerHandle,
    pub monitor: MonitorHandle,
    pub started_at: DateTime<Utc>,
}

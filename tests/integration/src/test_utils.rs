//! Shared fixtures: a fully wired in-process deployment.

use async_trait::async_trait;
use chrono::{Duration as Delta, Utc};
use nova_archive::{Archive, ArchiveWriter, Recorder};
use nova_core::config::NovaConfig;
use nova_core::{Alert, AlertId, EventKind, ObservationTask, SkyPosition, TaskId, TaskState, TelescopeId};
use nova_dispatch::{
    FeedbackMonitor, MonitorHandle, NetworkError, ObservationDispatcher, SubmissionAck,
    TelescopeNetwork,
};
use nova_registry::{AlwaysVisible, Capabilities, ResourceRegistry, VisibilityModel};
use nova_scheduler::{PriorityClassifier, SchedulerHandle, SchedulingEngine, TaskEvent};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio::time::{timeout, Duration};

/// Telescope network double that acknowledges every submission.
#[derive(Default)]
pub struct InstantNetwork {
    pub submitted: Mutex<Vec<(TelescopeId, TaskId)>>,
    pub cancelled: Mutex<Vec<(TelescopeId, TaskId)>>,
}

#[async_trait]
impl TelescopeNetwork for InstantNetwork {
    async fn submit(
        &self,
        telescope: &TelescopeId,
        task: &ObservationTask,
    ) -> Result<SubmissionAck, NetworkError> {
        self.submitted
            .lock()
            .unwrap()
            .push((telescope.clone(), task.id));
        Ok(SubmissionAck {
            task: task.id,
            telescope: telescope.clone(),
            accepted_at: Utc::now(),
        })
    }

    async fn cancel(&self, telescope: &TelescopeId, task: TaskId) -> Result<(), NetworkError> {
        self.cancelled.lock().unwrap().push((telescope.clone(), task));
        Ok(())
    }
}

/// Every component of one deployment, running on real channels.
pub struct Stack {
    pub scheduler: SchedulerHandle,
    pub monitor: MonitorHandle,
    pub registry: Arc<ResourceRegistry>,
    pub archive: Arc<Archive>,
    pub network: Arc<InstantNetwork>,
    /// Copy of the engine's audit stream, also archived write-behind.
    pub audit: mpsc::Receiver<TaskEvent>,
}

pub fn fast_config() -> NovaConfig {
    let mut config = NovaConfig::default();
    config.dispatch.submission_backoff_ms = 20;
    config
}

pub async fn spawn_stack(config: &NovaConfig, telescopes: &[&str]) -> Stack {
    let _ = tracing_subscriber::fmt::try_init();

    let registry = Arc::new(ResourceRegistry::new(telescopes.iter().map(|id| {
        (
            TelescopeId::new(*id),
            Capabilities::new(["optical-imager"], ["r", "g"]),
            Arc::new(AlwaysVisible) as Arc<dyn VisibilityModel>,
        )
    })));
    let archive = Arc::new(Archive::open(":memory:").unwrap());

    let (request_tx, request_rx) = mpsc::channel(64);
    let (dispatch_tx, dispatch_rx) = mpsc::channel(64);
    let (monitor_tx, monitor_rx) = mpsc::channel(64);
    let (audit_tx, mut audit_rx) = mpsc::channel::<TaskEvent>(256);
    let (record_tx, record_rx) = mpsc::channel(256);

    let scheduler = SchedulerHandle::new(request_tx);
    let monitor = MonitorHandle::new(monitor_tx);

    tokio::spawn(ArchiveWriter::new(archive.clone()).run(record_rx));

    // Fan the audit stream out: one copy to the archive, one to the test.
    let recorder = Recorder::new(record_tx);
    let (events_tx, events_rx) = mpsc::channel(256);
    tokio::spawn(async move {
        while let Some(event) = audit_rx.recv().await {
            recorder.task_event(event.clone());
            if events_tx.send(event).await.is_err() {
                break;
            }
        }
    });

    let engine = SchedulingEngine::new(
        config.scheduler.clone(),
        PriorityClassifier::new(config.classifier.clone()),
        registry.clone(),
        dispatch_tx,
        Some(audit_tx),
    );
    tokio::spawn(engine.run(request_rx));

    let network = Arc::new(InstantNetwork::default());
    let dispatcher = ObservationDispatcher::new(
        Arc::clone(&network) as Arc<dyn TelescopeNetwork>,
        config.dispatch.clone(),
        scheduler.clone(),
        monitor.clone(),
    );
    tokio::spawn(dispatcher.run(dispatch_rx));

    tokio::spawn(FeedbackMonitor::new(registry.clone(), scheduler.clone()).run(monitor_rx));

    Stack {
        scheduler,
        monitor,
        registry,
        archive,
        network,
        audit: events_rx,
    }
}

/// A well-localized gravitational wave trigger arriving right now.
/// Spawns exactly one (early) follow-up task under the default policy.
pub fn gw_alert(id: &str) -> Alert {
    let now = Utc::now();
    Alert {
        id: AlertId::new(id),
        kind: EventKind::GravitationalWave,
        position: SkyPosition::new(150.0, 20.0, 0.05),
        event_time: now - Delta::seconds(30),
        received_at: now,
        significance: Some(12.0),
        astrophysical: true,
        expires_at: None,
        duplicate_of: None,
    }
}

/// Consume the audit stream until some task reaches `state`.
pub async fn await_state(audit: &mut mpsc::Receiver<TaskEvent>, state: TaskState) -> TaskEvent {
    await_task_state(audit, None, state).await
}

/// Consume the audit stream until `task` (if given) reaches `state`.
pub async fn await_task_state(
    audit: &mut mpsc::Receiver<TaskEvent>,
    task: Option<TaskId>,
    state: TaskState,
) -> TaskEvent {
    timeout(Duration::from_secs(10), async {
        loop {
            let event = audit.recv().await.expect("audit stream closed");
            if event.to == state && task.map_or(true, |id| event.task == id) {
                return event;
            }
        }
    })
    .await
    .unwrap_or_else(|_| panic!("no task reached {state} in time"))
}

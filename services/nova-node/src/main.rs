//! Nova service binary.
//!
//! Wires the alert feed, scheduling engine, observation dispatcher,
//! feedback monitor, and history archive together, then serves the
//! operational HTTP surface. Startup failures (bad config, unopenable
//! archive, unreachable feed broker, occupied ops port) exit non-zero;
//! after startup the service degrades instead of exiting.

use anyhow::Context;
use axum::routing::{get, post};
use axum::Router;
use chrono::Utc;
use nova_archive::{Archive, ArchiveWriter, Recorder};
use nova_core::config::NovaConfig;
use nova_core::{logging, TelescopeId};
use nova_dispatch::{FeedbackMonitor, MonitorHandle, ObservationDispatcher};
use nova_ingest::{AlertFeed, AlertIngestor};
use nova_registry::{AlwaysVisible, Capabilities, ResourceRegistry, VisibilityModel};
use nova_scheduler::{PriorityClassifier, SchedulerHandle, SchedulingEngine};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tower::ServiceBuilder;
use tracing::{info, warn};

mod feed;
mod handlers;
mod network;
mod state;

use feed::SocketAlertFeed;
use network::HttpTelescopeNetwork;
use state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::init();

    let config = match parse_config_path() {
        Some(path) => {
            info!(path = %path, "loading configuration");
            NovaConfig::from_file(&path).with_context(|| format!("loading config from {path}"))?
        }
        None => {
            info!("no config file given, running on defaults");
            NovaConfig::default()
        }
    };

    let archive =
        Arc::new(Archive::open(&config.archive.path).context("opening history archive")?);

    let registry = Arc::new(ResourceRegistry::new(config.telescopes.iter().map(|scope| {
        (
            TelescopeId::new(scope.id.as_str()),
            Capabilities::new(scope.instruments.iter().cloned(), scope.filters.iter().cloned()),
            Arc::new(AlwaysVisible) as Arc<dyn VisibilityModel>,
        )
    })));
    if config.telescopes.is_empty() {
        warn!("no telescopes configured, every alert will wait as pending");
    }

    let policy = config.scheduler.clone();
    let (request_tx, request_rx) = mpsc::channel(policy.request_queue_capacity);
    let (dispatch_tx, dispatch_rx) = mpsc::channel(policy.dispatch_queue_capacity);
    let (monitor_tx, monitor_rx) = mpsc::channel(policy.dispatch_queue_capacity);
    let (audit_tx, mut audit_rx) = mpsc::channel(256);
    let (record_tx, record_rx) = mpsc::channel(256);

    let scheduler = SchedulerHandle::new(request_tx);
    let monitor = MonitorHandle::new(monitor_tx);
    let recorder = Recorder::new(record_tx);

    tokio::spawn(ArchiveWriter::new(archive.clone()).run(record_rx));

    // Lifecycle audit events flow write-behind into the archive.
    let audit_recorder = recorder.clone();
    tokio::spawn(async move {
        while let Some(event) = audit_rx.recv().await {
            audit_recorder.task_event(event);
        }
    });

    let engine = SchedulingEngine::new(
        policy.clone(),
        PriorityClassifier::new(config.classifier.clone()),
        registry.clone(),
        dispatch_tx,
        Some(audit_tx),
    );
    tokio::spawn(engine.run(request_rx));

    let network = Arc::new(
        HttpTelescopeNetwork::new(&config.telescopes).context("building telescope network client")?,
    );
    let dispatcher = ObservationDispatcher::new(
        network,
        config.dispatch.clone(),
        scheduler.clone(),
        monitor.clone(),
    );
    tokio::spawn(dispatcher.run(dispatch_rx));

    tokio::spawn(FeedbackMonitor::new(registry.clone(), scheduler.clone()).run(monitor_rx));

    // Periodic re-evaluation. Ticks are dropped under backpressure.
    let ticker_handle = scheduler.clone();
    let tick_period = Duration::from_secs(policy.tick_interval_secs.max(1));
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(tick_period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            ticker_handle.tick();
        }
    });

    match &config.feed.endpoint {
        Some(endpoint) => {
            let mut feed = SocketAlertFeed::new(endpoint.clone());
            feed.connect()
                .await
                .with_context(|| format!("subscribing to alert feed at {endpoint}"))?;
            let ingestor = AlertIngestor::new(feed, config.feed.clone(), scheduler.clone())
                .with_recorder(recorder);
            tokio::spawn(async move {
                if let Err(err) = ingestor.run().await {
                    warn!(error = %err, "alert ingestion stopped");
                }
            });
        }
        None => warn!("no feed endpoint configured, running without live alert ingestion"),
    }

    let app_state = Arc::new(AppState {
        registry,
        archive,
        scheduler,
        monitor,
        started_at: Utc::now(),
    });

    let app = Router::new()
        .route("/health", get(handlers::health))
        .route("/telescopes", get(handlers::list_telescopes))
        .route("/telescopes/:id/queue", get(handlers::telescope_queue))
        .route("/telescopes/:id/availability", post(handlers::set_availability))
        .route("/history/alerts", get(handlers::recent_alerts))
        .route("/history/tasks", get(handlers::recent_tasks))
        .route("/tasks/:id/cancel", post(handlers::cancel_task))
        .route("/outcomes", post(handlers::report_outcome))
        .with_state(app_state)
        .layer(ServiceBuilder::new().into_inner());

    let bind_addr = format!("0.0.0.0:{}", config.ops.port);
    let listener = TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("binding ops listener on {bind_addr}"))?;
    info!(addr = %bind_addr, "nova node listening");

    axum::serve(listener, app).await?;
    Ok(())
}

/// `--config <path>` or `--config=<path>` from the command line, else
/// the `NOVA_CONFIG` environment variable.
fn parse_config_path() -> Option<String> {
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        if arg == "--config" {
            return args.next();
        }
        if let Some(path) = arg.strip_prefix("--config=") {
            return Some(path.to_string());
        }
    }
    std::env::var("NOVA_CONFIG").ok()
}

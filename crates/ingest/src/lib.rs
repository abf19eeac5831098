//! Alert ingestion: feed consumption, deduplication, normalization.
//!
//! The ingestor sits between a broker-backed alert feed and the
//! scheduling engine. It reconnects with jittered exponential backoff
//! when the feed drops, filters redelivered notices through a bounded
//! dedup window, normalizes surviving notices into [`Alert`] records,
//! tags cross-feed duplicates of transients already being followed up,
//! and hands the result to the scheduler. Malformed notices are logged
//! and dropped; they never take the ingest loop down.

pub mod dedup;
pub mod normalize;

pub use dedup::{DedupWindow, KnownTransients, NoticeVerdict};
pub use normalize::{kind_for_topic, parse_notice, ParseError};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use nova_archive::Recorder;
use nova_core::config::FeedConfig;
use nova_core::{Alert, Classify, ErrorClass};
use nova_scheduler::{ScheduleRequest, SchedulerError, SchedulerHandle};
use std::hash::{Hash, Hasher};
use thiserror::Error;
use tracing::{debug, info, warn};

/// One undecoded message from the alert feed.
#[derive(Debug, Clone)]
pub struct RawNotice {
    /// Broker topic the notice arrived on.
    pub topic: String,
    /// Raw payload bytes, expected to be JSON.
    pub payload: Vec<u8>,
    pub received_at: DateTime<Utc>,
}

#[derive(Debug, Error)]
pub enum FeedError {
    /// The connection dropped; reconnecting may succeed.
    #[error("feed connection lost: {0}")]
    ConnectionLost(String),
    /// The feed has shut down for good.
    #[error("feed closed")]
    Closed,
}

impl Classify for FeedError {
    fn class(&self) -> ErrorClass {
        match self {
            FeedError::ConnectionLost(_) => ErrorClass::Transient,
            FeedError::Closed => ErrorClass::Fatal,
        }
    }
}

/// A source of raw alert notices, typically a Kafka-style broker
/// subscription.
#[async_trait]
pub trait AlertFeed: Send {
    /// (Re)establish the subscription.
    async fn connect(&mut self) -> Result<(), FeedError>;

    /// Wait for the next notice.
    async fn next_notice(&mut self) -> Result<RawNotice, FeedError>;
}

/// Jittered exponential backoff for feed reconnects.
#[derive(Debug)]
pub struct Backoff {
    base: std::time::Duration,
    cap: std::time::Duration,
    attempt: u32,
}

impl Backoff {
    pub fn new(base_ms: u64, cap_ms: u64) -> Self {
        Self {
            base: std::time::Duration::from_millis(base_ms.max(1)),
            cap: std::time::Duration::from_millis(cap_ms.max(base_ms.max(1))),
            attempt: 0,
        }
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    /// Next delay: `base * 2^attempt`, capped, then scaled by a random
    /// factor in [0.5, 1.0] so a fleet of consumers does not reconnect
    /// in lockstep.
    pub fn next_delay(&mut self) -> std::time::Duration {
        let exp = self
            .base
            .saturating_mul(1u32 << self.attempt.min(16))
            .min(self.cap);
        self.attempt = self.attempt.saturating_add(1);
        exp.mul_f64(0.5 + rand::random::<f64>() * 0.5)
    }
}

/// The alert ingestion loop.
pub struct AlertIngestor<F: AlertFeed> {
    feed: F,
    config: FeedConfig,
    scheduler: SchedulerHandle,
    dedup: DedupWindow,
    known: KnownTransients,
    recorder: Option<Recorder>,
}

impl<F: AlertFeed> AlertIngestor<F> {
    pub fn new(feed: F, config: FeedConfig, scheduler: SchedulerHandle) -> Self {
        let retention = Duration::seconds(config.dedup_window_secs as i64);
        let dedup = DedupWindow::new(retention);
        let known = KnownTransients::new(
            config.duplicate_match_radius_deg,
            Duration::seconds(config.duplicate_match_window_secs as i64),
            retention,
        );
        Self {
            feed,
            config,
            scheduler,
            dedup,
            known,
            recorder: None,
        }
    }

    /// Record every accepted notice (originals and revisions) to the
    /// history archive.
    pub fn with_recorder(mut self, recorder: Recorder) -> Self {
        self.recorder = Some(recorder);
        self
    }

    /// Consume the feed until it closes or the scheduler goes away.
    pub async fn run(mut self) -> Result<(), SchedulerError> {
        let mut backoff = Backoff::new(self.config.reconnect_base_ms, self.config.reconnect_cap_ms);

        loop {
            match self.feed.next_notice().await {
                Ok(notice) => {
                    backoff.reset();
                    self.process(notice).await?;
                }
                Err(FeedError::Closed) => {
                    info!("alert feed closed, ingestion stopping");
                    return Ok(());
                }
                Err(err) => {
                    warn!(error = %err, "alert feed dropped, reconnecting");
                    if !self.reconnect(&mut backoff).await {
                        return Ok(());
                    }
                }
            }
        }
    }

    /// Reconnect with backoff. Returns false if the feed closed for
    /// good. Notices published while we were away may be lost; the
    /// dedup window absorbs any the broker replays.
    async fn reconnect(&mut self, backoff: &mut Backoff) -> bool {
        loop {
            let delay = backoff.next_delay();
            debug!(delay_ms = delay.as_millis() as u64, "waiting before reconnect");
            tokio::time::sleep(delay).await;

            match self.feed.connect().await {
                Ok(()) => {
                    info!("alert feed reconnected");
                    return true;
                }
                Err(FeedError::Closed) => {
                    info!("alert feed closed during reconnect");
                    return false;
                }
                Err(err) => warn!(error = %err, "reconnect attempt failed"),
            }
        }
    }

    async fn process(&mut self, notice: RawNotice) -> Result<(), SchedulerError> {
        let mut alert = match normalize::parse_notice(&notice) {
            Ok(alert) => alert,
            Err(err) => {
                warn!(topic = %notice.topic, error = %err, "dropping malformed notice");
                return Ok(());
            }
        };

        let digest = payload_digest(&notice.payload);
        match self.dedup.observe(&alert.id, digest, alert.received_at) {
            NoticeVerdict::Duplicate => {
                debug!(alert = %alert.id, "redelivered notice ignored");
                Ok(())
            }
            NoticeVerdict::Revised => {
                info!(alert = %alert.id, astrophysical = alert.astrophysical, "revised notice");
                if let Some(recorder) = &self.recorder {
                    recorder.alert(alert.clone());
                }
                self.scheduler
                    .submit(ScheduleRequest::AlertUpdated(alert))
                    .await
            }
            NoticeVerdict::New => {
                if let Some(original) = self.known.matches(&alert, alert.received_at) {
                    info!(alert = %alert.id, original = %original, "trigger matches a known transient");
                    alert.duplicate_of = Some(original);
                }
                self.known.remember(&alert);
                info!(
                    alert = %alert.id,
                    kind = %alert.kind,
                    ra = alert.position.ra_deg,
                    dec = alert.position.dec_deg,
                    "new alert"
                );
                if let Some(recorder) = &self.recorder {
                    recorder.alert(alert.clone());
                }
                self.scheduler
                    .submit(ScheduleRequest::AlertArrived(alert))
                    .await
            }
        }
    }
}

fn payload_digest(payload: &[u8]) -> u64 {
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    payload.hash(&mut hasher);
    hasher.finish()
}

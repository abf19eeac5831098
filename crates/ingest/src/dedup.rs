//! Notice deduplication and cross-feed transient matching.

use chrono::{DateTime, Duration, Utc};
use nova_core::{Alert, AlertId, SkyPosition};
use std::collections::HashMap;

/// What a notice turned out to be, relative to what we have seen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeVerdict {
    /// First notice for this trigger.
    New,
    /// Byte-identical repeat of a notice already processed.
    Duplicate,
    /// Same trigger, different content. A coordinate revision or a
    /// retraction.
    Revised,
}

#[derive(Debug)]
struct SeenNotice {
    digest: u64,
    last_seen: DateTime<Utc>,
}

/// Bounded memory of recently seen notices, keyed by trigger id.
///
/// Feeds redeliver notices freely (at-least-once brokers, reconnect
/// replay), so every notice is checked here before it reaches the
/// scheduler. Entries older than the retention window are evicted;
/// a trigger that reappears after eviction is treated as new again.
#[derive(Debug)]
pub struct DedupWindow {
    retention: Duration,
    seen: HashMap<AlertId, SeenNotice>,
}

impl DedupWindow {
    pub fn new(retention: Duration) -> Self {
        Self {
            retention,
            seen: HashMap::new(),
        }
    }

    /// Record a notice and classify it against the window.
    pub fn observe(&mut self, id: &AlertId, digest: u64, now: DateTime<Utc>) -> NoticeVerdict {
        self.seen.retain(|_, entry| now - entry.last_seen < self.retention);

        match self.seen.get_mut(id) {
            Some(entry) if entry.digest == digest => {
                entry.last_seen = now;
                NoticeVerdict::Duplicate
            }
            Some(entry) => {
                entry.digest = digest;
                entry.last_seen = now;
                NoticeVerdict::Revised
            }
            None => {
                self.seen.insert(id.clone(), SeenNotice { digest, last_seen: now });
                NoticeVerdict::New
            }
        }
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}

#[derive(Debug)]
struct KnownTransient {
    id: AlertId,
    position: SkyPosition,
    event_time: DateTime<Utc>,
    received_at: DateTime<Utc>,
}

/// Recently followed-up transients, for matching triggers across feeds.
///
/// Different observatories assign their own trigger ids to the same
/// physical event. Two triggers close on the sky and close in event
/// time are taken to be one transient, and the later arrival is tagged
/// with the id of the first.
#[derive(Debug)]
pub struct KnownTransients {
    match_radius_deg: f64,
    match_window: Duration,
    retention: Duration,
    entries: Vec<KnownTransient>,
}

impl KnownTransients {
    pub fn new(match_radius_deg: f64, match_window: Duration, retention: Duration) -> Self {
        Self {
            match_radius_deg,
            match_window,
            retention,
            entries: Vec::new(),
        }
    }

    /// Find an earlier transient this alert duplicates, if any.
    pub fn matches(&mut self, alert: &Alert, now: DateTime<Utc>) -> Option<AlertId> {
        self.entries.retain(|e| now - e.received_at < self.retention);

        self.entries
            .iter()
            .find(|entry| {
                entry.id != alert.id
                    && entry.position.separation_deg(&alert.position) <= self.match_radius_deg
                    && (entry.event_time - alert.event_time).abs() <= self.match_window
            })
            .map(|entry| entry.id.clone())
    }

    pub fn remember(&mut self, alert: &Alert) {
        self.entries.push(KnownTransient {
            id: alert.id.clone(),
            position: alert.position,
            event_time: alert.event_time,
            received_at: alert.received_at,
        });
    }
}

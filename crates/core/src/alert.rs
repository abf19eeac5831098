//! Normalized alert records.
//!
//! An [`Alert`] is the immutable, feed-independent form of one transient
//! event notice. Ingestion creates it; nothing mutates it afterwards.
//! Coordinate revisions and retractions arrive as *new* notices and are
//! represented as separate events, never as in-place edits.

use crate::types::{AlertId, EventKind, SkyPosition};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// One normalized transient event notice.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    /// Trigger identifier assigned by the originating observatory.
    pub id: AlertId,
    /// Event class.
    pub kind: EventKind,
    /// Best-estimate sky position with uncertainty.
    pub position: SkyPosition,
    /// When the event occurred (observatory clock).
    pub event_time: DateTime<Utc>,
    /// When we received the notice.
    pub received_at: DateTime<Utc>,
    /// Detection significance (image SNR or equivalent), when reported.
    pub significance: Option<f64>,
    /// Whether the originating observatory considers the event
    /// astrophysical. A later notice may retract this.
    pub astrophysical: bool,
    /// After this instant follow-up is scientifically useless.
    pub expires_at: Option<DateTime<Utc>>,
    /// Set when this trigger matches a transient already being followed
    /// up from another feed (same sky location, close in time).
    pub duplicate_of: Option<AlertId>,
}

impl Alert {
    /// Elapsed time since the notice arrived.
    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        now - self.received_at
    }

    /// True once the alert's hard expiry has passed.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|t| t <= now)
    }
}

/// Instrument setup requested for one observation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstrumentConfig {
    /// Instrument name as known to the telescope network.
    pub instrument: String,
    /// Filter, where the instrument takes one.
    pub filter: Option<String>,
    /// Single-exposure length in seconds.
    pub exposure_secs: f64,
    /// Number of exposures to take.
    pub exposure_count: u32,
}

impl InstrumentConfig {
    /// Total open-shutter time for the request.
    pub fn total_exposure(&self) -> Duration {
        let total = self.exposure_secs * f64::from(self.exposure_count);
        Duration::milliseconds((total * 1000.0) as i64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn alert_at(received: i64, expires: Option<i64>) -> Alert {
        let t0 = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        Alert {
            id: AlertId::new("EP240101a"),
            kind: EventKind::FastXrayTransient,
            position: SkyPosition::new(150.0, 20.0, 0.05),
            event_time: t0,
            received_at: t0 + Duration::seconds(received),
            significance: Some(12.5),
            astrophysical: true,
            expires_at: expires.map(|s| t0 + Duration::seconds(s)),
            duplicate_of: None,
        }
    }

    #[test]
    fn age_is_measured_from_receipt() {
        let alert = alert_at(10, None);
        let now = alert.received_at + Duration::seconds(90);
        assert_eq!(alert.age(now), Duration::seconds(90));
    }

    #[test]
    fn expiry_is_inclusive_of_the_deadline() {
        let alert = alert_at(0, Some(600));
        let deadline = alert.expires_at.unwrap();
        assert!(!alert.is_expired(deadline - Duration::seconds(1)));
        assert!(alert.is_expired(deadline));
    }

    #[test]
    fn total_exposure_sums_all_exposures() {
        let config = InstrumentConfig {
            instrument: "optical-imager".into(),
            filter: Some("r".into()),
            exposure_secs: 30.0,
            exposure_count: 4,
        };
        assert_eq!(config.total_exposure(), Duration::seconds(120));
    }
}

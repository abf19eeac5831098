//! Identifier newtypes and sky/time primitives.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Identifier of a transient event as assigned by the originating feed.
///
/// Trigger identifiers are opaque strings; two notices with the same
/// `AlertId` describe the same transient.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AlertId(String);

impl AlertId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AlertId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of one observation task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TaskId(Uuid);

impl TaskId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for TaskId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a telescope in the follow-up network.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TelescopeId(String);

impl TelescopeId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TelescopeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The class of transient event a notice describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// Gamma-ray burst trigger.
    GammaRayBurst,
    /// Gravitational-wave candidate.
    GravitationalWave,
    /// Fast X-ray transient (e.g. Einstein Probe WXT triggers).
    FastXrayTransient,
    /// Supernova candidate from a survey feed.
    SupernovaCandidate,
    /// Recognized notice whose event class is not one we model.
    Unknown,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EventKind::GammaRayBurst => "gamma_ray_burst",
            EventKind::GravitationalWave => "gravitational_wave",
            EventKind::FastXrayTransient => "fast_xray_transient",
            EventKind::SupernovaCandidate => "supernova_candidate",
            EventKind::Unknown => "unknown",
        };
        write!(f, "{s}")
    }
}

/// Urgency class assigned to an alert by the priority classifier.
///
/// Ordered so that a larger value means more urgent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PriorityClass {
    Low,
    Normal,
    High,
    Critical,
}

impl PriorityClass {
    /// Base weight multiplied by the decay curve to produce the
    /// time-varying priority score.
    pub fn weight(&self) -> f64 {
        match self {
            PriorityClass::Low => 1.0,
            PriorityClass::Normal => 10.0,
            PriorityClass::High => 100.0,
            PriorityClass::Critical => 1000.0,
        }
    }
}

impl fmt::Display for PriorityClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PriorityClass::Low => "low",
            PriorityClass::Normal => "normal",
            PriorityClass::High => "high",
            PriorityClass::Critical => "critical",
        };
        write!(f, "{s}")
    }
}

/// Sky coordinates (J2000) with a circular uncertainty region.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SkyPosition {
    /// Right ascension in degrees, [0, 360).
    pub ra_deg: f64,
    /// Declination in degrees, [-90, 90].
    pub dec_deg: f64,
    /// 1-sigma positional uncertainty radius in degrees.
    pub error_deg: f64,
}

impl SkyPosition {
    pub fn new(ra_deg: f64, dec_deg: f64, error_deg: f64) -> Self {
        Self {
            ra_deg,
            dec_deg,
            error_deg,
        }
    }

    /// Great-circle separation to another position, in degrees.
    ///
    /// Haversine form; accurate enough for duplicate-transient matching,
    /// which works at fractions of a degree.
    pub fn separation_deg(&self, other: &SkyPosition) -> f64 {
        let ra1 = self.ra_deg.to_radians();
        let dec1 = self.dec_deg.to_radians();
        let ra2 = other.ra_deg.to_radians();
        let dec2 = other.dec_deg.to_radians();

        let sin_ddec = ((dec2 - dec1) / 2.0).sin();
        let sin_dra = ((ra2 - ra1) / 2.0).sin();
        let h = sin_ddec * sin_ddec + dec1.cos() * dec2.cos() * sin_dra * sin_dra;
        2.0 * h.sqrt().min(1.0).asin().to_degrees()
    }
}

/// A half-open interval `[start, end)` in UTC.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeWindow {
    /// Create a window. Returns `None` unless `start < end`.
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Option<Self> {
        if start < end {
            Some(Self { start, end })
        } else {
            None
        }
    }

    /// True if the two windows share any instant.
    pub fn overlaps(&self, other: &TimeWindow) -> bool {
        self.start < other.end && other.start < self.end
    }

    /// True if `t` falls inside the window.
    pub fn contains(&self, t: DateTime<Utc>) -> bool {
        self.start <= t && t < self.end
    }

    pub fn duration(&self) -> Duration {
        self.end - self.start
    }

    /// Intersection of two windows, if non-empty.
    pub fn intersect(&self, other: &TimeWindow) -> Option<TimeWindow> {
        TimeWindow::new(self.start.max(other.start), self.end.min(other.end))
    }

    /// True if the window closed at or before `now`.
    pub fn has_closed(&self, now: DateTime<Utc>) -> bool {
        self.end <= now
    }
}

//! Visibility models.
//!
//! The ephemeris math that decides when a telescope can see a target is
//! external to Nova; the registry only needs the abstract predicate
//! "telescope T can observe this target during window W". Implementors
//! wrap whatever sky model the deployment uses.

use chrono::Duration;
use nova_core::{SkyPosition, TimeWindow};

/// Per-telescope visibility predicate.
pub trait VisibilityModel: Send + Sync {
    /// The earliest window within `within` during which the target is
    /// observable for at least `min_duration`, or `None`.
    fn feasible_window(
        &self,
        target: &SkyPosition,
        within: &TimeWindow,
        min_duration: Duration,
    ) -> Option<TimeWindow>;
}

/// Trivial model: every target is always observable. Used in tests and
/// for space-based or all-sky instruments.
pub struct AlwaysVisible;

impl VisibilityModel for AlwaysVisible {
    fn feasible_window(
        &self,
        _target: &SkyPosition,
        within: &TimeWindow,
        min_duration: Duration,
    ) -> Option<TimeWindow> {
        (within.duration() >= min_duration).then_some(*within)
    }
}

/// Table-driven model: the telescope is up during fixed windows
/// (e.g. nightly dark-time intervals precomputed by an external
/// ephemeris service), independent of target.
pub struct UptimeTable {
    windows: Vec<TimeWindow>,
}

impl UptimeTable {
    /// Build from precomputed windows. Windows are sorted by start.
    pub fn new(mut windows: Vec<TimeWindow>) -> Self {
        windows.sort_by_key(|w| w.start);
        Self { windows }
    }
}

impl VisibilityModel for UptimeTable {
    fn feasible_window(
        &self,
        _target: &SkyPosition,
        within: &TimeWindow,
        min_duration: Duration,
    ) -> Option<TimeWindow> {
        self.windows
            .iter()
            .filter_map(|w| w.intersect(within))
            .find(|w| w.duration() >= min_duration)
    }
}
